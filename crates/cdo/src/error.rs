//! Error types for schema loading, parsing, validation, writing, binary
//! encoding and transforms.

use std::io;

use thiserror::Error;

use crate::codec::{Encoding, Format};
use crate::model::Node;
use crate::schema::PrimitiveType;
use crate::validate::ViolationKind;

/// Parse error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// P001: Malformed token or structure
    Malformed,
    /// P002: Field or element not declared by the schema
    UnexpectedField,
    /// P003: Lexical value does not fit the field's primitive type
    InvalidValue,
    /// P004: Character encoding problem
    Encoding,
    /// P005: Resource limit exceeded
    LimitExceeded,
    /// P006: Schema shape unsupported by the format
    UnsupportedShape,
    /// P007: Embedded binary buffer failed to decode
    Binary,
}

impl ErrorCode {
    /// Returns the error code string (e.g., "P001").
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::Malformed => "P001",
            ErrorCode::UnexpectedField => "P002",
            ErrorCode::InvalidValue => "P003",
            ErrorCode::Encoding => "P004",
            ErrorCode::LimitExceeded => "P005",
            ErrorCode::UnsupportedShape => "P006",
            ErrorCode::Binary => "P007",
        }
    }
}

/// Error while building or looking up a schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("duplicate type {name:?}")]
    DuplicateType { name: String },

    #[error("duplicate field {field:?} in type {ty:?}")]
    DuplicateField { ty: String, field: String },

    #[error("field {field:?} of type {ty:?} references unknown type {target:?}")]
    UnresolvedType {
        ty: String,
        field: String,
        target: String,
    },

    #[error("type {name:?} is not registered")]
    TypeNotFound { name: String },

    #[error("field {field:?} of type {ty:?}: {reason}")]
    InvalidField {
        ty: String,
        field: String,
        reason: String,
    },

    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid schema definition: {0}")]
    Definition(String),
}

/// Error when a lexical string does not fit a primitive type.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{input:?} is not a valid {expected} value: {reason}")]
pub struct LexicalError {
    pub expected: PrimitiveType,
    pub input: String,
    pub reason: &'static str,
}

/// Error when mutating a [`Node`] through its typed setters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("type {ty:?} has no field {field:?}")]
    UnknownField { ty: String, field: String },

    #[error("field {field:?} is {actual}, not {expected}")]
    WrongKind {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("field {field:?} expects {expected} but got {found}")]
    TypeMismatch {
        field: String,
        expected: PrimitiveType,
        found: PrimitiveType,
    },

    #[error("field {field:?} expects object of type {expected:?} but got {found:?}")]
    ChildTypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    #[error("field {field:?} cannot hold {value}: {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: &'static str,
    },
}

/// Error while parsing a text or binary message into an object graph.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("[P001] malformed {context} at {line}:{column}: {detail}")]
    Malformed {
        context: &'static str,
        line: usize,
        column: usize,
        detail: String,
    },

    #[error("[P001] expected root {expected:?} but found {found:?}")]
    UnexpectedRoot { expected: String, found: String },

    #[error("[P002] type {ty:?} has no field {field:?} (at {line}:{column})")]
    UnexpectedField {
        ty: String,
        field: String,
        line: usize,
        column: usize,
    },

    #[error("[P002] field {field:?} of type {ty:?} occurs more than once (at {line}:{column})")]
    DuplicateField {
        ty: String,
        field: String,
        line: usize,
        column: usize,
    },

    #[error("[P003] field {field:?} at {line}:{column}: {source}")]
    InvalidValue {
        field: String,
        line: usize,
        column: usize,
        #[source]
        source: LexicalError,
    },

    #[error("[P004] document declares encoding {declared:?} but {requested:?} was requested")]
    EncodingMismatch {
        declared: String,
        requested: Encoding,
    },

    #[error("[P004] invalid {encoding:?} byte sequence at {line}:{column}")]
    InvalidEncoding {
        encoding: Encoding,
        line: usize,
        column: usize,
    },

    #[error("[P005] {what} exceeds limit of {limit}")]
    LimitExceeded { what: &'static str, limit: usize },

    #[error("[P006] {format:?} cannot represent type {ty:?}: {reason}")]
    UnsupportedShape {
        format: Format,
        ty: String,
        reason: &'static str,
    },

    #[error("[P007] {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ParseError {
    /// Returns the error code for this error, if it has one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ParseError::Malformed { .. } | ParseError::UnexpectedRoot { .. } => {
                Some(ErrorCode::Malformed)
            }
            ParseError::UnexpectedField { .. } | ParseError::DuplicateField { .. } => {
                Some(ErrorCode::UnexpectedField)
            }
            ParseError::InvalidValue { .. } => Some(ErrorCode::InvalidValue),
            ParseError::EncodingMismatch { .. } | ParseError::InvalidEncoding { .. } => {
                Some(ErrorCode::Encoding)
            }
            ParseError::LimitExceeded { .. } => Some(ErrorCode::LimitExceeded),
            ParseError::UnsupportedShape { .. } => Some(ErrorCode::UnsupportedShape),
            ParseError::Decode(_) => Some(ErrorCode::Binary),
            ParseError::Schema(_) | ParseError::Io(_) => None,
        }
    }
}

/// Error during binary decoding of compact or bit-packed buffers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("[E001] invalid magic bytes: {found:?}")]
    InvalidMagic { found: [u8; 4] },

    #[error("[E001] unsupported version: {version}")]
    UnsupportedVersion { version: u8 },

    #[error("[E002] buffer was encoded with schema {found:02x?}, registry is {expected:02x?}")]
    SchemaMismatch { expected: [u8; 8], found: [u8; 8] },

    #[error("[E003] {dict} index {index} out of bounds (size: {size})")]
    IndexOutOfBounds {
        dict: &'static str,
        index: usize,
        size: usize,
    },

    #[error("[E004] invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    #[error("[E005] unexpected end of input while reading {context}")]
    UnexpectedEof { context: &'static str },

    #[error("[E005] varint exceeds maximum length (10 bytes)")]
    VarintTooLong,

    #[error("[E005] varint overflow (value exceeds u64)")]
    VarintOverflow,

    #[error("[E005] {field} length {len} exceeds maximum {max}")]
    LengthExceedsLimit {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("[E005] invalid bool value: {value} (expected 0x00 or 0x01)")]
    InvalidBool { value: u8 },

    #[error("[E005] float value is NaN")]
    FloatIsNan,

    #[error("[E005] nesting depth exceeds {limit}")]
    DepthExceeded { limit: usize },

    #[error("[E005] {count} trailing bytes after {context}")]
    TrailingBytes { context: &'static str, count: usize },

    #[error("[E005] malformed encoding: {context}")]
    MalformedEncoding { context: &'static str },

    #[error("[E005] stored value {input:?} does not fit {expected}")]
    InvalidValue {
        expected: PrimitiveType,
        input: String,
    },

    #[error("[E006] type {ty:?} has no field {field:?}")]
    UnknownField { ty: String, field: String },

    #[error("[E006] field {field:?} is {actual}, not {expected}")]
    WrongKind {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("[E006] root is {found:?}, expected {expected:?}")]
    UnexpectedRoot { expected: String, found: String },

    #[error("[E005] zstd decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("[E005] decompressed size {actual} doesn't match declared {declared}")]
    UncompressedSizeMismatch { declared: usize, actual: usize },
}

/// Error during binary encoding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodeError {
    #[error("{field} length {len} exceeds maximum {max}")]
    LengthExceedsLimit {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("nesting depth exceeds {limit}")]
    DepthExceeded { limit: usize },

    #[error("{path}: required field is missing")]
    MissingRequired { path: String },

    #[error("{path}: {reason}")]
    NotEncodable { path: String, reason: String },

    #[error("node of type {found:?} does not belong to the registry")]
    ForeignType { found: String },

    #[error("zstd compression failed: {0}")]
    CompressionFailed(String),
}

/// Owned form of a validation failure, suitable for propagation with `?`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{path}: {kind}")]
pub struct ValidationError {
    /// Location of the failing field, e.g. `/Customers/Customer[0]/Name`.
    pub path: String,
    /// Name of the failing field.
    pub field: String,
    /// What went wrong.
    pub kind: ViolationKind,
    /// Copy of the object that owns the failing field.
    pub object: Box<Node>,
}

/// Error while marshalling a graph to an output stream.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{format:?} cannot represent type {ty:?}: {reason}")]
    UnsupportedShape {
        format: Format,
        ty: String,
        reason: &'static str,
    },

    #[error("character {ch:?} cannot be written as {encoding:?}")]
    Unencodable { ch: char, encoding: Encoding },

    #[error("marshal hooks are not supported when writing {format:?}")]
    HooksUnsupported { format: Format },

    #[error("sink expected object of type {expected:?} but got {found:?}")]
    SinkTypeMismatch { expected: String, found: String },

    #[error("marshal hook for {ty:?} failed: {reason}")]
    Hook { ty: String, reason: String },

    #[error("nesting depth exceeds {limit}")]
    DepthExceeded { limit: usize },

    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl From<serde_json::Error> for WriteError {
    fn from(e: serde_json::Error) -> Self {
        WriteError::Io(io::Error::from(e))
    }
}

/// Error from the transform engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("no transform named {name:?}")]
    UnknownTransform { name: String },

    #[error("transform {name:?} is already registered")]
    DuplicateTransform { name: String },

    #[error("transform {transform:?} references unknown type {ty:?}")]
    UnknownType { transform: String, ty: String },

    #[error("no transform accepts inputs {inputs:?}")]
    Unmapped { inputs: Vec<String> },

    #[error("inputs {inputs:?} match several transforms: {candidates:?}")]
    Ambiguous {
        inputs: Vec<String>,
        candidates: Vec<String>,
    },

    #[error("transform {transform:?} expects {expected} {side} but got {found}")]
    Arity {
        transform: String,
        side: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("transform {transform:?} {side} slot {slot} expects {expected:?} but got {found:?}")]
    SlotType {
        transform: String,
        side: &'static str,
        slot: usize,
        expected: String,
        found: String,
    },

    #[error("transform {transform:?} produced an invalid graph: {violation}")]
    InvalidOutput {
        transform: String,
        violation: ValidationError,
    },

    #[error("transform {transform:?} failed: {reason}")]
    Failed { transform: String, reason: String },

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Top-level error for [`Engine`](crate::Engine) operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// Result alias using the crate's top-level [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_codes() {
        let err = ParseError::LimitExceeded {
            what: "depth",
            limit: 64,
        };
        assert_eq!(err.code().map(|c| c.code()), Some("P005"));
        assert!(err.to_string().starts_with("[P005]"));

        let err = ParseError::from(DecodeError::VarintTooLong);
        assert_eq!(err.code(), Some(ErrorCode::Binary));
    }

    #[test]
    fn test_lexical_error_message() {
        let err = LexicalError {
            expected: PrimitiveType::Int,
            input: "abc".to_string(),
            reason: "not an integer",
        };
        assert_eq!(err.to_string(), "\"abc\" is not a valid int value: not an integer");
    }
}
