//! CDO: a schema-driven structured object engine.
//!
//! This crate parses messages in several wire formats into a typed in-memory
//! object graph, validates the graph against its schema, renders it back out
//! in any supported format and converts it to two size-optimised binary
//! representations.
//!
//! # Overview
//!
//! - **Schema registry**: named complex types with ordered fields, cardinality,
//!   constraints and per-field common-value dictionaries
//! - **Object graph (CDO)**: read-write [`Node`]s, always instances of exactly
//!   one schema type
//! - **Compact encoding (SDO)**: read-only buffers with random-access views
//! - **Preon**: a bit-packed variant of the compact encoding
//! - **Transforms**: 1:1 and n:m graph-to-graph mappings with type dispatch
//!
//! # Quick Start
//!
//! ```rust
//! use cdo::{Engine, Format, PrimitiveType, SchemaRegistry};
//! use cdo::schema::FieldType;
//!
//! let registry = SchemaRegistry::builder()
//!     .complex("Customers", |t| t.repeated("Customer", FieldType::complex("Customer")))
//!     .complex("Customer", |t| t
//!         .required("CustomerNumber", PrimitiveType::Text)
//!         .optional_with("City", PrimitiveType::Text, |f| f.common_values(["London"])))
//!     .build()
//!     .unwrap();
//! let engine = Engine::new(registry);
//!
//! let xml = "<Customers><Customer><CustomerNumber>C1</CustomerNumber>\
//!            <City>London</City></Customer></Customers>";
//! let file = engine.parse("Customers").from_str(xml).unwrap();
//! engine.validate(&file).unwrap();
//!
//! let json = engine.write(&file).format(Format::Json).to_string().unwrap();
//! assert!(json.contains("\"CustomerNumber\":\"C1\""));
//!
//! let sdo = engine.to_compact(&file).unwrap();
//! assert_eq!(engine.to_cdo(&sdo).unwrap(), file);
//! ```
//!
//! # Modules
//!
//! - [`schema`]: Types, constraints, registry and JSON schema definitions
//! - [`model`]: Values and the object graph
//! - [`codec`]: Text wire formats (XML, JSON, delimited) and format sniffing
//! - [`compact`]: Compact encoding, views and the thread-local projection pool
//! - [`preon`]: Bit-packed encoding
//! - [`validate`]: Fail-fast and exhaustive validation
//! - [`write`]: Marshalling with interception hooks
//! - [`transform`]: Transform engine
//! - [`error`]: Error types
//! - [`limits`]: Resource limits and wire constants

pub mod codec;
pub mod compact;
pub mod engine;
pub mod error;
pub mod limits;
pub mod model;
pub mod preon;
pub mod schema;
pub mod transform;
pub mod validate;
pub mod write;

// Re-export commonly used types at crate root
pub use codec::{DelimitedOptions, Encoding, Format, ParseOptions};
pub use compact::{
    CompactBuffer, CompactOptions, CompactView, EncodingContext, OwnedView, PooledView,
    ProjectionPool,
};
pub use engine::{Engine, ParseRequest, WriteRequest};
pub use error::{
    DecodeError, EncodeError, Error, FieldError, ParseError, SchemaError, TransformError,
    ValidationError, WriteError,
};
pub use model::{Node, Slot, Value};
pub use preon::PreonBuffer;
pub use schema::{Cardinality, Constraint, FieldType, PrimitiveType, SchemaRegistry};
pub use transform::{
    FnTransform, Transform, TransformContext, TransformEngine, TransformOptions,
    TransformSignature,
};
pub use validate::{
    ValidateOptions, ValidationReport, Violation, ViolationKind, validate, validate_fully,
};
pub use write::{HookOutcome, Intercept, MarshalHook, StreamingSink, WriteOptions, hook_fn};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
