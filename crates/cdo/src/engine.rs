//! Fluent entry point tying the schema to every operation.
//!
//! ```rust
//! # use cdo::{Engine, Format, PrimitiveType, SchemaRegistry};
//! # let registry = SchemaRegistry::builder()
//! #     .complex("Note", |t| t.required("Text", PrimitiveType::Text))
//! #     .build()
//! #     .unwrap();
//! let engine = Engine::new(registry);
//! let note = engine.parse("Note").format(Format::Json).from_str(r#"{"Text":"hi"}"#)?;
//! let xml = engine.write(&note).format(Format::Xml).to_string()?;
//! assert!(xml.ends_with("<Note><Text>hi</Text></Note>"));
//! # Ok::<(), cdo::Error>(())
//! ```

use std::io::{self, Read, Write};
use std::sync::Arc;

use crate::codec::{self, DelimitedOptions, Encoding, Format, ParseOptions};
use crate::compact::{self, CompactBuffer, CompactView, EncodingContext, ProjectionPool};
use crate::error::{Error, Result, WriteError};
use crate::model::Node;
use crate::preon::{self, PreonBuffer};
use crate::schema::SchemaRegistry;
use crate::transform::{TransformEngine, TransformOptions};
use crate::validate::{self, ValidateOptions, ValidationReport};
use crate::write::{self, Intercept, MarshalHook, WriteOptions};

/// A schema registry plus the operations that need it.
#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<SchemaRegistry>,
}

impl Engine {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self::from_shared(Arc::new(registry))
    }

    pub fn from_shared(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    /// Creates an empty object of a schema type.
    pub fn new_node(&self, ty: &str) -> Result<Node> {
        Ok(self.registry.new_node(ty)?)
    }

    /// Starts parsing a message whose root is of type `type_name`.
    pub fn parse<'e>(&'e self, type_name: &'e str) -> ParseRequest<'e> {
        ParseRequest {
            engine: self,
            type_name,
            options: ParseOptions::default(),
        }
    }

    /// Fail-fast validation.
    pub fn validate(&self, node: &Node) -> Result<()> {
        validate::validate(node).map_err(|v| Error::Validation(v.into_owned()))
    }

    pub fn validate_with(&self, node: &Node, options: &ValidateOptions) -> Result<()> {
        validate::validate_with(node, options).map_err(|v| Error::Validation(v.into_owned()))
    }

    /// Exhaustive validation.
    pub fn validate_fully<'n>(&self, node: &'n Node) -> ValidationReport<'n> {
        validate::validate_fully(node)
    }

    /// Starts writing a graph.
    pub fn write<'a>(&'a self, node: &'a Node) -> WriteRequest<'a> {
        WriteRequest {
            engine: self,
            node,
            options: WriteOptions::default(),
            hook: None,
        }
    }

    pub fn to_compact(&self, node: &Node) -> Result<CompactBuffer> {
        Ok(compact::encode(&self.registry, node)?)
    }

    pub fn to_compact_with_context(&self, node: &Node) -> Result<(CompactBuffer, EncodingContext)> {
        Ok(compact::encode_with_context(&self.registry, node)?)
    }

    pub fn to_preon(&self, node: &Node) -> Result<PreonBuffer> {
        Ok(preon::encode(&self.registry, node)?)
    }

    pub fn to_preon_with_context(&self, node: &Node) -> Result<(PreonBuffer, EncodingContext)> {
        Ok(preon::encode_with_context(&self.registry, node)?)
    }

    /// Decodes a compact buffer into a graph.
    pub fn to_cdo(&self, buffer: &CompactBuffer) -> Result<Node> {
        Ok(buffer.to_node(&self.registry)?)
    }

    /// Decodes a Preon buffer into a graph.
    pub fn preon_to_cdo(&self, buffer: &PreonBuffer) -> Result<Node> {
        Ok(buffer.to_node(&self.registry)?)
    }

    /// Re-encodes a compact buffer as Preon.
    pub fn compact_to_preon(&self, buffer: &CompactBuffer) -> Result<PreonBuffer> {
        self.to_preon(&self.to_cdo(buffer)?)
    }

    pub fn preon_to_compact(&self, buffer: &PreonBuffer) -> Result<CompactBuffer> {
        self.to_compact(&self.preon_to_cdo(buffer)?)
    }

    /// Borrowed view of a compact buffer's root object.
    pub fn view<'a>(&'a self, buffer: &'a CompactBuffer) -> Result<CompactView<'a>> {
        Ok(buffer.root(&self.registry)?)
    }

    /// Pool of thread-local projections for this schema.
    pub fn pool(&self) -> ProjectionPool {
        ProjectionPool::new(Arc::clone(&self.registry))
    }

    /// Transform engine from this schema to `target`.
    pub fn transforms(&self, target: Arc<SchemaRegistry>) -> TransformEngine {
        TransformEngine::new(Arc::clone(&self.registry), target)
    }

    pub fn transforms_with(&self, target: Arc<SchemaRegistry>, options: TransformOptions) -> TransformEngine {
        TransformEngine::with_options(Arc::clone(&self.registry), target, options)
    }
}

/// A parse in preparation; see [`Engine::parse`].
#[must_use]
#[derive(Debug)]
pub struct ParseRequest<'e> {
    engine: &'e Engine,
    type_name: &'e str,
    options: ParseOptions,
}

impl ParseRequest<'_> {
    /// Fixes the input format instead of sniffing it.
    pub fn format(mut self, format: Format) -> Self {
        self.options.format = Some(format);
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.options.encoding = encoding;
        self
    }

    pub fn delimited(mut self, options: DelimitedOptions) -> Self {
        self.options.delimited = options;
        self
    }

    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.options.max_depth = max_depth;
        self
    }

    pub fn from_reader<R: Read>(self, reader: R) -> Result<Node> {
        Ok(codec::parse(&self.engine.registry, self.type_name, reader, &self.options)?)
    }

    pub fn from_slice(self, bytes: &[u8]) -> Result<Node> {
        self.from_reader(bytes)
    }

    pub fn from_str(self, text: &str) -> Result<Node> {
        self.from_reader(text.as_bytes())
    }
}

/// A write in preparation; see [`Engine::write`].
#[must_use]
pub struct WriteRequest<'a> {
    engine: &'a Engine,
    node: &'a Node,
    options: WriteOptions,
    hook: Option<&'a mut dyn MarshalHook>,
}

impl<'a> WriteRequest<'a> {
    pub fn format(mut self, format: Format) -> Self {
        self.options.format = format;
        self
    }

    /// Indents XML and JSON output.
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.options.pretty = pretty;
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.options.encoding = encoding;
        self
    }

    pub fn delimited(mut self, options: DelimitedOptions) -> Self {
        self.options.delimited = options;
        self
    }

    /// Wraps compact output in a zstd envelope.
    pub fn compression(mut self, level: i32) -> Self {
        self.options.compact.compression = Some(level);
        self
    }

    /// Which objects the hook is offered.
    pub fn intercept(mut self, intercept: Intercept) -> Self {
        self.options.intercept = intercept;
        self
    }

    pub fn options(mut self, options: WriteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_hook(mut self, hook: &'a mut dyn MarshalHook) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn to<W: Write>(self, out: W) -> Result<()> {
        Ok(write::write_to(
            &self.engine.registry,
            self.node,
            &self.options,
            self.hook,
            out,
        )?)
    }

    pub fn to_vec(self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.to(&mut out)?;
        Ok(out)
    }

    /// Writes a text format into a string.
    pub fn to_string(self) -> Result<String> {
        let format = self.options.format;
        if format.is_binary() {
            return Err(Error::Write(WriteError::UnsupportedShape {
                format,
                ty: self.node.type_name().to_string(),
                reason: "binary output is not text",
            }));
        }
        let encoding = self.options.encoding;
        let bytes = self.to_vec()?;
        encoding.decode(bytes).ok_or_else(|| {
            Error::Write(WriteError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                "output is not text",
            )))
        })
    }
}
