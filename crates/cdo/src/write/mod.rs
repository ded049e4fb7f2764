//! Marshalling an object graph to a wire format.
//!
//! Text formats are produced by walking the graph in field declaration order
//! and driving an [`Emitter`]. A [`MarshalHook`] may intercept each complex
//! object before it is written. Hooks get a copy-on-write handle, so edits
//! made inside a hook reach the output but never the caller's graph.

use std::borrow::Cow;
use std::io::Write;

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::codec::delimited::{self, DelimitedEmitter, DelimitedOptions};
use crate::codec::json::JsonEmitter;
use crate::codec::xml::XmlEmitter;
use crate::codec::{Encoding, Format, TextSink};
use crate::compact::{self, CompactOptions};
use crate::error::WriteError;
use crate::limits::MAX_DEPTH;
use crate::model::{Node, Slot, Value};
use crate::preon;
use crate::schema::{FieldDescriptor, SchemaRegistry};

// =============================================================================
// OPTIONS
// =============================================================================

/// Which objects a hook is offered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Intercept {
    /// Every complex object, the root included.
    #[default]
    All,
    None,
    /// Objects whose type name is in the set.
    Types(FxHashSet<String>),
}

impl Intercept {
    pub fn types<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Intercept::Types(names.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, type_name: &str) -> bool {
        match self {
            Intercept::All => true,
            Intercept::None => false,
            Intercept::Types(names) => names.contains(type_name),
        }
    }
}

/// Options for a single write operation.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub format: Format,
    /// Indent XML and JSON output.
    pub pretty: bool,
    pub intercept: Intercept,
    pub encoding: Encoding,
    pub delimited: DelimitedOptions,
    pub compact: CompactOptions,
    pub max_depth: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            format: Format::Xml,
            pretty: false,
            intercept: Intercept::All,
            encoding: Encoding::Utf8,
            delimited: DelimitedOptions::default(),
            compact: CompactOptions::default(),
            max_depth: MAX_DEPTH,
        }
    }
}

impl WriteOptions {
    pub fn new(format: Format) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }
}

// =============================================================================
// EMITTER
// =============================================================================

/// Format-specific rendering driven by the graph walk.
///
/// `field` is `None` for the root object. Repeated fields are bracketed by
/// `start_repeated`/`end_repeated`, with one `scalar` or object per element.
pub(crate) trait Emitter {
    fn begin_document(&mut self) -> Result<(), WriteError> {
        Ok(())
    }

    fn end_document(&mut self) -> Result<(), WriteError> {
        Ok(())
    }

    fn start_object(&mut self, field: Option<&FieldDescriptor>, node: &Node) -> Result<(), WriteError>;

    fn end_object(&mut self, field: Option<&FieldDescriptor>, node: &Node) -> Result<(), WriteError>;

    fn start_repeated(&mut self, _field: &FieldDescriptor) -> Result<(), WriteError> {
        Ok(())
    }

    fn end_repeated(&mut self, _field: &FieldDescriptor) -> Result<(), WriteError> {
        Ok(())
    }

    fn scalar(&mut self, field: &FieldDescriptor, value: &Value) -> Result<(), WriteError>;
}

// =============================================================================
// HOOKS
// =============================================================================

/// Result of offering an object to a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// The hook wrote the object (or chose to omit it).
    Handled,
    /// Default marshalling proceeds with the handle's current content.
    Declined,
}

/// Per-object interception during marshalling.
pub trait MarshalHook {
    /// Called before `node` is written. The hook may edit `node`, which clones
    /// it on first write, and may write any object of the same type through
    /// `sink`.
    fn marshal(
        &mut self,
        node: &mut Cow<'_, Node>,
        sink: &mut StreamingSink<'_>,
    ) -> Result<HookOutcome, WriteError>;
}

/// Adapts a closure into a [`MarshalHook`].
pub struct FnHook<F>(F);

/// Wraps a closure as a hook.
pub fn hook_fn<F>(f: F) -> FnHook<F>
where
    F: FnMut(&mut Cow<'_, Node>, &mut StreamingSink<'_>) -> Result<HookOutcome, WriteError>,
{
    FnHook(f)
}

impl<F> MarshalHook for FnHook<F>
where
    F: FnMut(&mut Cow<'_, Node>, &mut StreamingSink<'_>) -> Result<HookOutcome, WriteError>,
{
    fn marshal(
        &mut self,
        node: &mut Cow<'_, Node>,
        sink: &mut StreamingSink<'_>,
    ) -> Result<HookOutcome, WriteError> {
        (self.0)(node, sink)
    }
}

/// Writes default marshalling of one object at the hook's position.
pub(crate) trait ObjectWriter {
    fn write_object(&mut self, field: Option<&FieldDescriptor>, node: &Node) -> Result<(), WriteError>;
}

/// Output position handed to a hook.
///
/// Objects written here use default marshalling; their descendants are not
/// offered to the hook again.
pub struct StreamingSink<'a> {
    writer: &'a mut dyn ObjectWriter,
    field: Option<&'a FieldDescriptor>,
    expected: &'a str,
    written: bool,
}

impl StreamingSink<'_> {
    /// Type name an object written here must have.
    pub fn type_name(&self) -> &str {
        self.expected
    }

    /// Name of the field being written, `None` for the root.
    pub fn field_name(&self) -> Option<&str> {
        self.field.map(FieldDescriptor::name)
    }

    /// True once an object has been written.
    pub fn is_written(&self) -> bool {
        self.written
    }

    /// Writes `node` in place of the intercepted object.
    pub fn marshal(&mut self, node: &Node) -> Result<(), WriteError> {
        if node.type_name() != self.expected {
            return Err(WriteError::SinkTypeMismatch {
                expected: self.expected.to_string(),
                found: node.type_name().to_string(),
            });
        }
        if self.written {
            return Err(WriteError::Hook {
                ty: self.expected.to_string(),
                reason: "an object was already written at this position".to_string(),
            });
        }
        self.written = true;
        self.writer.write_object(self.field, node)
    }
}

struct Interceptor<'h> {
    hook: &'h mut dyn MarshalHook,
    intercept: &'h Intercept,
}

// =============================================================================
// WALK
// =============================================================================

struct Walker<'e> {
    emitter: &'e mut dyn Emitter,
    depth: usize,
    max_depth: usize,
}

impl Walker<'_> {
    fn object(
        &mut self,
        field: Option<&FieldDescriptor>,
        node: &Node,
        hooks: &mut Option<Interceptor<'_>>,
    ) -> Result<(), WriteError> {
        if let Some(interceptor) = hooks {
            if interceptor.intercept.matches(node.type_name()) {
                let mut handle = Cow::Borrowed(node);
                let mut sink = StreamingSink {
                    writer: &mut *self,
                    field,
                    expected: node.type_name(),
                    written: false,
                };
                let outcome = interceptor.hook.marshal(&mut handle, &mut sink)?;
                let written = sink.written;
                trace!(ty = node.type_name(), ?outcome, "Marshal hook");
                match outcome {
                    HookOutcome::Handled => return Ok(()),
                    HookOutcome::Declined if written => {
                        return Err(WriteError::Hook {
                            ty: node.type_name().to_string(),
                            reason: "declined after writing to the sink".to_string(),
                        });
                    }
                    HookOutcome::Declined => return self.body(field, &handle, hooks),
                }
            }
        }
        self.body(field, node, hooks)
    }

    fn body(
        &mut self,
        field: Option<&FieldDescriptor>,
        node: &Node,
        hooks: &mut Option<Interceptor<'_>>,
    ) -> Result<(), WriteError> {
        if self.depth >= self.max_depth {
            return Err(WriteError::DepthExceeded {
                limit: self.max_depth,
            });
        }
        self.depth += 1;
        self.emitter.start_object(field, node)?;
        for (descriptor, slot) in node.fields() {
            match slot {
                Slot::Absent => {}
                Slot::Scalar(value) => self.emitter.scalar(descriptor, value)?,
                Slot::Scalars(values) => {
                    self.emitter.start_repeated(descriptor)?;
                    for value in values {
                        self.emitter.scalar(descriptor, value)?;
                    }
                    self.emitter.end_repeated(descriptor)?;
                }
                Slot::Child(child) => self.object(Some(descriptor), child, hooks)?,
                Slot::Children(children) => {
                    self.emitter.start_repeated(descriptor)?;
                    for child in children {
                        self.object(Some(descriptor), child, hooks)?;
                    }
                    self.emitter.end_repeated(descriptor)?;
                }
            }
        }
        self.emitter.end_object(field, node)?;
        self.depth -= 1;
        Ok(())
    }
}

impl ObjectWriter for Walker<'_> {
    fn write_object(&mut self, field: Option<&FieldDescriptor>, node: &Node) -> Result<(), WriteError> {
        self.body(field, node, &mut None)
    }
}

// =============================================================================
// ENTRY POINTS
// =============================================================================

/// Writes `node` to `out` in the format selected by `options`.
///
/// Hooks are only supported by text formats.
pub fn write_to<W: Write>(
    registry: &SchemaRegistry,
    node: &Node,
    options: &WriteOptions,
    hook: Option<&mut dyn MarshalHook>,
    mut out: W,
) -> Result<(), WriteError> {
    debug!(
        ty = node.type_name(),
        format = ?options.format,
        hooked = hook.is_some(),
        "Writing message"
    );
    if options.format.is_binary() && hook.is_some() {
        return Err(WriteError::HooksUnsupported {
            format: options.format,
        });
    }
    let encoding = options.encoding;
    match options.format {
        Format::Xml => {
            let mut emitter = XmlEmitter::new(TextSink::new(&mut out, encoding), options.pretty);
            walk(&mut emitter, node, options, hook)
        }
        Format::Json => {
            let mut emitter = JsonEmitter::new(TextSink::new(&mut out, encoding), options.pretty);
            walk(&mut emitter, node, options, hook)
        }
        Format::Delimited => {
            let (_, record) = delimited::record_shape(registry, node.complex_type()).map_err(
                |reason| WriteError::UnsupportedShape {
                    format: Format::Delimited,
                    ty: node.type_name().to_string(),
                    reason,
                },
            )?;
            let sink = TextSink::new(&mut out, encoding);
            let mut emitter = DelimitedEmitter::new(sink, options.delimited, record.clone());
            walk(&mut emitter, node, options, hook)
        }
        Format::Compact => {
            let buffer = compact::encode_with(registry, node, &options.compact)?;
            match options.compact.compression {
                Some(level) => out.write_all(&buffer.compress(level)?)?,
                None => out.write_all(buffer.as_bytes())?,
            }
            Ok(out.flush()?)
        }
        Format::Preon => {
            let buffer = preon::encode(registry, node)?;
            out.write_all(buffer.as_bytes())?;
            Ok(out.flush()?)
        }
    }
}

/// Writes `node` into a byte vector.
pub fn write_to_vec(
    registry: &SchemaRegistry,
    node: &Node,
    options: &WriteOptions,
    hook: Option<&mut dyn MarshalHook>,
) -> Result<Vec<u8>, WriteError> {
    let mut out = Vec::new();
    write_to(registry, node, options, hook, &mut out)?;
    Ok(out)
}

fn walk(
    emitter: &mut dyn Emitter,
    node: &Node,
    options: &WriteOptions,
    hook: Option<&mut dyn MarshalHook>,
) -> Result<(), WriteError> {
    let mut hooks = hook.map(|hook| Interceptor {
        hook,
        intercept: &options.intercept,
    });
    emitter.begin_document()?;
    let mut walker = Walker {
        emitter: &mut *emitter,
        depth: 0,
        max_depth: options.max_depth,
    };
    walker.object(None, node, &mut hooks)?;
    emitter.end_document()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, PrimitiveType};

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .complex("Customers", |t| t.repeated("Customer", FieldType::complex("Customer")))
            .complex("Customer", |t| {
                t.required_with("Number", PrimitiveType::Text, |f| f.attribute())
                    .optional("Name", PrimitiveType::Text)
                    .repeated("Phone", PrimitiveType::Text)
            })
            .build()
            .unwrap()
    }

    fn sample(registry: &SchemaRegistry) -> Node {
        let mut root = registry.new_node("Customers").unwrap();
        for (number, name) in [("C1", "Ann & Co"), ("C2", "Bob")] {
            let mut customer = registry.new_node("Customer").unwrap();
            customer.set("Number", number).unwrap();
            customer.set("Name", name).unwrap();
            customer.push("Phone", "555").unwrap();
            root.push_child("Customer", customer).unwrap();
        }
        root
    }

    fn render(registry: &SchemaRegistry, node: &Node, options: &WriteOptions, hook: Option<&mut dyn MarshalHook>) -> String {
        String::from_utf8(write_to_vec(registry, node, options, hook).unwrap()).unwrap()
    }

    #[test]
    fn test_xml_output() {
        let registry = registry();
        let xml = render(&registry, &sample(&registry), &WriteOptions::new(Format::Xml), None);
        assert_eq!(
            xml,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Customers>\
             <Customer Number=\"C1\"><Name>Ann &amp; Co</Name><Phone>555</Phone></Customer>\
             <Customer Number=\"C2\"><Name>Bob</Name><Phone>555</Phone></Customer></Customers>"
        );
    }

    #[test]
    fn test_pretty_xml() {
        let registry = registry();
        let mut root = registry.new_node("Customers").unwrap();
        let mut customer = registry.new_node("Customer").unwrap();
        customer.set("Number", "C1").unwrap();
        root.push_child("Customer", customer).unwrap();
        let options = WriteOptions {
            pretty: true,
            ..WriteOptions::new(Format::Xml)
        };
        assert_eq!(
            render(&registry, &root, &options, None),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Customers>\n  <Customer Number=\"C1\"/>\n</Customers>\n"
        );
    }

    #[test]
    fn test_json_output() {
        let registry = registry();
        let json = render(&registry, &sample(&registry), &WriteOptions::new(Format::Json), None);
        assert_eq!(
            json,
            r#"{"Customer":[{"Number":"C1","Name":"Ann & Co","Phone":["555"]},{"Number":"C2","Name":"Bob","Phone":["555"]}]}"#
        );
    }

    #[test]
    fn test_delimited_output() {
        let registry = registry();
        let csv = render(&registry, &sample(&registry), &WriteOptions::new(Format::Delimited), None);
        assert_eq!(csv, "Number,Name,Phone\nC1,Ann & Co,555\nC2,Bob,555\n");
    }

    #[test]
    fn test_declining_hook_is_transparent() {
        let registry = registry();
        let root = sample(&registry);
        for format in [Format::Xml, Format::Json, Format::Delimited] {
            let options = WriteOptions::new(format);
            let plain = render(&registry, &root, &options, None);
            let mut seen = 0;
            let mut hook = hook_fn(|_node: &mut Cow<'_, Node>, _sink: &mut StreamingSink<'_>| {
                seen += 1;
                Ok(HookOutcome::Declined)
            });
            let hooked = render(&registry, &root, &options, Some(&mut hook));
            assert_eq!(plain, hooked);
            assert_eq!(seen, 3);
        }
    }

    #[test]
    fn test_hook_edits_copy_only() {
        let registry = registry();
        let root = sample(&registry);
        let options = WriteOptions {
            intercept: Intercept::types(["Customer"]),
            ..WriteOptions::new(Format::Json)
        };
        let mut hook = hook_fn(|node: &mut Cow<'_, Node>, _sink: &mut StreamingSink<'_>| {
            if node.get_text("Number") == Some("C2") {
                node.to_mut().unset("Phone").map_err(|e| WriteError::Hook {
                    ty: "Customer".into(),
                    reason: e.to_string(),
                })?;
            }
            Ok(HookOutcome::Declined)
        });
        let json = render(&registry, &root, &options, Some(&mut hook));
        assert!(json.ends_with(r#"{"Number":"C2","Name":"Bob"}]}"#));
        assert_eq!(root.children("Customer")[1].get_all("Phone").len(), 1);
    }

    #[test]
    fn test_handled_hook_replaces_and_omits() {
        let registry = registry();
        let root = sample(&registry);
        let options = WriteOptions {
            intercept: Intercept::types(["Customer"]),
            ..WriteOptions::new(Format::Xml)
        };
        let mut hook = hook_fn(|node: &mut Cow<'_, Node>, sink: &mut StreamingSink<'_>| {
            assert_eq!(sink.type_name(), "Customer");
            assert_eq!(sink.field_name(), Some("Customer"));
            if node.get_text("Number") == Some("C1") {
                let mut short = Node::clone(node);
                short.unset("Phone").unwrap();
                sink.marshal(&short)?;
            }
            Ok(HookOutcome::Handled)
        });
        let xml = render(&registry, &root, &options, Some(&mut hook));
        assert!(xml.contains("<Customer Number=\"C1\"><Name>Ann &amp; Co</Name></Customer></Customers>"));
        assert!(!xml.contains("C2"));
    }

    #[test]
    fn test_sink_rejects_other_types() {
        let registry = registry();
        let root = sample(&registry);
        let stranger = registry.new_node("Customers").unwrap();
        let mut hook = hook_fn(|node: &mut Cow<'_, Node>, sink: &mut StreamingSink<'_>| {
            if node.type_name() == "Customer" {
                sink.marshal(&stranger)?;
            }
            Ok(HookOutcome::Declined)
        });
        let err = write_to_vec(&registry, &root, &WriteOptions::default(), Some(&mut hook)).unwrap_err();
        assert!(matches!(err, WriteError::SinkTypeMismatch { .. }));
    }

    #[test]
    fn test_binary_formats_reject_hooks() {
        let registry = registry();
        let root = sample(&registry);
        let mut hook = hook_fn(|_: &mut Cow<'_, Node>, _: &mut StreamingSink<'_>| Ok(HookOutcome::Declined));
        let err = write_to_vec(&registry, &root, &WriteOptions::new(Format::Compact), Some(&mut hook))
            .unwrap_err();
        assert!(matches!(err, WriteError::HooksUnsupported { .. }));
    }

    #[test]
    fn test_delimited_shape_checked() {
        let registry = registry();
        let customer = registry.new_node("Customer").unwrap();
        let err = write_to_vec(&registry, &customer, &WriteOptions::new(Format::Delimited), None)
            .unwrap_err();
        assert!(matches!(err, WriteError::UnsupportedShape { .. }));
    }
}
