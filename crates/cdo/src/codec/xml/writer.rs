use std::io::Write;

use crate::codec::TextSink;
use crate::codec::xml::{escape_attribute, escape_text};
use crate::error::WriteError;
use crate::model::{Node, Slot, Value};
use crate::schema::FieldDescriptor;
use crate::write::Emitter;

/// Renders objects as XML elements.
pub(crate) struct XmlEmitter<W> {
    out: TextSink<W>,
    pretty: bool,
    /// One entry per open element: true if it was opened with content.
    open: Vec<bool>,
}

impl<W: Write> XmlEmitter<W> {
    pub(crate) fn new(out: TextSink<W>, pretty: bool) -> Self {
        Self {
            out,
            pretty,
            open: Vec::new(),
        }
    }

    fn indent(&mut self) -> Result<(), WriteError> {
        if self.pretty {
            for _ in 0..self.open.len() {
                self.out.write_str("  ")?;
            }
        }
        Ok(())
    }

    fn newline(&mut self) -> Result<(), WriteError> {
        if self.pretty {
            self.out.write_str("\n")?;
        }
        Ok(())
    }
}

fn element_name<'a>(field: Option<&'a FieldDescriptor>, node: &'a Node) -> &'a str {
    field.map_or_else(|| node.type_name(), FieldDescriptor::name)
}

impl<W: Write> Emitter for XmlEmitter<W> {
    fn begin_document(&mut self) -> Result<(), WriteError> {
        let label = self.out.encoding().label();
        self.out
            .write_str(&format!("<?xml version=\"1.0\" encoding=\"{label}\"?>"))?;
        self.newline()
    }

    fn end_document(&mut self) -> Result<(), WriteError> {
        self.out.flush()
    }

    fn start_object(&mut self, field: Option<&FieldDescriptor>, node: &Node) -> Result<(), WriteError> {
        let encoding = self.out.encoding();
        self.indent()?;
        self.out.write_str("<")?;
        self.out.write_str(element_name(field, node))?;
        let mut content = false;
        for (descriptor, slot) in node.fields() {
            match slot {
                Slot::Scalar(value) if descriptor.is_attribute() => {
                    let lexical = value.to_lexical();
                    self.out.write_str(" ")?;
                    self.out.write_str(descriptor.name())?;
                    self.out.write_str("=\"")?;
                    self.out.write_str(&escape_attribute(&lexical, encoding))?;
                    self.out.write_str("\"")?;
                }
                Slot::Absent => {}
                _ => content = true,
            }
        }
        self.out.write_str(if content { ">" } else { "/>" })?;
        self.open.push(content);
        if content {
            self.newline()?;
        }
        Ok(())
    }

    fn end_object(&mut self, field: Option<&FieldDescriptor>, node: &Node) -> Result<(), WriteError> {
        let content = self.open.pop().unwrap_or(false);
        if content {
            self.indent()?;
            self.out.write_str("</")?;
            self.out.write_str(element_name(field, node))?;
            self.out.write_str(">")?;
        }
        self.newline()
    }

    fn scalar(&mut self, field: &FieldDescriptor, value: &Value) -> Result<(), WriteError> {
        if field.is_attribute() {
            return Ok(());
        }
        let lexical = value.to_lexical();
        let text = escape_text(&lexical, self.out.encoding());
        self.indent()?;
        self.out.write_str("<")?;
        self.out.write_str(field.name())?;
        self.out.write_str(">")?;
        self.out.write_str(&text)?;
        self.out.write_str("</")?;
        self.out.write_str(field.name())?;
        self.out.write_str(">")?;
        self.newline()
    }
}
