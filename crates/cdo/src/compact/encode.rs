//! Graph to compact buffer.

use std::sync::Arc;

use tracing::debug;

use crate::codec::primitives::Writer;
use crate::compact::{CompactBuffer, CompactOptions, field_path, write_header};
use crate::error::EncodeError;
use crate::limits::{MAGIC_COMPACT, MAX_BYTES_LEN, MAX_REPEAT, MAX_STRING_LEN};
use crate::model::{Node, Slot, Value};
use crate::schema::{FieldDescriptor, SchemaRegistry};

/// Encodes a graph with default options.
pub fn encode(registry: &SchemaRegistry, node: &Node) -> Result<CompactBuffer, EncodeError> {
    encode_with(registry, node, &CompactOptions::default())
}

/// Encodes a graph.
///
/// Any structurally valid graph is accepted, including one that fails
/// validation: the encoding stores presence explicitly.
pub fn encode_with(
    registry: &SchemaRegistry,
    node: &Node,
    options: &CompactOptions,
) -> Result<CompactBuffer, EncodeError> {
    let encoder = Encoder {
        registry,
        max_depth: options.max_depth,
    };
    let root_path = format!("/{}", node.type_name());
    let mut writer = Writer::with_capacity(256);
    write_header(&mut writer, MAGIC_COMPACT, registry, node.complex_type());
    let offset = writer.len();
    encoder.object(&mut writer, node, &root_path, 1)?;

    let data = writer.into_bytes();
    debug!(
        ty = node.type_name(),
        bytes = data.len(),
        "Encoded compact buffer"
    );
    Ok(CompactBuffer {
        data: Arc::from(data),
        offset,
        root: node.complex_type().index(),
        fingerprint: registry.fingerprint(),
    })
}

struct Encoder<'r> {
    registry: &'r SchemaRegistry,
    max_depth: usize,
}

impl Encoder<'_> {
    /// Writes `varint(body_len) || presence bitmap || present fields`.
    fn object(&self, out: &mut Writer, node: &Node, path: &str, depth: usize) -> Result<(), EncodeError> {
        if depth > self.max_depth {
            return Err(EncodeError::DepthExceeded {
                limit: self.max_depth,
            });
        }
        if !self.registry.owns(node.complex_type()) {
            return Err(EncodeError::ForeignType {
                found: node.type_name().to_string(),
            });
        }
        let field_count = node.complex_type().fields().len();
        let mut presence = vec![0u8; field_count.div_ceil(8)];
        for (i, (_, slot)) in node.fields().enumerate() {
            if !slot.is_absent() {
                presence[i / 8] |= 1 << (i % 8);
            }
        }
        let mut body = Writer::new();
        body.write_bytes(&presence);
        for (field, slot) in node.fields() {
            match slot {
                Slot::Absent => {}
                Slot::Scalar(value) => self.value(&mut body, field, value, path, None)?,
                Slot::Scalars(values) => {
                    self.count(&mut body, values.len(), path, field)?;
                    for (i, value) in values.iter().enumerate() {
                        self.value(&mut body, field, value, path, Some(i))?;
                    }
                }
                Slot::Child(child) => {
                    let child_path = field_path(path, field.name(), None);
                    self.object(&mut body, child, &child_path, depth + 1)?;
                }
                Slot::Children(children) => {
                    self.count(&mut body, children.len(), path, field)?;
                    for (i, child) in children.iter().enumerate() {
                        let child_path = field_path(path, field.name(), Some(i));
                        self.object(&mut body, child, &child_path, depth + 1)?;
                    }
                }
            }
        }
        out.write_varint(body.len() as u64);
        out.write_bytes(body.as_bytes());
        Ok(())
    }

    fn count(
        &self,
        out: &mut Writer,
        count: usize,
        path: &str,
        field: &FieldDescriptor,
    ) -> Result<(), EncodeError> {
        if count > MAX_REPEAT {
            return Err(EncodeError::NotEncodable {
                path: field_path(path, field.name(), None),
                reason: format!("{count} occurrences exceed the maximum of {MAX_REPEAT}"),
            });
        }
        out.write_varint(count as u64);
        Ok(())
    }

    fn value(
        &self,
        out: &mut Writer,
        field: &FieldDescriptor,
        value: &Value,
        path: &str,
        index: Option<usize>,
    ) -> Result<(), EncodeError> {
        check_type(field, value, || field_path(path, field.name(), index))?;
        match value {
            Value::Bool(b) => out.write_byte(u8::from(*b)),
            Value::Int(n) => out.write_signed_varint(*n),
            Value::Float(x) => out.write_f64(*x),
            Value::Decimal { mantissa, exponent } => {
                out.write_signed_varint(*mantissa);
                out.write_signed_varint(i64::from(*exponent));
            }
            Value::Text(s) => {
                if s.len() > MAX_STRING_LEN {
                    return Err(EncodeError::LengthExceedsLimit {
                        field: "text",
                        len: s.len(),
                        max: MAX_STRING_LEN,
                    });
                }
                let common = field.common_values();
                if common.is_empty() {
                    out.write_string(s);
                } else {
                    match common.position(s) {
                        Some(pos) => out.write_varint(pos as u64 + 1),
                        None => {
                            out.write_varint(0);
                            out.write_string(s);
                        }
                    }
                }
            }
            Value::Bytes(b) => {
                if b.len() > MAX_BYTES_LEN {
                    return Err(EncodeError::LengthExceedsLimit {
                        field: "bytes",
                        len: b.len(),
                        max: MAX_BYTES_LEN,
                    });
                }
                out.write_bytes_prefixed(b);
            }
            Value::Date { days, offset_min } => {
                out.write_signed_varint(i64::from(*days));
                out.write_signed_varint(i64::from(*offset_min));
            }
            Value::Time { micros, offset_min } => {
                out.write_signed_varint(*micros);
                out.write_signed_varint(i64::from(*offset_min));
            }
            Value::DateTime {
                epoch_micros,
                offset_min,
            } => {
                out.write_signed_varint(*epoch_micros);
                out.write_signed_varint(i64::from(*offset_min));
            }
        }
        Ok(())
    }
}

/// Rejects a value whose type differs from the field's declared type.
pub(crate) fn check_type(
    field: &FieldDescriptor,
    value: &Value,
    path: impl FnOnce() -> String,
) -> Result<(), EncodeError> {
    match field.primitive() {
        Some(p) if p == value.primitive_type() => Ok(()),
        _ => Err(EncodeError::NotEncodable {
            path: path(),
            reason: format!(
                "{} value in a field of type {}",
                value.primitive_type(),
                field.field_type().name()
            ),
        }),
    }
}
