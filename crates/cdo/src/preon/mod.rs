//! Bit-packed encoding (Preon).
//!
//! Preon packs the same information as the compact encoding into a bit
//! stream, using the schema to size every field:
//!
//! - optional fields cost one presence bit, required fields none
//! - repeated fields store `count - min`, in the minimum width when the
//!   maximum is bounded and as a varint otherwise
//! - booleans are one bit
//! - enumerated values are an index of `ceil(log2 n)` bits
//! - integers with an inclusive `Range` store the offset from `min`
//! - common values are a flag bit plus a dictionary index
//! - everything else is a varint (continuation bit plus 7-bit groups) or a
//!   length-prefixed byte string
//!
//! There is no framing, so objects cannot be skipped: Preon buffers are
//! decoded whole. The encoder rejects graphs its packing cannot represent,
//! such as missing required fields or values outside a declared range.
//!
//! ```text
//! "CDOP" | version: u8 | fingerprint: [u8; 8] | root type: varint | bits, zero-padded
//! ```

use std::io;
use std::sync::Arc;

use tracing::debug;

use crate::codec::primitives::{BitReader, BitWriter, Writer, bits_for};
use crate::compact::{
    EncodingContext, SegmentKind, Unit, check_type, field_path, narrow, read_header,
    resolve_root, visualise_bytes, write_header,
};
use crate::error::{DecodeError, EncodeError};
use crate::limits::{
    FINGERPRINT_LEN, MAGIC_PREON, MAX_BYTES_LEN, MAX_DECIMAL_SCALE, MAX_DEPTH, MAX_REPEAT,
    MAX_STRING_LEN,
};
use crate::model::{Node, Slot, Value};
use crate::schema::{
    Cardinality, CommonValues, ComplexType, Constraint, FieldDescriptor, PrimitiveType,
    SchemaRegistry,
};

// =============================================================================
// PACKING
// =============================================================================

/// How the values of one primitive field are packed.
enum Packing<'s> {
    Enumerated(&'s [String]),
    Bounded { min: i64, max: i64 },
    Common(&'s CommonValues),
    Plain,
}

fn packing(field: &FieldDescriptor) -> Packing<'_> {
    let primitive = field.primitive();
    for constraint in field.constraints() {
        match constraint {
            Constraint::Enumeration(values)
                if !values.is_empty()
                    && matches!(primitive, Some(PrimitiveType::Text | PrimitiveType::Int)) =>
            {
                return Packing::Enumerated(values);
            }
            Constraint::Range {
                min: Some(Value::Int(min)),
                max: Some(Value::Int(max)),
            } if primitive == Some(PrimitiveType::Int) && min <= max => {
                return Packing::Bounded {
                    min: *min,
                    max: *max,
                };
            }
            _ => {}
        }
    }
    if primitive == Some(PrimitiveType::Text) && !field.common_values().is_empty() {
        Packing::Common(field.common_values())
    } else {
        Packing::Plain
    }
}

fn index_width(len: usize) -> u32 {
    bits_for(len.saturating_sub(1) as u64)
}

fn count_width(min: usize, max: usize) -> u32 {
    bits_for(max.saturating_sub(min) as u64)
}

// =============================================================================
// ENCODING
// =============================================================================

/// Encodes a graph as a Preon buffer.
pub fn encode(registry: &SchemaRegistry, node: &Node) -> Result<PreonBuffer, EncodeError> {
    let mut writer = Writer::with_capacity(64);
    write_header(&mut writer, MAGIC_PREON, registry, node.complex_type());
    let offset = writer.len();

    let mut bits = BitWriter::new();
    let encoder = Encoder { registry };
    encoder.object(&mut bits, node, &format!("/{}", node.type_name()), 1)?;
    let bit_len = bits.bit_len();
    writer.write_bytes(&bits.into_bytes());

    let data = writer.into_bytes();
    debug!(
        ty = node.type_name(),
        bits = bit_len,
        bytes = data.len(),
        "Encoded preon buffer"
    );
    Ok(PreonBuffer {
        data: Arc::from(data),
        offset,
        root: node.complex_type().index(),
        fingerprint: registry.fingerprint(),
    })
}

/// Encodes a graph and reports where every field landed, in bits.
pub fn encode_with_context(
    registry: &SchemaRegistry,
    node: &Node,
) -> Result<(PreonBuffer, EncodingContext), EncodeError> {
    let buffer = encode(registry, node)?;
    let cx = buffer
        .context(registry)
        .map_err(|e| EncodeError::NotEncodable {
            path: format!("/{}", node.type_name()),
            reason: e.to_string(),
        })?;
    Ok((buffer, cx))
}

struct Encoder<'r> {
    registry: &'r SchemaRegistry,
}

impl Encoder<'_> {
    fn object(&self, out: &mut BitWriter, node: &Node, path: &str, depth: usize) -> Result<(), EncodeError> {
        if depth > MAX_DEPTH {
            return Err(EncodeError::DepthExceeded { limit: MAX_DEPTH });
        }
        if !self.registry.owns(node.complex_type()) {
            return Err(EncodeError::ForeignType {
                found: node.type_name().to_string(),
            });
        }
        for (field, slot) in node.fields() {
            match field.cardinality() {
                Cardinality::Optional => out.write_bit(!slot.is_absent()),
                Cardinality::Required if slot.is_absent() => {
                    return Err(EncodeError::MissingRequired {
                        path: field_path(path, field.name(), None),
                    });
                }
                Cardinality::Required => {}
                Cardinality::Repeated { min, max } => {
                    Self::count(out, slot.count(), min, max, || field_path(path, field.name(), None))?;
                }
            }
            match slot {
                Slot::Absent => {}
                Slot::Scalar(value) => self.value(out, field, value, path, None)?,
                Slot::Scalars(values) => {
                    for (i, value) in values.iter().enumerate() {
                        self.value(out, field, value, path, Some(i))?;
                    }
                }
                Slot::Child(child) => {
                    self.object(out, child, &field_path(path, field.name(), None), depth + 1)?;
                }
                Slot::Children(children) => {
                    for (i, child) in children.iter().enumerate() {
                        self.object(out, child, &field_path(path, field.name(), Some(i)), depth + 1)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn count(
        out: &mut BitWriter,
        count: usize,
        min: usize,
        max: Option<usize>,
        path: impl Fn() -> String,
    ) -> Result<(), EncodeError> {
        if count == 0 && min > 0 {
            return Err(EncodeError::MissingRequired { path: path() });
        }
        if count < min || max.is_some_and(|max| count > max) || count > MAX_REPEAT {
            let max = max.map_or_else(|| "unbounded".to_string(), |m| m.to_string());
            return Err(EncodeError::NotEncodable {
                path: path(),
                reason: format!("{count} occurrences outside {min}..{max}"),
            });
        }
        let extra = (count - min) as u64;
        match max {
            Some(max) => out.write_bits(extra, count_width(min, max)),
            None => out.write_varint(extra),
        }
        Ok(())
    }

    fn value(
        &self,
        out: &mut BitWriter,
        field: &FieldDescriptor,
        value: &Value,
        path: &str,
        index: Option<usize>,
    ) -> Result<(), EncodeError> {
        let path = || field_path(path, field.name(), index);
        check_type(field, value, path)?;
        match (packing(field), value) {
            (Packing::Enumerated(values), _) => {
                let lexical = value.to_lexical();
                let position = values.iter().position(|v| *v == lexical).ok_or_else(|| {
                    EncodeError::NotEncodable {
                        path: path(),
                        reason: format!("{lexical:?} is not an enumerated value"),
                    }
                })?;
                out.write_bits(position as u64, index_width(values.len()));
            }
            (Packing::Bounded { min, max }, Value::Int(n)) => {
                if *n < min || *n > max {
                    return Err(EncodeError::NotEncodable {
                        path: path(),
                        reason: format!("{n} is outside {min}..={max}"),
                    });
                }
                out.write_bits(n.abs_diff(min), bits_for(max.abs_diff(min)));
            }
            (Packing::Common(table), Value::Text(s)) => match table.position(s) {
                Some(position) => {
                    out.write_bit(true);
                    out.write_bits(position as u64, index_width(table.len()));
                }
                None => {
                    out.write_bit(false);
                    write_plain(out, value)?;
                }
            },
            _ => write_plain(out, value)?,
        }
        Ok(())
    }
}

fn write_plain(out: &mut BitWriter, value: &Value) -> Result<(), EncodeError> {
    match value {
        Value::Bool(b) => out.write_bit(*b),
        Value::Int(n) => out.write_signed_varint(*n),
        Value::Float(x) => out.write_bits(x.to_bits(), 64),
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
            out.write_bytes_prefixed(s.as_bytes());
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

// =============================================================================
// DECODING
// =============================================================================

struct Decoder<'r> {
    registry: &'r SchemaRegistry,
    /// Bit position of the stream within the buffer.
    base: usize,
    cx: Option<EncodingContext>,
}

impl Decoder<'_> {
    fn path(&self, parent: &str, field: &str, index: Option<usize>) -> String {
        if self.cx.is_some() {
            field_path(parent, field, index)
        } else {
            String::new()
        }
    }

    fn mark(&mut self, start: usize, reader: &BitReader<'_>, path: &str, kind: SegmentKind) {
        if let Some(cx) = &mut self.cx {
            cx.push(
                self.base + start,
                reader.bit_position() - start,
                path,
                kind,
            );
        }
    }

    fn object(
        &mut self,
        reader: &mut BitReader<'_>,
        ty: &Arc<ComplexType>,
        path: &str,
        depth: usize,
    ) -> Result<Node, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::DepthExceeded { limit: MAX_DEPTH });
        }
        let start = reader.bit_position();
        let segment = self
            .cx
            .as_mut()
            .map(|cx| cx.push(self.base + start, 0, path, SegmentKind::Object));

        let mut node = Node::new(Arc::clone(ty));
        for (index, field) in ty.fields().iter().enumerate() {
            let field_start = reader.bit_position();
            let count = match field.cardinality() {
                Cardinality::Optional => {
                    let present = reader.read_bit("presence")?;
                    let label = self.path(path, field.name(), None);
                    self.mark(field_start, reader, &label, SegmentKind::Presence);
                    usize::from(present)
                }
                Cardinality::Required => 1,
                Cardinality::Repeated { min, max } => {
                    let extra = match max {
                        Some(max) => reader.read_bits(count_width(min, max), "count")?,
                        None => reader.read_varint("count")?,
                    };
                    let count = usize::try_from(extra)
                        .ok()
                        .and_then(|extra| extra.checked_add(min))
                        .filter(|&count| count <= MAX_REPEAT && max.is_none_or(|max| count <= max))
                        .ok_or(DecodeError::MalformedEncoding { context: "count" })?;
                    let label = self.path(path, field.name(), None);
                    self.mark(field_start, reader, &label, SegmentKind::Count);
                    count
                }
            };
            if count == 0 {
                continue;
            }
            let repeated = field.is_repeated();
            let slot = match self.registry.target(field) {
                Some(child_ty) => {
                    let mut children = Vec::with_capacity(count.min(64));
                    for i in 0..count {
                        let child_path = self.path(path, field.name(), repeated.then_some(i));
                        children.push(self.object(reader, child_ty, &child_path, depth + 1)?);
                    }
                    if repeated {
                        Slot::Children(children)
                    } else {
                        children.pop().map(Box::new).map(Slot::Child).unwrap_or_default()
                    }
                }
                None => {
                    let mut values = Vec::with_capacity(count.min(64));
                    for i in 0..count {
                        let value_path = self.path(path, field.name(), repeated.then_some(i));
                        values.push(self.value(reader, field, &value_path)?);
                    }
                    if repeated {
                        Slot::Scalars(values)
                    } else {
                        values.pop().map(Slot::Scalar).unwrap_or_default()
                    }
                }
            };
            node.put(index, slot);
        }

        if let (Some(cx), Some(segment)) = (&mut self.cx, segment) {
            cx.close(segment, self.base + reader.bit_position());
        }
        Ok(node)
    }

    fn value(
        &mut self,
        reader: &mut BitReader<'_>,
        field: &FieldDescriptor,
        path: &str,
    ) -> Result<Value, DecodeError> {
        let primitive = field.primitive().ok_or(DecodeError::MalformedEncoding {
            context: "complex field read as a value",
        })?;
        let start = reader.bit_position();
        let mut kind = SegmentKind::Value;
        let value = match packing(field) {
            Packing::Enumerated(values) => {
                let index = reader.read_bits(index_width(values.len()), "enumeration")? as usize;
                let lexical = values.get(index).ok_or(DecodeError::IndexOutOfBounds {
                    dict: "enumeration",
                    index,
                    size: values.len(),
                })?;
                Value::parse(primitive, lexical).map_err(|_| DecodeError::InvalidValue {
                    expected: primitive,
                    input: lexical.clone(),
                })?
            }
            Packing::Bounded { min, max } => {
                let offset = reader.read_bits(bits_for(max.abs_diff(min)), "bounded int")?;
                let n = i128::from(min) + i128::from(offset);
                if n > i128::from(max) {
                    return Err(DecodeError::MalformedEncoding {
                        context: "bounded int",
                    });
                }
                Value::Int(n as i64)
            }
            Packing::Common(table) if reader.read_bit("common value")? => {
                kind = SegmentKind::CommonValue;
                let index = reader.read_bits(index_width(table.len()), "common value")? as usize;
                let text = table.get(index).ok_or(DecodeError::IndexOutOfBounds {
                    dict: "common values",
                    index,
                    size: table.len(),
                })?;
                Value::Text(text.to_string())
            }
            Packing::Common(_) | Packing::Plain => read_plain(reader, primitive)?,
        };
        self.mark(start, reader, path, kind);
        Ok(value)
    }
}

fn read_plain(reader: &mut BitReader<'_>, primitive: PrimitiveType) -> Result<Value, DecodeError> {
    Ok(match primitive {
        PrimitiveType::Bool => Value::Bool(reader.read_bit("bool")?),
        PrimitiveType::Int => Value::Int(reader.read_signed_varint("int")?),
        PrimitiveType::Float => {
            let x = f64::from_bits(reader.read_bits(64, "float")?);
            if x.is_nan() {
                return Err(DecodeError::FloatIsNan);
            }
            Value::Float(x)
        }
        PrimitiveType::Decimal => {
            let mantissa = reader.read_signed_varint("decimal")?;
            let exponent: i32 = narrow(reader.read_signed_varint("decimal")?, "decimal exponent")?;
            if exponent.abs() > MAX_DECIMAL_SCALE {
                return Err(DecodeError::MalformedEncoding {
                    context: "decimal exponent",
                });
            }
            Value::decimal(mantissa, exponent)
        }
        PrimitiveType::Text => {
            let bytes = reader.read_bytes_prefixed(MAX_STRING_LEN, "text")?;
            Value::Text(String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8 { field: "text" })?)
        }
        PrimitiveType::Bytes => Value::Bytes(reader.read_bytes_prefixed(MAX_BYTES_LEN, "bytes")?),
        PrimitiveType::Date => Value::Date {
            days: narrow(reader.read_signed_varint("date")?, "date")?,
            offset_min: narrow(reader.read_signed_varint("offset")?, "offset")?,
        },
        PrimitiveType::Time => Value::Time {
            micros: reader.read_signed_varint("time")?,
            offset_min: narrow(reader.read_signed_varint("offset")?, "offset")?,
        },
        PrimitiveType::DateTime => Value::DateTime {
            epoch_micros: reader.read_signed_varint("datetime")?,
            offset_min: narrow(reader.read_signed_varint("offset")?, "offset")?,
        },
    })
}

// =============================================================================
// BUFFER
// =============================================================================

/// An immutable Preon encoding of one object graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreonBuffer {
    data: Arc<[u8]>,
    offset: usize,
    root: usize,
    fingerprint: [u8; FINGERPRINT_LEN],
}

impl PreonBuffer {
    /// Wraps encoded bytes after checking the header.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, DecodeError> {
        let header = read_header(&bytes, MAGIC_PREON)?;
        Ok(Self {
            data: Arc::from(bytes),
            offset: header.offset,
            root: header.root,
            fingerprint: header.fingerprint,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Encoded size of the bit stream in bytes, excluding the header.
    pub fn size(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn fingerprint(&self) -> [u8; FINGERPRINT_LEN] {
        self.fingerprint
    }

    pub fn root_index(&self) -> usize {
        self.root
    }

    fn decode(
        &self,
        registry: &SchemaRegistry,
        cx: Option<EncodingContext>,
    ) -> Result<(Node, Option<EncodingContext>), DecodeError> {
        let ty = resolve_root(registry, self.fingerprint(), self.root)?;
        let mut decoder = Decoder {
            registry,
            base: self.offset * 8,
            cx,
        };
        let mut reader = BitReader::new(&self.data[self.offset..]);
        let node = decoder.object(&mut reader, ty, &format!("/{}", ty.name()), 1)?;

        let padding = reader.remaining_bits();
        if padding >= 8 {
            return Err(DecodeError::TrailingBytes {
                context: "preon buffer",
                count: padding / 8,
            });
        }
        if reader.read_bits(padding as u32, "padding")? != 0 {
            return Err(DecodeError::MalformedEncoding {
                context: "non-zero padding",
            });
        }
        Ok((node, decoder.cx))
    }

    /// Decodes the whole buffer into an object graph.
    pub fn to_node(&self, registry: &SchemaRegistry) -> Result<Node, DecodeError> {
        let (node, _) = self.decode(registry, None)?;
        debug!(ty = node.type_name(), bytes = self.data.len(), "Decoded preon buffer");
        Ok(node)
    }

    /// Describes where every field sits in the buffer, in bits.
    pub fn context(&self, registry: &SchemaRegistry) -> Result<EncodingContext, DecodeError> {
        let mut cx = EncodingContext::new(Unit::Bits);
        cx.push(0, self.offset * 8, "", SegmentKind::Header);
        let (_, cx) = self.decode(registry, Some(cx))?;
        Ok(cx.unwrap_or_else(|| EncodingContext::new(Unit::Bits)))
    }

    /// Writes a printable rendering of the bit stream.
    pub fn visualise<W: io::Write>(&self, w: W) -> io::Result<()> {
        visualise_bytes(&self.data[self.offset..], w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact;
    use crate::schema::FieldType;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .complex("Orders", |t| {
                t.repeated_with("Order", FieldType::complex("Order"), |f| f.occurs(1, Some(8)))
            })
            .complex("Order", |t| {
                t.required("Id", PrimitiveType::Text)
                    .required_with("Status", PrimitiveType::Text, |f| {
                        f.enumeration(["OPEN", "PAID", "SHIPPED"])
                    })
                    .optional_with("Quantity", PrimitiveType::Int, |f| {
                        f.range(Some(Value::Int(1)), Some(Value::Int(100)))
                    })
                    .optional_with("City", PrimitiveType::Text, |f| {
                        f.common_values(["London", "Paris"])
                    })
                    .optional("Express", PrimitiveType::Bool)
                    .repeated("Note", PrimitiveType::Text)
            })
            .build()
            .unwrap()
    }

    fn order(registry: &SchemaRegistry, id: &str, status: &str, quantity: i64) -> Node {
        let mut o = registry.new_node("Order").unwrap();
        o.set("Id", id).unwrap();
        o.set("Status", status).unwrap();
        o.set("Quantity", quantity).unwrap();
        o
    }

    fn sample(registry: &SchemaRegistry) -> Node {
        let mut root = registry.new_node("Orders").unwrap();
        let mut first = order(registry, "A1", "PAID", 100);
        first.set("City", "Paris").unwrap();
        first.set("Express", true).unwrap();
        first.push("Note", "fragile").unwrap();
        root.push_child("Order", first).unwrap();
        let mut second = order(registry, "A2", "OPEN", 1);
        second.set("City", "Oslo").unwrap();
        root.push_child("Order", second).unwrap();
        root
    }

    #[test]
    fn test_round_trip() {
        let registry = registry();
        let root = sample(&registry);
        let buffer = encode(&registry, &root).unwrap();
        assert_eq!(buffer.to_node(&registry).unwrap(), root);

        let reread = PreonBuffer::from_bytes(buffer.to_bytes()).unwrap();
        assert_eq!(reread.to_node(&registry).unwrap(), root);
        assert_eq!(reread.fingerprint(), registry.fingerprint());
        assert_eq!(reread, buffer);
    }

    #[test]
    fn test_smaller_than_compact() {
        let registry = registry();
        let root = sample(&registry);
        let preon = encode(&registry, &root).unwrap();
        let compact = compact::encode(&registry, &root).unwrap();
        assert!(preon.size() < compact.size());
    }

    #[test]
    fn test_packed_widths() {
        let registry = registry();
        let mut root = registry.new_node("Orders").unwrap();
        root.push_child("Order", order(&registry, "A", "SHIPPED", 7)).unwrap();
        let (_, cx) = encode_with_context(&registry, &root).unwrap();
        assert_eq!(cx.unit(), Unit::Bits);

        // count 1..=8 stored as 0..=7
        assert_eq!(cx.find("/Orders/Order").map(|s| s.len), Some(3));
        assert_eq!(cx.find("/Orders/Order[0]/Status").map(|s| s.len), Some(2));
        let quantity: Vec<_> = cx
            .segments()
            .iter()
            .filter(|s| s.path == "/Orders/Order[0]/Quantity")
            .map(|s| (s.kind, s.len))
            .collect();
        assert_eq!(quantity, vec![(SegmentKind::Presence, 1), (SegmentKind::Value, 7)]);
    }

    #[test]
    fn test_common_value_segment() {
        let registry = registry();
        let (_, cx) = encode_with_context(&registry, &sample(&registry)).unwrap();
        let kinds: Vec<_> = cx
            .segments()
            .iter()
            .filter(|s| s.path.ends_with("/City") && s.kind != SegmentKind::Presence)
            .map(|s| s.kind)
            .collect();
        assert_eq!(kinds, vec![SegmentKind::CommonValue, SegmentKind::Value]);
    }

    #[test]
    fn test_rejects_unrepresentable_values() {
        let registry = registry();
        let mut root = registry.new_node("Orders").unwrap();
        root.push_child("Order", order(&registry, "A", "LOST", 1)).unwrap();
        assert!(matches!(
            encode(&registry, &root),
            Err(EncodeError::NotEncodable { path, .. }) if path == "/Orders/Order[0]/Status"
        ));

        let mut root = registry.new_node("Orders").unwrap();
        root.push_child("Order", order(&registry, "A", "OPEN", 101)).unwrap();
        assert!(matches!(encode(&registry, &root), Err(EncodeError::NotEncodable { .. })));

        let root = registry.new_node("Orders").unwrap();
        assert_eq!(
            encode(&registry, &root),
            Err(EncodeError::MissingRequired {
                path: "/Orders/Order".to_string()
            })
        );
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let registry = registry();
        let mut bytes = encode(&registry, &sample(&registry)).unwrap().to_bytes();
        bytes.push(0);
        let buffer = PreonBuffer::from_bytes(bytes).unwrap();
        assert!(matches!(
            buffer.to_node(&registry),
            Err(DecodeError::TrailingBytes { count: 1, .. })
        ));
    }
}
