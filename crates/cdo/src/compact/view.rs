//! Random access into compact buffers.

use std::sync::Arc;

use crate::codec::primitives::{Reader, varint_len};
use crate::compact::context::{EncodingContext, SegmentKind, field_path};
use crate::error::DecodeError;
use crate::limits::{
    MAX_BUFFER_SIZE, MAX_BYTES_LEN, MAX_DECIMAL_SCALE, MAX_DEPTH, MAX_REPEAT, MAX_STRING_LEN,
};
use crate::model::{Node, Slot, Value};
use crate::schema::{ComplexType, FieldDescriptor, PrimitiveType, SchemaRegistry};

/// Read-only view of one object inside a compact buffer.
///
/// A view is a borrowed position, so it is `Copy` and never goes stale.
/// Accessors decode on demand: each returns an owned value or a new view.
#[derive(Clone, Copy)]
pub struct CompactView<'a> {
    data: &'a [u8],
    registry: &'a SchemaRegistry,
    ty: &'a Arc<ComplexType>,
    body: usize,
    end: usize,
}

impl std::fmt::Debug for CompactView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactView")
            .field("ty", &self.ty.name())
            .field("body", &self.body)
            .field("end", &self.end)
            .finish()
    }
}

/// Reads an object length prefix at `pos`, returning the body range.
pub(crate) fn object_range(data: &[u8], pos: usize) -> Result<(usize, usize), DecodeError> {
    let mut reader = Reader::at(data, pos);
    let len = reader.read_len(MAX_BUFFER_SIZE, "object length")?;
    let body = reader.position();
    reader.skip(len, "object")?;
    Ok((body, body + len))
}

fn presence_len(ty: &ComplexType) -> usize {
    ty.fields().len().div_ceil(8)
}

fn is_set(bitmap: &[u8], index: usize) -> bool {
    bitmap[index / 8] & (1 << (index % 8)) != 0
}

impl<'a> CompactView<'a> {
    pub(crate) fn bound(
        data: &'a [u8],
        registry: &'a SchemaRegistry,
        ty: &'a Arc<ComplexType>,
        body: usize,
        end: usize,
    ) -> Self {
        Self {
            data,
            registry,
            ty,
            body,
            end,
        }
    }

    /// Body range `(start, end)` of this object in the buffer.
    pub(crate) fn range(&self) -> (usize, usize) {
        (self.body, self.end)
    }

    pub fn type_name(&self) -> &'a str {
        self.ty.name()
    }

    pub fn complex_type(&self) -> &'a Arc<ComplexType> {
        self.ty
    }

    fn field(&self, name: &str) -> Result<(usize, &'a FieldDescriptor), DecodeError> {
        let ty: &'a ComplexType = self.ty;
        ty.field_index(name)
            .map(|i| (i, &ty.fields()[i]))
            .ok_or_else(|| DecodeError::UnknownField {
                ty: ty.name().to_string(),
                field: name.to_string(),
            })
    }

    fn expect(field: &FieldDescriptor, complex: bool, repeated: Option<bool>) -> Result<(), DecodeError> {
        let shape_ok = field.is_complex() == complex
            && repeated.is_none_or(|r| r == field.is_repeated());
        if shape_ok {
            return Ok(());
        }
        let expected = match repeated {
            Some(r) => FieldDescriptor::kind_of(complex, r),
            None if complex => "an object field",
            None => "a value field",
        };
        Err(DecodeError::WrongKind {
            field: field.name().to_string(),
            expected,
            actual: field.kind(),
        })
    }

    fn reader(&self, pos: usize) -> Reader<'a> {
        Reader::at(&self.data[..self.end], pos)
    }

    /// Positions a reader at the payload of field `index`, if present.
    fn locate(&self, index: usize) -> Result<Option<Reader<'a>>, DecodeError> {
        let mut reader = self.reader(self.body);
        let bitmap = reader.read_bytes(presence_len(self.ty), "presence bitmap")?;
        if !is_set(bitmap, index) {
            return Ok(None);
        }
        for (i, field) in self.ty.fields()[..index].iter().enumerate() {
            if is_set(bitmap, i) {
                skip_field(&mut reader, field)?;
            }
        }
        Ok(Some(reader))
    }

    fn target(&self, field: &FieldDescriptor) -> Result<&'a Arc<ComplexType>, DecodeError> {
        let registry: &'a SchemaRegistry = self.registry;
        registry
            .target(field)
            .ok_or(DecodeError::MalformedEncoding {
                context: "unresolved complex field",
            })
    }

    pub fn is_present(&self, name: &str) -> Result<bool, DecodeError> {
        let (index, _) = self.field(name)?;
        Ok(self.locate(index)?.is_some())
    }

    /// Number of occurrences of a field (0 or 1 for single fields).
    pub fn count(&self, name: &str) -> Result<usize, DecodeError> {
        let (index, field) = self.field(name)?;
        match self.locate(index)? {
            None => Ok(0),
            Some(mut reader) if field.is_repeated() => reader.read_len(MAX_REPEAT, "count"),
            Some(_) => Ok(1),
        }
    }

    /// Value of a single-valued primitive field.
    pub fn get(&self, name: &str) -> Result<Option<Value>, DecodeError> {
        let (index, field) = self.field(name)?;
        Self::expect(field, false, Some(false))?;
        match self.locate(index)? {
            Some(mut reader) => read_value(&mut reader, field).map(Some),
            None => Ok(None),
        }
    }

    /// All values of a primitive field.
    pub fn get_all(&self, name: &str) -> Result<Vec<Value>, DecodeError> {
        let (index, field) = self.field(name)?;
        Self::expect(field, false, None)?;
        let Some(mut reader) = self.locate(index)? else {
            return Ok(Vec::new());
        };
        if !field.is_repeated() {
            return Ok(vec![read_value(&mut reader, field)?]);
        }
        let count = reader.read_len(MAX_REPEAT, "count")?;
        (0..count).map(|_| read_value(&mut reader, field)).collect()
    }

    /// The `i`-th value of a repeated primitive field.
    pub fn get_at(&self, name: &str, i: usize) -> Result<Option<Value>, DecodeError> {
        let (index, field) = self.field(name)?;
        Self::expect(field, false, Some(true))?;
        let Some(mut reader) = self.locate(index)? else {
            return Ok(None);
        };
        let count = reader.read_len(MAX_REPEAT, "count")?;
        if i >= count {
            return Ok(None);
        }
        for _ in 0..i {
            skip_value(&mut reader, field)?;
        }
        read_value(&mut reader, field).map(Some)
    }

    /// View of a single-valued complex field.
    pub fn child(&self, name: &str) -> Result<Option<CompactView<'a>>, DecodeError> {
        let (index, field) = self.field(name)?;
        Self::expect(field, true, Some(false))?;
        let ty = self.target(field)?;
        match self.locate(index)? {
            Some(reader) => {
                let (body, end) = object_range(&self.data[..self.end], reader.position())?;
                Ok(Some(Self::bound(self.data, self.registry, ty, body, end)))
            }
            None => Ok(None),
        }
    }

    /// View of the `i`-th object of a repeated complex field, without
    /// decoding its siblings.
    pub fn child_at(&self, name: &str, i: usize) -> Result<Option<CompactView<'a>>, DecodeError> {
        let (index, field) = self.field(name)?;
        Self::expect(field, true, Some(true))?;
        let ty = self.target(field)?;
        let Some(mut reader) = self.locate(index)? else {
            return Ok(None);
        };
        let count = reader.read_len(MAX_REPEAT, "count")?;
        if i >= count {
            return Ok(None);
        }
        for _ in 0..i {
            let len = reader.read_len(MAX_BUFFER_SIZE, "object length")?;
            reader.skip(len, "object")?;
        }
        let (body, end) = object_range(&self.data[..self.end], reader.position())?;
        Ok(Some(Self::bound(self.data, self.registry, ty, body, end)))
    }

    /// Independent views of every object of a complex field.
    pub fn children(&self, name: &str) -> Result<Vec<CompactView<'a>>, DecodeError> {
        let (index, field) = self.field(name)?;
        Self::expect(field, true, None)?;
        let ty = self.target(field)?;
        let Some(mut reader) = self.locate(index)? else {
            return Ok(Vec::new());
        };
        let count = if field.is_repeated() {
            reader.read_len(MAX_REPEAT, "count")?
        } else {
            1
        };
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let (body, end) = object_range(&self.data[..self.end], reader.position())?;
            out.push(Self::bound(self.data, self.registry, ty, body, end));
            reader = self.reader(end);
        }
        Ok(out)
    }

    /// Decodes this object and everything below it.
    pub fn to_node(&self) -> Result<Node, DecodeError> {
        decode_object(self.data, self.registry, self.ty, self.body, self.end, 1)
    }
}

// =============================================================================
// FIELD PAYLOADS
// =============================================================================

fn skip_field(reader: &mut Reader<'_>, field: &FieldDescriptor) -> Result<(), DecodeError> {
    let count = if field.is_repeated() {
        reader.read_len(MAX_REPEAT, "count")?
    } else {
        1
    };
    for _ in 0..count {
        if field.is_complex() {
            let len = reader.read_len(MAX_BUFFER_SIZE, "object length")?;
            reader.skip(len, "object")?;
        } else {
            skip_value(reader, field)?;
        }
    }
    Ok(())
}

fn skip_value(reader: &mut Reader<'_>, field: &FieldDescriptor) -> Result<(), DecodeError> {
    match field.primitive() {
        Some(PrimitiveType::Bool) => reader.skip(1, "bool"),
        Some(PrimitiveType::Float) => reader.skip(8, "float"),
        Some(PrimitiveType::Int) => reader.read_varint("int").map(drop),
        Some(
            PrimitiveType::Decimal
            | PrimitiveType::Date
            | PrimitiveType::Time
            | PrimitiveType::DateTime,
        ) => {
            reader.read_varint("value")?;
            reader.read_varint("value").map(drop)
        }
        Some(PrimitiveType::Text) => {
            if !field.common_values().is_empty() && reader.read_varint("common value")? != 0 {
                return Ok(());
            }
            let len = reader.read_len(MAX_STRING_LEN, "text")?;
            reader.skip(len, "text")
        }
        Some(PrimitiveType::Bytes) => {
            let len = reader.read_len(MAX_BYTES_LEN, "bytes")?;
            reader.skip(len, "bytes")
        }
        None => Err(DecodeError::MalformedEncoding {
            context: "complex field read as a value",
        }),
    }
}

pub(crate) fn narrow<T: TryFrom<i64>>(value: i64, context: &'static str) -> Result<T, DecodeError> {
    T::try_from(value).map_err(|_| DecodeError::MalformedEncoding { context })
}

pub(crate) fn read_value(reader: &mut Reader<'_>, field: &FieldDescriptor) -> Result<Value, DecodeError> {
    let primitive = field.primitive().ok_or(DecodeError::MalformedEncoding {
        context: "complex field read as a value",
    })?;
    Ok(match primitive {
        PrimitiveType::Bool => match reader.read_byte("bool")? {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            value => return Err(DecodeError::InvalidBool { value }),
        },
        PrimitiveType::Int => Value::Int(reader.read_signed_varint("int")?),
        PrimitiveType::Float => Value::Float(reader.read_f64("float")?),
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
            let common = field.common_values();
            if !common.is_empty() {
                let tag = reader.read_varint("common value")? as usize;
                if tag != 0 {
                    let value = common.get(tag - 1).ok_or(DecodeError::IndexOutOfBounds {
                        dict: "common values",
                        index: tag - 1,
                        size: common.len(),
                    })?;
                    return Ok(Value::Text(value.to_string()));
                }
            }
            Value::Text(reader.read_string(MAX_STRING_LEN, "text")?)
        }
        PrimitiveType::Bytes => Value::Bytes(reader.read_bytes_prefixed(MAX_BYTES_LEN, "bytes")?.to_vec()),
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
// FULL DECODE
// =============================================================================

pub(crate) fn decode_object(
    data: &[u8],
    registry: &SchemaRegistry,
    ty: &Arc<ComplexType>,
    body: usize,
    end: usize,
    depth: usize,
) -> Result<Node, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::DepthExceeded { limit: MAX_DEPTH });
    }
    let mut node = Node::new(Arc::clone(ty));
    let mut reader = Reader::at(&data[..end], body);
    let bitmap = reader.read_bytes(presence_len(ty), "presence bitmap")?;
    for (index, field) in ty.fields().iter().enumerate() {
        if !is_set(bitmap, index) {
            continue;
        }
        let slot = match registry.target(field) {
            Some(child_ty) => {
                let count = if field.is_repeated() {
                    reader.read_len(MAX_REPEAT, "count")?
                } else {
                    1
                };
                let mut children = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    let (child_body, child_end) = object_range(&data[..end], reader.position())?;
                    reader = Reader::at(&data[..end], child_end);
                    children.push(decode_object(
                        data,
                        registry,
                        child_ty,
                        child_body,
                        child_end,
                        depth + 1,
                    )?);
                }
                if field.is_repeated() {
                    Slot::Children(children)
                } else {
                    children.pop().map(Box::new).map(Slot::Child).unwrap_or_default()
                }
            }
            None if field.is_repeated() => {
                let count = reader.read_len(MAX_REPEAT, "count")?;
                let values = (0..count)
                    .map(|_| read_value(&mut reader, field))
                    .collect::<Result<Vec<_>, _>>()?;
                Slot::Scalars(values)
            }
            None => Slot::Scalar(read_value(&mut reader, field)?),
        };
        node.put(index, slot);
    }
    if reader.position() != end {
        return Err(DecodeError::TrailingBytes {
            context: "object",
            count: end - reader.position(),
        });
    }
    Ok(node)
}

// =============================================================================
// LAYOUT
// =============================================================================

/// Records the segments of the object whose length prefix sits at `pos`.
pub(crate) fn describe_object(
    data: &[u8],
    registry: &SchemaRegistry,
    ty: &Arc<ComplexType>,
    pos: usize,
    path: &str,
    cx: &mut EncodingContext,
    depth: usize,
) -> Result<usize, DecodeError> {
    if depth > MAX_DEPTH {
        return Err(DecodeError::DepthExceeded { limit: MAX_DEPTH });
    }
    let (body, end) = object_range(data, pos)?;
    cx.push(pos, end - pos, path, SegmentKind::Object);
    let mut reader = Reader::at(&data[..end], body);
    let bitmap = reader.read_bytes(presence_len(ty), "presence bitmap")?;
    cx.push(body, bitmap.len(), path, SegmentKind::Presence);

    for (index, field) in ty.fields().iter().enumerate() {
        if !is_set(bitmap, index) {
            continue;
        }
        let count = if field.is_repeated() {
            let start = reader.position();
            let count = reader.read_len(MAX_REPEAT, "count")?;
            let label = field_path(path, field.name(), None);
            cx.push(start, varint_len(count as u64), &label, SegmentKind::Count);
            Some(count)
        } else {
            None
        };
        for i in 0..count.unwrap_or(1) {
            let item_path = field_path(path, field.name(), count.map(|_| i));
            let start = reader.position();
            match registry.target(field) {
                Some(child_ty) => {
                    let next = describe_object(data, registry, child_ty, start, &item_path, cx, depth + 1)?;
                    reader = Reader::at(&data[..end], next);
                }
                None => {
                    let kind = if !field.common_values().is_empty()
                        && reader.clone().read_varint("common value")? != 0
                    {
                        SegmentKind::CommonValue
                    } else {
                        SegmentKind::Value
                    };
                    skip_value(&mut reader, field)?;
                    cx.push(start, reader.position() - start, &item_path, kind);
                }
            }
        }
    }
    Ok(end)
}
