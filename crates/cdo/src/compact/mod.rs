//! Compact binary encoding (SDO).
//!
//! A compact buffer is an immutable, size-optimised rendering of one object
//! graph. Text fields with a common-value dictionary store a small index
//! instead of the string whenever the value is in the dictionary.
//!
//! # Wire format
//!
//! ```text
//! "CDOS" | version: u8 | fingerprint: [u8; 8] | root type: varint | object
//! object = body_len: varint | presence bitmap | present fields in declaration order
//! ```
//!
//! Repeated fields are prefixed with their count. A compressed envelope
//! (`"CDOZ" | uncompressed_len: varint | zstd data`) wraps a whole buffer.
//!
//! # Reading
//!
//! [`CompactBuffer::root`] returns a [`CompactView`], a `Copy` handle that
//! borrows the buffer and cannot go stale. [`ProjectionPool`] offers pooled
//! handles that share one thread-local slot per type and do go stale when a
//! sibling is bound; see [`PooledView`].

mod context;
mod encode;
mod pool;
mod view;

use std::io::{self, Read};
use std::sync::Arc;

use tracing::debug;

use crate::codec::primitives::{Reader, Writer};
use crate::error::{DecodeError, EncodeError};
use crate::limits::{
    FINGERPRINT_LEN, FORMAT_VERSION, MAGIC_COMPACT, MAGIC_COMPACT_COMPRESSED, MAX_BUFFER_SIZE,
    MAX_DEPTH,
};
use crate::model::Node;
use crate::schema::{ComplexType, SchemaRegistry};

pub use context::{EncodingContext, Segment, SegmentKind, Unit};
pub use encode::{encode, encode_with};
pub use pool::{OwnedView, PooledView, ProjectionPool};
pub use view::CompactView;

pub(crate) use context::field_path;
pub(crate) use encode::check_type;
pub(crate) use view::{describe_object, narrow, object_range};

/// Options for compact encoding.
#[derive(Debug, Clone, Copy)]
pub struct CompactOptions {
    /// Wrap the buffer in a zstd envelope at this level when writing it out.
    pub compression: Option<i32>,
    /// Maximum object nesting accepted by the encoder.
    pub max_depth: usize,
}

impl Default for CompactOptions {
    fn default() -> Self {
        Self {
            compression: None,
            max_depth: MAX_DEPTH,
        }
    }
}

// =============================================================================
// HEADER
// =============================================================================

/// Header fields shared by the compact and Preon encodings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Header {
    pub fingerprint: [u8; FINGERPRINT_LEN],
    pub root: usize,
    /// First byte after the header.
    pub offset: usize,
}

pub(crate) fn write_header(writer: &mut Writer, magic: &[u8; 4], registry: &SchemaRegistry, root: &ComplexType) {
    writer.write_bytes(magic);
    writer.write_byte(FORMAT_VERSION);
    writer.write_bytes(&registry.fingerprint());
    writer.write_varint(root.index() as u64);
}

pub(crate) fn read_header(data: &[u8], magic: &[u8; 4]) -> Result<Header, DecodeError> {
    let mut reader = Reader::new(data);
    let found = reader.read_bytes(4, "magic")?;
    if found != magic {
        let mut found_magic = [0u8; 4];
        found_magic.copy_from_slice(found);
        return Err(DecodeError::InvalidMagic { found: found_magic });
    }
    let version = reader.read_byte("version")?;
    if version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion { version });
    }
    let mut fingerprint = [0u8; FINGERPRINT_LEN];
    fingerprint.copy_from_slice(reader.read_bytes(FINGERPRINT_LEN, "fingerprint")?);
    let root = reader.read_varint("root type")? as usize;
    Ok(Header {
        fingerprint,
        root,
        offset: reader.position(),
    })
}

/// Resolves the root type of a buffer against the registry it is read with.
pub(crate) fn resolve_root<'r>(
    registry: &'r SchemaRegistry,
    header_fingerprint: [u8; FINGERPRINT_LEN],
    root: usize,
) -> Result<&'r Arc<ComplexType>, DecodeError> {
    let expected = registry.fingerprint();
    if header_fingerprint != expected {
        return Err(DecodeError::SchemaMismatch {
            expected,
            found: header_fingerprint,
        });
    }
    registry.by_index(root).ok_or(DecodeError::IndexOutOfBounds {
        dict: "types",
        index: root,
        size: registry.len(),
    })
}

/// Prints bytes in `' '..='z'` as-is and everything else as `.`, 80 per line.
pub(crate) fn visualise_bytes<W: io::Write>(bytes: &[u8], mut w: W) -> io::Result<()> {
    for line in bytes.chunks(80) {
        let text: String = line
            .iter()
            .map(|&b| if (b' '..=b'z').contains(&b) { b as char } else { '.' })
            .collect();
        writeln!(w, "{text}")?;
    }
    Ok(())
}

// =============================================================================
// BUFFER
// =============================================================================

/// An immutable compact encoding of one object graph.
///
/// Cloning is cheap: the bytes are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactBuffer {
    pub(crate) data: Arc<[u8]>,
    /// Start of the root object.
    pub(crate) offset: usize,
    pub(crate) root: usize,
    pub(crate) fingerprint: [u8; FINGERPRINT_LEN],
}

impl CompactBuffer {
    /// Wraps encoded bytes, unwrapping a zstd envelope if present.
    ///
    /// Checks the header and the framing of the root object. The schema
    /// fingerprint is checked when the buffer is read with a registry.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, DecodeError> {
        let data = if bytes.starts_with(MAGIC_COMPACT_COMPRESSED) {
            decompress_zstd(&bytes[MAGIC_COMPACT_COMPRESSED.len()..])?
        } else {
            bytes
        };
        let header = read_header(&data, MAGIC_COMPACT)?;
        let (_, end) = object_range(&data, header.offset)?;
        if end != data.len() {
            return Err(DecodeError::TrailingBytes {
                context: "compact buffer",
                count: data.len() - end,
            });
        }
        Ok(Self {
            data: Arc::from(data),
            offset: header.offset,
            root: header.root,
            fingerprint: header.fingerprint,
        })
    }

    /// Uncompressed encoded bytes, header included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Encoded size of the root object, excluding the header.
    pub fn size(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Fingerprint of the schema the buffer was written with.
    pub fn fingerprint(&self) -> [u8; FINGERPRINT_LEN] {
        self.fingerprint
    }

    /// Registry index of the root type.
    pub fn root_index(&self) -> usize {
        self.root
    }

    /// Wraps the buffer in a zstd envelope.
    pub fn compress(&self, level: i32) -> Result<Vec<u8>, EncodeError> {
        let compressed = zstd::encode_all(&self.data[..], level)
            .map_err(|e| EncodeError::CompressionFailed(e.to_string()))?;

        let mut writer = Writer::with_capacity(4 + 10 + compressed.len());
        writer.write_bytes(MAGIC_COMPACT_COMPRESSED);
        writer.write_varint(self.data.len() as u64);
        writer.write_bytes(&compressed);
        debug!(
            uncompressed = self.data.len(),
            compressed = writer.len(),
            "Compressed compact buffer"
        );
        Ok(writer.into_bytes())
    }

    /// View of the root object.
    pub fn root<'a>(&'a self, registry: &'a SchemaRegistry) -> Result<CompactView<'a>, DecodeError> {
        let ty = resolve_root(registry, self.fingerprint(), self.root)?;
        let (body, end) = object_range(&self.data, self.offset)?;
        Ok(CompactView::bound(&self.data, registry, ty, body, end))
    }

    /// Decodes the whole buffer into an object graph.
    pub fn to_node(&self, registry: &SchemaRegistry) -> Result<Node, DecodeError> {
        let node = self.root(registry)?.to_node()?;
        debug!(ty = node.type_name(), bytes = self.data.len(), "Decoded compact buffer");
        Ok(node)
    }

    /// Describes where every object, count and value sits in the buffer.
    pub fn context(&self, registry: &SchemaRegistry) -> Result<EncodingContext, DecodeError> {
        let ty = resolve_root(registry, self.fingerprint(), self.root)?;
        let mut cx = EncodingContext::new(Unit::Bytes);
        cx.push(0, self.offset, "", SegmentKind::Header);
        let path = format!("/{}", ty.name());
        describe_object(&self.data, registry, ty, self.offset, &path, &mut cx, 1)?;
        Ok(cx)
    }

    /// Writes a printable rendering of the encoded root object.
    pub fn visualise<W: io::Write>(&self, w: W) -> io::Result<()> {
        visualise_bytes(&self.data[self.offset..], w)
    }
}

/// Encodes a graph and reports the layout of the result.
pub fn encode_with_context(
    registry: &SchemaRegistry,
    node: &Node,
) -> Result<(CompactBuffer, EncodingContext), EncodeError> {
    let buffer = encode(registry, node)?;
    let cx = buffer
        .context(registry)
        .map_err(|e| EncodeError::NotEncodable {
            path: format!("/{}", node.type_name()),
            reason: e.to_string(),
        })?;
    Ok((buffer, cx))
}

fn decompress_zstd(compressed: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut reader = Reader::new(compressed);
    let declared_size = reader.read_varint("uncompressed_size")? as usize;

    if declared_size > MAX_BUFFER_SIZE {
        return Err(DecodeError::LengthExceedsLimit {
            field: "uncompressed_size",
            len: declared_size,
            max: MAX_BUFFER_SIZE,
        });
    }

    let compressed_data = &compressed[reader.position()..];
    let decoder = zstd::Decoder::new(compressed_data)
        .map_err(|e| DecodeError::DecompressionFailed(e.to_string()))?;

    let mut decompressed = Vec::with_capacity(declared_size);
    decoder
        .take(declared_size as u64 + 1)
        .read_to_end(&mut decompressed)
        .map_err(|e| DecodeError::DecompressionFailed(e.to_string()))?;

    if decompressed.len() != declared_size {
        return Err(DecodeError::UncompressedSizeMismatch {
            declared: declared_size,
            actual: decompressed.len(),
        });
    }

    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Value;
    use crate::schema::{FieldType, PrimitiveType};

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .complex("Customers", |t| t.repeated("Customer", FieldType::complex("Customer")))
            .complex("Customer", |t| {
                t.required("Number", PrimitiveType::Text)
                    .optional_with("City", PrimitiveType::Text, |f| {
                        f.common_values(["London", "Paris"])
                    })
                    .repeated("Score", PrimitiveType::Int)
                    .optional("Address", FieldType::complex("Address"))
            })
            .complex("Address", |t| {
                t.required("Street", PrimitiveType::Text)
                    .optional("Active", PrimitiveType::Bool)
            })
            .build()
            .unwrap()
    }

    fn customer(registry: &SchemaRegistry, number: &str, city: &str) -> Node {
        let mut c = registry.new_node("Customer").unwrap();
        c.set("Number", number).unwrap();
        c.set("City", city).unwrap();
        c
    }

    fn sample(registry: &SchemaRegistry) -> Node {
        let mut root = registry.new_node("Customers").unwrap();
        let mut first = customer(registry, "C1", "London");
        first.push("Score", 7i64).unwrap();
        first.push("Score", -3i64).unwrap();
        let mut address = registry.new_node("Address").unwrap();
        address.set("Street", "High St").unwrap();
        address.set("Active", true).unwrap();
        first.set_child("Address", address).unwrap();
        root.push_child("Customer", first).unwrap();
        root.push_child("Customer", customer(registry, "C2", "Leeds")).unwrap();
        root.push_child("Customer", customer(registry, "C3", "Paris")).unwrap();
        root
    }

    #[test]
    fn test_round_trip() {
        let registry = registry();
        let root = sample(&registry);
        let buffer = encode(&registry, &root).unwrap();
        assert_eq!(buffer.to_node(&registry).unwrap(), root);

        let reread = CompactBuffer::from_bytes(buffer.to_bytes()).unwrap();
        assert_eq!(reread, buffer);
    }

    #[test]
    fn test_common_values_shrink_buffer() {
        let registry = registry();
        let mut root = registry.new_node("Customers").unwrap();
        root.push_child("Customer", customer(&registry, "C1", "London")).unwrap();
        let common = encode(&registry, &root).unwrap();

        let mut root = registry.new_node("Customers").unwrap();
        root.push_child("Customer", customer(&registry, "C1", "Lisbon")).unwrap();
        let literal = encode(&registry, &root).unwrap();

        // index 1 vs tag 0 + length + "Lisbon"
        assert_eq!(literal.size() - common.size(), 7);
        assert!(!common.as_bytes().windows(6).any(|w| w == b"London"));
    }

    #[test]
    fn test_view_accessors() {
        let registry = registry();
        let buffer = encode(&registry, &sample(&registry)).unwrap();
        let root = buffer.root(&registry).unwrap();
        assert_eq!(root.type_name(), "Customers");
        assert_eq!(root.count("Customer").unwrap(), 3);

        let third = root.child_at("Customer", 2).unwrap().unwrap();
        assert_eq!(third.get("Number").unwrap(), Some(Value::from("C3")));
        assert_eq!(third.get("City").unwrap(), Some(Value::from("Paris")));
        assert!(!third.is_present("Address").unwrap());
        assert!(root.child_at("Customer", 3).unwrap().is_none());

        let first = root.child_at("Customer", 0).unwrap().unwrap();
        assert_eq!(first.get_all("Score").unwrap(), vec![Value::Int(7), Value::Int(-3)]);
        assert_eq!(first.get_at("Score", 1).unwrap(), Some(Value::Int(-3)));
        let address = first.child("Address").unwrap().unwrap();
        assert_eq!(address.get("Street").unwrap(), Some(Value::from("High St")));

        let numbers: Vec<_> = root
            .children("Customer")
            .unwrap()
            .iter()
            .map(|c| c.get("Number").unwrap())
            .collect();
        assert_eq!(numbers.len(), 3);
        // views are independent: the first is still the first
        assert_eq!(first.get("Number").unwrap(), Some(Value::from("C1")));
    }

    #[test]
    fn test_view_rejects_wrong_field() {
        let registry = registry();
        let buffer = encode(&registry, &sample(&registry)).unwrap();
        let root = buffer.root(&registry).unwrap();
        assert!(matches!(
            root.get("Nope"),
            Err(DecodeError::UnknownField { .. })
        ));
        assert!(matches!(
            root.get("Customer"),
            Err(DecodeError::WrongKind { .. })
        ));
    }

    #[test]
    fn test_schema_mismatch() {
        let registry = registry();
        let buffer = encode(&registry, &sample(&registry)).unwrap();
        let other = SchemaRegistry::builder()
            .complex("Customers", |t| t.optional("Name", PrimitiveType::Text))
            .build()
            .unwrap();
        assert!(matches!(
            buffer.to_node(&other),
            Err(DecodeError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_header() {
        let registry = registry();
        let mut bytes = encode(&registry, &sample(&registry)).unwrap().to_bytes();
        bytes.push(0);
        assert!(matches!(
            CompactBuffer::from_bytes(bytes.clone()),
            Err(DecodeError::TrailingBytes { count: 1, .. })
        ));
        bytes[4] = 9;
        assert_eq!(
            CompactBuffer::from_bytes(bytes),
            Err(DecodeError::UnsupportedVersion { version: 9 })
        );
        assert!(matches!(
            CompactBuffer::from_bytes(b"XXXX".to_vec()),
            Err(DecodeError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_compressed_envelope() {
        let registry = registry();
        let root = sample(&registry);
        let buffer = encode(&registry, &root).unwrap();
        let compressed = buffer.compress(3).unwrap();
        assert!(compressed.starts_with(MAGIC_COMPACT_COMPRESSED));

        let reread = CompactBuffer::from_bytes(compressed).unwrap();
        assert_eq!(reread.to_node(&registry).unwrap(), root);
        assert_eq!(reread.fingerprint(), registry.fingerprint());
        assert_eq!(reread, buffer);
    }

    #[test]
    fn test_fingerprint_comes_from_header() {
        let registry = registry();
        let buffer = encode(&registry, &sample(&registry)).unwrap();
        assert_eq!(buffer.fingerprint(), registry.fingerprint());

        let mut bytes = buffer.to_bytes();
        bytes[5] ^= 0xff;
        let tampered = CompactBuffer::from_bytes(bytes).unwrap();
        assert_ne!(tampered.fingerprint(), registry.fingerprint());
        assert_eq!(
            tampered.to_node(&registry),
            Err(DecodeError::SchemaMismatch {
                expected: registry.fingerprint(),
                found: tampered.fingerprint(),
            })
        );
    }

    #[test]
    fn test_visualise_masks_beyond_z() {
        let mut out = Vec::new();
        visualise_bytes(b"Az {|}~\x00\n", &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Az ......\n");
    }

    #[test]
    fn test_context_and_visualise() {
        let registry = registry();
        let (buffer, cx) = encode_with_context(&registry, &sample(&registry)).unwrap();
        assert_eq!(cx.total(), buffer.as_bytes().len());
        assert_eq!(cx.segments()[0].kind, SegmentKind::Header);
        let city = cx.find("/Customers/Customer[0]/City").unwrap();
        assert_eq!(city.kind, SegmentKind::CommonValue);
        assert_eq!(city.len, 1);
        let city = cx.find("/Customers/Customer[1]/City").unwrap();
        assert_eq!(city.kind, SegmentKind::Value);
        assert!(cx.find("/Customers/Customer[0]/Address/Street").is_some());

        let mut out = Vec::new();
        buffer.visualise(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("High St"));
        assert!(text.lines().all(|l| l.len() <= 80));
    }
}
