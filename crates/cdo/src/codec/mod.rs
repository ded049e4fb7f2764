//! Wire formats.
//!
//! Text formats (XML, JSON, delimited) are parsed here and rendered through
//! the marshaller in [`crate::write`]. Binary formats live in
//! [`crate::compact`] and [`crate::preon`]; this module only routes to them.

pub mod delimited;
pub mod json;
pub mod primitives;
pub mod xml;

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;

use tracing::debug;

use crate::compact::CompactBuffer;
use crate::error::{ParseError, WriteError};
use crate::limits::{
    MAGIC_COMPACT, MAGIC_COMPACT_COMPRESSED, MAGIC_PREON, MAX_BUFFER_SIZE, MAX_DEPTH,
};
use crate::model::Node;
use crate::preon::PreonBuffer;
use crate::schema::{ComplexType, SchemaRegistry};

pub use delimited::DelimitedOptions;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// A supported wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Xml,
    Json,
    Delimited,
    /// Compact binary (SDO).
    Compact,
    /// Bit-packed binary.
    Preon,
}

impl Format {
    pub fn is_binary(self) -> bool {
        matches!(self, Format::Compact | Format::Preon)
    }

    /// Guesses the format from the first bytes of a message.
    ///
    /// Binary magics win; otherwise the first non-whitespace byte decides:
    /// `<` is XML, `{` is JSON and anything else is delimited text.
    pub fn sniff(prefix: &[u8]) -> Format {
        if prefix.starts_with(MAGIC_COMPACT) || prefix.starts_with(MAGIC_COMPACT_COMPRESSED) {
            return Format::Compact;
        }
        if prefix.starts_with(MAGIC_PREON) {
            return Format::Preon;
        }
        let text = prefix.strip_prefix(UTF8_BOM).unwrap_or(prefix);
        match text.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'<') => Format::Xml,
            Some(b'{') => Format::Json,
            _ => Format::Delimited,
        }
    }
}

/// Character encoding of a text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    /// ISO-8859-1: each byte is the code point of the same value.
    Latin1,
}

impl Encoding {
    /// Canonical label, as written in XML declarations.
    pub fn label(self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF-8",
            Encoding::Latin1 => "ISO-8859-1",
        }
    }

    /// Returns true if a declared label is compatible with this encoding.
    pub fn accepts_label(self, label: &str) -> bool {
        let label = label.trim().to_ascii_lowercase();
        match label.as_str() {
            "us-ascii" | "ascii" => true,
            "utf-8" | "utf8" => self == Encoding::Utf8,
            "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" | "l1" => self == Encoding::Latin1,
            _ => false,
        }
    }

    /// Decodes raw bytes, returning `None` for invalid UTF-8.
    pub(crate) fn decode(self, bytes: Vec<u8>) -> Option<String> {
        match self {
            Encoding::Utf8 => String::from_utf8(bytes).ok(),
            Encoding::Latin1 => Some(bytes.into_iter().map(char::from).collect()),
        }
    }
}

/// Options for parsing a message.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Input format; `None` sniffs it from the first bytes.
    pub format: Option<Format>,
    pub encoding: Encoding,
    pub delimited: DelimitedOptions,
    pub max_depth: usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            format: None,
            encoding: Encoding::Utf8,
            delimited: DelimitedOptions::default(),
            max_depth: MAX_DEPTH,
        }
    }
}

impl ParseOptions {
    pub fn new(format: Format) -> Self {
        Self {
            format: Some(format),
            ..Self::default()
        }
    }
}

/// Parses a message whose root is an instance of `type_name`.
pub fn parse<R: Read>(
    registry: &SchemaRegistry,
    type_name: &str,
    reader: R,
    options: &ParseOptions,
) -> Result<Node, ParseError> {
    let ty = registry.require(type_name)?;
    let mut reader = BufReader::new(reader);
    let format = match options.format {
        Some(format) => format,
        None => Format::sniff(reader.fill_buf()?),
    };
    debug!(
        ty = type_name,
        format = ?format,
        encoding = ?options.encoding,
        "Parsing message"
    );
    if !format.is_binary() && reader.fill_buf()?.starts_with(UTF8_BOM) {
        reader.consume(UTF8_BOM.len());
    }
    match format {
        Format::Xml => xml::parse(registry, ty, reader, options),
        Format::Json => json::parse(registry, ty, reader, options),
        Format::Delimited => delimited::parse(registry, ty, reader, options),
        Format::Compact => {
            let buffer = CompactBuffer::from_bytes(read_binary(reader)?)?;
            let node = buffer.to_node(registry)?;
            check_root(ty, node)
        }
        Format::Preon => {
            let buffer = PreonBuffer::from_bytes(read_binary(reader)?)?;
            let node = buffer.to_node(registry)?;
            check_root(ty, node)
        }
    }
}

fn read_binary<R: Read>(reader: R) -> Result<Vec<u8>, ParseError> {
    let mut bytes = Vec::new();
    reader
        .take(MAX_BUFFER_SIZE as u64 + 1)
        .read_to_end(&mut bytes)?;
    if bytes.len() > MAX_BUFFER_SIZE {
        return Err(ParseError::LimitExceeded {
            what: "binary buffer size",
            limit: MAX_BUFFER_SIZE,
        });
    }
    Ok(bytes)
}

fn check_root(expected: &Arc<ComplexType>, node: Node) -> Result<Node, ParseError> {
    if node.type_name() != expected.name() {
        return Err(ParseError::UnexpectedRoot {
            expected: expected.name().to_string(),
            found: node.type_name().to_string(),
        });
    }
    Ok(node)
}

// =============================================================================
// TEXT I/O
// =============================================================================

/// Re-encodes an ISO-8859-1 byte stream as UTF-8.
pub(crate) struct Latin1Reader<R> {
    inner: R,
    pending: Option<u8>,
}

impl<R: Read> Latin1Reader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            pending: None,
        }
    }
}

impl<R: Read> Read for Latin1Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut n = 0;
        if let Some(b) = self.pending.take() {
            buf[0] = b;
            n = 1;
        }
        let room = buf.len() - n;
        if n > 0 && room < 2 {
            return Ok(n);
        }
        // Each input byte expands to at most two output bytes.
        let mut raw = [0u8; 1024];
        let want = (room / 2).clamp(1, raw.len());
        let got = self.inner.read(&mut raw[..want])?;
        for &b in &raw[..got] {
            if b < 0x80 {
                buf[n] = b;
                n += 1;
                continue;
            }
            buf[n] = 0xC0 | (b >> 6);
            n += 1;
            let trail = 0x80 | (b & 0x3F);
            if n < buf.len() {
                buf[n] = trail;
                n += 1;
            } else {
                self.pending = Some(trail);
            }
        }
        Ok(n)
    }
}

/// Output stream that encodes text in the requested character encoding.
pub(crate) struct TextSink<W> {
    inner: W,
    encoding: Encoding,
}

impl<W: Write> TextSink<W> {
    pub(crate) fn new(inner: W, encoding: Encoding) -> Self {
        Self { inner, encoding }
    }

    pub(crate) fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub(crate) fn write_str(&mut self, s: &str) -> Result<(), WriteError> {
        match self.encoding {
            Encoding::Utf8 => self.inner.write_all(s.as_bytes())?,
            Encoding::Latin1 if s.is_ascii() => self.inner.write_all(s.as_bytes())?,
            Encoding::Latin1 => {
                let mut bytes = Vec::with_capacity(s.len());
                for ch in s.chars() {
                    let code = u32::from(ch);
                    if code > 0xFF {
                        return Err(WriteError::Unencodable {
                            ch,
                            encoding: self.encoding,
                        });
                    }
                    bytes.push(code as u8);
                }
                self.inner.write_all(&bytes)?;
            }
        }
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<(), WriteError> {
        self.inner.flush().map_err(WriteError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff() {
        assert_eq!(Format::sniff(b"  <?xml version='1.0'?>"), Format::Xml);
        assert_eq!(Format::sniff(b"\xEF\xBB\xBF<Root/>"), Format::Xml);
        assert_eq!(Format::sniff(b"\n{\"a\":1}"), Format::Json);
        assert_eq!(Format::sniff(b"CDOS\x01"), Format::Compact);
        assert_eq!(Format::sniff(b"CDOZ\x01"), Format::Compact);
        assert_eq!(Format::sniff(b"CDOP\x01"), Format::Preon);
        assert_eq!(Format::sniff(b"Number,City\n"), Format::Delimited);
        assert_eq!(Format::sniff(b""), Format::Delimited);
    }

    #[test]
    fn test_encoding_labels() {
        assert!(Encoding::Utf8.accepts_label("utf-8"));
        assert!(Encoding::Utf8.accepts_label("US-ASCII"));
        assert!(!Encoding::Utf8.accepts_label("ISO-8859-1"));
        assert!(Encoding::Latin1.accepts_label("iso-8859-1"));
        assert!(!Encoding::Latin1.accepts_label("UTF-16"));
    }

    #[test]
    fn test_latin1_reader() {
        let input: &[u8] = &[b'c', 0xE9, b'!', 0xFF];
        let mut out = String::new();
        Latin1Reader::new(input).read_to_string(&mut out).unwrap();
        assert_eq!(out, "c\u{e9}!\u{ff}");
    }

    #[test]
    fn test_latin1_reader_tiny_buffers() {
        let input: &[u8] = &[0xE9, 0xE8];
        let mut reader = Latin1Reader::new(input);
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        while reader.read(&mut byte).unwrap() == 1 {
            out.push(byte[0]);
        }
        assert_eq!(String::from_utf8(out).unwrap(), "\u{e9}\u{e8}");
    }

    #[test]
    fn test_text_sink_latin1() {
        let mut sink = TextSink::new(Vec::new(), Encoding::Latin1);
        sink.write_str("caf\u{e9}").unwrap();
        assert!(matches!(
            sink.write_str("\u{20ac}"),
            Err(WriteError::Unencodable { ch: '\u{20ac}', .. })
        ));
        assert_eq!(sink.inner, vec![b'c', b'a', b'f', 0xE9]);
    }
}
