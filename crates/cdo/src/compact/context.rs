//! Layout reports for encoded buffers.

use std::fmt;
use std::io;

/// What a segment of an encoded buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Header,
    /// A whole complex object.
    Object,
    /// Presence bitmap or presence bit.
    Presence,
    /// Occurrence count of a repeated field.
    Count,
    Value,
    /// A text value stored as a common-value dictionary index.
    CommonValue,
}

impl SegmentKind {
    fn label(self) -> &'static str {
        match self {
            SegmentKind::Header => "header",
            SegmentKind::Object => "object",
            SegmentKind::Presence => "presence",
            SegmentKind::Count => "count",
            SegmentKind::Value => "value",
            SegmentKind::CommonValue => "common",
        }
    }
}

/// Unit of segment offsets and lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Bytes,
    Bits,
}

/// One contiguous region of an encoded buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub start: usize,
    pub len: usize,
    /// Location in the graph, e.g. `/Customers/Customer[1]/City`.
    pub path: String,
    pub kind: SegmentKind,
}

/// Describes where every part of a graph landed in an encoded buffer.
///
/// Segments are listed in buffer order; an object's segment precedes and
/// encloses the segments of its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingContext {
    unit: Unit,
    total: usize,
    segments: Vec<Segment>,
}

impl EncodingContext {
    pub(crate) fn new(unit: Unit) -> Self {
        Self {
            unit,
            total: 0,
            segments: Vec::new(),
        }
    }

    /// Records a segment and returns its position in the list.
    pub(crate) fn push(&mut self, start: usize, len: usize, path: &str, kind: SegmentKind) -> usize {
        self.total = self.total.max(start + len);
        self.segments.push(Segment {
            start,
            len,
            path: path.to_string(),
            kind,
        });
        self.segments.len() - 1
    }

    /// Sets the end of a segment recorded before its contents were known.
    pub(crate) fn close(&mut self, index: usize, end: usize) {
        let segment = &mut self.segments[index];
        segment.len = end - segment.start;
        self.total = self.total.max(end);
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// End of the last segment, in [`Self::unit`]s.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// First segment recorded for `path`.
    pub fn find(&self, path: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.path == path)
    }

    /// Writes the report as text, one segment per line.
    pub fn write_to<W: io::Write>(&self, mut w: W) -> io::Result<()> {
        write!(w, "{self}")
    }
}

impl fmt::Display for EncodingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            Unit::Bytes => "bytes",
            Unit::Bits => "bits",
        };
        writeln!(f, "{} {unit} in {} segments", self.total, self.segments.len())?;
        for s in &self.segments {
            writeln!(
                f,
                "{:>10} {:>8}  {:<8}  {}",
                s.start,
                s.len,
                s.kind.label(),
                s.path
            )?;
        }
        Ok(())
    }
}

/// Path of a field inside an object, with an index for repeated fields.
pub(crate) fn field_path(parent: &str, field: &str, index: Option<usize>) -> String {
    match index {
        Some(i) => format!("{parent}/{field}[{i}]"),
        None => format!("{parent}/{field}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_layout() {
        let mut cx = EncodingContext::new(Unit::Bytes);
        cx.push(0, 14, "", SegmentKind::Header);
        cx.push(14, 6, "/Order", SegmentKind::Object);
        cx.push(16, 4, "/Order/Id", SegmentKind::Value);
        assert_eq!(cx.total(), 20);
        assert_eq!(cx.find("/Order/Id").map(|s| s.start), Some(16));

        let text = cx.to_string();
        assert!(text.starts_with("20 bytes in 3 segments\n"));
        assert!(text.contains("value     /Order/Id"));
    }

    #[test]
    fn test_field_path() {
        assert_eq!(field_path("/A", "B", None), "/A/B");
        assert_eq!(field_path("/A", "B", Some(2)), "/A/B[2]");
    }
}
