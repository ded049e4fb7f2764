//! Delimited text (CSV-like record files).
//!
//! Only "record file" shapes are supported: the root type has exactly one
//! field, a repeated complex field, and the record type has only primitive
//! fields. Each line is one record. An unquoted empty cell is an absent
//! field, a quoted empty cell is an empty value. Repeated values share a cell,
//! joined with the repeat delimiter; backslash escapes a literal delimiter.

use std::io::{BufRead, Write};
use std::sync::Arc;

use crate::codec::{Encoding, Format, ParseOptions, TextSink};
use crate::error::{ParseError, WriteError};
use crate::limits::{MAX_REPEAT, MAX_STRING_LEN};
use crate::model::{Node, Slot, Value};
use crate::schema::{ComplexType, FieldDescriptor, SchemaRegistry};
use crate::write::Emitter;

/// Delimited text settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimitedOptions {
    /// Cell separator.
    pub delimiter: u8,
    /// Separator between the values of a repeated field inside one cell.
    pub repeat_delimiter: u8,
    pub quote: u8,
    /// First line names the columns.
    pub header: bool,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            repeat_delimiter: b'|',
            quote: b'"',
            header: true,
        }
    }
}

/// The record field of a record-file root type and the record type itself.
pub(crate) fn record_shape<'r>(
    registry: &'r SchemaRegistry,
    root: &ComplexType,
) -> Result<(usize, &'r Arc<ComplexType>), &'static str> {
    let [field] = root.fields() else {
        return Err("root type must have exactly one field");
    };
    if !field.is_repeated() {
        return Err("root field must be repeated");
    }
    let record = registry
        .target(field)
        .ok_or("root field must be a complex type")?;
    if record.fields().iter().any(FieldDescriptor::is_complex) {
        return Err("record type must have only primitive fields");
    }
    Ok((0, record))
}

// =============================================================================
// PARSING
// =============================================================================

struct RawCell {
    bytes: Vec<u8>,
    quoted: bool,
}

/// Splits one record; `None` if a quoted cell continues on the next line.
fn split_record(line: &[u8], options: &DelimitedOptions) -> Option<Vec<RawCell>> {
    let mut cells = Vec::new();
    let mut current = Vec::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut bytes = line.iter().copied().peekable();
    while let Some(b) = bytes.next() {
        if in_quotes {
            if b == options.quote {
                if bytes.peek() == Some(&options.quote) {
                    bytes.next();
                    current.push(b);
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(b);
            }
        } else if b == options.quote && current.is_empty() && !quoted {
            in_quotes = true;
            quoted = true;
        } else if b == options.delimiter {
            cells.push(RawCell {
                bytes: std::mem::take(&mut current),
                quoted,
            });
            quoted = false;
        } else {
            current.push(b);
        }
    }
    if in_quotes {
        return None;
    }
    cells.push(RawCell {
        bytes: current,
        quoted,
    });
    Some(cells)
}

fn strip_line_end(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    }
}

struct RecordReader<'o, R> {
    reader: R,
    options: &'o DelimitedOptions,
    encoding: Encoding,
    line: usize,
}

impl<R: BufRead> RecordReader<'_, R> {
    /// Reads the next record, decoding each cell.
    fn next_record(&mut self) -> Result<Option<Vec<(String, bool)>>, ParseError> {
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        self.line += 1;
        let start = self.line;
        loop {
            let mut line = buf.clone();
            strip_line_end(&mut line);
            if let Some(cells) = split_record(&line, self.options) {
                return cells
                    .into_iter()
                    .map(|cell| {
                        let text = self.encoding.decode(cell.bytes).ok_or(
                            ParseError::InvalidEncoding {
                                encoding: self.encoding,
                                line: start,
                                column: 1,
                            },
                        )?;
                        Ok((text, cell.quoted))
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Some);
            }
            if buf.len() > MAX_STRING_LEN {
                return Err(ParseError::LimitExceeded {
                    what: "record length",
                    limit: MAX_STRING_LEN,
                });
            }
            if self.reader.read_until(b'\n', &mut buf)? == 0 {
                return Err(ParseError::Malformed {
                    context: "delimited",
                    line: start,
                    column: 1,
                    detail: "unterminated quoted cell".to_string(),
                });
            }
            self.line += 1;
        }
    }
}

/// Splits a repeated cell on the repeat delimiter, honouring backslash escapes.
fn split_repeated(cell: &str, delimiter: char) -> Vec<String> {
    let mut out = vec![String::new()];
    let mut chars = cell.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let (Some(next), Some(last)) = (chars.next(), out.last_mut()) {
                    last.push(next);
                }
            }
            c if c == delimiter => out.push(String::new()),
            c => {
                if let Some(last) = out.last_mut() {
                    last.push(c);
                }
            }
        }
    }
    out
}

pub(crate) fn parse<R: BufRead>(
    registry: &SchemaRegistry,
    ty: &Arc<ComplexType>,
    reader: R,
    options: &ParseOptions,
) -> Result<Node, ParseError> {
    let (record_field, record_ty) =
        record_shape(registry, ty).map_err(|reason| ParseError::UnsupportedShape {
            format: Format::Delimited,
            ty: ty.name().to_string(),
            reason,
        })?;
    let settings = &options.delimited;
    let mut records = RecordReader {
        reader,
        options: settings,
        encoding: options.encoding,
        line: 0,
    };

    let columns: Vec<usize> = if settings.header {
        match records.next_record()? {
            None => return Ok(Node::new(Arc::clone(ty))),
            Some(header) => {
                let mut columns = Vec::with_capacity(header.len());
                for (name, _) in header {
                    let index = record_ty.field_index(&name).ok_or_else(|| {
                        ParseError::UnexpectedField {
                            ty: record_ty.name().to_string(),
                            field: name.clone(),
                            line: 1,
                            column: columns.len() + 1,
                        }
                    })?;
                    if columns.contains(&index) {
                        return Err(ParseError::DuplicateField {
                            ty: record_ty.name().to_string(),
                            field: name,
                            line: 1,
                            column: columns.len() + 1,
                        });
                    }
                    columns.push(index);
                }
                columns
            }
        }
    } else {
        (0..record_ty.fields().len()).collect()
    };

    let repeat = char::from(settings.repeat_delimiter);
    let mut rows = Vec::new();
    while let Some(cells) = records.next_record()? {
        let line = records.line;
        // A blank line is a record only when there is a single column.
        if columns.len() != 1 && cells.len() == 1 && cells[0].0.is_empty() && !cells[0].1 {
            continue;
        }
        if cells.len() != columns.len() {
            return Err(ParseError::Malformed {
                context: "delimited",
                line,
                column: 1,
                detail: format!("expected {} cells, found {}", columns.len(), cells.len()),
            });
        }
        if rows.len() >= MAX_REPEAT {
            return Err(ParseError::LimitExceeded {
                what: "records",
                limit: MAX_REPEAT,
            });
        }
        let mut row = Node::new(Arc::clone(record_ty));
        for (column, (&index, (text, quoted))) in columns.iter().zip(cells).enumerate() {
            if text.is_empty() && !quoted {
                continue;
            }
            let field = &record_ty.fields()[index];
            let Some(primitive) = field.primitive() else {
                continue;
            };
            let value = |text: &str| {
                Value::parse(primitive, text).map_err(|source| ParseError::InvalidValue {
                    field: field.name().to_string(),
                    line,
                    column: column + 1,
                    source,
                })
            };
            if field.is_repeated() {
                let parts = if text.is_empty() {
                    vec![String::new()]
                } else {
                    split_repeated(&text, repeat)
                };
                let values = parts
                    .iter()
                    .map(|part| value(part.as_str()))
                    .collect::<Result<Vec<_>, _>>()?;
                row.put(index, Slot::Scalars(values));
            } else {
                row.put(index, Slot::Scalar(value(text.as_str())?));
            }
        }
        rows.push(row);
    }

    let mut root = Node::new(Arc::clone(ty));
    root.put(record_field, Slot::Children(rows));
    Ok(root)
}

// =============================================================================
// WRITING
// =============================================================================

#[derive(Debug, Clone)]
enum Cell {
    Absent,
    One(String),
    Many(Vec<String>),
}

/// Renders a record file, one line per record.
pub(crate) struct DelimitedEmitter<W> {
    out: TextSink<W>,
    options: DelimitedOptions,
    record: Arc<ComplexType>,
    depth: usize,
    cells: Vec<Cell>,
}

impl<W: Write> DelimitedEmitter<W> {
    pub(crate) fn new(out: TextSink<W>, options: DelimitedOptions, record: Arc<ComplexType>) -> Self {
        Self {
            out,
            options,
            record,
            depth: 0,
            cells: Vec::new(),
        }
    }

    fn quote(&self, text: &str) -> String {
        let delimiter = char::from(self.options.delimiter);
        let quote = char::from(self.options.quote);
        let needs = text.is_empty()
            || text
                .chars()
                .any(|c| c == delimiter || c == quote || c == '\r' || c == '\n');
        if !needs {
            return text.to_string();
        }
        let doubled: String = [quote, quote].iter().collect();
        let mut out = String::with_capacity(text.len() + 2);
        out.push(quote);
        out.push_str(&text.replace(quote, &doubled));
        out.push(quote);
        out
    }

    fn join(&self, values: &[String]) -> String {
        if let [only] = values {
            if only.is_empty() {
                return self.quote(only);
            }
        }
        let repeat = char::from(self.options.repeat_delimiter);
        let joined = values
            .iter()
            .map(|v| {
                let mut escaped = String::with_capacity(v.len());
                for c in v.chars() {
                    if c == '\\' || c == repeat {
                        escaped.push('\\');
                    }
                    escaped.push(c);
                }
                escaped
            })
            .collect::<Vec<_>>()
            .join(&repeat.to_string());
        self.quote(&joined)
    }

    fn write_row(&mut self, cells: Vec<String>) -> Result<(), WriteError> {
        let delimiter = char::from(self.options.delimiter).to_string();
        self.out.write_str(&cells.join(&delimiter))?;
        self.out.write_str("\n")
    }
}

impl<W: Write> Emitter for DelimitedEmitter<W> {
    fn begin_document(&mut self) -> Result<(), WriteError> {
        if self.options.header {
            let names: Vec<String> = self
                .record
                .fields()
                .iter()
                .map(|f| self.quote(f.name()))
                .collect();
            self.write_row(names)?;
        }
        Ok(())
    }

    fn end_document(&mut self) -> Result<(), WriteError> {
        self.out.flush()
    }

    fn start_object(&mut self, _field: Option<&FieldDescriptor>, _node: &Node) -> Result<(), WriteError> {
        self.depth += 1;
        if self.depth == 2 {
            self.cells = vec![Cell::Absent; self.record.fields().len()];
        }
        Ok(())
    }

    fn end_object(&mut self, _field: Option<&FieldDescriptor>, _node: &Node) -> Result<(), WriteError> {
        if self.depth == 2 {
            let cells = std::mem::take(&mut self.cells);
            let rendered = cells
                .into_iter()
                .map(|cell| match cell {
                    Cell::Absent => String::new(),
                    Cell::One(text) => self.quote(&text),
                    Cell::Many(values) => self.join(&values),
                })
                .collect();
            self.write_row(rendered)?;
        }
        self.depth = self.depth.saturating_sub(1);
        Ok(())
    }

    fn start_repeated(&mut self, field: &FieldDescriptor) -> Result<(), WriteError> {
        if self.depth == 2 {
            if let Some(index) = self.record.field_index(field.name()) {
                self.cells[index] = Cell::Many(Vec::new());
            }
        }
        Ok(())
    }

    fn scalar(&mut self, field: &FieldDescriptor, value: &Value) -> Result<(), WriteError> {
        let Some(index) = self.record.field_index(field.name()) else {
            return Ok(());
        };
        let text = value.to_lexical();
        match &mut self.cells[index] {
            Cell::Many(values) => values.push(text),
            cell => *cell = Cell::One(text),
        }
        Ok(())
    }
}
