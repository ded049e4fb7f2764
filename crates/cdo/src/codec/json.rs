//! JSON format.
//!
//! The document is the root object itself. Complex fields are objects,
//! repeated fields are arrays, and `null` marks an absent field. Booleans,
//! integers and finite floats are JSON literals; every other value is a
//! string holding its lexical form.

use std::cell::RefCell;
use std::fmt;
use std::io::{BufRead, Read, Write};
use std::sync::Arc;

use serde::de::{self, DeserializeSeed, MapAccess, SeqAccess, Visitor};

use crate::codec::{Encoding, Latin1Reader, ParseOptions, TextSink};
use crate::error::{ParseError, WriteError};
use crate::limits::MAX_REPEAT;
use crate::model::{Node, Slot, Value};
use crate::schema::{ComplexType, FieldDescriptor, PrimitiveType, SchemaRegistry};
use crate::write::Emitter;

// =============================================================================
// PARSING
// =============================================================================

/// Shared parse state. Schema errors raised inside serde callbacks are stored
/// here so the caller gets the typed error rather than a stringly one.
struct Ctx<'r> {
    registry: &'r SchemaRegistry,
    max_depth: usize,
    error: RefCell<Option<ParseError>>,
}

impl Ctx<'_> {
    fn fail<E: de::Error>(&self, error: ParseError) -> E {
        let message = error.to_string();
        *self.error.borrow_mut() = Some(error);
        E::custom(message)
    }

    fn finish(&self, error: serde_json::Error) -> ParseError {
        let (line, column) = (error.line(), error.column());
        if let Some(stored) = self.error.borrow_mut().take() {
            return with_position(stored, line, column);
        }
        if error.is_io() {
            return ParseError::Io(error.into());
        }
        let detail = error.to_string();
        if detail.starts_with("invalid unicode code point") {
            return ParseError::InvalidEncoding {
                encoding: Encoding::Utf8,
                line,
                column,
            };
        }
        ParseError::Malformed {
            context: "json",
            line,
            column,
            detail,
        }
    }
}

fn with_position(error: ParseError, at_line: usize, at_column: usize) -> ParseError {
    match error {
        ParseError::UnexpectedField { ty, field, .. } => ParseError::UnexpectedField {
            ty,
            field,
            line: at_line,
            column: at_column,
        },
        ParseError::DuplicateField { ty, field, .. } => ParseError::DuplicateField {
            ty,
            field,
            line: at_line,
            column: at_column,
        },
        ParseError::InvalidValue { field, source, .. } => ParseError::InvalidValue {
            field,
            line: at_line,
            column: at_column,
            source,
        },
        other => other,
    }
}

pub(crate) fn parse<R: BufRead>(
    registry: &SchemaRegistry,
    ty: &Arc<ComplexType>,
    reader: R,
    options: &ParseOptions,
) -> Result<Node, ParseError> {
    match options.encoding {
        Encoding::Utf8 => run(registry, ty, reader, options),
        Encoding::Latin1 => run(registry, ty, Latin1Reader::new(reader), options),
    }
}

fn run<R: Read>(
    registry: &SchemaRegistry,
    ty: &Arc<ComplexType>,
    reader: R,
    options: &ParseOptions,
) -> Result<Node, ParseError> {
    let cx = Ctx {
        registry,
        max_depth: options.max_depth,
        error: RefCell::new(None),
    };
    let mut de = serde_json::Deserializer::from_reader(reader);
    let seed = ObjectSeed {
        cx: &cx,
        ty,
        depth: 1,
    };
    seed.deserialize(&mut de)
        .and_then(|node| de.end().map(|()| node))
        .map_err(|e| cx.finish(e))
}

struct ObjectSeed<'c, 'r> {
    cx: &'c Ctx<'r>,
    ty: &'c Arc<ComplexType>,
    depth: usize,
}

impl<'de> DeserializeSeed<'de> for ObjectSeed<'_, '_> {
    type Value = Node;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<Node, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for ObjectSeed<'_, '_> {
    type Value = Node;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "an object of type {}", self.ty.name())
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Node, A::Error> {
        let cx = self.cx;
        if self.depth > cx.max_depth {
            return Err(cx.fail(ParseError::LimitExceeded {
                what: "nesting depth",
                limit: cx.max_depth,
            }));
        }
        let mut node = Node::new(Arc::clone(self.ty));
        while let Some(key) = map.next_key::<String>()? {
            let Some(index) = self.ty.field_index(&key) else {
                return Err(cx.fail(ParseError::UnexpectedField {
                    ty: self.ty.name().to_string(),
                    field: key,
                    line: 0,
                    column: 0,
                }));
            };
            let field = &self.ty.fields()[index];
            if node.slot(index).is_some_and(|s| !s.is_absent()) {
                return Err(cx.fail(ParseError::DuplicateField {
                    ty: self.ty.name().to_string(),
                    field: key,
                    line: 0,
                    column: 0,
                }));
            }
            let slot = map.next_value_seed(FieldSeed {
                cx,
                field,
                depth: self.depth,
            })?;
            node.put(index, slot);
        }
        Ok(node)
    }
}

/// One field's value; `null` is an absent field.
struct FieldSeed<'c, 'r> {
    cx: &'c Ctx<'r>,
    field: &'c FieldDescriptor,
    depth: usize,
}

impl<'de> DeserializeSeed<'de> for FieldSeed<'_, '_> {
    type Value = Slot;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<Slot, D::Error> {
        deserializer.deserialize_option(self)
    }
}

impl<'de> Visitor<'de> for FieldSeed<'_, '_> {
    type Value = Slot;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for field {}", self.field.kind(), self.field.name())
    }

    fn visit_none<E: de::Error>(self) -> Result<Slot, E> {
        Ok(Slot::Absent)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Slot, E> {
        Ok(Slot::Absent)
    }

    fn visit_some<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<Slot, D::Error> {
        let cx = self.cx;
        match (cx.registry.target(self.field), self.field.primitive()) {
            (Some(ty), _) if self.field.is_repeated() => {
                let children = deserializer.deserialize_seq(ObjectsVisitor {
                    cx,
                    ty,
                    depth: self.depth + 1,
                })?;
                Ok(Slot::Children(children))
            }
            (Some(ty), _) => {
                let child = ObjectSeed {
                    cx,
                    ty,
                    depth: self.depth + 1,
                }
                .deserialize(deserializer)?;
                Ok(Slot::Child(Box::new(child)))
            }
            (None, Some(primitive)) if self.field.is_repeated() => {
                let values = deserializer.deserialize_seq(ScalarsVisitor {
                    cx,
                    field: self.field,
                    primitive,
                })?;
                Ok(Slot::Scalars(values))
            }
            (None, Some(primitive)) => {
                let value = ScalarSeed {
                    cx,
                    field: self.field,
                    primitive,
                }
                .deserialize(deserializer)?;
                Ok(Slot::Scalar(value))
            }
            (None, None) => Err(de::Error::custom(format!(
                "field {} has an unresolved type",
                self.field.name()
            ))),
        }
    }
}

fn check_repeat<E: de::Error>(cx: &Ctx<'_>, count: usize) -> Result<(), E> {
    if count >= MAX_REPEAT {
        return Err(cx.fail(ParseError::LimitExceeded {
            what: "repeated field occurrences",
            limit: MAX_REPEAT,
        }));
    }
    Ok(())
}

struct ObjectsVisitor<'c, 'r> {
    cx: &'c Ctx<'r>,
    ty: &'c Arc<ComplexType>,
    depth: usize,
}

impl<'de> Visitor<'de> for ObjectsVisitor<'_, '_> {
    type Value = Vec<Node>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "an array of {} objects", self.ty.name())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<Node>, A::Error> {
        let mut out = Vec::new();
        loop {
            check_repeat(self.cx, out.len())?;
            let seed = ObjectSeed {
                cx: self.cx,
                ty: self.ty,
                depth: self.depth,
            };
            match seq.next_element_seed(seed)? {
                Some(node) => out.push(node),
                None => return Ok(out),
            }
        }
    }
}

struct ScalarsVisitor<'c, 'r> {
    cx: &'c Ctx<'r>,
    field: &'c FieldDescriptor,
    primitive: PrimitiveType,
}

impl<'de> Visitor<'de> for ScalarsVisitor<'_, '_> {
    type Value = Vec<Value>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "an array of {} values", self.primitive)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<Value>, A::Error> {
        let mut out = Vec::new();
        loop {
            check_repeat(self.cx, out.len())?;
            let seed = ScalarSeed {
                cx: self.cx,
                field: self.field,
                primitive: self.primitive,
            };
            match seq.next_element_seed(seed)? {
                Some(value) => out.push(value),
                None => return Ok(out),
            }
        }
    }
}

struct ScalarSeed<'c, 'r> {
    cx: &'c Ctx<'r>,
    field: &'c FieldDescriptor,
    primitive: PrimitiveType,
}

impl ScalarSeed<'_, '_> {
    fn lexical<E: de::Error>(&self, text: &str) -> Result<Value, E> {
        Value::parse(self.primitive, text).map_err(|source| {
            self.cx.fail(ParseError::InvalidValue {
                field: self.field.name().to_string(),
                line: 0,
                column: 0,
                source,
            })
        })
    }
}

impl<'de> DeserializeSeed<'de> for ScalarSeed<'_, '_> {
    type Value = Value;

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for ScalarSeed<'_, '_> {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a {} value for field {}", self.primitive, self.field.name())
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        match self.primitive {
            PrimitiveType::Bool => Ok(Value::Bool(v)),
            _ => self.lexical(if v { "true" } else { "false" }),
        }
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        match self.primitive {
            PrimitiveType::Int => Ok(Value::Int(v)),
            PrimitiveType::Float => Ok(Value::Float(v as f64)),
            PrimitiveType::Decimal => Ok(Value::decimal(v, 0)),
            _ => self.lexical(&v.to_string()),
        }
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        match i64::try_from(v) {
            Ok(v) => self.visit_i64(v),
            Err(_) => self.lexical(&v.to_string()),
        }
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        match self.primitive {
            PrimitiveType::Float => Ok(Value::Float(v)),
            _ => self.lexical(&v.to_string()),
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        self.lexical(v)
    }
}

// =============================================================================
// WRITING
// =============================================================================

struct Frame {
    array: bool,
    first: bool,
}

/// Renders objects as JSON, compact unless pretty printing is requested.
pub(crate) struct JsonEmitter<W> {
    out: TextSink<W>,
    pretty: bool,
    frames: Vec<Frame>,
}

impl<W: Write> JsonEmitter<W> {
    pub(crate) fn new(out: TextSink<W>, pretty: bool) -> Self {
        Self {
            out,
            pretty,
            frames: Vec::new(),
        }
    }

    fn newline(&mut self) -> Result<(), WriteError> {
        if self.pretty {
            self.out.write_str("\n")?;
            for _ in 0..self.frames.len() {
                self.out.write_str("  ")?;
            }
        }
        Ok(())
    }

    /// Separator and key for the next member of the innermost container.
    fn member(&mut self, key: &str) -> Result<(), WriteError> {
        let Some(frame) = self.frames.last_mut() else {
            return Ok(());
        };
        let first = std::mem::replace(&mut frame.first, false);
        let array = frame.array;
        if !first {
            self.out.write_str(",")?;
        }
        self.newline()?;
        if !array {
            self.out.write_str(&serde_json::to_string(key)?)?;
            self.out.write_str(if self.pretty { ": " } else { ":" })?;
        }
        Ok(())
    }

    fn open(&mut self, array: bool) -> Result<(), WriteError> {
        self.out.write_str(if array { "[" } else { "{" })?;
        self.frames.push(Frame { array, first: true });
        Ok(())
    }

    fn close(&mut self) -> Result<(), WriteError> {
        let Some(frame) = self.frames.pop() else {
            return Ok(());
        };
        if !frame.first {
            self.newline()?;
        }
        self.out.write_str(if frame.array { "]" } else { "}" })
    }
}

fn literal(value: &Value) -> Result<String, WriteError> {
    Ok(match value {
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(x) if x.is_finite() => serde_json::to_string(x)?,
        other => serde_json::to_string(&other.to_lexical())?,
    })
}

impl<W: Write> Emitter for JsonEmitter<W> {
    fn end_document(&mut self) -> Result<(), WriteError> {
        if self.pretty {
            self.out.write_str("\n")?;
        }
        self.out.flush()
    }

    fn start_object(&mut self, field: Option<&FieldDescriptor>, _node: &Node) -> Result<(), WriteError> {
        if let Some(field) = field {
            self.member(field.name())?;
        }
        self.open(false)
    }

    fn end_object(&mut self, _field: Option<&FieldDescriptor>, _node: &Node) -> Result<(), WriteError> {
        self.close()
    }

    fn start_repeated(&mut self, field: &FieldDescriptor) -> Result<(), WriteError> {
        self.member(field.name())?;
        self.open(true)
    }

    fn end_repeated(&mut self, _field: &FieldDescriptor) -> Result<(), WriteError> {
        self.close()
    }

    fn scalar(&mut self, field: &FieldDescriptor, value: &Value) -> Result<(), WriteError> {
        self.member(field.name())?;
        let text = literal(value)?;
        self.out.write_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Format;
    use crate::schema::FieldType;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .complex("Order", |t| {
                t.required("Id", PrimitiveType::Text)
                    .optional("Total", PrimitiveType::Decimal)
                    .optional("Weight", PrimitiveType::Float)
                    .optional("Paid", PrimitiveType::Bool)
                    .repeated("Tag", PrimitiveType::Text)
                    .repeated("Line", FieldType::complex("Line"))
            })
            .complex("Line", |t| {
                t.required("Sku", PrimitiveType::Text)
                    .required("Qty", PrimitiveType::Int)
            })
            .build()
            .unwrap()
    }

    fn parse_str(registry: &SchemaRegistry, input: &str) -> Result<Node, ParseError> {
        crate::codec::parse(registry, "Order", input.as_bytes(), &ParseOptions::new(Format::Json))
    }

    #[test]
    fn test_parse_object() {
        let registry = registry();
        let order = parse_str(
            &registry,
            r#"{"Id":"A1","Total":"12.50","Weight":2,"Paid":true,"Tag":["x","y"],
                "Line":[{"Sku":"S1","Qty":3},{"Sku":"S2","Qty":1}]}"#,
        )
        .unwrap();
        assert_eq!(order.get_text("Id"), Some("A1"));
        assert_eq!(order.get("Total"), Some(&Value::decimal(1250, -2)));
        assert_eq!(order.get("Weight"), Some(&Value::Float(2.0)));
        assert_eq!(order.get_all("Tag").len(), 2);
        assert_eq!(order.children("Line")[1].get("Qty"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_null_is_absent() {
        let registry = registry();
        let order = parse_str(&registry, r#"{"Id":"A1","Paid":null}"#).unwrap();
        assert!(!order.is_present("Paid"));
    }

    #[test]
    fn test_unknown_field_reports_position() {
        let registry = registry();
        let err = parse_str(&registry, "{\"Id\":\"A1\",\n\"Bogus\":1}").unwrap_err();
        match err {
            ParseError::UnexpectedField { field, line, .. } => {
                assert_eq!(field, "Bogus");
                assert_eq!(line, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_value() {
        let registry = registry();
        let err = parse_str(&registry, r#"{"Id":"A1","Line":[{"Sku":"S","Qty":"many"}]}"#)
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue { ref field, .. } if field == "Qty"));
    }

    #[test]
    fn test_malformed_and_trailing() {
        let registry = registry();
        assert!(matches!(
            parse_str(&registry, r#"{"Id":"A1""#),
            Err(ParseError::Malformed { .. })
        ));
        assert!(matches!(
            parse_str(&registry, r#"{"Id":"A1"} {}"#),
            Err(ParseError::Malformed { .. })
        ));
    }

    #[test]
    fn test_depth_limit() {
        let registry = SchemaRegistry::builder()
            .complex("Tree", |t| t.optional("Sub", FieldType::complex("Tree")))
            .build()
            .unwrap();
        let mut options = ParseOptions::new(Format::Json);
        options.max_depth = 3;
        let input = r#"{"Sub":{"Sub":{"Sub":{}}}}"#;
        let err = crate::codec::parse(&registry, "Tree", input.as_bytes(), &options).unwrap_err();
        assert!(matches!(err, ParseError::LimitExceeded { limit: 3, .. }));
    }

    #[test]
    fn test_latin1_input() {
        let registry = registry();
        let mut options = ParseOptions::new(Format::Json);
        options.encoding = Encoding::Latin1;
        let input: &[u8] = b"{\"Id\":\"caf\xE9\"}";
        let order = crate::codec::parse(&registry, "Order", input, &options).unwrap();
        assert_eq!(order.get_text("Id"), Some("caf\u{e9}"));
    }

    #[test]
    fn test_literals() {
        assert_eq!(literal(&Value::Int(-3)).unwrap(), "-3");
        assert_eq!(literal(&Value::Float(1.5)).unwrap(), "1.5");
        assert_eq!(literal(&Value::Float(f64::INFINITY)).unwrap(), "\"INF\"");
        assert_eq!(literal(&Value::from("a\"b")).unwrap(), "\"a\\\"b\"");
    }
}
