//! Pull tokenizer and schema-driven XML parser.

use std::borrow::Cow;
use std::io::BufRead;
use std::sync::Arc;

use crate::codec::{Encoding, ParseOptions};
use crate::error::ParseError;
use crate::limits::{MAX_NAME_LEN, MAX_REPEAT, MAX_STRING_LEN};
use crate::model::{Node, Slot, Value};
use crate::schema::{ComplexType, FieldDescriptor, SchemaRegistry};

// =============================================================================
// TOKENIZER
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    /// `<?xml ...?>`
    Declaration { encoding: Option<String> },
    Start {
        name: String,
        attributes: Vec<(String, String)>,
        empty: bool,
    },
    End { name: String },
    /// Character data or CDATA; `blank` is set for whitespace-only character data.
    Text { text: String, blank: bool },
}

/// Byte-level XML tokenizer. Markup is ASCII in both supported encodings, so
/// names and text are collected as raw bytes and decoded afterwards.
pub(crate) struct Tokenizer<R> {
    reader: R,
    encoding: Encoding,
    line: usize,
    column: usize,
}

impl<R: BufRead> Tokenizer<R> {
    pub(crate) fn new(reader: R, encoding: Encoding) -> Self {
        Self {
            reader,
            encoding,
            line: 1,
            column: 1,
        }
    }

    pub(crate) fn position(&self) -> (usize, usize) {
        (self.line, self.column)
    }

    pub(crate) fn malformed(&self, context: &'static str, detail: impl Into<String>) -> ParseError {
        ParseError::Malformed {
            context,
            line: self.line,
            column: self.column,
            detail: detail.into(),
        }
    }

    fn peek(&mut self) -> Result<Option<u8>, ParseError> {
        Ok(self.reader.fill_buf()?.first().copied())
    }

    fn bump(&mut self) -> Result<Option<u8>, ParseError> {
        let Some(b) = self.peek()? else {
            return Ok(None);
        };
        self.reader.consume(1);
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else if b & 0xC0 != 0x80 {
            self.column += 1;
        }
        Ok(Some(b))
    }

    fn expect(&mut self, want: u8, context: &'static str) -> Result<(), ParseError> {
        match self.bump()? {
            Some(b) if b == want => Ok(()),
            Some(b) => Err(self.malformed(
                context,
                format!("expected {:?}, found {:?}", want as char, b as char),
            )),
            None => Err(self.malformed(context, "unexpected end of input")),
        }
    }

    fn skip_whitespace(&mut self) -> Result<(), ParseError> {
        while let Some(b) = self.peek()? {
            if !b.is_ascii_whitespace() {
                break;
            }
            self.bump()?;
        }
        Ok(())
    }

    fn decode(&self, bytes: Vec<u8>) -> Result<String, ParseError> {
        self.encoding
            .decode(bytes)
            .ok_or(ParseError::InvalidEncoding {
                encoding: self.encoding,
                line: self.line,
                column: self.column,
            })
    }

    /// Reads bytes until `terminator`, which is consumed and dropped.
    fn read_until(&mut self, terminator: &[u8], context: &'static str) -> Result<Vec<u8>, ParseError> {
        let mut out = Vec::new();
        loop {
            let Some(b) = self.bump()? else {
                return Err(self.malformed(context, "unexpected end of input"));
            };
            out.push(b);
            if out.ends_with(terminator) {
                out.truncate(out.len() - terminator.len());
                return Ok(out);
            }
            if out.len() > MAX_STRING_LEN {
                return Err(ParseError::LimitExceeded {
                    what: "markup length",
                    limit: MAX_STRING_LEN,
                });
            }
        }
    }

    fn read_name(&mut self, context: &'static str) -> Result<String, ParseError> {
        let mut bytes = Vec::new();
        while let Some(b) = self.peek()? {
            if b.is_ascii_whitespace() || matches!(b, b'>' | b'/' | b'=' | b'?') {
                break;
            }
            bytes.push(b);
            self.bump()?;
            if bytes.len() > MAX_NAME_LEN {
                return Err(ParseError::LimitExceeded {
                    what: "name length",
                    limit: MAX_NAME_LEN,
                });
            }
        }
        if bytes.is_empty() {
            return Err(self.malformed(context, "expected a name"));
        }
        self.decode(bytes)
    }

    pub(crate) fn next_token(&mut self) -> Result<Option<Token>, ParseError> {
        loop {
            let Some(b) = self.peek()? else {
                return Ok(None);
            };
            if b != b'<' {
                return self.char_data().map(Some);
            }
            self.bump()?;
            match self.peek()? {
                Some(b'?') => {
                    self.bump()?;
                    if let Some(token) = self.processing_instruction()? {
                        return Ok(Some(token));
                    }
                }
                Some(b'!') => {
                    self.bump()?;
                    if let Some(token) = self.markup_declaration()? {
                        return Ok(Some(token));
                    }
                }
                Some(b'/') => {
                    self.bump()?;
                    let name = self.read_name("end tag")?;
                    self.skip_whitespace()?;
                    self.expect(b'>', "end tag")?;
                    return Ok(Some(Token::End { name }));
                }
                Some(_) => return self.start_tag().map(Some),
                None => return Err(self.malformed("tag", "unexpected end of input")),
            }
        }
    }

    fn char_data(&mut self) -> Result<Token, ParseError> {
        let mut bytes = Vec::new();
        while let Some(b) = self.peek()? {
            if b == b'<' {
                break;
            }
            self.bump()?;
            // Line ends are normalized to \n.
            if b == b'\r' {
                if self.peek()? != Some(b'\n') {
                    bytes.push(b'\n');
                }
                continue;
            }
            bytes.push(b);
            if bytes.len() > MAX_STRING_LEN {
                return Err(ParseError::LimitExceeded {
                    what: "text length",
                    limit: MAX_STRING_LEN,
                });
            }
        }
        let blank = bytes.iter().all(u8::is_ascii_whitespace);
        let raw = self.decode(bytes)?;
        let text = unescape(&raw)
            .map_err(|detail| self.malformed("character data", detail))?
            .into_owned();
        Ok(Token::Text { text, blank })
    }

    fn processing_instruction(&mut self) -> Result<Option<Token>, ParseError> {
        let target = self.read_name("processing instruction")?;
        let body = self.read_until(b"?>", "processing instruction")?;
        if !target.eq_ignore_ascii_case("xml") {
            return Ok(None);
        }
        let body = self.decode(body)?;
        let encoding = pseudo_attributes(&body)
            .into_iter()
            .find(|(k, _)| k == "encoding")
            .map(|(_, v)| v);
        Ok(Some(Token::Declaration { encoding }))
    }

    fn markup_declaration(&mut self) -> Result<Option<Token>, ParseError> {
        match self.peek()? {
            Some(b'-') => {
                self.expect(b'-', "comment")?;
                self.expect(b'-', "comment")?;
                self.read_until(b"-->", "comment")?;
                Ok(None)
            }
            Some(b'[') => {
                for &b in b"[CDATA[" {
                    self.expect(b, "CDATA section")?;
                }
                let bytes = self.read_until(b"]]>", "CDATA section")?;
                let text = self.decode(bytes)?;
                Ok(Some(Token::Text { text, blank: false }))
            }
            _ => {
                // DOCTYPE and other declarations are skipped, including any
                // bracketed internal subset.
                let mut depth = 0usize;
                loop {
                    match self.bump()? {
                        None => return Err(self.malformed("declaration", "unexpected end of input")),
                        Some(b'[') => depth += 1,
                        Some(b']') => depth = depth.saturating_sub(1),
                        Some(b'>') if depth == 0 => return Ok(None),
                        Some(_) => {}
                    }
                }
            }
        }
    }

    fn start_tag(&mut self) -> Result<Token, ParseError> {
        let name = self.read_name("start tag")?;
        let mut attributes = Vec::new();
        loop {
            self.skip_whitespace()?;
            match self.peek()? {
                Some(b'>') => {
                    self.bump()?;
                    return Ok(Token::Start {
                        name,
                        attributes,
                        empty: false,
                    });
                }
                Some(b'/') => {
                    self.bump()?;
                    self.expect(b'>', "start tag")?;
                    return Ok(Token::Start {
                        name,
                        attributes,
                        empty: true,
                    });
                }
                Some(_) => {
                    let key = self.read_name("attribute")?;
                    self.skip_whitespace()?;
                    self.expect(b'=', "attribute")?;
                    self.skip_whitespace()?;
                    let quote = match self.bump()? {
                        Some(q @ (b'"' | b'\'')) => q,
                        _ => return Err(self.malformed("attribute", "expected a quoted value")),
                    };
                    let mut raw = self.read_until(&[quote], "attribute")?;
                    // Literal whitespace in attribute values normalizes to spaces.
                    for b in raw.iter_mut() {
                        if matches!(*b, b'\t' | b'\n' | b'\r') {
                            *b = b' ';
                        }
                    }
                    let raw = self.decode(raw)?;
                    let value = unescape(&raw)
                        .map_err(|detail| self.malformed("attribute", detail))?
                        .into_owned();
                    attributes.push((key, value));
                }
                None => return Err(self.malformed("start tag", "unexpected end of input")),
            }
        }
    }
}

/// Parses `key="value"` pairs from an XML declaration body.
fn pseudo_attributes(body: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = body.trim();
    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim().to_string();
        let after = rest[eq + 1..].trim_start();
        let Some(quote) = after.chars().next().filter(|c| *c == '"' || *c == '\'') else {
            break;
        };
        let Some(end) = after[1..].find(quote) else {
            break;
        };
        out.push((key, after[1..1 + end].to_string()));
        rest = after[end + 2..].trim_start();
    }
    out
}

/// Resolves entity and character references.
pub(crate) fn unescape(raw: &str) -> Result<Cow<'_, str>, String> {
    if !raw.contains('&') {
        return Ok(Cow::Borrowed(raw));
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        let semi = tail
            .find(';')
            .ok_or_else(|| format!("unterminated reference in {raw:?}"))?;
        let entity = &tail[..semi];
        let ch = match entity {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "apos" => '\'',
            "quot" => '"',
            _ => {
                let code = if let Some(hex) = entity.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse().ok()
                } else {
                    None
                };
                code.and_then(char::from_u32)
                    .ok_or_else(|| format!("unknown reference &{entity};"))?
            }
        };
        out.push(ch);
        rest = &tail[semi + 1..];
    }
    out.push_str(rest);
    Ok(Cow::Owned(out))
}

// =============================================================================
// PARSER
// =============================================================================

fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

/// Namespace declarations and schema-instance hints carry no field data.
fn is_infrastructure(name: &str) -> bool {
    name == "xmlns" || name.starts_with("xmlns:") || name.starts_with("xsi:")
}

struct XmlParser<'r, R> {
    tokens: Tokenizer<R>,
    registry: &'r SchemaRegistry,
    options: &'r ParseOptions,
}

/// Parses an XML document whose root element is named after `ty`.
pub(crate) fn parse<R: BufRead>(
    registry: &SchemaRegistry,
    ty: &Arc<ComplexType>,
    reader: R,
    options: &ParseOptions,
) -> Result<Node, ParseError> {
    let mut parser = XmlParser {
        tokens: Tokenizer::new(reader, options.encoding),
        registry,
        options,
    };
    parser.document(ty)
}

impl<R: BufRead> XmlParser<'_, R> {
    fn document(&mut self, ty: &Arc<ComplexType>) -> Result<Node, ParseError> {
        let root = loop {
            match self.tokens.next_token()? {
                None => return Err(self.tokens.malformed("document", "no root element")),
                Some(Token::Declaration { encoding }) => {
                    if let Some(declared) = encoding {
                        if !self.options.encoding.accepts_label(&declared) {
                            return Err(ParseError::EncodingMismatch {
                                declared,
                                requested: self.options.encoding,
                            });
                        }
                    }
                }
                Some(Token::Text { blank: true, .. }) => {}
                Some(Token::Start {
                    name,
                    attributes,
                    empty,
                }) => {
                    if local_name(&name) != ty.name() {
                        return Err(ParseError::UnexpectedRoot {
                            expected: ty.name().to_string(),
                            found: name,
                        });
                    }
                    break self.object(ty, &name, attributes, empty, 1)?;
                }
                Some(_) => {
                    return Err(self.tokens.malformed("document", "content before root element"));
                }
            }
        };
        loop {
            match self.tokens.next_token()? {
                None => return Ok(root),
                Some(Token::Text { blank: true, .. }) => {}
                Some(_) => {
                    return Err(self.tokens.malformed("document", "content after root element"));
                }
            }
        }
    }

    fn object(
        &mut self,
        ty: &Arc<ComplexType>,
        tag: &str,
        attributes: Vec<(String, String)>,
        empty: bool,
        depth: usize,
    ) -> Result<Node, ParseError> {
        if depth > self.options.max_depth {
            return Err(ParseError::LimitExceeded {
                what: "nesting depth",
                limit: self.options.max_depth,
            });
        }
        let mut node = Node::new(Arc::clone(ty));
        for (name, raw) in attributes {
            if is_infrastructure(&name) {
                continue;
            }
            let index = self.field_index(ty, local_name(&name))?;
            let field = &ty.fields()[index];
            if !field.is_attribute() {
                return Err(self.unexpected(ty, &name));
            }
            if node.slot(index).is_some_and(|s| !s.is_absent()) {
                return Err(self.duplicate(ty, field));
            }
            let value = self.value(field, &raw)?;
            node.put(index, Slot::Scalar(value));
        }
        if empty {
            return Ok(node);
        }

        let registry = self.registry;
        loop {
            let token = self
                .tokens
                .next_token()?
                .ok_or_else(|| self.tokens.malformed("element", format!("unclosed element <{tag}>")))?;
            match token {
                Token::Text { blank: true, .. } => {}
                Token::End { name } if name == tag => return Ok(node),
                Token::End { name } => {
                    return Err(self.tokens.malformed(
                        "element",
                        format!("expected </{tag}>, found </{name}>"),
                    ));
                }
                Token::Start {
                    name,
                    attributes,
                    empty,
                } => {
                    let index = self.field_index(ty, local_name(&name))?;
                    let field = &ty.fields()[index];
                    if field.is_attribute() {
                        return Err(self.unexpected(ty, &name));
                    }
                    let count = node.slot(index).map_or(0, Slot::count);
                    if !field.is_repeated() && count > 0 {
                        return Err(self.duplicate(ty, field));
                    }
                    if count >= MAX_REPEAT {
                        return Err(ParseError::LimitExceeded {
                            what: "repeated field occurrences",
                            limit: MAX_REPEAT,
                        });
                    }
                    match registry.target(field) {
                        Some(child_ty) => {
                            let child = self.object(child_ty, &name, attributes, empty, depth + 1)?;
                            if field.is_repeated() {
                                node.append_child(index, child);
                            } else {
                                node.put(index, Slot::Child(Box::new(child)));
                            }
                        }
                        None => {
                            if let Some((attr, _)) =
                                attributes.iter().find(|(a, _)| !is_infrastructure(a))
                            {
                                return Err(self.unexpected(ty, attr));
                            }
                            let text = if empty {
                                String::new()
                            } else {
                                self.text_content(&name)?
                            };
                            let value = self.value(field, &text)?;
                            if field.is_repeated() {
                                node.append_scalar(index, value);
                            } else {
                                node.put(index, Slot::Scalar(value));
                            }
                        }
                    }
                }
                Token::Text { .. } | Token::Declaration { .. } => {
                    return Err(self.tokens.malformed(
                        "element",
                        format!("unexpected content inside <{tag}>"),
                    ));
                }
            }
        }
    }

    fn text_content(&mut self, tag: &str) -> Result<String, ParseError> {
        let mut text = String::new();
        loop {
            match self.tokens.next_token()? {
                Some(Token::Text { text: chunk, .. }) => text.push_str(&chunk),
                Some(Token::End { name }) if name == tag => return Ok(text),
                Some(_) => {
                    return Err(self.tokens.malformed(
                        "element",
                        format!("<{tag}> holds a value and cannot contain markup"),
                    ));
                }
                None => {
                    return Err(self.tokens.malformed("element", format!("unclosed element <{tag}>")));
                }
            }
        }
    }

    fn field_index(&self, ty: &ComplexType, name: &str) -> Result<usize, ParseError> {
        ty.field_index(name).ok_or_else(|| self.unexpected(ty, name))
    }

    fn value(&self, field: &FieldDescriptor, text: &str) -> Result<Value, ParseError> {
        let (line, column) = self.tokens.position();
        let primitive = field.primitive().ok_or_else(|| {
            self.tokens
                .malformed("element", format!("{} is not a value field", field.name()))
        })?;
        Value::parse(primitive, text).map_err(|source| ParseError::InvalidValue {
            field: field.name().to_string(),
            line,
            column,
            source,
        })
    }

    fn unexpected(&self, ty: &ComplexType, name: &str) -> ParseError {
        let (line, column) = self.tokens.position();
        ParseError::UnexpectedField {
            ty: ty.name().to_string(),
            field: name.to_string(),
            line,
            column,
        }
    }

    fn duplicate(&self, ty: &ComplexType, field: &FieldDescriptor) -> ParseError {
        let (line, column) = self.tokens.position();
        ParseError::DuplicateField {
            ty: ty.name().to_string(),
            field: field.name().to_string(),
            line,
            column,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        let mut tokenizer = Tokenizer::new(input.as_bytes(), Encoding::Utf8);
        let mut out = Vec::new();
        while let Some(token) = tokenizer.next_token().unwrap() {
            out.push(token);
        }
        out
    }

    #[test]
    fn test_tokenize_document() {
        let toks = tokens(
            "<?xml version=\"1.0\" encoding='UTF-8'?><!-- c --><!DOCTYPE a [<!ENTITY x \"y\">]>\
             <a k=\"1 &amp; 2\"><b/>x&lt;y<![CDATA[<raw>]]></a>",
        );
        assert_eq!(
            toks,
            vec![
                Token::Declaration {
                    encoding: Some("UTF-8".into())
                },
                Token::Start {
                    name: "a".into(),
                    attributes: vec![("k".into(), "1 & 2".into())],
                    empty: false
                },
                Token::Start {
                    name: "b".into(),
                    attributes: vec![],
                    empty: true
                },
                Token::Text {
                    text: "x<y".into(),
                    blank: false
                },
                Token::Text {
                    text: "<raw>".into(),
                    blank: false
                },
                Token::End { name: "a".into() },
            ]
        );
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a&#65;&#x42;&quot;").unwrap(), "aAB\"");
        assert!(unescape("&bogus;").is_err());
        assert!(unescape("&amp").is_err());
        assert!(matches!(unescape("plain"), Ok(Cow::Borrowed("plain"))));
    }

    #[test]
    fn test_line_endings_normalized() {
        let toks = tokens("a\r\nb\rc");
        assert_eq!(
            toks,
            vec![Token::Text {
                text: "a\nb\nc".into(),
                blank: false
            }]
        );
    }

    #[test]
    fn test_latin1_text() {
        let input: &[u8] = b"<a>caf\xE9</a>";
        let mut tokenizer = Tokenizer::new(input, Encoding::Latin1);
        tokenizer.next_token().unwrap();
        assert_eq!(
            tokenizer.next_token().unwrap(),
            Some(Token::Text {
                text: "caf\u{e9}".into(),
                blank: false
            })
        );
    }

    #[test]
    fn test_invalid_utf8_reported() {
        let input: &[u8] = b"<a>caf\xE9</a>";
        let mut tokenizer = Tokenizer::new(input, Encoding::Utf8);
        tokenizer.next_token().unwrap();
        assert!(matches!(
            tokenizer.next_token(),
            Err(ParseError::InvalidEncoding { .. })
        ));
    }

    #[test]
    fn test_unterminated_tag() {
        let mut tokenizer = Tokenizer::new("<a k=\"1\"".as_bytes(), Encoding::Utf8);
        assert!(matches!(
            tokenizer.next_token(),
            Err(ParseError::Malformed { .. })
        ));
    }

    #[test]
    fn test_pseudo_attributes() {
        assert_eq!(
            pseudo_attributes(" version=\"1.0\" encoding='ISO-8859-1' "),
            vec![
                ("version".to_string(), "1.0".to_string()),
                ("encoding".to_string(), "ISO-8859-1".to_string())
            ]
        );
    }
}
