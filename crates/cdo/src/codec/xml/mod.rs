//! Tagged-markup (XML) format.
//!
//! The root element is named after the root type; each present field becomes
//! a child element named after the field, or an attribute for fields flagged
//! as attributes. Repeated fields repeat the element.

mod reader;
mod writer;

use std::borrow::Cow;

use crate::codec::Encoding;

pub(crate) use reader::parse;
pub(crate) use writer::XmlEmitter;

/// Escapes character data.
pub(crate) fn escape_text(s: &str, encoding: Encoding) -> Cow<'_, str> {
    escape(s, encoding, false)
}

/// Escapes a double-quoted attribute value.
pub(crate) fn escape_attribute(s: &str, encoding: Encoding) -> Cow<'_, str> {
    escape(s, encoding, true)
}

fn escape(s: &str, encoding: Encoding, attribute: bool) -> Cow<'_, str> {
    let needs = |c: char| match c {
        '&' | '<' | '>' | '\r' => true,
        '"' | '\t' | '\n' => attribute,
        c => encoding == Encoding::Latin1 && u32::from(c) > 0xFF,
    };
    if !s.chars().any(needs) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        if !needs(c) {
            out.push(c);
            continue;
        }
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push_str(&format!("&#{};", u32::from(c))),
        }
    }
    Cow::Owned(out)
}
