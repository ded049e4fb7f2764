//! Field constraints checked by the validator.

use std::cmp::Ordering;
use std::fmt;

use regex::Regex;

use crate::error::SchemaError;
use crate::model::Value;
use crate::validate::ViolationKind;

/// A regular expression matched against a value's whole lexical form.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, SchemaError> {
        let regex = Regex::new(&format!("^(?:{source})$")).map_err(|e| {
            SchemaError::InvalidPattern {
                pattern: source.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    /// The pattern as written in the schema.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

/// A restriction on the values of a primitive field.
#[derive(Debug, Clone)]
pub enum Constraint {
    Pattern(Pattern),
    /// Allowed lexical forms.
    Enumeration(Vec<String>),
    /// Inclusive bounds.
    Range {
        min: Option<Value>,
        max: Option<Value>,
    },
    /// Length bounds in characters (text) or bytes (binary).
    Length {
        min: Option<usize>,
        max: Option<usize>,
    },
}

impl Constraint {
    pub fn pattern(source: &str) -> Result<Self, SchemaError> {
        Pattern::new(source).map(Constraint::Pattern)
    }

    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Constraint::Enumeration(values.into_iter().map(Into::into).collect())
    }

    pub fn range(min: Option<Value>, max: Option<Value>) -> Self {
        Constraint::Range { min, max }
    }

    pub fn length(min: Option<usize>, max: Option<usize>) -> Self {
        Constraint::Length { min, max }
    }

    /// Checks one value, returning the violation if it fails.
    pub fn check(&self, value: &Value) -> Result<(), ViolationKind> {
        match self {
            Constraint::Pattern(pattern) => {
                let matched = match value {
                    Value::Text(s) => pattern.is_match(s),
                    other => pattern.is_match(&other.to_lexical()),
                };
                if matched {
                    Ok(())
                } else {
                    Err(ViolationKind::Pattern {
                        pattern: pattern.as_str().to_string(),
                        value: value.to_lexical(),
                    })
                }
            }
            Constraint::Enumeration(allowed) => {
                let lexical = value.to_lexical();
                if allowed.iter().any(|a| *a == lexical) {
                    Ok(())
                } else {
                    Err(ViolationKind::Enumeration { value: lexical })
                }
            }
            Constraint::Range { min, max } => {
                let below = min
                    .as_ref()
                    .is_some_and(|m| !matches!(value.compare(m), Some(Ordering::Greater | Ordering::Equal)));
                let above = max
                    .as_ref()
                    .is_some_and(|m| !matches!(value.compare(m), Some(Ordering::Less | Ordering::Equal)));
                if below || above {
                    Err(ViolationKind::Range {
                        value: value.to_lexical(),
                        min: min.as_ref().map(Value::to_lexical),
                        max: max.as_ref().map(Value::to_lexical),
                    })
                } else {
                    Ok(())
                }
            }
            Constraint::Length { min, max } => {
                let Some(len) = value.length() else {
                    return Ok(());
                };
                if min.is_some_and(|m| len < m) || max.is_some_and(|m| len > m) {
                    Err(ViolationKind::Length {
                        length: len,
                        min: *min,
                        max: *max,
                    })
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Canonical text used when fingerprinting a schema.
    pub(crate) fn describe(&self) -> String {
        match self {
            Constraint::Pattern(p) => format!("pattern:{}", p.as_str()),
            Constraint::Enumeration(values) => format!("enum:{}", values.join("\u{1f}")),
            Constraint::Range { min, max } => format!(
                "range:{}..{}",
                min.as_ref().map(Value::to_lexical).unwrap_or_default(),
                max.as_ref().map(Value::to_lexical).unwrap_or_default()
            ),
            Constraint::Length { min, max } => format!("length:{min:?}..{max:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_is_anchored() {
        let c = Constraint::pattern("[A-Z]{3}").unwrap();
        assert!(c.check(&Value::from("ABC")).is_ok());
        assert!(matches!(
            c.check(&Value::from("xABCx")),
            Err(ViolationKind::Pattern { .. })
        ));
    }

    #[test]
    fn test_pattern_on_non_text_uses_lexical() {
        let c = Constraint::pattern(r"\d{4}").unwrap();
        assert!(c.check(&Value::Int(2024)).is_ok());
        assert!(c.check(&Value::Int(-202)).is_err());
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            Constraint::pattern("(unclosed"),
            Err(SchemaError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_enumeration() {
        let c = Constraint::enumeration(["GOLD", "SILVER"]);
        assert!(c.check(&Value::from("GOLD")).is_ok());
        assert_eq!(
            c.check(&Value::from("gold")),
            Err(ViolationKind::Enumeration {
                value: "gold".to_string()
            })
        );
    }

    #[test]
    fn test_range_inclusive() {
        let c = Constraint::range(Some(Value::Int(1)), Some(Value::Int(10)));
        assert!(c.check(&Value::Int(1)).is_ok());
        assert!(c.check(&Value::Int(10)).is_ok());
        assert!(c.check(&Value::Int(0)).is_err());
        assert!(c.check(&Value::Int(11)).is_err());
        // Incomparable values fail.
        assert!(c.check(&Value::from("5")).is_err());
    }

    #[test]
    fn test_length_counts_chars() {
        let c = Constraint::length(Some(2), Some(3));
        assert!(c.check(&Value::from("\u{e9}\u{e9}")).is_ok());
        assert!(c.check(&Value::from("abcd")).is_err());
        assert!(c.check(&Value::Bytes(vec![1])).is_err());
        assert!(c.check(&Value::Int(12345)).is_ok());
    }
}
