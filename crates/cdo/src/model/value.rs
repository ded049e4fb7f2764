//! Leaf values and their lexical forms.

use std::cmp::Ordering;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::LexicalError;
use crate::limits::MAX_DECIMAL_SCALE;
use crate::model::temporal;
use crate::schema::PrimitiveType;

lazy_static! {
    static ref DECIMAL: Regex = Regex::new(r"^([+-]?)([0-9]*)(?:\.([0-9]*))?$").unwrap();
}

/// A primitive value held by a scalar field.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    /// Never NaN.
    Float(f64),
    /// `mantissa * 10^exponent`, normalized so the mantissa has no trailing
    /// zeros (zero is `0e0`).
    Decimal { mantissa: i64, exponent: i32 },
    Text(String),
    Bytes(Vec<u8>),
    /// Days since 1970-01-01.
    Date { days: i32, offset_min: i16 },
    /// Microseconds since local midnight.
    Time { micros: i64, offset_min: i16 },
    /// Microseconds since the Unix epoch, UTC.
    DateTime { epoch_micros: i64, offset_min: i16 },
}

impl Value {
    /// Builds a normalized decimal.
    pub fn decimal(mut mantissa: i64, mut exponent: i32) -> Value {
        if mantissa == 0 {
            exponent = 0;
        }
        while mantissa != 0 && mantissa % 10 == 0 {
            mantissa /= 10;
            exponent = exponent.saturating_add(1);
        }
        Value::Decimal { mantissa, exponent }
    }

    /// Normalizes decimals; every other value is returned as is.
    pub fn normalized(self) -> Value {
        match self {
            Value::Decimal { mantissa, exponent } => Value::decimal(mantissa, exponent),
            other => other,
        }
    }

    /// Checks that the value has a lexical form that parses back to it.
    pub fn check(&self) -> Result<(), &'static str> {
        match self {
            Value::Float(x) if x.is_nan() => Err("NaN is not allowed"),
            Value::Decimal { exponent, .. } if exponent.unsigned_abs() > MAX_DECIMAL_SCALE.unsigned_abs() => {
                Err("decimal exponent is out of scale")
            }
            _ => Ok(()),
        }
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            Value::Bool(_) => PrimitiveType::Bool,
            Value::Int(_) => PrimitiveType::Int,
            Value::Float(_) => PrimitiveType::Float,
            Value::Decimal { .. } => PrimitiveType::Decimal,
            Value::Text(_) => PrimitiveType::Text,
            Value::Bytes(_) => PrimitiveType::Bytes,
            Value::Date { .. } => PrimitiveType::Date,
            Value::Time { .. } => PrimitiveType::Time,
            Value::DateTime { .. } => PrimitiveType::DateTime,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Parses the lexical form of a value of type `ty`.
    pub fn parse(ty: PrimitiveType, input: &str) -> Result<Value, LexicalError> {
        let fail = |reason| LexicalError {
            expected: ty,
            input: input.to_string(),
            reason,
        };
        match ty {
            PrimitiveType::Bool => match input {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(fail("expected true, false, 1 or 0")),
            },
            PrimitiveType::Int => input
                .parse()
                .map(Value::Int)
                .map_err(|_| fail("not a 64-bit integer")),
            PrimitiveType::Float => {
                let value = match input {
                    "INF" => f64::INFINITY,
                    "-INF" => f64::NEG_INFINITY,
                    _ => input.parse::<f64>().map_err(|_| fail("not a number"))?,
                };
                if value.is_nan() {
                    return Err(fail("NaN is not allowed"));
                }
                Ok(Value::Float(value))
            }
            PrimitiveType::Decimal => parse_decimal(input).ok_or_else(|| fail("not a decimal")),
            PrimitiveType::Text => Ok(Value::Text(input.to_string())),
            PrimitiveType::Bytes => parse_hex(input)
                .map(Value::Bytes)
                .ok_or_else(|| fail("not hexadecimal")),
            PrimitiveType::Date => temporal::parse_date(input)
                .map(|(days, offset_min)| Value::Date { days, offset_min })
                .map_err(fail),
            PrimitiveType::Time => temporal::parse_time(input)
                .map(|(micros, offset_min)| Value::Time { micros, offset_min })
                .map_err(fail),
            PrimitiveType::DateTime => temporal::parse_datetime(input)
                .map(|(epoch_micros, offset_min)| Value::DateTime {
                    epoch_micros,
                    offset_min,
                })
                .map_err(fail),
        }
    }

    /// Canonical lexical form; `Value::parse` of the result yields `self`.
    pub fn to_lexical(&self) -> String {
        self.to_string()
    }

    /// Orders two values of the same primitive type. Int and Float compare
    /// numerically with each other.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (
                Value::Decimal {
                    mantissa: m1,
                    exponent: e1,
                },
                Value::Decimal {
                    mantissa: m2,
                    exponent: e2,
                },
            ) => Some(compare_decimal(*m1, *e1, *m2, *e2)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Date { days: a, .. }, Value::Date { days: b, .. }) => Some(a.cmp(b)),
            (
                Value::Time {
                    micros: a,
                    offset_min: oa,
                },
                Value::Time {
                    micros: b,
                    offset_min: ob,
                },
            ) => {
                let a = a - *oa as i64 * 60_000_000;
                let b = b - *ob as i64 * 60_000_000;
                Some(a.cmp(&b))
            }
            (
                Value::DateTime {
                    epoch_micros: a, ..
                },
                Value::DateTime {
                    epoch_micros: b, ..
                },
            ) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Length used by length constraints: characters for text, bytes for binary.
    pub fn length(&self) -> Option<usize> {
        match self {
            Value::Text(s) => Some(s.chars().count()),
            Value::Bytes(b) => Some(b.len()),
            _ => None,
        }
    }
}

fn parse_decimal(input: &str) -> Option<Value> {
    let caps = DECIMAL.captures(input)?;
    let int = caps.get(2).map_or("", |m| m.as_str());
    let frac = caps.get(3).map_or("", |m| m.as_str());
    if int.is_empty() && frac.is_empty() {
        return None;
    }
    let digits = format!("{int}{frac}");
    let significant = digits.trim_start_matches('0');
    let trimmed = significant.trim_end_matches('0');
    if trimmed.is_empty() {
        return Some(Value::decimal(0, 0));
    }
    let zeros = i64::try_from(significant.len() - trimmed.len()).ok()?;
    let scale = i64::try_from(frac.len()).ok()?;
    let exponent = i32::try_from(zeros - scale).ok()?;
    if exponent.unsigned_abs() > MAX_DECIMAL_SCALE.unsigned_abs() {
        return None;
    }
    let mantissa: i128 = format!("{}{trimmed}", &caps[1]).parse().ok()?;
    Some(Value::decimal(i64::try_from(mantissa).ok()?, exponent))
}

fn format_decimal(f: &mut fmt::Formatter<'_>, mantissa: i64, exponent: i32) -> fmt::Result {
    let sign = if mantissa < 0 { "-" } else { "" };
    let digits = mantissa.unsigned_abs().to_string();
    if exponent >= 0 {
        return write!(f, "{sign}{digits}{}", "0".repeat(exponent as usize));
    }
    let scale = exponent.unsigned_abs() as usize;
    let padded = format!("{digits:0>width$}", width = scale + 1);
    let (int, frac) = padded.split_at(padded.len() - scale);
    write!(f, "{sign}{int}.{frac}")
}

fn compare_decimal(m1: i64, e1: i32, m2: i64, e2: i32) -> Ordering {
    let sign = |m: i64| m.signum();
    if sign(m1) != sign(m2) || m1 == 0 {
        return m1.signum().cmp(&m2.signum());
    }
    // Bring both to the smaller exponent when that fits i128.
    let shift = (e1 - e2).unsigned_abs();
    if shift <= 18 {
        let scale = 10i128.pow(shift);
        let (a, b) = if e1 >= e2 {
            (m1 as i128 * scale, m2 as i128)
        } else {
            (m1 as i128, m2 as i128 * scale)
        };
        return a.cmp(&b);
    }
    let approx = |m: i64, e: i32| m as f64 * 10f64.powi(e);
    approx(m1, e1)
        .partial_cmp(&approx(m2, e2))
        .unwrap_or(Ordering::Equal)
}

fn parse_hex(input: &str) -> Option<Vec<u8>> {
    if input.len() % 2 != 0 || !input.is_ascii() {
        return None;
    }
    (0..input.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&input[i..i + 2], 16).ok())
        .collect()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) if x.is_infinite() => {
                f.write_str(if *x > 0.0 { "INF" } else { "-INF" })
            }
            Value::Float(x) => write!(f, "{x}"),
            Value::Decimal { mantissa, exponent } => format_decimal(f, *mantissa, *exponent),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(bytes) => bytes.iter().try_for_each(|b| write!(f, "{b:02x}")),
            Value::Date { days, offset_min } => {
                f.write_str(&temporal::format_date(*days, *offset_min))
            }
            Value::Time { micros, offset_min } => {
                f.write_str(&temporal::format_time(*micros, *offset_min))
            }
            Value::DateTime {
                epoch_micros,
                offset_min,
            } => f.write_str(&temporal::format_datetime(*epoch_micros, *offset_min)),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(ty: PrimitiveType, s: &str) -> Value {
        Value::parse(ty, s).unwrap()
    }

    #[test]
    fn test_decimal_normalization() {
        assert_eq!(
            parse(PrimitiveType::Decimal, "-123.4500"),
            Value::Decimal {
                mantissa: -12345,
                exponent: -2
            }
        );
        assert_eq!(parse(PrimitiveType::Decimal, "1200"), Value::decimal(12, 2));
        assert_eq!(parse(PrimitiveType::Decimal, "0.000"), Value::decimal(0, 0));
        assert_eq!(parse(PrimitiveType::Decimal, ".5"), Value::decimal(5, -1));
        assert!(Value::parse(PrimitiveType::Decimal, ".").is_err());
        assert!(Value::parse(PrimitiveType::Decimal, "1e5").is_err());
    }

    #[test]
    fn test_decimal_format() {
        assert_eq!(Value::decimal(-12345, -2).to_string(), "-123.45");
        assert_eq!(Value::decimal(5, -3).to_string(), "0.005");
        assert_eq!(Value::decimal(12, 2).to_string(), "1200");
        assert_eq!(Value::decimal(0, 7).to_string(), "0");
    }

    #[test]
    fn test_decimal_extremes_reparse() {
        let cases = [
            Value::decimal(1, 19),
            Value::decimal(-7, 40),
            Value::decimal(i64::MAX, 0),
            Value::decimal(i64::MIN, 0),
            Value::decimal(i64::MIN, -30),
            Value::decimal(-1, -MAX_DECIMAL_SCALE),
            Value::decimal(3, MAX_DECIMAL_SCALE),
        ];
        for value in cases {
            let lexical = value.to_lexical();
            assert_eq!(parse(PrimitiveType::Decimal, &lexical), value, "{lexical}");
        }
        assert_eq!(parse(PrimitiveType::Decimal, "-9223372036854775808"), Value::decimal(i64::MIN, 0));
        assert!(Value::parse(PrimitiveType::Decimal, "9223372036854775808").is_err());
    }

    #[test]
    fn test_check_rejects_unprintable_values() {
        assert!(Value::Float(f64::NAN).check().is_err());
        assert!(Value::Float(f64::INFINITY).check().is_ok());
        let wide = Value::Decimal {
            mantissa: 1,
            exponent: MAX_DECIMAL_SCALE + 1,
        };
        assert!(wide.check().is_err());
        assert!(Value::decimal(1, MAX_DECIMAL_SCALE).check().is_ok());
    }

    #[test]
    fn test_lexical_stability() {
        let cases = [
            (PrimitiveType::Bool, "1"),
            (PrimitiveType::Int, "+42"),
            (PrimitiveType::Float, "1.5e3"),
            (PrimitiveType::Float, "-INF"),
            (PrimitiveType::Decimal, "007.10"),
            (PrimitiveType::Bytes, "CAFE"),
            (PrimitiveType::Date, "2024-03-15"),
            (PrimitiveType::Time, "09:30:00.250-05:00"),
            (PrimitiveType::DateTime, "2024-03-15T09:30:00+01:00"),
        ];
        for (ty, input) in cases {
            let value = parse(ty, input);
            assert_eq!(parse(ty, &value.to_lexical()), value, "{input}");
        }
    }

    #[test]
    fn test_invalid_lexicals() {
        assert!(Value::parse(PrimitiveType::Int, "12.5").is_err());
        assert!(Value::parse(PrimitiveType::Float, "NaN").is_err());
        assert!(Value::parse(PrimitiveType::Bool, "yes").is_err());
        assert!(Value::parse(PrimitiveType::Bytes, "abc").is_err());
        let err = Value::parse(PrimitiveType::Date, "15/03/2024").unwrap_err();
        assert_eq!(err.expected, PrimitiveType::Date);
    }

    #[test]
    fn test_compare() {
        assert_eq!(Value::Int(3).compare(&Value::Float(2.5)), Some(Ordering::Greater));
        assert_eq!(
            Value::decimal(15, -1).compare(&Value::decimal(2, 0)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::decimal(-1, 0).compare(&Value::decimal(0, 0)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Text("a".into()).compare(&Value::Int(1)), None);
        let nine_utc = parse(PrimitiveType::Time, "09:00:00Z");
        let ten_plus_two = parse(PrimitiveType::Time, "10:00:00+02:00");
        assert_eq!(nine_utc.compare(&ten_plus_two), Some(Ordering::Greater));
    }
}
