//! Lexical forms of the temporal primitives.
//!
//! - Date: days since 1970-01-01 plus an offset in minutes
//! - Time: microseconds since midnight plus an offset in minutes
//! - DateTime: microseconds since the Unix epoch (UTC) plus an offset in minutes
//!
//! The lexical forms follow RFC 3339 / XML Schema: `2024-03-15`, `09:30:00.5+01:00`,
//! `2024-03-15T09:30:00Z`. Years are restricted to four digits.
//!
//! Values always carry a zone. A missing zone designator is read as UTC, and
//! UTC is written as `Z`, so `2024-03-15` is written back as `2024-03-15Z`.
//! The value is unchanged; only the lexical form gains the designator.
//! Non-zero offsets are kept as written.

const MICROS_PER_SECOND: i64 = 1_000_000;
const MICROS_PER_MINUTE: i64 = 60 * MICROS_PER_SECOND;
const MICROS_PER_HOUR: i64 = 60 * MICROS_PER_MINUTE;
const MICROS_PER_DAY: i64 = 24 * MICROS_PER_HOUR;

/// Why a temporal string was rejected.
pub type TemporalError = &'static str;

fn ensure_ascii(s: &str) -> Result<(), TemporalError> {
    if s.is_ascii() {
        Ok(())
    } else {
        Err("non-ASCII character")
    }
}

fn digits(s: &str, what: TemporalError) -> Result<i64, TemporalError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(what);
    }
    s.parse().map_err(|_| what)
}

fn parse_offset(s: &str) -> Result<i16, TemporalError> {
    match s {
        "" | "Z" | "z" => return Ok(0),
        _ => {}
    }
    let b = s.as_bytes();
    if b.len() != 6 || b[3] != b':' {
        return Err("malformed zone offset");
    }
    let sign = match b[0] {
        b'+' => 1,
        b'-' => -1,
        _ => return Err("malformed zone offset"),
    };
    let hours = digits(&s[1..3], "malformed zone offset")?;
    let minutes = digits(&s[4..6], "malformed zone offset")?;
    if minutes > 59 || hours > 24 || (hours == 24 && minutes != 0) {
        return Err("zone offset out of range");
    }
    Ok((sign * (hours * 60 + minutes)) as i16)
}

fn format_offset(offset_min: i16) -> String {
    if offset_min == 0 {
        return "Z".to_string();
    }
    let sign = if offset_min > 0 { '+' } else { '-' };
    let abs = offset_min.unsigned_abs();
    format!("{sign}{:02}:{:02}", abs / 60, abs % 60)
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i64, month: i64) -> i64 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 31,
    }
}

/// Days since the epoch for a proleptic Gregorian date (Hinnant's algorithm).
fn date_to_days(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let m = if month <= 2 { month + 9 } else { month - 3 };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let doy = (153 * m + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn days_to_date(days: i64) -> (i64, i64, i64) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

/// Parses `YYYY-MM-DD`, returning (year, month, day).
fn parse_ymd(s: &str) -> Result<(i64, i64, i64), TemporalError> {
    let b = s.as_bytes();
    if b.len() != 10 || b[4] != b'-' || b[7] != b'-' {
        return Err("expected YYYY-MM-DD");
    }
    let year = digits(&s[..4], "invalid year")?;
    let month = digits(&s[5..7], "invalid month")?;
    let day = digits(&s[8..10], "invalid day")?;
    if !(1..=12).contains(&month) {
        return Err("invalid month");
    }
    if day < 1 || day > days_in_month(year, month) {
        return Err("invalid day");
    }
    Ok((year, month, day))
}

/// Parses `HH:MM:SS[.ffffff]`, returning microseconds since midnight and the
/// unparsed remainder (the zone designator).
fn parse_hms(s: &str) -> Result<(i64, &str), TemporalError> {
    let b = s.as_bytes();
    if b.len() < 8 || b[2] != b':' || b[5] != b':' {
        return Err("expected HH:MM:SS");
    }
    let hours = digits(&s[..2], "invalid hours")?;
    let minutes = digits(&s[3..5], "invalid minutes")?;
    let seconds = digits(&s[6..8], "invalid seconds")?;
    if hours > 23 || minutes > 59 || seconds > 59 {
        return Err("time component out of range");
    }
    let mut rest = &s[8..];
    let mut fraction = 0;
    if let Some(frac) = rest.strip_prefix('.') {
        let end = frac
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(frac.len());
        if end == 0 {
            return Err("empty fractional seconds");
        }
        // Precision beyond microseconds is truncated.
        let kept = &frac[..end.min(6)];
        fraction = digits(kept, "invalid fractional seconds")? * 10i64.pow(6 - kept.len() as u32);
        rest = &frac[end..];
    }
    let micros = hours * MICROS_PER_HOUR
        + minutes * MICROS_PER_MINUTE
        + seconds * MICROS_PER_SECOND
        + fraction;
    Ok((micros, rest))
}

fn format_hms(micros: i64) -> String {
    let hours = micros / MICROS_PER_HOUR;
    let minutes = micros % MICROS_PER_HOUR / MICROS_PER_MINUTE;
    let seconds = micros % MICROS_PER_MINUTE / MICROS_PER_SECOND;
    let fraction = micros % MICROS_PER_SECOND;
    let mut out = format!("{hours:02}:{minutes:02}:{seconds:02}");
    if fraction != 0 {
        let digits = format!("{fraction:06}");
        out.push('.');
        out.push_str(digits.trim_end_matches('0'));
    }
    out
}

// =============================================================================
// DATE
// =============================================================================

/// Parses a date with optional zone, returning (days since epoch, offset).
pub fn parse_date(s: &str) -> Result<(i32, i16), TemporalError> {
    ensure_ascii(s)?;
    let (ymd, zone) = s.split_at_checked(10).ok_or("expected YYYY-MM-DD")?;
    let (year, month, day) = parse_ymd(ymd)?;
    Ok((date_to_days(year, month, day) as i32, parse_offset(zone)?))
}

pub fn format_date(days: i32, offset_min: i16) -> String {
    let (year, month, day) = days_to_date(days as i64);
    format!("{year:04}-{month:02}-{day:02}{}", format_offset(offset_min))
}

// =============================================================================
// TIME
// =============================================================================

/// Parses a time with optional zone, returning (micros since midnight, offset).
pub fn parse_time(s: &str) -> Result<(i64, i16), TemporalError> {
    ensure_ascii(s)?;
    let (micros, zone) = parse_hms(s)?;
    Ok((micros, parse_offset(zone)?))
}

pub fn format_time(micros: i64, offset_min: i16) -> String {
    format!("{}{}", format_hms(micros), format_offset(offset_min))
}

// =============================================================================
// DATETIME
// =============================================================================

/// Parses a datetime, returning (UTC micros since epoch, offset).
pub fn parse_datetime(s: &str) -> Result<(i64, i16), TemporalError> {
    ensure_ascii(s)?;
    let (ymd, rest) = s.split_at_checked(10).ok_or("expected YYYY-MM-DDTHH:MM:SS")?;
    let time = rest
        .strip_prefix('T')
        .or_else(|| rest.strip_prefix(' '))
        .ok_or("expected 'T' between date and time")?;
    let (year, month, day) = parse_ymd(ymd)?;
    let (micros, zone) = parse_hms(time)?;
    let offset_min = parse_offset(zone)?;
    let local = date_to_days(year, month, day) * MICROS_PER_DAY + micros;
    Ok((local - offset_min as i64 * MICROS_PER_MINUTE, offset_min))
}

pub fn format_datetime(epoch_micros: i64, offset_min: i16) -> String {
    let local = epoch_micros + offset_min as i64 * MICROS_PER_MINUTE;
    let (year, month, day) = days_to_date(local.div_euclid(MICROS_PER_DAY));
    format!(
        "{year:04}-{month:02}-{day:02}T{}{}",
        format_hms(local.rem_euclid(MICROS_PER_DAY)),
        format_offset(offset_min)
    )
}
