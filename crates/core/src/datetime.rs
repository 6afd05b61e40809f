use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use thiserror::Error;

/// Canonical long date time text, interpreted in an explicit timezone offset.
pub const LONG_DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const LONG_DATE_TIME_WITHOUT_SECOND_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateTimeError {
    #[error("Invalid date time: {0:?}")]
    InvalidDateTime(String),
    #[error("Invalid timezone offset: {0:?}")]
    InvalidTimezone(String),
}

/// Parses `YYYY-MM-DD HH:MM[:SS]` in the given offset and returns Unix milliseconds.
pub fn parse_long_date_time(text: &str, timezone_offset_minutes: i32) -> Result<i64, DateTimeError> {
    let naive = NaiveDateTime::parse_from_str(text, LONG_DATE_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, LONG_DATE_TIME_WITHOUT_SECOND_FORMAT))
        .map_err(|_| DateTimeError::InvalidDateTime(text.to_string()))?;

    let offset = fixed_offset(timezone_offset_minutes)?;
    let local = offset
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| DateTimeError::InvalidDateTime(text.to_string()))?;

    Ok(local.timestamp() * 1000)
}

/// Renders Unix milliseconds as `YYYY-MM-DD HH:MM:SS` in the given offset.
pub fn format_long_date_time(unix_millis: i64, timezone_offset_minutes: i32) -> Result<String, DateTimeError> {
    let offset = fixed_offset(timezone_offset_minutes)?;
    let utc = DateTime::from_timestamp_millis(unix_millis)
        .ok_or_else(|| DateTimeError::InvalidDateTime(unix_millis.to_string()))?;
    Ok(utc.with_timezone(&offset).format(LONG_DATE_TIME_FORMAT).to_string())
}

/// Renders a naive local date time in canonical form.
pub fn to_long_date_time(value: &NaiveDateTime) -> String {
    value.format(LONG_DATE_TIME_FORMAT).to_string()
}

/// Parses `±HH:MM`, `±HHMM` or `Z` into signed minutes east of UTC.
pub fn parse_timezone_offset(text: &str) -> Result<i32, DateTimeError> {
    let invalid = || DateTimeError::InvalidTimezone(text.to_string());

    if text == "Z" {
        return Ok(0);
    }

    if !text.is_ascii() {
        return Err(invalid());
    }

    let (sign, rest) = match text.as_bytes().first() {
        Some(b'+') => (1, &text[1..]),
        Some(b'-') => (-1, &text[1..]),
        _ => return Err(invalid()),
    };

    let (hours, minutes) = match rest.split_once(':') {
        Some(parts) => parts,
        None if rest.len() == 4 => rest.split_at(2),
        None => return Err(invalid()),
    };

    if hours.len() != 2 || minutes.len() != 2 {
        return Err(invalid());
    }

    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;

    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }

    Ok(sign * (hours * 60 + minutes))
}

/// Renders signed minutes as `±HH:MM`.
pub fn format_timezone_offset(timezone_offset_minutes: i32) -> String {
    let sign = if timezone_offset_minutes < 0 { '-' } else { '+' };
    let abs = timezone_offset_minutes.unsigned_abs();
    format!("{sign}{:02}:{:02}", abs / 60, abs % 60)
}

fn fixed_offset(timezone_offset_minutes: i32) -> Result<FixedOffset, DateTimeError> {
    timezone_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| DateTimeError::InvalidTimezone(timezone_offset_minutes.to_string()))
}
