//! Raw string to typed value coercions.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use csv_ingest_models::{Coercion, TargetValue};

/// Date format used when a `date` column declares none.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Formats tried in order when a `timestamp` column declares none. A bare
/// [`DEFAULT_DATE_FORMAT`] date is accepted after these.
pub const DEFAULT_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Returns `true` if `raw` counts as a missing value for `coercion`.
///
/// Text columns keep empty strings; every other coercion treats a blank
/// value as absent.
#[must_use]
pub fn is_blank(raw: &str, coercion: Coercion) -> bool {
    coercion != Coercion::Text && raw.trim().is_empty()
}

/// Coerces `raw` according to `coercion`.
///
/// # Errors
///
/// Returns a human-readable reason if `raw` does not parse.
pub fn coerce(raw: &str, coercion: Coercion, format: Option<&str>) -> Result<TargetValue, String> {
    let trimmed = raw.trim();
    match coercion {
        Coercion::Text => Ok(TargetValue::Text(raw.to_string())),
        Coercion::Integer => trimmed
            .parse::<i64>()
            .map(TargetValue::Integer)
            .map_err(|e| e.to_string()),
        Coercion::Decimal => {
            let value = trimmed.parse::<f64>().map_err(|e| e.to_string())?;
            if value.is_finite() {
                Ok(TargetValue::Decimal(value))
            } else {
                Err("value is not a finite number".to_string())
            }
        }
        Coercion::Boolean => parse_bool(trimmed)
            .map(TargetValue::Boolean)
            .ok_or_else(|| "expected true/false, yes/no, or 1/0".to_string()),
        Coercion::Date => {
            let format = format.unwrap_or(DEFAULT_DATE_FORMAT);
            NaiveDate::parse_from_str(trimmed, format)
                .map(TargetValue::Date)
                .map_err(|e| format!("{e} (expected format {format})"))
        }
        Coercion::Timestamp => parse_timestamp(trimmed, format).map(TargetValue::Timestamp),
    }
}

/// Parses a date and time with `format`, or with
/// [`DEFAULT_TIMESTAMP_FORMATS`] when none is given. Input that matches only
/// as a date is read as midnight.
///
/// # Errors
///
/// Returns a human-readable reason if no format matches.
pub fn parse_timestamp(s: &str, format: Option<&str>) -> Result<NaiveDateTime, String> {
    let (formats, date_format) = match format {
        Some(date_format) => (format.as_slice(), date_format),
        None => (DEFAULT_TIMESTAMP_FORMATS, DEFAULT_DATE_FORMAT),
    };

    let mut last_error = None;
    for candidate in formats {
        match NaiveDateTime::parse_from_str(s, candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = Some(e),
        }
    }

    NaiveDate::parse_from_str(s, date_format)
        .map(|date| date.and_time(NaiveTime::MIN))
        .map_err(|e| {
            let expected = format.map_or_else(
                || format!("{} or {date_format}", formats.join(", ")),
                ToString::to_string,
            );
            format!("{} (expected {expected})", last_error.unwrap_or(e))
        })
}

/// Parses the usual spellings of a boolean flag, case-insensitively.
#[must_use]
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}
