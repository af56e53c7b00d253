//! Server timestamp parsing
//!
//! The server emits `LocalDateTime` values without a zone suffix. They are UTC,
//! so a missing suffix is read as `Z` rather than as local time.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Explicit zone suffix: `Z` or a numeric offset with optional colon
static TIMEZONE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(Z|[+-]\d{2}:?\d{2})$").expect("Invalid timezone regex"));

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parse an optional server timestamp into an instant.
///
/// Returns `None` for missing, blank or unparseable input. Callers decide where
/// `None` sorts; see [`sort_millis`].
pub fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        return None;
    }

    let normalized = if TIMEZONE_SUFFIX.is_match(trimmed) {
        trimmed.to_string()
    } else {
        format!("{}Z", trimmed)
    };

    parse_with_offset(&normalized).or_else(|| parse_naive_utc(trimmed))
}

/// Milliseconds since the epoch, with unknown times mapped to 0
pub fn sort_millis(value: Option<&str>) -> i64 {
    parse_timestamp(value)
        .map(|t| t.timestamp_millis())
        .unwrap_or(0)
}

fn parse_with_offset(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    OFFSET_FORMATS
        .iter()
        .find_map(|fmt| DateTime::<FixedOffset>::parse_from_str(value, fmt).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}

fn parse_naive_utc(value: &str) -> Option<DateTime<Utc>> {
    if let Some(naive) = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
    {
        return Some(naive.and_utc());
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
