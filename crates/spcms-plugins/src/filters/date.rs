//! Date parsing and formatting behind the `date_to_*` filters.
//!
//! All output is in UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use spcms_core::{AppError, AppResult};

/// Output formats of the date filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    /// `2005-08-15T15:52:01+00:00`
    Atom,
    /// `Mon, 15 Aug 2005 15:52:01 +0000`
    Rss,
    /// `2005-08-15T15:52:01+00:00`
    XmlSchema,
    /// `15.&nbsp;Aug 2005`
    Short,
    /// `15.&nbsp;August 2005`
    Long,
}

impl DateFormat {
    /// Parses the suffix of a `date_to_*` filter name.
    pub fn from_filter(filter: &str) -> Option<Self> {
        match filter.strip_prefix("date_to_")? {
            "atom" => Some(Self::Atom),
            "rss" => Some(Self::Rss),
            "xmlschema" => Some(Self::XmlSchema),
            "string" => Some(Self::Short),
            "long_string" => Some(Self::Long),
            _ => None,
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            Self::Atom | Self::XmlSchema => "%Y-%m-%dT%H:%M:%S%:z",
            Self::Rss => "%a, %d %b %Y %H:%M:%S %z",
            Self::Short => "%-d.&nbsp;%b %Y",
            Self::Long => "%-d.&nbsp;%B %Y",
        }
    }
}

/// Formats a unix timestamp.
pub fn format_timestamp(timestamp: i64, format: DateFormat) -> AppResult<String> {
    let time = DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| AppError::handler(format!("Timestamp {timestamp} is out of range")))?;
    Ok(time.format(format.pattern()).to_string())
}

/// Formats a date string; numeric strings are unix timestamps.
pub fn format_date(input: &str, format: DateFormat) -> AppResult<String> {
    let timestamp = parse_timestamp(input)
        .ok_or_else(|| AppError::handler(format!("Unrecognised date '{input}'")))?;
    format_timestamp(timestamp, format)
}

fn parse_timestamp(input: &str) -> Option<i64> {
    let input = input.trim();
    if let Ok(timestamp) = input.parse::<i64>() {
        return Some(timestamp);
    }
    if let Ok(time) = DateTime::parse_from_rfc3339(input) {
        return Some(time.timestamp());
    }
    if let Ok(time) = DateTime::parse_from_rfc2822(input) {
        return Some(time.timestamp());
    }
    for pattern in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(time) = NaiveDateTime::parse_from_str(input, pattern) {
            return Some(time.and_utc().timestamp());
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|time| time.and_utc().timestamp())
}
