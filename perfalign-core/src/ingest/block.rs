//! Value block decoding
//!
//! A value block is the text content of one event file:
//!
//! ```text
//! {"current_time":1700000012345}
//! CPU_Utilization:0.25
//! ThreadName:search[T#3]
//! ```
//!
//! The first line is a JSON header carrying the writer timestamp. Every
//! following non-empty line is `Name:Value`, split at the first `:` so
//! values may themselves contain colons.

use crate::catalog::FieldType;
use crate::types::Millis;
use rusqlite::types::Value;
use std::fmt;

/// Classification of a dropped block or row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParseErrorKind {
    MissingTimestamp,
    BadTimestamp,
    BadNumber,
    BadPath,
    BadTopology,
}

impl ParseErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseErrorKind::MissingTimestamp => "missing_timestamp",
            ParseErrorKind::BadTimestamp => "bad_timestamp",
            ParseErrorKind::BadNumber => "bad_number",
            ParseErrorKind::BadPath => "bad_path",
            ParseErrorKind::BadTopology => "bad_topology",
        }
    }
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A block or row that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub detail: String,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// A decoded value block, borrowing from the event value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueBlock<'a> {
    pub current_time: Millis,
    body: &'a str,
}

impl<'a> ValueBlock<'a> {
    /// Non-empty lines after the header, trimmed.
    pub fn lines(&self) -> impl Iterator<Item = &'a str> {
        self.body.lines().map(str::trim).filter(|l| !l.is_empty())
    }

    /// `Name:Value` pairs. Lines without a `:` are skipped.
    pub fn fields(&self) -> impl Iterator<Item = (&'a str, &'a str)> {
        self.lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim(), value.trim()))
    }
}

/// Decode the header of a value block.
pub fn parse_block(value: &str) -> Result<ValueBlock<'_>, ParseError> {
    let value = value.trim_start_matches('\u{feff}');
    let (header, body) = value.split_once('\n').unwrap_or((value, ""));
    let header = header.trim();

    if header.is_empty() {
        return Err(ParseError::new(ParseErrorKind::MissingTimestamp, "empty block"));
    }

    let json: serde_json::Value = serde_json::from_str(header)
        .map_err(|e| ParseError::new(ParseErrorKind::BadTimestamp, format!("header: {}", e)))?;

    let raw = json
        .get("current_time")
        .ok_or_else(|| ParseError::new(ParseErrorKind::MissingTimestamp, "no current_time in header"))?;

    let current_time = raw.as_i64().ok_or_else(|| {
        ParseError::new(
            ParseErrorKind::BadTimestamp,
            format!("current_time is not an integer: {}", raw),
        )
    })?;

    Ok(ValueBlock { current_time, body })
}

/// Convert a raw field value to a column value of type `ty`.
///
/// An empty value is stored as NULL. Integer fields also accept
/// `true`/`false`.
pub fn typed_value(name: &str, ty: FieldType, raw: &str) -> Result<Value, ParseError> {
    if raw.is_empty() {
        return Ok(Value::Null);
    }

    match ty {
        FieldType::Text => Ok(Value::Text(raw.to_string())),
        FieldType::Float => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Value::Real)
            .ok_or_else(|| bad_number(name, raw)),
        FieldType::Int => match raw {
            "true" => Ok(Value::Integer(1)),
            "false" => Ok(Value::Integer(0)),
            _ => raw
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| bad_number(name, raw)),
        },
    }
}

fn bad_number(name: &str, raw: &str) -> ParseError {
    ParseError::new(ParseErrorKind::BadNumber, format!("{}={:?}", name, raw))
}
