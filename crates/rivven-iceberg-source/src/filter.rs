//! Watermark filter building
//!
//! Turns the stored replication cursor of a stream into the predicate handed
//! to the table layer's scan. A missing key or missing cursor selects all
//! rows; otherwise only rows whose key is strictly greater than the cursor
//! are requested.
//!
//! Text cursors for date/time keys are parsed as ISO-8601 and re-encoded as a
//! timezone-naive canonical timestamp (`YYYY-MM-DDTHH:MM:SS[.ffffff]`). The
//! offset is dropped without converting, so `10:30:00+02:00` becomes
//! `10:30:00`. Time-of-day keys take `HH:MM[:SS[.ffffff]]` cursors and uuid
//! keys their hyphenated text form.
//!
//! Cursors and row values are compared at microsecond precision, the
//! precision records are emitted at.

use crate::error::{ConnectorError, Result};
use crate::schema::{ColumnType, FieldDescriptor};
use crate::value::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, Timelike};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M%:z",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Literal a replication key is compared against
#[derive(Debug, Clone, PartialEq)]
pub enum CursorLiteral {
    /// Timezone-naive timestamp, microsecond precision
    Timestamp(NaiveDateTime),
    /// Time of day, microsecond precision
    Time(NaiveTime),
    Uuid(Uuid),
    Text(String),
    Integer(i64),
    Float(f64),
}

impl CursorLiteral {
    /// Order `value` relative to this literal.
    ///
    /// Returns `None` for nulls and for values that cannot be compared with
    /// the literal; such rows never satisfy a greater-than predicate.
    pub fn compare(&self, value: &Value) -> Option<Ordering> {
        match (self, value) {
            (_, Value::Null) => None,
            (Self::Timestamp(lit), Value::Date(d)) => Some(d.and_time(NaiveTime::MIN).cmp(lit)),
            (Self::Timestamp(lit), Value::DateTime(dt)) => Some(dt.trunc_subsecs(6).cmp(lit)),
            (Self::Timestamp(lit), Value::DateTimeTz(dt)) => {
                Some(dt.naive_utc().trunc_subsecs(6).cmp(lit))
            }
            (Self::Timestamp(lit), Value::String(s)) => {
                Some(s.as_str().cmp(canonical_iso(lit).as_str()))
            }
            (Self::Time(lit), Value::Time(t)) => Some(t.trunc_subsecs(6).cmp(lit)),
            (Self::Time(lit), Value::String(s)) => Some(parse_iso_time(s).ok()?.cmp(lit)),
            // uuids order by their bytes, as their hyphenated text does
            (Self::Uuid(lit), Value::Bytes(b)) => Some(Uuid::from_slice(b).ok()?.cmp(lit)),
            (Self::Uuid(lit), Value::String(s)) => Some(Uuid::parse_str(s).ok()?.cmp(lit)),
            (Self::Integer(lit), Value::Int(v)) => Some(v.cmp(lit)),
            (Self::Integer(lit), Value::UInt(v)) => Some(i128::from(*v).cmp(&i128::from(*lit))),
            (Self::Integer(lit), Value::Float(v)) => v.partial_cmp(&(*lit as f64)),
            (Self::Integer(lit), Value::Decimal(d)) => {
                d.parse::<f64>().ok()?.partial_cmp(&(*lit as f64))
            }
            (Self::Float(lit), Value::Int(v)) => (*v as f64).partial_cmp(lit),
            (Self::Float(lit), Value::UInt(v)) => (*v as f64).partial_cmp(lit),
            (Self::Float(lit), Value::Float(v)) => v.partial_cmp(lit),
            (Self::Float(lit), Value::Decimal(d)) => d.parse::<f64>().ok()?.partial_cmp(lit),
            (Self::Text(lit), Value::String(s)) => Some(s.as_str().cmp(lit.as_str())),
            (Self::Text(lit), Value::Date(d)) => {
                Some(d.format("%Y-%m-%d").to_string().as_str().cmp(lit.as_str()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for CursorLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp(ts) => f.write_str(&canonical_iso(ts)),
            Self::Time(t) => write!(f, "{}", t.format("%H:%M:%S%.f")),
            Self::Uuid(u) => write!(f, "'{}'", u.hyphenated()),
            Self::Text(s) => write!(f, "'{}'", s),
            Self::Integer(n) => write!(f, "{}", n),
            Self::Float(n) => write!(f, "{}", n),
        }
    }
}

/// Row filter pushed down to the table layer's scan
#[derive(Debug, Clone, PartialEq)]
pub enum ScanPredicate {
    /// Select every row
    AlwaysTrue,
    /// Select rows whose `field` is strictly greater than `value`
    GreaterThan { field: String, value: CursorLiteral },
}

impl ScanPredicate {
    pub fn greater_than(field: impl Into<String>, value: CursorLiteral) -> Self {
        Self::GreaterThan {
            field: field.into(),
            value,
        }
    }

    pub fn is_always_true(&self) -> bool {
        matches!(self, Self::AlwaysTrue)
    }

    /// Field the predicate filters on, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::AlwaysTrue => None,
            Self::GreaterThan { field, .. } => Some(field),
        }
    }

    /// Evaluate the predicate against the value of its field
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::AlwaysTrue => true,
            Self::GreaterThan { value: literal, .. } => {
                literal.compare(value) == Some(Ordering::Greater)
            }
        }
    }
}

impl fmt::Display for ScanPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlwaysTrue => f.write_str("true"),
            Self::GreaterThan { field, value } => write!(f, "{} > {}", field, value),
        }
    }
}

/// Build the scan predicate for a stream.
///
/// `replication_key` is the descriptor of the stream's replication key and
/// `cursor` the stored cursor value. JSON `null` and the empty string are
/// treated as "no cursor" (first sync).
pub fn build_filter(
    replication_key: Option<&FieldDescriptor>,
    cursor: Option<&JsonValue>,
) -> Result<ScanPredicate> {
    let Some(key) = replication_key else {
        return Ok(ScanPredicate::AlwaysTrue);
    };
    let Some(cursor) = cursor.filter(|v| !is_absent(v)) else {
        return Ok(ScanPredicate::AlwaysTrue);
    };

    let literal = coerce_cursor(key, cursor)?;
    Ok(ScanPredicate::greater_than(&key.name, literal))
}

fn is_absent(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::String(s) => s.is_empty(),
        _ => false,
    }
}

fn coerce_cursor(key: &FieldDescriptor, cursor: &JsonValue) -> Result<CursorLiteral> {
    let mismatch = || {
        ConnectorError::filter(format!(
            "cursor value {} cannot be used for replication key '{}' of type {}",
            cursor,
            key.name,
            key.column_type.type_name()
        ))
    };

    if !key.column_type.is_orderable() {
        return Err(mismatch());
    }

    if key.is_temporal() {
        return match cursor {
            JsonValue::String(s) => parse_iso_timestamp(s).map(CursorLiteral::Timestamp),
            _ => Err(mismatch()),
        };
    }

    match (&key.column_type, cursor) {
        (ColumnType::Int | ColumnType::Long, JsonValue::Number(n)) => {
            n.as_i64().map(CursorLiteral::Integer).ok_or_else(mismatch)
        }
        (ColumnType::Int | ColumnType::Long, JsonValue::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(CursorLiteral::Integer)
            .map_err(|_| mismatch()),
        (
            ColumnType::Float | ColumnType::Double | ColumnType::Decimal { .. },
            JsonValue::Number(n),
        ) => n.as_f64().map(CursorLiteral::Float).ok_or_else(mismatch),
        (
            ColumnType::Float | ColumnType::Double | ColumnType::Decimal { .. },
            JsonValue::String(s),
        ) => s
            .trim()
            .parse::<f64>()
            .map(CursorLiteral::Float)
            .map_err(|_| mismatch()),
        (ColumnType::Time, JsonValue::String(s)) => {
            parse_iso_time(s).map(CursorLiteral::Time)
        }
        (ColumnType::Uuid, JsonValue::String(s)) => Uuid::parse_str(s.trim())
            .map(CursorLiteral::Uuid)
            .map_err(|_| mismatch()),
        (ColumnType::String, JsonValue::String(s)) => Ok(CursorLiteral::Text(s.clone())),
        (ColumnType::String, JsonValue::Number(n)) => Ok(CursorLiteral::Text(n.to_string())),
        _ => Err(mismatch()),
    }
}

/// Parse an ISO-8601 date or timestamp, dropping any UTC offset while
/// keeping the wall-clock time.
pub fn parse_iso_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let s = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_local().trunc_subsecs(6));
    }
    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Ok(dt.naive_local().trunc_subsecs(6));
        }
    }
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt.trunc_subsecs(6));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN));
    }

    Err(ConnectorError::filter(format!(
        "invalid isoformat string: '{}'",
        raw
    )))
}

/// Parse a time of day (`HH:MM`, `HH:MM:SS`, optional fraction)
pub fn parse_iso_time(raw: &str) -> Result<NaiveTime> {
    let s = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(s, format).ok())
        .map(|t| t.trunc_subsecs(6))
        .ok_or_else(|| ConnectorError::filter(format!("invalid time string: '{}'", raw)))
}

/// Canonical timezone-naive ISO encoding; the fraction is only written when
/// non-zero.
pub fn canonical_iso(ts: &NaiveDateTime) -> String {
    let micros = ts.nanosecond() / 1_000;
    let base = ts.format("%Y-%m-%dT%H:%M:%S");
    if micros == 0 {
        base.to_string()
    } else {
        format!("{}.{:06}", base, micros)
    }
}
