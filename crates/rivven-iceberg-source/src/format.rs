//! Record formatting
//!
//! Each output field gets a [`FormatRule`] derived from the stream's JSON
//! schema. Rules are plain data so a formatter can be inspected, compared and
//! shared between scans.

use crate::error::{ConnectorError, Result};
use crate::value::{Row, Value};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use uuid::Uuid;

/// A formatted output record; keys keep the table's column order
pub type Record = serde_json::Map<String, JsonValue>;

/// Normalization applied to a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatRule {
    /// Pass the value through
    Identity,
    /// Pass the value through; nulls stay null
    NullableIdentity,
    /// Truncate dates and timestamps to `YYYY-MM-DD`
    DateTruncate,
    /// Render 16-byte values as hyphenated uuid text
    Uuid,
}

impl FormatRule {
    /// Derive the rule for one entry of a JSON schema `properties` object
    pub fn for_property(property: &JsonValue) -> Self {
        let types: Vec<&str> = match property.get("type") {
            Some(JsonValue::String(t)) => vec![t.as_str()],
            Some(JsonValue::Array(ts)) => ts.iter().filter_map(JsonValue::as_str).collect(),
            _ => Vec::new(),
        };
        let nullable = types.contains(&"null");
        let format = property.get("format").and_then(JsonValue::as_str);

        if format == Some("date") && nullable && types.len() == 2 && types.contains(&"string") {
            Self::DateTruncate
        } else if format == Some("uuid") {
            Self::Uuid
        } else if nullable {
            Self::NullableIdentity
        } else {
            Self::Identity
        }
    }

    pub fn apply(self, value: Value) -> JsonValue {
        match self {
            Self::Identity | Self::NullableIdentity => value.to_json(),
            Self::DateTruncate => truncate_date(value),
            Self::Uuid => match &value {
                Value::Bytes(b) => Uuid::from_slice(b)
                    .map(|u| JsonValue::String(u.hyphenated().to_string()))
                    .unwrap_or_else(|_| value.to_json()),
                _ => value.to_json(),
            },
        }
    }
}

fn truncate_date(value: Value) -> JsonValue {
    let date = match value {
        Value::Date(d) => d,
        Value::DateTime(dt) => dt.date(),
        Value::DateTimeTz(dt) => dt.date_naive(),
        Value::String(s) => return JsonValue::String(s.chars().take(10).collect()),
        // unknown shapes degrade to null
        _ => return JsonValue::Null,
    };
    JsonValue::String(date.format("%Y-%m-%d").to_string())
}

/// Per-stream field formatter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFormatter {
    rules: HashMap<String, FormatRule>,
}

impl RecordFormatter {
    pub fn new(rules: HashMap<String, FormatRule>) -> Self {
        Self { rules }
    }

    /// Build the formatter from a stream JSON schema (`{"properties": {...}}`)
    pub fn from_json_schema(schema: &JsonValue) -> Result<Self> {
        let properties = schema
            .get("properties")
            .and_then(JsonValue::as_object)
            .ok_or_else(|| ConnectorError::schema("stream schema has no properties object"))?;

        let rules = properties
            .iter()
            .map(|(name, property)| (name.clone(), FormatRule::for_property(property)))
            .collect();
        Ok(Self { rules })
    }

    /// Rule for `field`; fields without one are passed through
    pub fn rule(&self, field: &str) -> FormatRule {
        self.rules.get(field).copied().unwrap_or(FormatRule::Identity)
    }

    pub fn format_row(&self, row: Row) -> Record {
        row.into_iter()
            .map(|(name, value)| {
                let formatted = self.rule(&name).apply(value);
                (name, formatted)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use serde_json::json;

    fn formatter() -> RecordFormatter {
        RecordFormatter::from_json_schema(&json!({
            "type": "object",
            "properties": {
                "id": {"type": ["integer"]},
                "ts": {"type": ["string", "null"], "format": "date"},
                "val": {"type": ["string", "null"]},
                "created": {"type": ["string"], "format": "date"},
                "token": {"type": ["string", "null"], "format": "uuid"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_rules_from_schema() {
        let f = formatter();
        assert_eq!(f.rule("id"), FormatRule::Identity);
        assert_eq!(f.rule("ts"), FormatRule::DateTruncate);
        assert_eq!(f.rule("val"), FormatRule::NullableIdentity);
        assert_eq!(f.rule("created"), FormatRule::Identity);
        assert_eq!(f.rule("token"), FormatRule::Uuid);
        assert_eq!(f.rule("unknown"), FormatRule::Identity);
    }

    #[test]
    fn test_missing_properties_is_schema_error() {
        let err = RecordFormatter::from_json_schema(&json!({"type": "object"})).unwrap_err();
        assert!(matches!(err, ConnectorError::Schema(_)));
    }

    #[test]
    fn test_plain_record_is_unchanged() {
        let row: Row = vec![("id", Value::Int(7)), ("name", Value::from("seven"))]
            .into_iter()
            .collect();
        let record = RecordFormatter::default().format_row(row);
        assert_eq!(JsonValue::Object(record), json!({"id": 7, "name": "seven"}));
    }

    #[test]
    fn test_date_truncation() {
        let rule = FormatRule::DateTruncate;
        assert_eq!(rule.apply(Value::Null), JsonValue::Null);
        assert_eq!(rule.apply(Value::from("2023-05-17T10:00:00")), json!("2023-05-17"));

        let day = NaiveDate::from_ymd_opt(2023, 5, 17).unwrap();
        assert_eq!(rule.apply(Value::Date(day)), json!("2023-05-17"));
        assert_eq!(
            rule.apply(Value::DateTime(day.and_hms_opt(23, 59, 59).unwrap())),
            json!("2023-05-17")
        );
        let tz = Utc.with_ymd_and_hms(2023, 5, 17, 8, 0, 0).unwrap();
        assert_eq!(rule.apply(Value::DateTimeTz(tz)), json!("2023-05-17"));
    }

    #[test]
    fn test_date_truncation_lossy_fallback() {
        let rule = FormatRule::DateTruncate;
        assert_eq!(rule.apply(Value::Int(20230517)), JsonValue::Null);
        assert_eq!(rule.apply(Value::Bool(true)), JsonValue::Null);
        assert_eq!(rule.apply(Value::from("2023")), json!("2023"));
    }

    #[test]
    fn test_format_row_keeps_column_order() {
        let row: Row = vec![
            ("val", Value::Null),
            ("ts", Value::from("2023-01-02T00:00:00")),
            ("id", Value::Int(1)),
        ]
        .into_iter()
        .collect();

        let record = formatter().format_row(row);
        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["val", "ts", "id"]);
        assert_eq!(record["ts"], json!("2023-01-02"));
        assert_eq!(record["val"], JsonValue::Null);
    }

    #[test]
    fn test_uuid_bytes_become_hyphenated_text() {
        let mut bytes = [0u8; 16];
        bytes[15] = 0xaa;
        assert_eq!(
            FormatRule::Uuid.apply(Value::Bytes(bytes.to_vec())),
            json!("00000000-0000-0000-0000-0000000000aa")
        );
        assert_eq!(FormatRule::Uuid.apply(Value::Null), JsonValue::Null);
        // not 16 bytes: left as base64
        assert_eq!(FormatRule::Uuid.apply(Value::Bytes(vec![1, 2, 3])), json!("AQID"));
    }
}
