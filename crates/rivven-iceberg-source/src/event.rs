//! Events emitted while reading streams

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Kind of a [`SourceEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceEventType {
    /// Stream JSON schema, sent before the stream's first record
    Schema,
    /// A formatted row
    Record,
    /// Updated replication state to persist
    State,
}

/// An event produced by the source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEvent {
    pub event_type: SourceEventType,

    /// Stream the event belongs to
    pub stream: String,

    /// Emission time
    pub timestamp: DateTime<Utc>,

    /// Event payload (depends on event type)
    pub data: JsonValue,
}

impl SourceEvent {
    fn new(event_type: SourceEventType, stream: impl Into<String>, data: JsonValue) -> Self {
        Self {
            event_type,
            stream: stream.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// Schema event carrying the stream's JSON schema and key
    pub fn schema(
        stream: impl Into<String>,
        json_schema: JsonValue,
        replication_key: Option<&str>,
    ) -> Self {
        Self::new(
            SourceEventType::Schema,
            stream,
            serde_json::json!({
                "schema": json_schema,
                "key_properties": [],
                "bookmark_properties": replication_key.into_iter().collect::<Vec<_>>(),
            }),
        )
    }

    pub fn record(stream: impl Into<String>, record: JsonValue) -> Self {
        Self::new(SourceEventType::Record, stream, record)
    }

    /// State event carrying the full state to persist
    pub fn state(stream: impl Into<String>, state: JsonValue) -> Self {
        Self::new(SourceEventType::State, stream, state)
    }

    pub fn is_record(&self) -> bool {
        self.event_type == SourceEventType::Record
    }

    /// Set timestamp (builder-style)
    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = ts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_event() {
        let event = SourceEvent::schema("db-events", json!({"type": "object"}), Some("ts"));
        assert_eq!(event.event_type, SourceEventType::Schema);
        assert_eq!(event.data["bookmark_properties"], json!(["ts"]));

        let event = SourceEvent::schema("db-events", json!({"type": "object"}), None);
        assert_eq!(event.data["bookmark_properties"], json!([]));
    }

    #[test]
    fn test_event_serialization() {
        let ts = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = SourceEvent::record("db-events", json!({"id": 1})).with_timestamp(ts);
        assert!(event.is_record());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], json!("record"));
        assert_eq!(json["stream"], json!("db-events"));
        assert_eq!(json["data"], json!({"id": 1}));

        let back: SourceEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
