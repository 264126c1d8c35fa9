//! Replication state
//!
//! Streams only read the stored cursor; advancing it is the host's job. Both
//! the native layout (`{"streams": {...}}`) and the Singer bookmark layout
//! (`{"bookmarks": {"s": {"replication_key": .., "replication_key_value": ..}}}`)
//! are accepted.

use crate::error::{ConnectorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Partition context a cursor is scoped to
pub type Context = serde_json::Map<String, JsonValue>;

/// Sync progress for all streams
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Per-stream state
    #[serde(default, alias = "bookmarks")]
    pub streams: HashMap<String, StreamState>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> StateBuilder {
        StateBuilder::new()
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Load state from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::State(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    pub fn get_stream(&self, stream_name: &str) -> Option<&StreamState> {
        self.streams.get(stream_name)
    }

    /// Stored cursor for a stream.
    ///
    /// With a `context`, the partition whose context matches exactly is used;
    /// otherwise the stream-level cursor. A cursor recorded for a field other
    /// than `replication_key` is ignored.
    pub fn cursor_value(
        &self,
        stream_name: &str,
        replication_key: &str,
        context: Option<&Context>,
    ) -> Option<&JsonValue> {
        let stream = self.streams.get(stream_name)?;
        let (field, value) = context
            .and_then(|ctx| stream.partitions.iter().find(|p| &p.context == ctx))
            .map(|p| (p.cursor_field.as_deref(), p.cursor_value.as_ref()))
            .unwrap_or((stream.cursor_field.as_deref(), stream.cursor_value.as_ref()));

        match field {
            Some(field) if field != replication_key => {
                warn!(
                    stream = %stream_name,
                    stored = %field,
                    replication_key = %replication_key,
                    "Ignoring cursor stored for a different replication key"
                );
                None
            }
            _ => value,
        }
    }

    /// Record a stream-level cursor
    pub fn update_cursor(
        &mut self,
        stream_name: impl Into<String>,
        cursor_field: impl Into<String>,
        cursor_value: JsonValue,
    ) {
        let state = self.streams.entry(stream_name.into()).or_default();
        state.cursor_field = Some(cursor_field.into());
        state.cursor_value = Some(cursor_value);
    }

    /// Merge with another state (other takes precedence)
    pub fn merge(&mut self, other: State) {
        self.streams.extend(other.streams);
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

/// Builder for [`State`]
#[derive(Debug, Default)]
pub struct StateBuilder {
    state: State,
}

impl StateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream_cursor(
        mut self,
        stream_name: impl Into<String>,
        cursor_field: impl Into<String>,
        cursor_value: JsonValue,
    ) -> Self {
        self.state
            .update_cursor(stream_name, cursor_field, cursor_value);
        self
    }

    pub fn stream(mut self, stream_name: impl Into<String>, stream_state: StreamState) -> Self {
        self.state.streams.insert(stream_name.into(), stream_state);
        self
    }

    pub fn build(self) -> State {
        self.state
    }
}

/// State of a single stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    /// Field the cursor was recorded for
    #[serde(default, alias = "replication_key", skip_serializing_if = "Option::is_none")]
    pub cursor_field: Option<String>,

    /// Last emitted value of the cursor field
    #[serde(
        default,
        alias = "replication_key_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub cursor_value: Option<JsonValue>,

    /// Per-partition cursors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionState>,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursor(mut self, field: impl Into<String>, value: JsonValue) -> Self {
        self.cursor_field = Some(field.into());
        self.cursor_value = Some(value);
        self
    }

    pub fn partition(mut self, partition: PartitionState) -> Self {
        self.partitions.push(partition);
        self
    }
}

/// Cursor scoped to one partition context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionState {
    #[serde(default)]
    pub context: Context,

    #[serde(default, alias = "replication_key", skip_serializing_if = "Option::is_none")]
    pub cursor_field: Option<String>,

    #[serde(
        default,
        alias = "replication_key_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub cursor_value: Option<JsonValue>,
}

impl PartitionState {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            ..Default::default()
        }
    }

    pub fn cursor(mut self, field: impl Into<String>, value: JsonValue) -> Self {
        self.cursor_field = Some(field.into());
        self.cursor_value = Some(value);
        self
    }
}

/// Running maximum of emitted replication key values.
///
/// Scan output is only ordered within a batch, so the host feeds every
/// emitted value through here instead of taking the last one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Watermark {
    max: Option<JsonValue>,
}

impl Watermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe an emitted value; nulls and incomparable values are skipped
    pub fn observe(&mut self, value: &JsonValue) {
        if value.is_null() {
            return;
        }
        match &self.max {
            None => self.max = Some(value.clone()),
            Some(current) => {
                if compare_json(value, current) == Some(Ordering::Greater) {
                    self.max = Some(value.clone());
                }
            }
        }
    }

    pub fn value(&self) -> Option<&JsonValue> {
        self.max.as_ref()
    }

    pub fn into_value(self) -> Option<JsonValue> {
        self.max
    }
}

fn compare_json(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
