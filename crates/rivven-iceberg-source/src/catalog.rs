//! Catalog types and JSON schema generation for discovered streams

use crate::schema::{ColumnSchema, ColumnType, FieldDescriptor};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::HashMap;

/// Catalog of streams offered by the source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<Stream>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stream(mut self, stream: Stream) -> Self {
        self.streams.push(stream);
        self
    }

    /// Find a stream by name
    pub fn find_stream(&self, name: &str) -> Option<&Stream> {
        self.streams.iter().find(|s| s.name == name)
    }
}

/// A discovered table exposed as a stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    /// Stream name (`namespace-table`)
    pub name: String,

    /// Iceberg namespace of the table
    pub namespace: Option<String>,

    /// JSON schema of the stream's records
    pub json_schema: JsonValue,

    pub supported_sync_modes: Vec<SyncMode>,

    /// Default cursor field for incremental sync
    pub default_cursor_field: Option<Vec<String>>,

    /// Additional metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, JsonValue>,
}

impl Stream {
    pub fn new(name: impl Into<String>, json_schema: JsonValue) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            json_schema,
            supported_sync_modes: vec![SyncMode::FullRefresh],
            default_cursor_field: None,
            metadata: HashMap::new(),
        }
    }

    pub fn namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = Some(ns.into());
        self
    }

    /// Advertise incremental sync driven by `field`
    pub fn replication_key(mut self, field: impl Into<String>) -> Self {
        self.supported_sync_modes = vec![SyncMode::FullRefresh, SyncMode::Incremental];
        self.default_cursor_field = Some(vec![field.into()]);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn supports_incremental(&self) -> bool {
        self.supported_sync_modes.contains(&SyncMode::Incremental)
    }
}

/// Sync mode for a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Re-read the whole table each sync
    #[default]
    FullRefresh,
    /// Read rows past the stored cursor
    Incremental,
}

/// JSON schema (`{"type": "object", "properties": {...}}`) for a stream's
/// records, properties in column order
pub fn json_schema_for(fields: &[FieldDescriptor]) -> JsonValue {
    let properties: Map<String, JsonValue> = fields
        .iter()
        .map(|f| (f.name.clone(), property_for(&f.column_type, f.nullable)))
        .collect();
    json!({
        "type": "object",
        "properties": properties,
    })
}

fn property_for(column_type: &ColumnType, nullable: bool) -> JsonValue {
    let mut property = Map::new();
    let base = match column_type {
        ColumnType::Boolean => "boolean",
        ColumnType::Int | ColumnType::Long => "integer",
        ColumnType::Float | ColumnType::Double | ColumnType::Decimal { .. } => "number",
        ColumnType::String => "string",
        ColumnType::Uuid => {
            property.insert("format".into(), json!("uuid"));
            "string"
        }
        ColumnType::Binary | ColumnType::Fixed(_) => {
            property.insert("contentEncoding".into(), json!("base64"));
            "string"
        }
        ColumnType::Date => {
            property.insert("format".into(), json!("date"));
            "string"
        }
        ColumnType::Time => {
            property.insert("format".into(), json!("time"));
            "string"
        }
        ColumnType::Timestamp | ColumnType::TimestampTz => {
            property.insert("format".into(), json!("date-time"));
            "string"
        }
        ColumnType::List {
            element,
            element_nullable,
        } => {
            property.insert("items".into(), property_for(element, *element_nullable));
            "array"
        }
        ColumnType::Struct(columns) => {
            property.insert("properties".into(), nested_properties(columns));
            "object"
        }
        ColumnType::Map {
            value,
            value_nullable,
            ..
        } => {
            property.insert(
                "additionalProperties".into(),
                property_for(value, *value_nullable),
            );
            "object"
        }
    };

    let types = if nullable {
        json!([base, "null"])
    } else {
        json!([base])
    };
    property.insert("type".into(), types);
    JsonValue::Object(property)
}

fn nested_properties(columns: &[ColumnSchema]) -> JsonValue {
    JsonValue::Object(
        columns
            .iter()
            .map(|c| (c.name.clone(), property_for(&c.column_type, c.nullable)))
            .collect(),
    )
}
