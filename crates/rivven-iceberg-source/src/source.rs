//! Source runner
//!
//! Drives every selected stream in order and emits, per stream, a schema
//! event, its records and, when the stream advanced its replication key, a
//! state event carrying the full state to persist.

use crate::catalog::Catalog;
use crate::config::IcebergSourceConfig;
use crate::error::Result;
use crate::event::SourceEvent;
use crate::state::{State, Watermark};
use crate::stream::{IcebergTableStream, StreamOptions};
use crate::table::Table;
use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info};

/// Iceberg source over a set of tables
#[derive(Debug, Clone)]
pub struct IcebergSource {
    config: IcebergSourceConfig,
    streams: Vec<IcebergTableStream>,
}

impl IcebergSource {
    /// Build the source from already loaded tables.
    ///
    /// Tables outside the configured namespace/table allow-lists are skipped;
    /// per-stream overrides are applied to the rest.
    pub fn from_tables(config: IcebergSourceConfig, tables: Vec<Arc<dyn Table>>) -> Result<Self> {
        let mut streams = Vec::with_capacity(tables.len());
        for table in tables {
            if !config.table_selected(table.namespace(), table.name()) {
                debug!(
                    namespace = %table.namespace(),
                    table = %table.name(),
                    "Skipping table outside configured selection"
                );
                continue;
            }
            let overrides = config.stream_override(&table.stream_name());
            let options = StreamOptions {
                replication_key: overrides.replication_key,
            };
            streams.push(IcebergTableStream::with_options(table, options)?);
        }
        streams.sort_by(|a, b| a.name().cmp(b.name()));

        info!(streams = streams.len(), "Iceberg source initialized");
        Ok(Self { config, streams })
    }

    pub fn config(&self) -> &IcebergSourceConfig {
        &self.config
    }

    pub fn streams(&self) -> &[IcebergTableStream] {
        &self.streams
    }

    pub fn stream(&self, name: &str) -> Option<&IcebergTableStream> {
        self.streams.iter().find(|s| s.name() == name)
    }

    /// Streams not deselected in the configuration
    pub fn selected_streams(&self) -> impl Iterator<Item = &IcebergTableStream> {
        self.streams
            .iter()
            .filter(|s| self.config.stream_override(s.name()).selected)
    }

    /// Catalog of all discovered streams
    pub fn discover(&self) -> Catalog {
        self.streams
            .iter()
            .fold(Catalog::new(), |catalog, s| catalog.add_stream(s.catalog_stream()))
    }

    /// Read all selected streams.
    ///
    /// The new cursor is the largest replication key value emitted, tracked
    /// over the whole stream since rows are only ordered within a batch.
    pub fn read(&self, state: Option<State>) -> BoxStream<'static, Result<SourceEvent>> {
        let streams: Vec<IcebergTableStream> = self.selected_streams().cloned().collect();
        let mut state = state.unwrap_or_default();

        let events = try_stream! {
            for stream in streams {
                yield SourceEvent::schema(
                    stream.name(),
                    stream.json_schema().clone(),
                    stream.replication_key(),
                );

                let mut records = stream.get_records(Some(&state), None).await?;
                let mut watermark = Watermark::new();
                let mut count = 0usize;

                while let Some(record) = records.next().await {
                    let record = record?;
                    if let Some(value) = stream.replication_key().and_then(|k| record.get(k)) {
                        watermark.observe(value);
                    }
                    count += 1;
                    yield SourceEvent::record(stream.name(), JsonValue::Object(record));
                }
                info!(stream = %stream.name(), records = count, "Stream read complete");

                if let (Some(key), Some(max)) = (stream.replication_key(), watermark.into_value()) {
                    state.update_cursor(stream.name(), key, max);
                    yield SourceEvent::state(stream.name(), serde_json::to_value(&state)?);
                }
            }
        };
        events.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamOverride;
    use crate::event::SourceEventType;
    use crate::memory::MemoryTable;
    use crate::schema::{ColumnSchema, ColumnType, TableSchema};
    use crate::sort::{SortField, SortOrder};
    use arrow::array::Int64Array;
    use arrow::record_batch::RecordBatch;
    use futures::TryStreamExt;
    use serde_json::json;

    fn table(namespace: &str, name: &str, batches: Vec<Vec<i64>>) -> Arc<dyn Table> {
        let table = MemoryTable::new(
            namespace,
            name,
            TableSchema::new(vec![ColumnSchema::required("id", ColumnType::Long)]),
        )
        .unwrap()
        .with_sort_order(SortOrder::new(vec![SortField::ascending("id")]));
        for ids in batches {
            let batch =
                RecordBatch::try_new(table.arrow_schema(), vec![Arc::new(Int64Array::from(ids))])
                    .unwrap();
            table.push_batch(batch).unwrap();
        }
        Arc::new(table)
    }

    #[test]
    fn test_table_selection_and_discovery() {
        let config = IcebergSourceConfig {
            namespaces: vec!["db".to_string()],
            ..Default::default()
        };
        let source = IcebergSource::from_tables(
            config,
            vec![
                table("db", "b", vec![]),
                table("other", "x", vec![]),
                table("db", "a", vec![]),
            ],
        )
        .unwrap();

        let catalog = source.discover();
        let names: Vec<&str> = catalog.streams.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["db-a", "db-b"]);
        assert_eq!(
            catalog.find_stream("db-a").unwrap().default_cursor_field,
            Some(vec!["id".to_string()])
        );
    }

    #[tokio::test]
    async fn test_read_emits_schema_records_and_state() {
        let source = IcebergSource::from_tables(
            IcebergSourceConfig::default(),
            vec![table("db", "items", vec![vec![1, 4], vec![2, 3]])],
        )
        .unwrap();

        let events: Vec<SourceEvent> = source.read(None).try_collect().await.unwrap();
        let kinds: Vec<SourceEventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                SourceEventType::Schema,
                SourceEventType::Record,
                SourceEventType::Record,
                SourceEventType::Record,
                SourceEventType::Record,
                SourceEventType::State,
            ]
        );

        // the last record is 3, the maximum is 4
        let state: State = serde_json::from_value(events[5].data.clone()).unwrap();
        assert_eq!(state.cursor_value("db-items", "id", None), Some(&json!(4)));
    }

    #[tokio::test]
    async fn test_read_resumes_from_state() {
        let source = IcebergSource::from_tables(
            IcebergSourceConfig::default(),
            vec![table("db", "items", vec![vec![1, 2, 3]])],
        )
        .unwrap();
        let state = State::builder().stream_cursor("db-items", "id", json!(3)).build();

        let events: Vec<SourceEvent> = source.read(Some(state)).try_collect().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, SourceEventType::Schema);
    }

    #[tokio::test]
    async fn test_deselected_streams_are_not_read() {
        let mut config = IcebergSourceConfig::default();
        config.streams.insert(
            "db-skip".to_string(),
            StreamOverride {
                selected: false,
                ..Default::default()
            },
        );
        let source = IcebergSource::from_tables(
            config,
            vec![table("db", "keep", vec![vec![1]]), table("db", "skip", vec![vec![1]])],
        )
        .unwrap();

        assert_eq!(source.discover().streams.len(), 2);
        let events: Vec<SourceEvent> = source.read(None).try_collect().await.unwrap();
        assert!(events.iter().all(|e| e.stream == "db-keep"));
    }
}
