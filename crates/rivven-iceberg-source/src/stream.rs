//! Incremental table streams
//!
//! An [`IcebergTableStream`] turns one table into a lazy sequence of
//! formatted records. Each call to [`IcebergTableStream::get_records`]:
//!
//! 1. looks up the stored cursor for the stream (read-only)
//! 2. builds the scan predicate from it
//! 3. scans the table with that predicate
//! 4. sorts each batch by the replication key unless the table is already
//!    sorted by it
//! 5. formats every row
//!
//! ```rust,ignore
//! let stream = IcebergTableStream::new(table)?;
//! let mut records = stream.get_records(Some(&state), None).await?;
//! while let Some(record) = records.next().await {
//!     println!("{}", serde_json::to_string(&record?)?);
//! }
//! ```

use crate::batch::BatchStream;
use crate::catalog::{self, json_schema_for};
use crate::error::{ConnectorError, Result};
use crate::filter::{build_filter, ScanPredicate};
use crate::format::{Record, RecordFormatter};
use crate::schema::{normalize_schema, FieldDescriptor};
use crate::sort::{reconcile_batches, SortOrder};
use crate::state::{Context, State};
use crate::table::Table;
use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Lazily produced formatted records
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Construction options for a stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOptions {
    /// Replication key; overrides the key implied by the table's sort order
    pub replication_key: Option<String>,
}

/// A table exposed as an incrementally readable stream
#[derive(Clone)]
pub struct IcebergTableStream {
    name: String,
    table: Arc<dyn Table>,
    fields: Arc<[FieldDescriptor]>,
    json_schema: Arc<JsonValue>,
    formatter: Arc<RecordFormatter>,
    sort_order: SortOrder,
    replication_key: Option<String>,
    natively_sorted: bool,
}

impl IcebergTableStream {
    /// Build a stream whose replication key is inferred from the sort order
    pub fn new(table: Arc<dyn Table>) -> Result<Self> {
        Self::with_options(table, StreamOptions::default())
    }

    /// Build a stream.
    ///
    /// Reads the table's schema and sort order once; both stay fixed for the
    /// stream's lifetime.
    pub fn with_options(table: Arc<dyn Table>, options: StreamOptions) -> Result<Self> {
        let name = table.stream_name();
        let fields = normalize_schema(&table.schema()?)?;
        let sort_order = table.sort_order()?;

        let replication_key = match options.replication_key {
            Some(key) => {
                if !fields.iter().any(|f| f.name == key) {
                    return Err(ConnectorError::config(format!(
                        "replication key '{}' is not a column of stream {}",
                        key, name
                    )));
                }
                Some(key)
            }
            None => {
                let inferred = sort_order.infer_replication_key().map(str::to_string);
                if let Some(ref key) = inferred {
                    if !fields.iter().any(|f| &f.name == key) {
                        return Err(ConnectorError::schema(format!(
                            "sort field '{}' is not a column of stream {}",
                            key, name
                        )));
                    }
                }
                inferred
            }
        };
        let natively_sorted = replication_key
            .as_deref()
            .is_some_and(|key| sort_order.is_sorted_by(key));

        let json_schema = json_schema_for(&fields);
        let formatter = RecordFormatter::from_json_schema(&json_schema)?;

        debug!(
            stream = %name,
            sort_order = %sort_order,
            replication_key = ?replication_key,
            natively_sorted,
            "Stream initialized"
        );

        Ok(Self {
            name,
            table,
            fields: fields.into(),
            json_schema: Arc::new(json_schema),
            formatter: Arc::new(formatter),
            sort_order,
            replication_key,
            natively_sorted,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        self.table.namespace()
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn json_schema(&self) -> &JsonValue {
        &self.json_schema
    }

    pub fn formatter(&self) -> &RecordFormatter {
        &self.formatter
    }

    pub fn sort_order(&self) -> &SortOrder {
        &self.sort_order
    }

    pub fn replication_key(&self) -> Option<&str> {
        self.replication_key.as_deref()
    }

    /// Whether the table's sort order already yields ascending key order
    pub fn is_natively_sorted(&self) -> bool {
        self.natively_sorted
    }

    fn replication_key_field(&self) -> Option<&FieldDescriptor> {
        let key = self.replication_key.as_deref()?;
        self.fields.iter().find(|f| f.name == key)
    }

    /// Catalog entry describing this stream
    pub fn catalog_stream(&self) -> catalog::Stream {
        let stream = catalog::Stream::new(&self.name, (*self.json_schema).clone())
            .namespace(self.table.namespace())
            .metadata("table", JsonValue::String(self.table.name().to_string()));
        match self.replication_key() {
            Some(key) => stream.replication_key(key),
            None => stream,
        }
    }

    /// Predicate the next scan would use for the given state
    pub fn scan_predicate(
        &self,
        state: Option<&State>,
        context: Option<&Context>,
    ) -> Result<ScanPredicate> {
        let cursor = match (self.replication_key(), state) {
            (Some(key), Some(state)) => state.cursor_value(&self.name, key, context),
            _ => None,
        };
        build_filter(self.replication_key_field(), cursor)
    }

    /// Read the stream's records.
    ///
    /// Only rows past the stored cursor are returned when the stream has a
    /// replication key. Rows are ascending by the key within each table
    /// batch, not across batches. Filter errors fail the call before the
    /// table is scanned; scan errors arrive as `Err` items.
    pub async fn get_records(
        &self,
        state: Option<&State>,
        context: Option<&Context>,
    ) -> Result<RecordStream> {
        let predicate = self.scan_predicate(state, context)?;
        info!(
            stream = %self.name,
            filter = %predicate,
            sorted = self.natively_sorted,
            "Starting table scan"
        );

        let batches = self.table.scan(&predicate).await?;
        let batches = reconcile_batches(
            batches,
            self.replication_key.as_deref(),
            self.natively_sorted,
        );
        Ok(format_batches(
            self.name.clone(),
            batches,
            self.formatter.clone(),
        ))
    }
}

fn format_batches(
    stream: String,
    mut batches: BatchStream,
    formatter: Arc<RecordFormatter>,
) -> RecordStream {
    let records = try_stream! {
        let mut count = 0usize;
        while let Some(batch) = batches.next().await {
            let batch = batch?;
            debug!(stream = %stream, rows = batch.num_rows(), "Formatting batch");
            for row in batch.rows()? {
                count += 1;
                yield formatter.format_row(row);
            }
        }
        debug!(stream = %stream, records = count, "Table scan finished");
    };
    records.boxed()
}

impl fmt::Debug for IcebergTableStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcebergTableStream")
            .field("name", &self.name)
            .field("replication_key", &self.replication_key)
            .field("natively_sorted", &self.natively_sorted)
            .finish()
    }
}
