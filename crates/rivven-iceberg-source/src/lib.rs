//! rivven-iceberg-source - Incremental Apache Iceberg source for Rivven
//!
//! Reads Iceberg tables as streams of JSON records, either in full or
//! incrementally past a stored high-watermark of a replication key.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                   IcebergTableStream::get_records                │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  State cursor ──▶ build_filter ──▶ Table::scan ──▶ RowBatch*     │
//! │                                                     │            │
//! │                       reconcile_batches (per-batch sort)         │
//! │                                                     │            │
//! │                       RecordFormatter ──▶ Record*                │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The replication key is taken from the stream configuration or, failing
//! that, inferred from a single-field table sort order. Sorting is
//! **batch-local**: records are ascending within each scanned batch only.
//!
//! # Usage
//!
//! ```rust,ignore
//! use rivven_iceberg_source::prelude::*;
//!
//! let config = IcebergSourceConfig::from_file("iceberg.yaml")?;
//! let source = IcebergSource::connect(config).await?;
//! let mut events = source.read(Some(State::from_file("state.json")?));
//! while let Some(event) = events.next().await {
//!     println!("{}", serde_json::to_string(&event?)?);
//! }
//! ```

pub mod batch;
pub mod catalog;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod format;
pub mod memory;
pub mod schema;
pub mod sort;
pub mod source;
pub mod state;
pub mod stream;
pub mod table;
pub mod types;
pub mod value;

#[cfg(feature = "iceberg")]
pub mod iceberg_table;

pub use batch::{BatchStream, RowBatch};
pub use catalog::{json_schema_for, Catalog, Stream, SyncMode};
pub use config::{CatalogConfig, CatalogType, IcebergSourceConfig, StreamOverride};
pub use error::{ConnectorError, Result};
pub use event::{SourceEvent, SourceEventType};
pub use filter::{build_filter, CursorLiteral, ScanPredicate};
pub use format::{FormatRule, Record, RecordFormatter};
pub use memory::MemoryTable;
pub use schema::{
    normalize_schema, ColumnSchema, ColumnType, FieldDescriptor, LogicalFormat, TableSchema,
};
pub use sort::{reconcile_batches, SortDirection, SortField, SortOrder};
pub use source::IcebergSource;
pub use state::{Context, State, StreamState, Watermark};
pub use stream::{IcebergTableStream, RecordStream, StreamOptions};
pub use table::Table;
pub use types::SensitiveString;
pub use value::{Row, Value};

#[cfg(feature = "iceberg")]
pub use iceberg_table::{discover_tables, load_catalog, IcebergTable};

/// Prelude for common imports
pub mod prelude {
    pub use crate::{
        ConnectorError, Context, IcebergSource, IcebergSourceConfig, IcebergTableStream,
        MemoryTable, Record, Result, SourceEvent, SourceEventType, State, StreamOptions, Table,
    };
    pub use futures::StreamExt;
}
