//! Sort order reconciliation
//!
//! A table may declare the order its rows are written in. When that order
//! leads with the replication key (ascending) the scan output is passed
//! through untouched; otherwise every batch is sorted by the key as it is
//! pulled.
//!
//! The reordering is **batch-local**: rows are ascending within each batch,
//! but a later batch may contain keys smaller than an earlier one. Consumers
//! that need the overall maximum must track it across the whole stream.

use crate::batch::BatchStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a sort field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// One `(field, direction)` entry of a declared sort order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortField {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Sort order declared by a table. An empty field list means unsorted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SortOrder {
    pub fields: Vec<SortField>,
}

impl SortOrder {
    pub fn new(fields: Vec<SortField>) -> Self {
        Self { fields }
    }

    pub fn unsorted() -> Self {
        Self::default()
    }

    pub fn is_unsorted(&self) -> bool {
        self.fields.is_empty()
    }

    /// The replication key implied by the sort order.
    ///
    /// Only a single-field order names a key; unsorted tables and compound
    /// orders infer none.
    pub fn infer_replication_key(&self) -> Option<&str> {
        match self.fields.as_slice() {
            [only] => Some(only.field.as_str()),
            _ => None,
        }
    }

    /// Whether rows already arrive ascending by `key`
    pub fn is_sorted_by(&self, key: &str) -> bool {
        self.fields
            .first()
            .is_some_and(|f| f.field == key && f.direction == SortDirection::Ascending)
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unsorted() {
            return f.write_str("unsorted");
        }
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|s| match s.direction {
                SortDirection::Ascending => format!("{} asc", s.field),
                SortDirection::Descending => format!("{} desc", s.field),
            })
            .collect();
        f.write_str(&fields.join(", "))
    }
}

/// Reconcile a batch stream with the replication key.
///
/// Returns `batches` itself when there is no key or the table is natively
/// sorted by it. Otherwise each batch is sorted ascending by `key` (nulls
/// last) lazily as it is pulled. Ordering holds within a batch only, never
/// across batch boundaries. A batch missing the key column yields a
/// [`ConnectorError::Scan`](crate::error::ConnectorError::Scan) item.
pub fn reconcile_batches(
    batches: BatchStream,
    key: Option<&str>,
    natively_sorted: bool,
) -> BatchStream {
    match key {
        Some(key) if !natively_sorted => {
            let key = key.to_string();
            batches
                .map(move |batch| batch.and_then(|b| b.sort_by(&key)))
                .boxed()
        }
        _ => batches,
    }
}
