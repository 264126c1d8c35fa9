//! Table layer abstraction
//!
//! The connector reads tables only through this trait: a column description,
//! a declared sort order and a filtered scan producing row batches lazily.

use crate::batch::BatchStream;
use crate::error::Result;
use crate::filter::ScanPredicate;
use crate::schema::TableSchema;
use crate::sort::SortOrder;
use async_trait::async_trait;

/// A readable table
#[async_trait]
pub trait Table: Send + Sync {
    /// Namespace the table lives in (dot-joined for nested namespaces)
    fn namespace(&self) -> &str;

    /// Table name within its namespace
    fn name(&self) -> &str;

    /// Current column schema
    fn schema(&self) -> Result<TableSchema>;

    /// Declared sort order; [`SortOrder::unsorted`] when none is declared
    fn sort_order(&self) -> Result<SortOrder>;

    /// Scan the table, returning only rows matching `predicate`.
    ///
    /// Batches are produced lazily; dropping the stream releases the scan.
    async fn scan(&self, predicate: &ScanPredicate) -> Result<BatchStream>;

    /// Stream name for this table (`namespace-table`)
    fn stream_name(&self) -> String {
        stream_name(self.namespace(), self.name())
    }
}

/// Stream name for a table identifier
pub fn stream_name(namespace: &str, table: &str) -> String {
    format!("{}-{}", namespace, table)
}
