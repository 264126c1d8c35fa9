//! In-memory table
//!
//! Holds Arrow record batches and evaluates scan predicates itself. Used by
//! tests and for wiring connectors without a catalog.

use crate::batch::{BatchStream, RowBatch};
use crate::error::{ConnectorError, Result};
use crate::filter::ScanPredicate;
use crate::schema::TableSchema;
use crate::sort::SortOrder;
use crate::table::Table;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::sync::RwLock;
use tracing::debug;

/// Table backed by a list of in-memory record batches
#[derive(Debug)]
pub struct MemoryTable {
    namespace: String,
    name: String,
    schema: TableSchema,
    arrow_schema: SchemaRef,
    sort_order: SortOrder,
    batches: RwLock<Vec<RecordBatch>>,
}

impl MemoryTable {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        schema: TableSchema,
    ) -> Result<Self> {
        let arrow_schema = schema.to_arrow()?;
        Ok(Self {
            namespace: namespace.into(),
            name: name.into(),
            schema,
            arrow_schema,
            sort_order: SortOrder::unsorted(),
            batches: RwLock::new(Vec::new()),
        })
    }

    pub fn with_sort_order(mut self, sort_order: SortOrder) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Add a batch (builder style)
    pub fn with_batch(self, batch: RecordBatch) -> Result<Self> {
        self.push_batch(batch)?;
        Ok(self)
    }

    /// Arrow schema batches must conform to
    pub fn arrow_schema(&self) -> SchemaRef {
        self.arrow_schema.clone()
    }

    /// Append a batch; its columns must match the table schema
    pub fn push_batch(&self, batch: RecordBatch) -> Result<()> {
        let incoming = batch.schema();
        let expected = self.arrow_schema.fields();
        let matches = incoming.fields().len() == expected.len()
            && incoming
                .fields()
                .iter()
                .zip(expected.iter())
                .all(|(a, b)| a.name() == b.name() && a.data_type() == b.data_type());
        if !matches {
            return Err(ConnectorError::schema(format!(
                "batch schema does not match table {}.{}",
                self.namespace, self.name
            )));
        }

        self.batches
            .write()
            .map_err(|_| ConnectorError::scan("memory table lock poisoned"))?
            .push(batch);
        Ok(())
    }

    pub fn num_batches(&self) -> usize {
        self.batches.read().map(|b| b.len()).unwrap_or_default()
    }
}

#[async_trait]
impl Table for MemoryTable {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> Result<TableSchema> {
        Ok(self.schema.clone())
    }

    fn sort_order(&self) -> Result<SortOrder> {
        Ok(self.sort_order.clone())
    }

    async fn scan(&self, predicate: &ScanPredicate) -> Result<BatchStream> {
        let batches = self
            .batches
            .read()
            .map_err(|_| ConnectorError::scan("memory table lock poisoned"))?
            .clone();
        debug!(
            table = %self.name,
            batches = batches.len(),
            filter = %predicate,
            "Scanning memory table"
        );

        let predicate = predicate.clone();
        Ok(stream::iter(batches)
            .map(move |batch| RowBatch::new(batch).filter(&predicate))
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::CursorLiteral;
    use crate::schema::{ColumnSchema, ColumnType};
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use futures::TryStreamExt;
    use std::sync::Arc;

    fn table() -> MemoryTable {
        MemoryTable::new(
            "db",
            "items",
            TableSchema::new(vec![
                ColumnSchema::required("id", ColumnType::Long),
                ColumnSchema::optional("name", ColumnType::String),
            ]),
        )
        .unwrap()
    }

    fn batch(table: &MemoryTable, ids: Vec<i64>) -> RecordBatch {
        let names: Vec<String> = ids.iter().map(|i| format!("item-{}", i)).collect();
        RecordBatch::try_new(
            table.arrow_schema(),
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_scan_applies_predicate_per_batch() {
        let table = table();
        table.push_batch(batch(&table, vec![1, 5, 3])).unwrap();
        table.push_batch(batch(&table, vec![2])).unwrap();
        table.push_batch(batch(&table, vec![8, 4])).unwrap();
        assert_eq!(table.num_batches(), 3);

        let predicate = ScanPredicate::greater_than("id", CursorLiteral::Integer(2));
        let batches: Vec<RowBatch> = table
            .scan(&predicate)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        let sizes: Vec<usize> = batches.iter().map(RowBatch::num_rows).collect();
        assert_eq!(sizes, vec![2, 0, 2]);
    }

    #[tokio::test]
    async fn test_scan_always_true_returns_everything() {
        let table = table();
        let table = {
            let b = batch(&table, vec![1, 2]);
            table.with_batch(b).unwrap()
        };
        let batches: Vec<RowBatch> = table
            .scan(&ScanPredicate::AlwaysTrue)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_rows(), 2);
        assert_eq!(table.stream_name(), "db-items");
    }

    #[test]
    fn test_mismatched_batch_is_rejected() {
        let table = table();
        let schema = Arc::new(Schema::new(vec![Field::new("other", DataType::Utf8, true)]));
        let foreign =
            RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(vec!["x"]))]).unwrap();

        let err = table.push_batch(foreign).unwrap_err();
        assert!(matches!(err, ConnectorError::Schema(_)));
        assert_eq!(table.num_batches(), 0);
    }
}
