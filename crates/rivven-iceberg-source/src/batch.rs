//! Row batches produced by table scans

use crate::error::{ConnectorError, Result};
use crate::filter::ScanPredicate;
use crate::value::{Row, Value};
use arrow::array::{Array, ArrayRef, BooleanArray};
use arrow::compute::{filter_record_batch, sort_to_indices, take_record_batch, SortOptions};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use futures::stream::BoxStream;

/// Lazily produced sequence of row batches
pub type BatchStream = BoxStream<'static, Result<RowBatch>>;

/// An ordered, fixed-schema chunk of rows
#[derive(Debug, Clone, PartialEq)]
pub struct RowBatch {
    batch: RecordBatch,
}

impl RowBatch {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_inner(self) -> RecordBatch {
        self.batch
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    fn column(&self, name: &str) -> Result<&ArrayRef> {
        self.batch.column_by_name(name).ok_or_else(|| {
            ConnectorError::scan(format!("column '{}' not found in row batch", name))
        })
    }

    /// Values of a single column, in row order
    pub fn column_values(&self, name: &str) -> Result<Vec<Value>> {
        let column = self.column(name)?;
        (0..column.len())
            .map(|row| Value::from_array(column.as_ref(), row))
            .collect()
    }

    /// Materialize every row of the batch
    pub fn rows(&self) -> Result<Vec<Row>> {
        let schema = self.batch.schema();
        let columns = self.batch.columns();
        (0..self.batch.num_rows())
            .map(|row| {
                schema
                    .fields()
                    .iter()
                    .zip(columns)
                    .map(|(field, column)| {
                        Ok((field.name().clone(), Value::from_array(column.as_ref(), row)?))
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(Row::new)
            })
            .collect()
    }

    /// Return a copy of the batch sorted ascending by `field`, nulls last
    pub fn sort_by(&self, field: &str) -> Result<RowBatch> {
        let column = self.column(field)?;
        let options = SortOptions {
            descending: false,
            nulls_first: false,
        };
        let indices = sort_to_indices(column.as_ref(), Some(options), None)?;
        Ok(Self::new(take_record_batch(&self.batch, &indices)?))
    }

    /// Keep only the rows matching `predicate`
    pub fn filter(&self, predicate: &ScanPredicate) -> Result<RowBatch> {
        let Some(field) = predicate.field() else {
            return Ok(self.clone());
        };
        let column = self.column(field)?;
        let mask = (0..column.len())
            .map(|row| Ok(predicate.matches(&Value::from_array(column.as_ref(), row)?)))
            .collect::<Result<Vec<bool>>>()?;
        Ok(Self::new(filter_record_batch(
            &self.batch,
            &BooleanArray::from(mask),
        )?))
    }
}

impl From<RecordBatch> for RowBatch {
    fn from(batch: RecordBatch) -> Self {
        Self::new(batch)
    }
}
