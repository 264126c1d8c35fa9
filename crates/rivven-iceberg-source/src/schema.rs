//! Table schema description and field normalization
//!
//! The table layer describes its columns with [`TableSchema`]. Each stream
//! normalizes that description once into a list of [`FieldDescriptor`]s which
//! drive JSON-schema generation and record formatting for the lifetime of the
//! stream.

use crate::error::{ConnectorError, Result};
use arrow::datatypes::{DataType, Field, Fields, Schema, SchemaRef, TimeUnit};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Logical column type, independent of the physical encoding used by a scan
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Boolean,
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    Long,
    Float,
    Double,
    Decimal {
        precision: u32,
        scale: u32,
    },
    /// Calendar date without time of day
    Date,
    /// Time of day, microsecond precision
    Time,
    /// Timestamp without zone, microsecond precision
    Timestamp,
    /// Timestamp normalized to UTC, microsecond precision
    TimestampTz,
    String,
    Uuid,
    Fixed(u64),
    Binary,
    List {
        element: Box<ColumnType>,
        element_nullable: bool,
    },
    Struct(Vec<ColumnSchema>),
    Map {
        key: Box<ColumnType>,
        value: Box<ColumnType>,
        value_nullable: bool,
    },
}

impl ColumnType {
    /// Short type name used in logs and error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Decimal { .. } => "decimal",
            Self::Date => "date",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::TimestampTz => "timestamptz",
            Self::String => "string",
            Self::Uuid => "uuid",
            Self::Fixed(_) => "fixed",
            Self::Binary => "binary",
            Self::List { .. } => "list",
            Self::Struct(_) => "struct",
            Self::Map { .. } => "map",
        }
    }

    /// Logical output format of values of this type
    pub fn logical_format(&self) -> LogicalFormat {
        match self {
            Self::Date => LogicalFormat::Date,
            Self::Timestamp | Self::TimestampTz => LogicalFormat::DateTime,
            Self::Time | Self::Uuid | Self::Fixed(_) | Self::Binary => LogicalFormat::Other,
            _ => LogicalFormat::None,
        }
    }

    /// Whether values of this type can be compared for incremental replication
    pub fn is_orderable(&self) -> bool {
        !matches!(
            self,
            Self::List { .. } | Self::Struct(_) | Self::Map { .. } | Self::Binary | Self::Fixed(_)
        )
    }

    /// Arrow data type used to carry values of this type in a row batch
    pub fn to_arrow(&self) -> Result<DataType> {
        let data_type = match self {
            Self::Boolean => DataType::Boolean,
            Self::Int => DataType::Int32,
            Self::Long => DataType::Int64,
            Self::Float => DataType::Float32,
            Self::Double => DataType::Float64,
            Self::Decimal { precision, scale } => {
                let precision = u8::try_from(*precision)
                    .ok()
                    .filter(|p| *p >= 1 && *p <= 38)
                    .ok_or_else(|| {
                        ConnectorError::schema(format!(
                            "unsupported decimal precision {}",
                            precision
                        ))
                    })?;
                let scale = i8::try_from(*scale)
                    .ok()
                    .filter(|s| (*s as u8) <= precision)
                    .ok_or_else(|| {
                        ConnectorError::schema(format!("unsupported decimal scale {}", scale))
                    })?;
                DataType::Decimal128(precision, scale)
            }
            Self::Date => DataType::Date32,
            Self::Time => DataType::Time64(TimeUnit::Microsecond),
            Self::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
            Self::TimestampTz => DataType::Timestamp(TimeUnit::Microsecond, Some("+00:00".into())),
            Self::String => DataType::Utf8,
            Self::Uuid => DataType::FixedSizeBinary(16),
            Self::Fixed(len) => DataType::FixedSizeBinary(i32::try_from(*len).map_err(|_| {
                ConnectorError::schema(format!("fixed length {} is too large", len))
            })?),
            Self::Binary => DataType::Binary,
            Self::List {
                element,
                element_nullable,
            } => DataType::List(Arc::new(Field::new(
                "element",
                element.to_arrow()?,
                *element_nullable,
            ))),
            Self::Struct(fields) => DataType::Struct(arrow_fields(fields)?),
            Self::Map {
                key,
                value,
                value_nullable,
            } => {
                let entries = Fields::from(vec![
                    Field::new("key", key.to_arrow()?, false),
                    Field::new("value", value.to_arrow()?, *value_nullable),
                ]);
                DataType::Map(
                    Arc::new(Field::new("key_value", DataType::Struct(entries), false)),
                    false,
                )
            }
        };
        Ok(data_type)
    }

    /// Map an Arrow data type back to a logical column type
    pub fn from_arrow(data_type: &DataType) -> Result<Self> {
        let column_type = match data_type {
            DataType::Boolean => Self::Boolean,
            DataType::Int8 | DataType::Int16 | DataType::Int32 => Self::Int,
            DataType::UInt8 | DataType::UInt16 => Self::Int,
            DataType::Int64 | DataType::UInt32 => Self::Long,
            DataType::Float16 | DataType::Float32 => Self::Float,
            DataType::Float64 => Self::Double,
            DataType::Decimal128(precision, scale) => Self::Decimal {
                precision: u32::from(*precision),
                scale: u32::try_from(*scale).map_err(|_| {
                    ConnectorError::schema(format!("negative decimal scale {}", scale))
                })?,
            },
            DataType::Date32 | DataType::Date64 => Self::Date,
            DataType::Time32(_) | DataType::Time64(_) => Self::Time,
            DataType::Timestamp(_, None) => Self::Timestamp,
            DataType::Timestamp(_, Some(_)) => Self::TimestampTz,
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => Self::String,
            DataType::Binary | DataType::LargeBinary | DataType::BinaryView => Self::Binary,
            DataType::FixedSizeBinary(len) => Self::Fixed(u64::try_from(*len).unwrap_or_default()),
            DataType::List(field) | DataType::LargeList(field) => Self::List {
                element: Box::new(Self::from_arrow(field.data_type())?),
                element_nullable: field.is_nullable(),
            },
            DataType::Struct(fields) => Self::Struct(
                fields
                    .iter()
                    .map(|f| ColumnSchema::from_arrow(f))
                    .collect::<Result<Vec<_>>>()?,
            ),
            DataType::Map(entries, _) => match entries.data_type() {
                DataType::Struct(kv) if kv.len() == 2 => Self::Map {
                    key: Box::new(Self::from_arrow(kv[0].data_type())?),
                    value: Box::new(Self::from_arrow(kv[1].data_type())?),
                    value_nullable: kv[1].is_nullable(),
                },
                other => {
                    return Err(ConnectorError::schema(format!(
                        "map entries must be a two-field struct, got {}",
                        other
                    )))
                }
            },
            DataType::Dictionary(_, value) => Self::from_arrow(value)?,
            other => {
                return Err(ConnectorError::schema(format!(
                    "unsupported arrow type {}",
                    other
                )))
            }
        };
        Ok(column_type)
    }
}

/// A single column of a table schema
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl ColumnSchema {
    /// Create a column that never holds nulls
    pub fn required(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }

    /// Create a nullable column
    pub fn optional(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    fn from_arrow(field: &Field) -> Result<Self> {
        Ok(Self {
            name: field.name().clone(),
            column_type: ColumnType::from_arrow(field.data_type())?,
            nullable: field.is_nullable(),
        })
    }

    fn to_arrow(&self) -> Result<Field> {
        Ok(Field::new(
            &self.name,
            self.column_type.to_arrow()?,
            self.nullable,
        ))
    }
}

fn arrow_fields(columns: &[ColumnSchema]) -> Result<Fields> {
    columns
        .iter()
        .map(ColumnSchema::to_arrow)
        .collect::<Result<Vec<_>>>()
        .map(Fields::from)
}

/// Column description supplied by the table layer, in table column order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Self { columns }
    }

    /// Find a column by name
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Arrow schema for row batches of this table
    pub fn to_arrow(&self) -> Result<SchemaRef> {
        Ok(Arc::new(Schema::new(arrow_fields(&self.columns)?)))
    }

    /// Build a table schema from an Arrow schema
    pub fn from_arrow(schema: &Schema) -> Result<Self> {
        schema
            .fields()
            .iter()
            .map(|f| ColumnSchema::from_arrow(f))
            .collect::<Result<Vec<_>>>()
            .map(Self::new)
    }
}

/// Output format class of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalFormat {
    /// Plain value without a temporal or encoded representation
    None,
    /// Calendar date
    Date,
    /// Date with time of day
    DateTime,
    /// Time of day, uuid, or binary
    Other,
}

/// Per-column metadata used to drive output normalization
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
    pub logical_format: LogicalFormat,
}

impl FieldDescriptor {
    /// Whether the field carries a date or date-time value
    pub fn is_temporal(&self) -> bool {
        matches!(
            self.logical_format,
            LogicalFormat::Date | LogicalFormat::DateTime
        )
    }
}

/// Normalize a table schema into one descriptor per column, in column order.
///
/// Fails with [`ConnectorError::Schema`] when the schema has no columns, an
/// unnamed column, or duplicate column names.
pub fn normalize_schema(schema: &TableSchema) -> Result<Vec<FieldDescriptor>> {
    if schema.columns.is_empty() {
        return Err(ConnectorError::schema("table schema has no columns"));
    }

    let mut seen = HashSet::with_capacity(schema.columns.len());
    schema
        .columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            if column.name.is_empty() {
                return Err(ConnectorError::schema(format!(
                    "column at position {} has no name",
                    idx
                )));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(ConnectorError::schema(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
            Ok(FieldDescriptor {
                name: column.name.clone(),
                column_type: column.column_type.clone(),
                nullable: column.nullable,
                logical_format: column.column_type.logical_format(),
            })
        })
        .collect()
}
