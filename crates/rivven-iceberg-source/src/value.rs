//! Cell values materialized from row batches
//!
//! A [`Value`] keeps the temporal variants (date, timestamp) distinct from
//! text so the record formatter can normalize them, and converts to JSON for
//! the emitted record.

use crate::error::Result;
use arrow::array::{Array, AsArray};
use arrow::datatypes::{
    DataType, Date32Type, Date64Type, Decimal128Type, Float16Type, Float32Type, Float64Type,
    Int16Type, Int32Type, Int64Type, Int8Type, Time32MillisecondType, Time32SecondType,
    Time64MicrosecondType, Time64NanosecondType, TimeUnit, TimestampMicrosecondType,
    TimestampMillisecondType, TimestampNanosecondType, TimestampSecondType, UInt16Type,
    UInt32Type, UInt64Type, UInt8Type,
};
use arrow::util::display::{ArrayFormatter, FormatOptions};
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SubsecRound, Utc};
use serde_json::Value as JsonValue;

/// A single cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Decimal rendered with its scale, e.g. `"12.50"`; emitted as a JSON number
    Decimal(String),
    String(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    /// Timestamp without zone
    DateTime(NaiveDateTime),
    /// Timestamp with zone, normalized to UTC
    DateTimeTz(DateTime<Utc>),
    List(Vec<Value>),
    Struct(Vec<(String, Value)>),
    Map(Vec<(Value, Value)>),
}

impl Value {
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to the JSON representation used in emitted records
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(n) => JsonValue::from(*n),
            Self::UInt(n) => JsonValue::from(*n),
            // NaN and infinities have no JSON form
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Decimal(d) => d
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::String(s) => JsonValue::String(s.clone()),
            Self::Bytes(b) => {
                JsonValue::String(base64::engine::general_purpose::STANDARD.encode(b))
            }
            Self::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
            // temporal values are emitted at microsecond precision
            Self::Time(t) => {
                JsonValue::String(t.trunc_subsecs(6).format("%H:%M:%S%.f").to_string())
            }
            Self::DateTime(dt) => {
                JsonValue::String(dt.trunc_subsecs(6).format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            Self::DateTimeTz(dt) => JsonValue::String(dt.trunc_subsecs(6).to_rfc3339()),
            Self::List(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Self::Struct(fields) => JsonValue::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
            Self::Map(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(key, value)| {
                        let key = match key {
                            Self::String(s) => s.clone(),
                            other => other.to_json().to_string(),
                        };
                        (key, value.to_json())
                    })
                    .collect(),
            ),
        }
    }

    /// Read the value at `row` of an Arrow array.
    ///
    /// Types without a dedicated variant fall back to Arrow's display
    /// formatting and surface as [`Value::String`].
    pub fn from_array(array: &dyn Array, row: usize) -> Result<Self> {
        if array.is_null(row) {
            return Ok(Self::Null);
        }

        let value = match array.data_type() {
            DataType::Boolean => Self::Bool(array.as_boolean().value(row)),
            DataType::Int8 => Self::Int(i64::from(array.as_primitive::<Int8Type>().value(row))),
            DataType::Int16 => Self::Int(i64::from(array.as_primitive::<Int16Type>().value(row))),
            DataType::Int32 => Self::Int(i64::from(array.as_primitive::<Int32Type>().value(row))),
            DataType::Int64 => Self::Int(array.as_primitive::<Int64Type>().value(row)),
            DataType::UInt8 => Self::UInt(u64::from(array.as_primitive::<UInt8Type>().value(row))),
            DataType::UInt16 => {
                Self::UInt(u64::from(array.as_primitive::<UInt16Type>().value(row)))
            }
            DataType::UInt32 => {
                Self::UInt(u64::from(array.as_primitive::<UInt32Type>().value(row)))
            }
            DataType::UInt64 => Self::UInt(array.as_primitive::<UInt64Type>().value(row)),
            DataType::Float16 => {
                Self::Float(f64::from(array.as_primitive::<Float16Type>().value(row)))
            }
            DataType::Float32 => {
                Self::Float(f64::from(array.as_primitive::<Float32Type>().value(row)))
            }
            DataType::Float64 => Self::Float(array.as_primitive::<Float64Type>().value(row)),
            DataType::Decimal128(_, _) => {
                Self::Decimal(array.as_primitive::<Decimal128Type>().value_as_string(row))
            }
            DataType::Utf8 => Self::String(array.as_string::<i32>().value(row).to_string()),
            DataType::LargeUtf8 => Self::String(array.as_string::<i64>().value(row).to_string()),
            DataType::Utf8View => Self::String(array.as_string_view().value(row).to_string()),
            DataType::Binary => Self::Bytes(array.as_binary::<i32>().value(row).to_vec()),
            DataType::LargeBinary => Self::Bytes(array.as_binary::<i64>().value(row).to_vec()),
            DataType::FixedSizeBinary(_) => {
                Self::Bytes(array.as_fixed_size_binary().value(row).to_vec())
            }
            DataType::Date32 => optional(
                array.as_primitive::<Date32Type>().value_as_date(row),
                Self::Date,
            ),
            DataType::Date64 => optional(
                array.as_primitive::<Date64Type>().value_as_date(row),
                Self::Date,
            ),
            DataType::Time32(TimeUnit::Second) => optional(
                array.as_primitive::<Time32SecondType>().value_as_time(row),
                Self::Time,
            ),
            DataType::Time32(TimeUnit::Millisecond) => optional(
                array
                    .as_primitive::<Time32MillisecondType>()
                    .value_as_time(row),
                Self::Time,
            ),
            DataType::Time64(TimeUnit::Microsecond) => optional(
                array
                    .as_primitive::<Time64MicrosecondType>()
                    .value_as_time(row),
                Self::Time,
            ),
            DataType::Time64(TimeUnit::Nanosecond) => optional(
                array
                    .as_primitive::<Time64NanosecondType>()
                    .value_as_time(row),
                Self::Time,
            ),
            DataType::Timestamp(unit, tz) => {
                let naive = match unit {
                    TimeUnit::Second => array
                        .as_primitive::<TimestampSecondType>()
                        .value_as_datetime(row),
                    TimeUnit::Millisecond => array
                        .as_primitive::<TimestampMillisecondType>()
                        .value_as_datetime(row),
                    TimeUnit::Microsecond => array
                        .as_primitive::<TimestampMicrosecondType>()
                        .value_as_datetime(row),
                    TimeUnit::Nanosecond => array
                        .as_primitive::<TimestampNanosecondType>()
                        .value_as_datetime(row),
                };
                match (naive, tz) {
                    (Some(dt), Some(_)) => Self::DateTimeTz(dt.and_utc()),
                    (Some(dt), None) => Self::DateTime(dt),
                    (None, _) => Self::Null,
                }
            }
            DataType::List(_) => {
                let items = array.as_list::<i32>().value(row);
                Self::List(list_values(items.as_ref())?)
            }
            DataType::LargeList(_) => {
                let items = array.as_list::<i64>().value(row);
                Self::List(list_values(items.as_ref())?)
            }
            DataType::Struct(_) => {
                let s = array.as_struct();
                let fields = s
                    .fields()
                    .iter()
                    .zip(s.columns())
                    .map(|(field, column)| {
                        Ok((field.name().clone(), Self::from_array(column.as_ref(), row)?))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Self::Struct(fields)
            }
            DataType::Map(_, _) => {
                let entries = array.as_map().value(row);
                let keys = entries.column(0);
                let values = entries.column(1);
                let pairs = (0..entries.len())
                    .map(|i| {
                        Ok((
                            Self::from_array(keys.as_ref(), i)?,
                            Self::from_array(values.as_ref(), i)?,
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Self::Map(pairs)
            }
            _ => {
                let options = FormatOptions::default();
                let formatter = ArrayFormatter::try_new(array, &options)?;
                Self::String(formatter.value(row).to_string())
            }
        };
        Ok(value)
    }
}

fn optional<T>(value: Option<T>, wrap: impl FnOnce(T) -> Value) -> Value {
    value.map(wrap).unwrap_or(Value::Null)
}

fn list_values(items: &dyn Array) -> Result<Vec<Value>> {
    (0..items.len())
        .map(|i| Value::from_array(items, i))
        .collect()
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

/// A materialized row: column name and value pairs in column order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Get a value by column name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
