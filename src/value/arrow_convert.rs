//! Arrow Conversion
//!
//! Converts result rows into Arrow `RecordBatch`es for the IPC stream
//! response format.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Date32Array, Float64Array, Int32Array, Int64Array, StringArray,
};
use arrow::datatypes::{DataType as ArrowDataType, Field as ArrowField, Schema as ArrowSchema};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;

use super::{Row, RowSchema, Value, ValueKind};

/// Error type for Arrow conversion operations
#[derive(Debug, thiserror::Error)]
pub enum ArrowConvertError {
    /// A row value does not match its declared field kind
    #[error("field '{field}' expected {expected:?}")]
    KindMismatch { field: String, expected: ValueKind },
    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

fn arrow_type(kind: ValueKind) -> ArrowDataType {
    match kind {
        ValueKind::String => ArrowDataType::Utf8,
        ValueKind::Int => ArrowDataType::Int32,
        ValueKind::Long => ArrowDataType::Int64,
        ValueKind::Float => ArrowDataType::Float64,
        ValueKind::Bool => ArrowDataType::Boolean,
        ValueKind::Date => ArrowDataType::Date32,
    }
}

/// The Arrow schema corresponding to a result schema. All fields are
/// nullable; actions emit null freely.
pub fn arrow_schema(schema: &RowSchema) -> ArrowSchema {
    let fields: Vec<ArrowField> = schema
        .fields
        .iter()
        .map(|field| ArrowField::new(field.name.as_str(), arrow_type(field.kind), true))
        .collect();
    ArrowSchema::new(fields)
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch is a valid date");
    (date - epoch).num_days() as i32
}

/// Convert a slice of rows to an Arrow `RecordBatch` in schema field order.
pub fn rows_to_record_batch(
    schema: &RowSchema,
    rows: &[Row],
) -> Result<RecordBatch, ArrowConvertError> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields.len());
    for (column_index, field) in schema.fields.iter().enumerate() {
        let column = build_column(field.kind, column_index, rows).map_err(|()| {
            ArrowConvertError::KindMismatch {
                field: field.name.clone(),
                expected: field.kind,
            }
        })?;
        columns.push(column);
    }
    let batch = RecordBatch::try_new(Arc::new(arrow_schema(schema)), columns)?;
    Ok(batch)
}

fn build_column(kind: ValueKind, column_index: usize, rows: &[Row]) -> Result<ArrayRef, ()> {
    match kind {
        ValueKind::String => {
            let values: Result<Vec<Option<&str>>, ()> = rows
                .iter()
                .map(|row| match &row.values[column_index] {
                    Value::String(text) => Ok(Some(text.as_str())),
                    Value::Null => Ok(None),
                    _ => Err(()),
                })
                .collect();
            Ok(Arc::new(StringArray::from(values?)))
        }
        ValueKind::Int => {
            let values: Result<Vec<Option<i32>>, ()> = rows
                .iter()
                .map(|row| match row.values[column_index] {
                    Value::Int(value) => Ok(Some(value)),
                    Value::Null => Ok(None),
                    _ => Err(()),
                })
                .collect();
            Ok(Arc::new(Int32Array::from(values?)))
        }
        ValueKind::Long => {
            let values: Result<Vec<Option<i64>>, ()> = rows
                .iter()
                .map(|row| match row.values[column_index] {
                    Value::Long(value) => Ok(Some(value)),
                    Value::Null => Ok(None),
                    _ => Err(()),
                })
                .collect();
            Ok(Arc::new(Int64Array::from(values?)))
        }
        ValueKind::Float => {
            let values: Result<Vec<Option<f64>>, ()> = rows
                .iter()
                .map(|row| match row.values[column_index] {
                    Value::Float(value) => Ok(Some(value)),
                    Value::Null => Ok(None),
                    _ => Err(()),
                })
                .collect();
            Ok(Arc::new(Float64Array::from(values?)))
        }
        ValueKind::Bool => {
            let values: Result<Vec<Option<bool>>, ()> = rows
                .iter()
                .map(|row| match row.values[column_index] {
                    Value::Bool(value) => Ok(Some(value)),
                    Value::Null => Ok(None),
                    _ => Err(()),
                })
                .collect();
            Ok(Arc::new(BooleanArray::from(values?)))
        }
        ValueKind::Date => {
            let values: Result<Vec<Option<i32>>, ()> = rows
                .iter()
                .map(|row| match row.values[column_index] {
                    Value::Date(date) => Ok(Some(days_since_epoch(date))),
                    Value::Null => Ok(None),
                    _ => Err(()),
                })
                .collect();
            Ok(Arc::new(Date32Array::from(values?)))
        }
    }
}
