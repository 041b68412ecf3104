//! Result Value Types
//!
//! Scalar values flowing out of actions: each result is a stream of rows
//! over a fixed [`RowSchema`]. Values are Arrow-compatible so result
//! batches convert losslessly into `RecordBatch`es (see [`arrow_convert`]).

pub mod arrow_convert;

pub use arrow_convert::{rows_to_record_batch, ArrowConvertError};

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;

/// A single scalar result value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Int(i32),
    Long(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
}

/// The declared type of one result field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String,
    Int,
    Long,
    Float,
    Bool,
    Date,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Total order used by the sort stage: null sorts before every value,
    /// NaN before every other float.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::String(left), Value::String(right)) => left.cmp(right),
            (Value::Int(left), Value::Int(right)) => left.cmp(right),
            (Value::Long(left), Value::Long(right)) => left.cmp(right),
            (Value::Float(left), Value::Float(right)) => {
                left.partial_cmp(right).unwrap_or_else(|| {
                    match (left.is_nan(), right.is_nan()) {
                        (true, false) => Ordering::Less,
                        (false, true) => Ordering::Greater,
                        _ => Ordering::Equal,
                    }
                })
            }
            (Value::Bool(left), Value::Bool(right)) => left.cmp(right),
            (Value::Date(left), Value::Date(right)) => left.cmp(right),
            // mixed-type comparison only arises on schema bugs; order by tag
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::String(_) => 1,
            Value::Int(_) => 2,
            Value::Long(_) => 3,
            Value::Float(_) => 4,
            Value::Bool(_) => 5,
            Value::Date(_) => 6,
        }
    }

    /// Bit-stable hash key for grouping; floats group by their bits.
    pub fn group_key_bits(&self) -> (u8, u64) {
        match self {
            Value::Null => (0, 0),
            Value::String(text) => {
                use std::hash::{Hash, Hasher};
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                text.hash(&mut hasher);
                (1, hasher.finish())
            }
            Value::Int(value) => (2, *value as u64),
            Value::Long(value) => (3, *value as u64),
            Value::Float(value) => (4, value.to_bits()),
            Value::Bool(value) => (5, u64::from(*value)),
            Value::Date(date) => {
                use chrono::Datelike;
                (6, date.num_days_from_ce() as u64)
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::String(text) => serde_json::Value::String(text.clone()),
            Value::Int(value) => serde_json::Value::from(*value),
            Value::Long(value) => serde_json::Value::from(*value),
            Value::Float(value) => serde_json::Number::from_f64(*value)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::Bool(value) => serde_json::Value::Bool(*value),
            Value::Date(date) => {
                serde_json::Value::String(date.format("%Y-%m-%d").to_string())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(formatter, "null"),
            Value::String(text) => write!(formatter, "{text}"),
            Value::Int(value) => write!(formatter, "{value}"),
            Value::Long(value) => write!(formatter, "{value}"),
            Value::Float(value) => write!(formatter, "{value}"),
            Value::Bool(value) => write!(formatter, "{value}"),
            Value::Date(date) => write!(formatter, "{}", date.format("%Y-%m-%d")),
        }
    }
}

/// Grouping key over a row prefix: hashable/equatable even for floats.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey(Vec<(u8, u64)>);

impl GroupKey {
    pub fn new(values: &[Value]) -> Self {
        GroupKey(values.iter().map(Value::group_key_bits).collect())
    }
}

/// One named, typed field of a result schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub kind: ValueKind,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Field {
            name: name.into(),
            kind,
        }
    }
}

/// The ordered field list every row of a result conforms to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowSchema {
    pub fields: Vec<Field>,
}

impl RowSchema {
    pub fn new(fields: Vec<Field>) -> Self {
        RowSchema { fields }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|field| field.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One result row; values are positional against the [`RowSchema`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row { values }
    }

    pub fn to_json(&self, schema: &RowSchema) -> serde_json::Value {
        let mut object = serde_json::Map::with_capacity(self.values.len());
        for (field, value) in schema.fields.iter().zip(&self.values) {
            object.insert(field.name.clone(), value.to_json());
        }
        serde_json::Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_sorts_first() {
        assert_eq!(Value::Null.compare(&Value::Int(-5)), Ordering::Less);
        assert_eq!(Value::Int(-5).compare(&Value::Null), Ordering::Greater);
        assert_eq!(Value::Null.compare(&Value::Null), Ordering::Equal);
    }

    #[test]
    fn float_nan_groups_consistently() {
        let left = GroupKey::new(&[Value::Float(f64::NAN)]);
        let right = GroupKey::new(&[Value::Float(f64::NAN)]);
        assert_eq!(left, right);
        let other = GroupKey::new(&[Value::Float(1.0)]);
        assert_ne!(left, other);
    }

    #[test]
    fn dates_serialize_iso() {
        let date = NaiveDate::from_ymd_opt(2021, 3, 7).expect("valid date");
        assert_eq!(
            Value::Date(date).to_json(),
            serde_json::Value::String("2021-03-07".to_string())
        );
    }

    #[test]
    fn row_to_json_follows_schema_order() {
        let schema = RowSchema::new(vec![
            Field::new("country", ValueKind::String),
            Field::new("count", ValueKind::Long),
        ]);
        let row = Row::new(vec![Value::String("Switzerland".into()), Value::Long(4)]);
        let json = row.to_json(&schema);
        assert_eq!(json["country"], "Switzerland");
        assert_eq!(json["count"], 4);
    }
}
