//! Tagged values and ordered records.
//!
//! Every field value that flows between entities, the query compiler and a
//! driver is a [`Value`]. Rows are [`Record`]s: insertion-ordered maps from
//! column name to value, so that plain-object conditions render in the order
//! their keys were added.

use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; floats with no fractional part and numeric text also qualify.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Int(i64::from(v))
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<uuid::Uuid> for Value {
    fn from(v: uuid::Uuid) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// An insertion-ordered set of named values: one row, or one partial entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: IndexMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Insert or replace a value. Replacing keeps the original key position.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn get_mut(&mut self, column: &str) -> Option<&mut Value> {
        self.fields.get_mut(column)
    }

    /// Remove a field, preserving the order of the remaining keys.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.fields.shift_remove(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.fields.contains_key(column)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Take a field for entity mapping, failing when it is absent.
    pub fn take(&mut self, column: &str) -> Result<Value, crate::OrmError> {
        self.fields
            .shift_remove(column)
            .ok_or_else(|| crate::OrmError::mapping(format!("missing column '{column}'")))
    }

    /// Take a field and convert it, for `Entity::from_record` implementations.
    /// Absent fields convert from `Value::Null`.
    pub fn take_as<T: FromValue>(&mut self, column: &str) -> Result<T, crate::OrmError> {
        let value = self.remove(column).unwrap_or(Value::Null);
        T::from_value(value).map_err(|e| crate::OrmError::mapping(format!("column '{column}': {e}")))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

/// Conversion from a stored value into a Rust field type.
///
/// Implemented for the types entities usually hold so that `Entity::from_record`
/// implementations stay one line per field.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, crate::OrmError>;
}

fn mismatch<T>(expected: &str, value: &Value) -> Result<T, crate::OrmError> {
    Err(crate::OrmError::mapping(format!(
        "expected {expected}, got {}",
        value.kind()
    )))
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, crate::OrmError> {
        Ok(value)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, crate::OrmError> {
        match value.as_i64() {
            Some(v) => Ok(v),
            None => mismatch("integer", &value),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: Value) -> Result<Self, crate::OrmError> {
        let v = i64::from_value(value)?;
        i32::try_from(v).map_err(|e| crate::OrmError::mapping(e.to_string()))
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, crate::OrmError> {
        match value.as_f64() {
            Some(v) => Ok(v),
            None => mismatch("float", &value),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, crate::OrmError> {
        match value.as_bool() {
            Some(v) => Ok(v),
            None => mismatch("bool", &value),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, crate::OrmError> {
        match value {
            Value::Text(s) => Ok(s),
            Value::Int(i) => Ok(i.to_string()),
            Value::Json(serde_json::Value::String(s)) => Ok(s),
            other => mismatch("text", &other),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self, crate::OrmError> {
        match value {
            Value::Json(v) => Ok(v),
            Value::Text(s) => Ok(serde_json::Value::String(s)),
            Value::Int(i) => Ok(serde_json::Value::from(i)),
            Value::Float(f) => Ok(serde_json::Value::from(f)),
            Value::Bool(b) => Ok(serde_json::Value::Bool(b)),
            other => mismatch("json", &other),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, crate::OrmError> {
        match value {
            Value::DateTime(v) => Ok(v),
            other => mismatch("datetime", &other),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self, crate::OrmError> {
        match value {
            Value::Date(v) => Ok(v),
            Value::DateTime(v) => Ok(v.date_naive()),
            other => mismatch("date", &other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, crate::OrmError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
