//! Tuple model: runtime values, schemas, and tuple metadata.

use granite_common::TXN_START_ID;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A runtime value inside a tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// NULL value.
    Null,
    /// 64-bit signed integer.
    Integer(i64),
    /// String value.
    Text(String),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "<NULL>"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
}

impl Column {
    /// Creates a column.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// An ordered list of columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Creates a schema from columns.
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Convenience constructor from column names.
    pub fn from_names(names: &[&str]) -> Self {
        Self::new(names.iter().map(|n| Column::new(*n)).collect())
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The column at `index`.
    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }
}

/// An opaque record of values addressed by a record id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    /// Creates a tuple from values.
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// A tuple of `n` NULL values.
    pub fn nulls(n: usize) -> Self {
        Self {
            values: vec![Value::Null; n],
        }
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the tuple has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The value at `index`.
    pub fn value(&self, index: usize) -> &Value {
        &self.values[index]
    }

    /// Replaces the value at `index`.
    pub fn set_value(&mut self, index: usize, value: Value) {
        self.values[index] = value;
    }

    /// All values in order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

/// Metadata stored beside a base tuple.
///
/// `ts` is either a commit timestamp or, while a write is in flight, the
/// writing transaction's temporary timestamp (`>= TXN_START_ID`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleMeta {
    /// Commit timestamp or transaction temporary timestamp.
    pub ts: u64,
    /// Logical deletion marker.
    pub is_deleted: bool,
}

impl TupleMeta {
    /// Metadata for a committed tuple.
    pub fn committed(ts: u64) -> Self {
        Self {
            ts,
            is_deleted: false,
        }
    }

    /// Returns true if `ts` is a transaction temporary timestamp rather
    /// than a commit timestamp.
    pub fn is_uncommitted(&self) -> bool {
        self.ts >= TXN_START_ID
    }
}

impl fmt::Display for TupleMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ts >= TXN_START_ID {
            write!(f, "txn{}", self.ts - TXN_START_ID)?;
        } else {
            write!(f, "{}", self.ts)?;
        }
        if self.is_deleted {
            write!(f, " <del>")?;
        }
        Ok(())
    }
}
