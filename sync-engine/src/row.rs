use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single column value as the engine sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Canonical string form fed to the row hasher. `None` for nulls.
    pub fn render(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Integer(i) => Some(i.to_string()),
            Value::Real(r) => Some(r.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Blob(b) => Some(hex::encode(b)),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
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

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One physical data-table row: column name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    columns: HashMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self { columns: HashMap::new() }
    }

    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.columns.insert(column.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.columns.insert(column.into(), value.into())
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn get_text(&self, column: &str) -> Option<&str> {
        match self.columns.get(column) {
            Some(Value::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// True when at least one column carries a non-null value.
    pub fn has_data(&self) -> bool {
        self.columns.values().any(|v| !v.is_null())
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self { columns: iter.into_iter().collect() }
    }
}

/// One component of a primary key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyPart {
    Int(i64),
    Text(String),
}

impl KeyPart {
    pub fn to_value(&self) -> Value {
        match self {
            KeyPart::Int(i) => Value::Integer(*i),
            KeyPart::Text(s) => Value::Text(s.clone()),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Integer(i) => Ok(KeyPart::Int(*i)),
            Value::Text(s) => Ok(KeyPart::Text(s.clone())),
            other => Err(Error::InvalidState(format!(
                "unsupported primary key value: {:?}",
                other
            ))),
        }
    }
}

const KEY_SEPARATOR: char = '\u{1f}';

/// Primary key of a logical row. Single-column keys hold one part; composite
/// keys hold one part per key column, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrimaryKey(Vec<KeyPart>);

impl PrimaryKey {
    pub fn int(v: i64) -> Self {
        Self(vec![KeyPart::Int(v)])
    }

    pub fn text(v: impl Into<String>) -> Self {
        Self(vec![KeyPart::Text(v.into())])
    }

    pub fn composite(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    /// Reads the key columns out of a row.
    pub fn from_row(row: &Row, key_columns: &[String]) -> Result<Self> {
        let parts = key_columns
            .iter()
            .map(|col| {
                let value = row.get(col).ok_or_else(|| {
                    Error::InvalidState(format!("row is missing key column {}", col))
                })?;
                KeyPart::from_value(value)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(parts))
    }

    /// Text form stored in metadata tables. SQL triggers build the same string
    /// with `'i:' || col` / `'s:' || col` joined by `char(31)`.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (idx, part) in self.0.iter().enumerate() {
            if idx > 0 {
                out.push(KEY_SEPARATOR);
            }
            match part {
                KeyPart::Int(i) => {
                    out.push_str("i:");
                    out.push_str(&i.to_string());
                }
                KeyPart::Text(s) => {
                    out.push_str("s:");
                    out.push_str(s);
                }
            }
        }
        out
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        let parts = encoded
            .split(KEY_SEPARATOR)
            .map(|part| {
                if let Some(rest) = part.strip_prefix("i:") {
                    rest.parse::<i64>().map(KeyPart::Int).map_err(|e| {
                        Error::InvalidState(format!("bad integer key part {:?}: {}", rest, e))
                    })
                } else if let Some(rest) = part.strip_prefix("s:") {
                    Ok(KeyPart::Text(rest.to_string()))
                } else {
                    Err(Error::InvalidState(format!("bad key part {:?}", part)))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self(parts))
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, part) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            match part {
                KeyPart::Int(i) => write!(f, "{}", i)?,
                KeyPart::Text(s) => f.write_str(s)?,
            }
        }
        Ok(())
    }
}
