//! Typed query results and the pipeline that produces them.

pub mod command;
pub mod executor;
pub mod parser;

use serde::Serialize;

/// A numeric cell. Integers keep full `i64` precision.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Number {
    Integer(i64),
    Real(f64),
}

/// One cell of a result row.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
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

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(Number::Integer(n)) => Some(*n),
            _ => None,
        }
    }
}

/// Rows returned by one statement, in the order the remote engine produced
/// them. Each row holds exactly one value per column.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Callers must pass rows whose length equals `columns.len()`; the parser
    /// is the only producer and enforces it.
    pub(crate) fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Look up a cell by row index and column name (first match wins for
    /// duplicate names).
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Iterate rows as `(column, value)` pairs in column order.
    pub fn records(&self) -> impl Iterator<Item = Vec<(&str, &Value)>> + '_ {
        self.rows.iter().map(move |row| {
            self.columns
                .iter()
                .map(String::as_str)
                .zip(row.iter())
                .collect()
        })
    }

    /// JSON array of row objects keyed by column name. Key order follows the
    /// column order; for a repeated column name the last value wins.
    pub fn to_json(&self) -> serde_json::Value {
        let rows = self
            .records()
            .map(|record| {
                let mut object = serde_json::Map::with_capacity(record.len());
                for (column, value) in record {
                    let cell = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
                    object.insert(column.to_string(), cell);
                }
                serde_json::Value::Object(object)
            })
            .collect();
        serde_json::Value::Array(rows)
    }
}
