//! Tabular Data Boundary
//!
//! Result sets handed to chart snippets and the injected capability that
//! produces them. Executing SQL is the capability's business; this module
//! only shapes and guards what crosses the boundary.

pub mod query;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{ChartError, ChartResult};

pub use query::{bound_query, ensure_read_only, normalize_query, QueryGuard};

/// A single cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Scalar {
    /// Convert a JSON cell; nested arrays/objects are not scalars.
    pub fn from_json(value: &Value) -> Option<Scalar> {
        match value {
            Value::Null => Some(Scalar::Null),
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Scalar::Int(i)),
                None => n.as_f64().map(Scalar::Float),
            },
            Value::String(s) => Some(Scalar::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<i32> for Scalar {
    fn from(i: i32) -> Self {
        Scalar::Int(i64::from(i))
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Scalar::Float(f)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<DateTime<Utc>> for Scalar {
    fn from(ts: DateTime<Utc>) -> Self {
        Scalar::Timestamp(ts)
    }
}

/// Ordered mapping from column name to cell
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    cells: Vec<(String, Scalar)>,
}

impl ResultRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert; a repeated column replaces the earlier cell.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Scalar>) {
        let column = column.into();
        let value = value.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some(cell) => cell.1 = value,
            None => self.cells.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.cells.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn cells(&self) -> &[(String, Scalar)] {
        &self.cells
    }

    /// Build a row from a JSON object, as most query layers hand them out.
    pub fn from_json(object: &serde_json::Map<String, Value>) -> ChartResult<Self> {
        let mut row = ResultRow::new();
        for (column, value) in object {
            let scalar = Scalar::from_json(value).ok_or_else(|| {
                ChartError::DataFetch(format!("column '{}' holds a non-scalar value", column))
            })?;
            row.insert(column.clone(), scalar);
        }
        Ok(row)
    }
}

impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, value) in &self.cells {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Rows sharing one column set, in the order the capability returned them
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<ResultRow>,
}

impl ResultSet {
    /// Validate that every row carries exactly the columns of the first one.
    pub fn new(rows: Vec<ResultRow>) -> ChartResult<Self> {
        let columns: Vec<String> = rows
            .first()
            .map(|r| r.columns().map(str::to_string).collect())
            .unwrap_or_default();

        for (idx, row) in rows.iter().enumerate() {
            let same_width = row.cells().len() == columns.len();
            let same_names = columns.iter().all(|c| row.get(c).is_some());
            if !same_width || !same_names {
                let found: Vec<&str> = row.columns().collect();
                return Err(ChartError::DataFetch(format!(
                    "row {} has columns {:?}, expected {:?}",
                    idx, found, columns
                )));
            }
        }

        Ok(Self { columns, rows })
    }

    /// Build from JSON records (`[{"col": value, ...}, ...]`).
    pub fn from_json_records(records: &[Value]) -> ChartResult<Self> {
        let rows = records
            .iter()
            .enumerate()
            .map(|(idx, record)| match record {
                Value::Object(obj) => ResultRow::from_json(obj),
                _ => Err(ChartError::DataFetch(format!("row {} is not an object", idx))),
            })
            .collect::<ChartResult<Vec<_>>>()?;
        Self::new(rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drop rows past `limit`; returns how many were removed.
    pub fn truncate(&mut self, limit: usize) -> usize {
        let removed = self.rows.len().saturating_sub(limit);
        self.rows.truncate(limit);
        removed
    }
}

/// Injected capability that runs a (normalized, bounded) read-only query
#[async_trait]
pub trait DataFetcher: Send + Sync {
    async fn fetch(&self, query: &str) -> anyhow::Result<ResultSet>;
}

/// Serves one fixed result set for any query and remembers what it was asked.
///
/// Backs static/demo charts and tests.
pub struct InMemoryFetcher {
    result: ResultSet,
    queries: Mutex<Vec<String>>,
}

impl InMemoryFetcher {
    pub fn new(result: ResultSet) -> Self {
        Self {
            result,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Queries received so far, oldest first
    pub async fn queries(&self) -> Vec<String> {
        self.queries.lock().await.clone()
    }
}

#[async_trait]
impl DataFetcher for InMemoryFetcher {
    async fn fetch(&self, query: &str) -> anyhow::Result<ResultSet> {
        self.queries.lock().await.push(query.to_string());
        Ok(self.result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_set_rejects_mismatched_columns() {
        let rows = vec![
            ResultRow::new().with("team", "MI").with("wins", 10),
            ResultRow::new().with("team", "CSK"),
        ];
        let err = ResultSet::new(rows).unwrap_err();
        assert!(matches!(err, ChartError::DataFetch(_)));
    }

    #[test]
    fn test_from_json_records_keeps_column_order() {
        let set = ResultSet::from_json_records(&[
            json!({"season": 2020, "team": "MI", "wins": 11}),
            json!({"season": 2020, "team": "DC", "wins": 8}),
        ])
        .unwrap();
        assert_eq!(set.columns(), ["season", "team", "wins"]);
        assert_eq!(set.rows()[1].get("team"), Some(&Scalar::Text("DC".into())));
    }

    #[test]
    fn test_nested_values_are_not_scalars() {
        let err = ResultSet::from_json_records(&[json!({"tags": [1, 2]})]).unwrap_err();
        assert!(err.to_string().contains("non-scalar"));
    }

    #[test]
    fn test_row_serializes_as_ordered_map() {
        let row = ResultRow::new().with("b", 1).with("a", Scalar::Null);
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"b":1,"a":null}"#);
    }

    #[tokio::test]
    async fn test_in_memory_fetcher_records_queries() {
        let fetcher = InMemoryFetcher::new(ResultSet::default());
        fetcher.fetch("SELECT 1").await.unwrap();
        assert_eq!(fetcher.queries().await, vec!["SELECT 1".to_string()]);
    }
}
