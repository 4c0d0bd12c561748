//! Column-oriented tables for snippets
//!
//! A deliberately small slice of the dataframe API: enough to select,
//! filter, sort, group and hand columns to the chart builders. Frames carry
//! no row index; grouped aggregates keep their keys as a label index on the
//! resulting column so `reset_index()` can turn them back into columns.

use std::cmp::Ordering;
use std::rc::Rc;

use super::ast::{BinOp, CmpOp, UnaryOp};
use super::error::{ErrorKind, SandboxError, SandboxResult};
use super::value::{binary, type_error, Dict, Value};
use crate::data::ResultSet;

#[derive(Debug, Clone, Default)]
pub struct Frame {
    columns: Vec<String>,
    /// Column-major cells, one vector per column
    data: Vec<Vec<Value>>,
}

/// Row labels of a grouped result
#[derive(Debug, Clone)]
pub struct Index {
    pub names: Vec<String>,
    /// One label per row; a tuple when grouped by several keys
    pub labels: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct Series {
    pub name: Option<String>,
    pub values: Vec<Value>,
    pub index: Option<Index>,
}

#[derive(Debug, Clone)]
pub enum Selection {
    Column(String),
    Columns(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct GroupBy {
    pub frame: Rc<Frame>,
    pub keys: Vec<String>,
    pub selection: Option<Selection>,
    /// `as_index=False` turns keyed series results into frames
    pub as_index: bool,
    pub sort: bool,
}

fn key_error(key: &str) -> SandboxError {
    SandboxError::new(ErrorKind::Key, format!("'{}'", key))
}

/// Ascending order with missing values last; incomparable values keep order.
fn order(a: &Value, b: &Value) -> Ordering {
    match (a.is_missing(), b.is_missing()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => a.py_cmp(b).unwrap_or(Ordering::Equal),
    }
}

impl Frame {
    pub fn new(columns: Vec<String>, data: Vec<Vec<Value>>) -> SandboxResult<Self> {
        if columns.len() != data.len() {
            return Err(SandboxError::value_error(format!(
                "{} columns passed, passed data had {} columns",
                columns.len(),
                data.len()
            )));
        }
        if let Some(first) = data.first() {
            if data.iter().any(|col| col.len() != first.len()) {
                return Err(SandboxError::value_error(
                    "All arrays must be of the same length",
                ));
            }
        }
        Ok(Self { columns, data })
    }

    pub fn from_result_set(set: &ResultSet) -> Self {
        let columns = set.columns().to_vec();
        let data = columns
            .iter()
            .map(|col| {
                set.rows()
                    .iter()
                    .map(|row| row.get(col).map(Value::from_scalar).unwrap_or(Value::None))
                    .collect()
            })
            .collect();
        Self { columns, data }
    }

    /// Rows given as mappings; columns appear in first-seen order.
    pub fn from_records(records: &[Value]) -> SandboxResult<Self> {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            let Value::Dict(dict) = record else {
                return Err(type_error(format!(
                    "records must be dicts, not {}",
                    record.type_name()
                )));
            };
            for key in dict.keys() {
                let name = key.to_str();
                if !columns.contains(&name) {
                    columns.push(name);
                }
            }
        }
        let data = columns
            .iter()
            .map(|col| {
                records
                    .iter()
                    .map(|r| match r {
                        Value::Dict(d) => d.get_str(col).cloned().unwrap_or(Value::None),
                        _ => Value::None,
                    })
                    .collect()
            })
            .collect();
        Ok(Self { columns, data })
    }

    /// `{"col": [..], ...}`; scalars broadcast to the longest column.
    pub fn from_dict(dict: &Dict) -> SandboxResult<Self> {
        let mut columns = Vec::new();
        let mut data: Vec<Option<Vec<Value>>> = Vec::new();
        for (key, value) in dict.iter() {
            columns.push(key.to_str());
            data.push(match value {
                Value::List(_) | Value::Tuple(_) | Value::Series(_) => Some(value.iterate()?),
                _ => None,
            });
        }
        let rows = data.iter().flatten().map(Vec::len).max().unwrap_or(1);
        let data = data
            .into_iter()
            .zip(dict.values())
            .map(|(col, scalar)| col.unwrap_or_else(|| vec![scalar.clone(); rows]))
            .collect();
        Self::new(columns, data)
    }

    /// Rows given as sequences, with explicit or positional column names.
    pub fn from_rows(rows: &[Value], columns: Option<Vec<String>>) -> SandboxResult<Self> {
        let rows: Vec<Vec<Value>> = rows.iter().map(Value::iterate).collect::<SandboxResult<_>>()?;
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let columns = columns.unwrap_or_else(|| (0..width).map(|i| i.to_string()).collect());
        let mut data = vec![Vec::with_capacity(rows.len()); columns.len()];
        for row in rows {
            if row.len() != columns.len() {
                return Err(SandboxError::value_error(format!(
                    "{} columns passed, passed data had {} columns",
                    columns.len(),
                    row.len()
                )));
            }
            for (col, cell) in data.iter_mut().zip(row) {
                col.push(cell);
            }
        }
        Ok(Self { columns, data })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.data.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn column(&self, name: &str) -> SandboxResult<Series> {
        let idx = self.position(name).ok_or_else(|| key_error(name))?;
        Ok(Series::new(Some(name.to_string()), self.data[idx].clone()))
    }

    pub fn column_values(&self, name: &str) -> SandboxResult<&[Value]> {
        let idx = self.position(name).ok_or_else(|| key_error(name))?;
        Ok(&self.data[idx])
    }

    pub fn select(&self, names: &[String]) -> SandboxResult<Frame> {
        let mut data = Vec::with_capacity(names.len());
        for name in names {
            data.push(self.column_values(name)?.to_vec());
        }
        Ok(Frame {
            columns: names.to_vec(),
            data,
        })
    }

    pub fn take(&self, rows: &[usize]) -> Frame {
        Frame {
            columns: self.columns.clone(),
            data: self
                .data
                .iter()
                .map(|col| rows.iter().filter_map(|&r| col.get(r).cloned()).collect())
                .collect(),
        }
    }

    pub fn filter(&self, mask: &Series) -> SandboxResult<Frame> {
        if mask.values.len() != self.len() {
            return Err(SandboxError::value_error(format!(
                "Item wrong length {} instead of {}.",
                mask.values.len(),
                self.len()
            )));
        }
        let mut rows = Vec::new();
        for (i, flag) in mask.values.iter().enumerate() {
            match flag {
                Value::Bool(true) => rows.push(i),
                Value::Bool(false) | Value::None => {}
                other => {
                    return Err(type_error(format!(
                        "boolean mask expected, found {}",
                        other.type_name()
                    )))
                }
            }
        }
        Ok(self.take(&rows))
    }

    pub fn head(&self, n: usize) -> Frame {
        let rows: Vec<usize> = (0..self.len().min(n)).collect();
        self.take(&rows)
    }

    pub fn tail(&self, n: usize) -> Frame {
        let len = self.len();
        let rows: Vec<usize> = (len.saturating_sub(n)..len).collect();
        self.take(&rows)
    }

    /// Stable multi-key sort; `ascending` is per key (last entry repeats).
    pub fn sort_values(&self, by: &[String], ascending: &[bool]) -> SandboxResult<Frame> {
        let keys: Vec<&[Value]> = by
            .iter()
            .map(|c| self.column_values(c))
            .collect::<SandboxResult<_>>()?;
        let mut rows: Vec<usize> = (0..self.len()).collect();
        rows.sort_by(|&a, &b| {
            for (k, col) in keys.iter().enumerate() {
                let asc = ascending.get(k).or(ascending.last()).copied().unwrap_or(true);
                let mut ord = order(&col[a], &col[b]);
                if !asc && !col[a].is_missing() && !col[b].is_missing() {
                    ord = ord.reverse();
                }
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(self.take(&rows))
    }

    /// `to_dict("records")`
    pub fn records(&self) -> Vec<Value> {
        (0..self.len())
            .map(|r| {
                Value::Dict(
                    self.columns
                        .iter()
                        .zip(&self.data)
                        .map(|(name, col)| (Value::from(name.as_str()), col[r].clone()))
                        .collect(),
                )
            })
            .collect()
    }

    /// `to_dict("list")`
    pub fn column_lists(&self) -> Value {
        Value::Dict(
            self.columns
                .iter()
                .zip(&self.data)
                .map(|(name, col)| (Value::from(name.as_str()), Value::List(col.clone())))
                .collect(),
        )
    }

    /// Row-major cells, as `to_numpy()` / `values` expose them
    pub fn rows(&self) -> Vec<Value> {
        (0..self.len())
            .map(|r| Value::List(self.data.iter().map(|col| col[r].clone()).collect()))
            .collect()
    }

    /// `(index, row)` pairs where each row is labelled by column name
    pub fn iterrows(&self) -> Vec<Value> {
        (0..self.len())
            .map(|r| {
                let row = Series {
                    name: Some(r.to_string()),
                    values: self.data.iter().map(|col| col[r].clone()).collect(),
                    index: Some(Index {
                        names: Vec::new(),
                        labels: self.columns.iter().map(|c| Value::from(c.as_str())).collect(),
                    }),
                };
                Value::Tuple(vec![Value::from(r), Value::Series(Rc::new(row))])
            })
            .collect()
    }

    /// Insert or replace a column; scalars broadcast.
    pub fn set_column(&mut self, name: &str, value: &Value) -> SandboxResult<()> {
        let len = self.len();
        let values = match value {
            Value::Series(_) | Value::List(_) | Value::Tuple(_) => {
                let values = value.iterate()?;
                if !self.columns.is_empty() && values.len() != len {
                    return Err(SandboxError::value_error(format!(
                        "Length of values ({}) does not match length of index ({})",
                        values.len(),
                        len
                    )));
                }
                values
            }
            Value::Frame(_) | Value::Dict(_) => {
                return Err(type_error(format!(
                    "cannot assign a {} to a column",
                    value.type_name()
                )))
            }
            scalar => vec![scalar.clone(); len],
        };
        match self.position(name) {
            Some(idx) => self.data[idx] = values,
            None => {
                self.columns.push(name.to_string());
                self.data.push(values);
            }
        }
        Ok(())
    }

    pub fn fillna(&self, fill: &Value) -> Frame {
        Frame {
            columns: self.columns.clone(),
            data: self
                .data
                .iter()
                .map(|col| {
                    col.iter()
                        .map(|v| if v.is_missing() { fill.clone() } else { v.clone() })
                        .collect()
                })
                .collect(),
        }
    }

    pub fn dropna(&self, subset: Option<&[String]>) -> SandboxResult<Frame> {
        let checked: Vec<&[Value]> = match subset {
            Some(names) => names
                .iter()
                .map(|n| self.column_values(n))
                .collect::<SandboxResult<_>>()?,
            None => self.data.iter().map(Vec::as_slice).collect(),
        };
        let rows: Vec<usize> = (0..self.len())
            .filter(|&r| checked.iter().all(|col| !col[r].is_missing()))
            .collect();
        Ok(self.take(&rows))
    }

    pub fn rename(&self, mapping: &Dict) -> Frame {
        let mut frame = self.clone();
        for col in &mut frame.columns {
            if let Some(new) = mapping.get_str(col) {
                *col = new.to_str();
            }
        }
        frame
    }

    pub fn drop_columns(&self, names: &[String]) -> SandboxResult<Frame> {
        for name in names {
            if !self.has_column(name) {
                return Err(SandboxError::new(
                    ErrorKind::Key,
                    format!("\"['{}'] not found in axis\"", name),
                ));
            }
        }
        let keep: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !names.contains(c))
            .cloned()
            .collect();
        self.select(&keep)
    }

    pub fn describe(&self) -> String {
        let mut out = self.columns.join("  ");
        for r in 0..self.len().min(10) {
            out.push('\n');
            let cells: Vec<String> = self.data.iter().map(|col| col[r].to_str()).collect();
            out.push_str(&format!("{}  {}", r, cells.join("  ")));
        }
        if self.len() > 10 {
            out.push_str(&format!("\n[{} rows x {} columns]", self.len(), self.columns.len()));
        }
        out
    }
}

impl Series {
    pub fn new(name: Option<String>, values: Vec<Value>) -> Self {
        Self {
            name,
            values,
            index: None,
        }
    }

    fn derive(&self, values: Vec<Value>) -> Series {
        Series {
            name: self.name.clone(),
            values,
            index: self.index.clone(),
        }
    }

    /// Row labels: the group index if present, else positions
    pub fn labels(&self) -> Vec<Value> {
        match &self.index {
            Some(index) => index.labels.clone(),
            None => (0..self.values.len()).map(Value::from).collect(),
        }
    }

    /// Label lookup (`s["MI"]`, `row["wins"]`), positional for unlabelled series
    pub fn get(&self, key: &Value) -> SandboxResult<Value> {
        let position = match &self.index {
            Some(index) => index.labels.iter().position(|l| l.py_eq(key)),
            None => key.as_i64().and_then(|i| usize::try_from(i).ok()),
        };
        position
            .and_then(|p| self.values.get(p).cloned())
            .ok_or_else(|| SandboxError::new(ErrorKind::Key, key.repr()))
    }

    pub fn positional(&self, index: i64) -> SandboxResult<Value> {
        let len = self.values.len() as i64;
        let at = if index < 0 { index + len } else { index };
        usize::try_from(at)
            .ok()
            .and_then(|i| self.values.get(i).cloned())
            .ok_or_else(|| {
                SandboxError::new(ErrorKind::Index, "single positional indexer is out-of-bounds")
            })
    }

    pub fn take(&self, rows: &[usize]) -> Series {
        Series {
            name: self.name.clone(),
            values: rows.iter().filter_map(|&r| self.values.get(r).cloned()).collect(),
            index: self.index.as_ref().map(|idx| Index {
                names: idx.names.clone(),
                labels: rows.iter().filter_map(|&r| idx.labels.get(r).cloned()).collect(),
            }),
        }
    }

    pub fn filter(&self, mask: &Series) -> SandboxResult<Series> {
        if mask.values.len() != self.values.len() {
            return Err(SandboxError::value_error("boolean mask length mismatch"));
        }
        let rows: Vec<usize> = mask
            .values
            .iter()
            .enumerate()
            .filter(|(_, v)| matches!(v, Value::Bool(true)))
            .map(|(i, _)| i)
            .collect();
        Ok(self.take(&rows))
    }

    pub fn head(&self, n: usize) -> Series {
        let rows: Vec<usize> = (0..self.values.len().min(n)).collect();
        self.take(&rows)
    }

    pub fn tail(&self, n: usize) -> Series {
        let len = self.values.len();
        let rows: Vec<usize> = (len.saturating_sub(n)..len).collect();
        self.take(&rows)
    }

    pub fn sort_values(&self, ascending: bool) -> Series {
        let mut rows: Vec<usize> = (0..self.values.len()).collect();
        rows.sort_by(|&a, &b| {
            let (x, y) = (&self.values[a], &self.values[b]);
            let ord = order(x, y);
            if !ascending && !x.is_missing() && !y.is_missing() {
                ord.reverse()
            } else {
                ord
            }
        });
        self.take(&rows)
    }

    /// Distinct values in first-seen order
    pub fn unique(&self) -> Vec<Value> {
        let mut seen: Vec<Value> = Vec::new();
        for v in &self.values {
            if !seen.iter().any(|s| s.py_eq(v)) {
                seen.push(v.clone());
            }
        }
        seen
    }

    /// Counts per distinct value, most frequent first
    pub fn value_counts(&self) -> Series {
        let uniques = self.unique();
        let mut counted: Vec<(Value, i64)> = uniques
            .into_iter()
            .filter(|v| !v.is_missing())
            .map(|u| {
                let n = self.values.iter().filter(|v| v.py_eq(&u)).count() as i64;
                (u, n)
            })
            .collect();
        counted.sort_by(|a, b| b.1.cmp(&a.1));
        Series {
            name: Some("count".to_string()),
            values: counted.iter().map(|(_, n)| Value::Int(*n)).collect(),
            index: Some(Index {
                names: vec![self.name.clone().unwrap_or_else(|| "index".to_string())],
                labels: counted.into_iter().map(|(v, _)| v).collect(),
            }),
        }
    }

    pub fn map_values<F>(&self, mut f: F) -> SandboxResult<Series>
    where
        F: FnMut(&Value) -> SandboxResult<Value>,
    {
        let values = self.values.iter().map(&mut f).collect::<SandboxResult<_>>()?;
        Ok(self.derive(values))
    }

    pub fn fillna(&self, fill: &Value) -> Series {
        self.derive(
            self.values
                .iter()
                .map(|v| if v.is_missing() { fill.clone() } else { v.clone() })
                .collect(),
        )
    }

    pub fn isna(&self) -> Series {
        self.derive(self.values.iter().map(|v| Value::Bool(v.is_missing())).collect())
    }

    pub fn isin(&self, candidates: &[Value]) -> Series {
        self.derive(
            self.values
                .iter()
                .map(|v| Value::Bool(candidates.iter().any(|c| c.py_eq(v))))
                .collect(),
        )
    }

    /// `astype(str|int|float|bool)`
    pub fn astype(&self, target: &str) -> SandboxResult<Series> {
        self.map_values(|v| convert(v, target))
    }

    /// Turn a grouped column back into a frame of key columns plus values.
    pub fn reset_index(&self, name: Option<String>) -> SandboxResult<Frame> {
        let value_name = name
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| "0".to_string());
        let (names, labels) = match &self.index {
            Some(index) => (index.names.clone(), index.labels.clone()),
            None => (vec!["index".to_string()], self.labels()),
        };
        let mut columns = names.clone();
        let mut data: Vec<Vec<Value>> = vec![Vec::with_capacity(labels.len()); names.len()];
        for label in &labels {
            match label {
                Value::Tuple(parts) if names.len() > 1 => {
                    for (col, part) in data.iter_mut().zip(parts) {
                        col.push(part.clone());
                    }
                }
                other => data[0].push(other.clone()),
            }
        }
        columns.push(value_name);
        data.push(self.values.clone());
        Frame::new(columns, data)
    }

    pub fn describe(&self) -> String {
        let labels = self.labels();
        let mut lines: Vec<String> = labels
            .iter()
            .zip(&self.values)
            .take(10)
            .map(|(l, v)| format!("{}    {}", l.to_str(), v.to_str()))
            .collect();
        if self.values.len() > 10 {
            lines.push("...".into());
        }
        lines.push(format!(
            "Name: {}, Length: {}",
            self.name.clone().unwrap_or_else(|| "None".into()),
            self.values.len()
        ));
        lines.join("\n")
    }
}

/// Convert a cell for `astype` / `int()` style casts.
pub fn convert(value: &Value, target: &str) -> SandboxResult<Value> {
    match target {
        "str" | "string" | "object" => Ok(Value::Str(value.to_str())),
        "int" | "int64" | "int32" => match value {
            Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
            Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                SandboxError::value_error(format!(
                    "invalid literal for int() with base 10: '{}'",
                    s
                ))
            }),
            v => v
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| type_error(format!("cannot convert {} to int", v.type_name()))),
        },
        "float" | "float64" | "float32" => match value {
            Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                SandboxError::value_error(format!("could not convert string to float: '{}'", s))
            }),
            Value::None => Ok(Value::Float(f64::NAN)),
            v => v
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| type_error(format!("cannot convert {} to float", v.type_name()))),
        },
        "bool" => Ok(Value::Bool(value.truthy()?)),
        other => Err(type_error(format!("data type '{}' not understood", other))),
    }
}

/// Aggregate a column the way the named reducer does; missing cells are skipped.
pub fn aggregate(values: &[Value], func: &str) -> SandboxResult<Value> {
    let present: Vec<&Value> = values.iter().filter(|v| !v.is_missing()).collect();
    match func {
        "count" => Ok(Value::from(present.len())),
        "size" => Ok(Value::from(values.len())),
        "nunique" => {
            let mut seen: Vec<&Value> = Vec::new();
            for v in &present {
                if !seen.iter().any(|s| s.py_eq(v)) {
                    seen.push(v);
                }
            }
            Ok(Value::from(seen.len()))
        }
        "first" => Ok(present.first().map(|v| (*v).clone()).unwrap_or(Value::None)),
        "last" => Ok(present.last().map(|v| (*v).clone()).unwrap_or(Value::None)),
        "sum" => {
            let mut total = Value::Int(0);
            for v in &present {
                if matches!(v, Value::Str(_)) && matches!(total, Value::Int(0)) {
                    total = Value::Str(String::new());
                }
                total = binary(BinOp::Add, &total, v)?;
            }
            Ok(total)
        }
        "mean" | "median" => {
            let mut nums = present
                .iter()
                .map(|v| {
                    v.as_f64().ok_or_else(|| {
                        type_error(format!("Could not convert {} to numeric", v.repr()))
                    })
                })
                .collect::<SandboxResult<Vec<f64>>>()?;
            if nums.is_empty() {
                return Ok(Value::Float(f64::NAN));
            }
            if func == "mean" {
                return Ok(Value::Float(nums.iter().sum::<f64>() / nums.len() as f64));
            }
            nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
            let mid = nums.len() / 2;
            Ok(Value::Float(if nums.len() % 2 == 0 {
                (nums[mid - 1] + nums[mid]) / 2.0
            } else {
                nums[mid]
            }))
        }
        "min" | "max" => {
            let mut best: Option<&Value> = None;
            for v in present {
                best = match best {
                    None => Some(v),
                    Some(b) => {
                        let ord = v.py_cmp(b)?;
                        let better = if func == "min" {
                            ord == Ordering::Less
                        } else {
                            ord == Ordering::Greater
                        };
                        Some(if better { v } else { b })
                    }
                };
            }
            Ok(best.cloned().unwrap_or(Value::Float(f64::NAN)))
        }
        other => Err(SandboxError::new(
            ErrorKind::Attribute,
            format!("'{}' is not a valid function for aggregation", other),
        )),
    }
}

impl GroupBy {
    pub fn new(frame: Rc<Frame>, keys: Vec<String>) -> Self {
        Self {
            frame,
            keys,
            selection: None,
            as_index: true,
            sort: true,
        }
    }

    /// Row positions per group key; sorted ascending unless `sort=False`
    fn groups(&self) -> SandboxResult<Vec<(Value, Vec<usize>)>> {
        let key_cols: Vec<&[Value]> = self
            .keys
            .iter()
            .map(|k| self.frame.column_values(k))
            .collect::<SandboxResult<_>>()?;
        let mut groups: Vec<(Value, Vec<usize>)> = Vec::new();
        for row in 0..self.frame.len() {
            let key = if key_cols.len() == 1 {
                key_cols[0][row].clone()
            } else {
                Value::Tuple(key_cols.iter().map(|c| c[row].clone()).collect())
            };
            if key_cols.iter().any(|c| c[row].is_missing()) {
                continue;
            }
            match groups.iter_mut().find(|(k, _)| k.py_eq(&key)) {
                Some((_, rows)) => rows.push(row),
                None => groups.push((key, vec![row])),
            }
        }
        if self.sort {
            groups.sort_by(|a, b| order(&a.0, &b.0));
        }
        Ok(groups)
    }

    fn value_columns(&self) -> Vec<String> {
        match &self.selection {
            Some(Selection::Column(c)) => vec![c.clone()],
            Some(Selection::Columns(cs)) => cs.clone(),
            None => self
                .frame
                .columns()
                .iter()
                .filter(|c| !self.keys.contains(c))
                .cloned()
                .collect(),
        }
    }

    fn index(&self, groups: &[(Value, Vec<usize>)]) -> Index {
        Index {
            names: self.keys.clone(),
            labels: groups.iter().map(|(k, _)| k.clone()).collect(),
        }
    }

    /// Keyed series as-is, or flattened to key columns under `as_index=False`.
    fn keyed(&self, series: Series) -> SandboxResult<Value> {
        if self.as_index {
            Ok(Value::Series(Rc::new(series)))
        } else {
            Ok(Value::Frame(Rc::new(series.reset_index(None)?)))
        }
    }

    /// `size()`: rows per group
    pub fn size(&self) -> SandboxResult<Value> {
        let groups = self.groups()?;
        self.keyed(Series {
            name: Some("size".into()),
            values: groups.iter().map(|(_, rows)| Value::from(rows.len())).collect(),
            index: Some(self.index(&groups)),
        })
    }

    /// Apply one reducer, or a per-column mapping of reducers.
    ///
    /// A single selected column yields a labelled series; otherwise a frame
    /// with the key columns first. Non-numeric columns that a numeric
    /// reducer cannot handle are dropped from frame results.
    pub fn aggregate(&self, funcs: &[(String, String)]) -> SandboxResult<Value> {
        let groups = self.groups()?;

        if let (Some(Selection::Column(col)), [(_, func)]) = (&self.selection, funcs) {
            let values = self.frame.column_values(col)?;
            let mut out = Vec::with_capacity(groups.len());
            for (_, rows) in &groups {
                let cells: Vec<Value> = rows.iter().map(|&r| values[r].clone()).collect();
                out.push(aggregate(&cells, func)?);
            }
            return self.keyed(Series {
                name: Some(col.clone()),
                values: out,
                index: Some(self.index(&groups)),
            });
        }

        let mut columns = self.keys.clone();
        let mut data: Vec<Vec<Value>> = vec![Vec::with_capacity(groups.len()); self.keys.len()];
        for (key, _) in &groups {
            match key {
                Value::Tuple(parts) if self.keys.len() > 1 => {
                    for (col, part) in data.iter_mut().zip(parts) {
                        col.push(part.clone());
                    }
                }
                other => data[0].push(other.clone()),
            }
        }

        let explicit = funcs.iter().any(|(col, _)| !col.is_empty());
        for (col, func) in funcs {
            let targets = if col.is_empty() {
                self.value_columns()
            } else {
                vec![col.clone()]
            };
            for target in targets {
                let values = self.frame.column_values(&target)?;
                let mut out = Vec::with_capacity(groups.len());
                let mut failed = None;
                for (_, rows) in &groups {
                    let cells: Vec<Value> = rows.iter().map(|&r| values[r].clone()).collect();
                    match aggregate(&cells, func) {
                        Ok(v) => out.push(v),
                        Err(e) => {
                            failed = Some(e);
                            break;
                        }
                    }
                }
                match failed {
                    Some(e) if explicit => return Err(e),
                    Some(_) => continue,
                    None => {
                        columns.push(target);
                        data.push(out);
                    }
                }
            }
        }
        Ok(Value::Frame(Rc::new(Frame::new(columns, data)?)))
    }
}

fn values_of(value: &Value, len: usize) -> SandboxResult<Vec<Value>> {
    match value {
        Value::Series(s) => {
            if s.values.len() != len {
                return Err(SandboxError::value_error(
                    "Can only compare identically-labeled Series objects",
                ));
            }
            Ok(s.values.clone())
        }
        Value::List(items) | Value::Tuple(items) => {
            if items.len() != len {
                return Err(SandboxError::value_error(format!(
                    "Lengths must match to compare: {} vs {}",
                    len,
                    items.len()
                )));
            }
            Ok(items.clone())
        }
        scalar => Ok(vec![scalar.clone(); len]),
    }
}

fn template(left: &Value, right: &Value) -> Option<Rc<Series>> {
    match (left, right) {
        (Value::Series(s), _) | (_, Value::Series(s)) => Some(Rc::clone(s)),
        _ => None,
    }
}

/// Elementwise arithmetic and boolean `&`/`|`; missing cells stay missing.
pub fn series_binary(op: BinOp, left: &Value, right: &Value) -> SandboxResult<Value> {
    let Some(base) = template(left, right) else {
        return binary(op, left, right);
    };
    let len = base.values.len();
    let a = values_of(left, len)?;
    let b = values_of(right, len)?;
    let mut out = Vec::with_capacity(len);
    for (x, y) in a.iter().zip(&b) {
        if matches!(op, BinOp::BitAnd | BinOp::BitOr) {
            out.push(binary(op, &Value::Bool(x.truthy()?), &Value::Bool(y.truthy()?))?);
        } else if x.is_missing() || y.is_missing() {
            out.push(Value::Float(f64::NAN));
        } else {
            match binary(op, x, y) {
                Ok(v) => out.push(v),
                Err(e) if e.kind == ErrorKind::ZeroDivision => out.push(Value::Float(f64::NAN)),
                Err(e) => return Err(e),
            }
        }
    }
    Ok(Value::Series(Rc::new(base.derive(out))))
}

/// Elementwise comparison producing a boolean mask
pub fn series_compare(op: CmpOp, left: &Value, right: &Value) -> SandboxResult<Value> {
    let Some(base) = template(left, right) else {
        return Err(type_error("series comparison without a series operand"));
    };
    let len = base.values.len();
    let a = values_of(left, len)?;
    let b = values_of(right, len)?;
    let mut out = Vec::with_capacity(len);
    for (x, y) in a.iter().zip(&b) {
        let flag = match op {
            CmpOp::Eq => x.py_eq(y),
            CmpOp::NotEq => !x.py_eq(y),
            _ if x.is_missing() || y.is_missing() => false,
            CmpOp::Lt => x.py_cmp(y)? == Ordering::Less,
            CmpOp::LtE => x.py_cmp(y)? != Ordering::Greater,
            CmpOp::Gt => x.py_cmp(y)? == Ordering::Greater,
            CmpOp::GtE => x.py_cmp(y)? != Ordering::Less,
            _ => {
                return Err(type_error(
                    "membership and identity tests are not elementwise; use .isin()",
                ))
            }
        };
        out.push(Value::Bool(flag));
    }
    Ok(Value::Series(Rc::new(base.derive(out))))
}

pub fn series_unary(op: UnaryOp, series: &Series) -> SandboxResult<Value> {
    let values = series
        .values
        .iter()
        .map(|v| match (op, v) {
            (UnaryOp::Invert, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::Neg, v) if v.is_number() => binary(BinOp::Mul, v, &Value::Int(-1)),
            (UnaryOp::Pos, v) if v.is_number() => Ok(v.clone()),
            (_, v) if v.is_missing() => Ok(v.clone()),
            (_, v) => Err(type_error(format!(
                "bad operand type for unary operator: '{}'",
                v.type_name()
            ))),
        })
        .collect::<SandboxResult<_>>()?;
    Ok(Value::Series(Rc::new(series.derive(values))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ResultRow;

    fn standings() -> Frame {
        let set = ResultSet::new(vec![
            ResultRow::new().with("season", 2020).with("team", "MI").with("wins", 11),
            ResultRow::new().with("season", 2020).with("team", "DC").with("wins", 8),
            ResultRow::new().with("season", 2019).with("team", "MI").with("wins", 9),
        ])
        .unwrap();
        Frame::from_result_set(&set)
    }

    fn ints(series: &Series) -> Vec<i64> {
        series.values.iter().filter_map(Value::as_i64).collect()
    }

    #[test]
    fn test_mask_filter_and_sort() {
        let frame = standings();
        let mask = series_compare(
            CmpOp::Eq,
            &Value::Series(Rc::new(frame.column("team").unwrap())),
            &Value::from("MI"),
        )
        .unwrap();
        let Value::Series(mask) = mask else { panic!() };
        let mi = frame.filter(&mask).unwrap();
        assert_eq!(mi.len(), 2);

        let sorted = frame
            .sort_values(&["wins".to_string()], &[false])
            .unwrap();
        assert_eq!(ints(&sorted.column("wins").unwrap()), vec![11, 9, 8]);
    }

    #[test]
    fn test_groupby_sum_keeps_keys_as_index() {
        let frame = Rc::new(standings());
        let grouped = GroupBy {
            selection: Some(Selection::Column("wins".into())),
            ..GroupBy::new(frame, vec!["team".into()])
        };
        let Value::Series(totals) = grouped.aggregate(&[(String::new(), "sum".into())]).unwrap() else {
            panic!()
        };
        assert_eq!(ints(&totals), vec![8, 20]);
        assert_eq!(totals.get(&Value::from("MI")).unwrap().as_i64(), Some(20));

        let frame = totals.reset_index(None).unwrap();
        assert_eq!(frame.columns(), ["team", "wins"]);
    }

    #[test]
    fn test_frame_groupby_drops_unsummable_columns() {
        let grouped = GroupBy::new(Rc::new(standings()), vec!["season".into()]);
        let Value::Frame(out) = grouped.aggregate(&[(String::new(), "mean".into())]).unwrap() else {
            panic!()
        };
        assert_eq!(out.columns(), ["season", "wins"]);
        assert_eq!(out.column("wins").unwrap().values[1].as_f64(), Some(9.5));
    }

    #[test]
    fn test_arithmetic_broadcasts_and_keeps_missing() {
        let series = Series::new(Some("x".into()), vec![Value::Int(2), Value::None, Value::Int(4)]);
        let Value::Series(out) =
            series_binary(BinOp::Div, &Value::Series(Rc::new(series)), &Value::Int(2)).unwrap()
        else {
            panic!()
        };
        assert_eq!(out.values[0].as_f64(), Some(1.0));
        assert!(out.values[1].is_missing());
        assert_eq!(out.name.as_deref(), Some("x"));
    }

    #[test]
    fn test_value_counts_orders_by_frequency() {
        let frame = standings();
        let counts = frame.column("team").unwrap().value_counts();
        assert_eq!(counts.labels()[0].as_str(), Some("MI"));
        assert_eq!(ints(&counts), vec![2, 1]);
    }

    #[test]
    fn test_set_column_checks_length() {
        let mut frame = standings();
        frame.set_column("rank", &Value::Int(1)).unwrap();
        assert_eq!(frame.columns().len(), 4);
        let err = frame
            .set_column("bad", &Value::List(vec![Value::Int(1)]))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Value);
    }
}
