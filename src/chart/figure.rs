//! Figure builder
//!
//! The mutable chart object snippets assemble. It mirrors the graph-objects
//! figure: traces, a free-form layout mapping, and an optional subplot grid
//! that places traces onto per-cell axes.

use serde_json::{json, Map, Value};
use thiserror::Error;

use super::patch::{deep_merge, expand_underscore_map, merge_value};
use super::trace::Trace;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FigureError {
    #[error("row={row}, col={col} is outside the {rows}x{cols} subplot grid")]
    CellOutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
    #[error("row and col must be specified together")]
    PartialCell,
    #[error("row/col placement requires a figure created with make_subplots")]
    NoGrid,
    #[error("{0}")]
    Invalid(String),
}

/// Cell kind from `make_subplots(specs=...)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellKind {
    #[default]
    Xy,
    /// Pie-like cells positioned by `domain`
    Domain,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubplotGrid {
    pub rows: usize,
    pub cols: usize,
    pub horizontal_spacing: f64,
    pub vertical_spacing: f64,
    /// Row-major cell kinds, `rows * cols` long
    pub kinds: Vec<CellKind>,
}

fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

impl SubplotGrid {
    pub fn new(rows: usize, cols: usize) -> Result<Self, FigureError> {
        if rows == 0 || cols == 0 {
            return Err(FigureError::Invalid(
                "make_subplots needs at least one row and one column".to_string(),
            ));
        }
        Ok(Self {
            rows,
            cols,
            horizontal_spacing: 0.2 / cols as f64,
            vertical_spacing: 0.3 / rows as f64,
            kinds: vec![CellKind::Xy; rows * cols],
        })
    }

    fn check(&self, row: usize, col: usize) -> Result<usize, FigureError> {
        if row == 0 || col == 0 || row > self.rows || col > self.cols {
            return Err(FigureError::CellOutOfRange {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok((row - 1) * self.cols + col)
    }

    /// 1-based subplot number; also the axis suffix (`x`, `x2`, ...).
    pub fn cell_number(&self, row: usize, col: usize) -> Result<usize, FigureError> {
        self.check(row, col)
    }

    pub fn kind(&self, row: usize, col: usize) -> Result<CellKind, FigureError> {
        let n = self.check(row, col)?;
        Ok(self.kinds[n - 1])
    }

    /// Paper-coordinate `([x0, x1], [y0, y1])` of a cell; row 1 is the top.
    pub fn domain(&self, row: usize, col: usize) -> Result<([f64; 2], [f64; 2]), FigureError> {
        self.check(row, col)?;
        let w = (1.0 - self.horizontal_spacing * (self.cols - 1) as f64) / self.cols as f64;
        let h = (1.0 - self.vertical_spacing * (self.rows - 1) as f64) / self.rows as f64;
        let x0 = (col - 1) as f64 * (w + self.horizontal_spacing);
        let y1 = 1.0 - (row - 1) as f64 * (h + self.vertical_spacing);
        Ok((
            [round6(x0), round6(x0 + w)],
            [round6(y1 - h), round6(y1)],
        ))
    }

    fn suffix(n: usize) -> String {
        if n == 1 {
            String::new()
        } else {
            n.to_string()
        }
    }

    /// Axis references (`x2`, `y2`) for an xy cell
    pub fn axis_refs(&self, row: usize, col: usize) -> Result<(String, String), FigureError> {
        let n = self.check(row, col)?;
        let s = Self::suffix(n);
        Ok((format!("x{}", s), format!("y{}", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Figure {
    pub data: Vec<Trace>,
    pub layout: Map<String, Value>,
    pub grid: Option<SubplotGrid>,
}

impl Figure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the axis layout and subplot-title annotations for a grid.
    pub fn with_grid(grid: SubplotGrid, titles: &[Value]) -> Result<Self, FigureError> {
        let mut layout = Map::new();
        let mut annotations = Vec::new();

        for row in 1..=grid.rows {
            for col in 1..=grid.cols {
                let n = grid.cell_number(row, col)?;
                let (xd, yd) = grid.domain(row, col)?;

                if grid.kind(row, col)? == CellKind::Xy {
                    let s = SubplotGrid::suffix(n);
                    layout.insert(
                        format!("xaxis{}", s),
                        json!({"domain": xd, "anchor": format!("y{}", s)}),
                    );
                    layout.insert(
                        format!("yaxis{}", s),
                        json!({"domain": yd, "anchor": format!("x{}", s)}),
                    );
                }

                if let Some(title) = titles.get(n - 1).filter(|t| !t.is_null()) {
                    annotations.push(json!({
                        "text": title,
                        "x": round6((xd[0] + xd[1]) / 2.0),
                        "y": yd[1],
                        "xref": "paper",
                        "yref": "paper",
                        "xanchor": "center",
                        "yanchor": "bottom",
                        "showarrow": false,
                        "font": {"size": 16}
                    }));
                }
            }
        }
        if !annotations.is_empty() {
            layout.insert("annotations".to_string(), Value::Array(annotations));
        }

        Ok(Self {
            data: Vec::new(),
            layout,
            grid: Some(grid),
        })
    }

    fn resolve_cell(
        &self,
        row: Option<usize>,
        col: Option<usize>,
    ) -> Result<Option<(usize, usize)>, FigureError> {
        match (row, col) {
            (None, None) => Ok(None),
            (Some(r), Some(c)) => {
                let grid = self.grid.as_ref().ok_or(FigureError::NoGrid)?;
                grid.check(r, c)?;
                Ok(Some((r, c)))
            }
            _ => Err(FigureError::PartialCell),
        }
    }

    /// Append a trace, optionally placing it on a subplot cell.
    pub fn add_trace(
        &mut self,
        mut trace: Trace,
        row: Option<usize>,
        col: Option<usize>,
    ) -> Result<(), FigureError> {
        if let (Some((r, c)), Some(grid)) = (self.resolve_cell(row, col)?, self.grid.as_ref()) {
            match grid.kind(r, c)? {
                CellKind::Domain => {
                    let (xd, yd) = grid.domain(r, c)?;
                    trace.set("domain", json!({"x": xd, "y": yd}));
                }
                CellKind::Xy => {
                    let (x, y) = grid.axis_refs(r, c)?;
                    trace.set("xaxis", Value::String(x));
                    trace.set("yaxis", Value::String(y));
                }
            }
        }
        self.data.push(trace);
        Ok(())
    }

    /// Merge a layout patch; underscore keys expand and string titles
    /// become `{text}` mappings.
    pub fn update_layout(&mut self, patch: Map<String, Value>) {
        deep_merge(&mut self.layout, expand_underscore_map(patch));
        normalize_titles(&mut self.layout);
    }

    /// Merge `patch` into every trace matching `selector` (and cell, if given).
    /// Returns how many traces were touched.
    pub fn update_traces(
        &mut self,
        patch: Map<String, Value>,
        selector: Option<&Map<String, Value>>,
        row: Option<usize>,
        col: Option<usize>,
    ) -> Result<usize, FigureError> {
        let axes = match self.resolve_cell(row, col)? {
            Some((r, c)) => self.grid.as_ref().map(|g| g.axis_refs(r, c)).transpose()?,
            None => None,
        };
        let patch = expand_underscore_map(patch);
        let mut touched = 0;

        for trace in &mut self.data {
            if let Some(sel) = selector {
                if !trace.matches(sel) {
                    continue;
                }
            }
            if let Some((x, _)) = &axes {
                let trace_x = trace.get("xaxis").and_then(Value::as_str).unwrap_or("x");
                if trace_x != x {
                    continue;
                }
            }
            for (key, value) in patch.clone() {
                if key == "type" {
                    trace.set(&key, value);
                } else {
                    merge_value(&mut trace.attrs, key, value);
                }
            }
            touched += 1;
        }
        Ok(touched)
    }

    /// Merge `patch` into every `xaxis*`/`yaxis*` (`letter` is `x` or `y`),
    /// or only the axis of the given cell.
    pub fn update_axes(
        &mut self,
        letter: char,
        patch: Map<String, Value>,
        row: Option<usize>,
        col: Option<usize>,
    ) -> Result<(), FigureError> {
        let patch = expand_underscore_map(patch);
        let prefix = format!("{}axis", letter);

        let keys: Vec<String> = match self.resolve_cell(row, col)? {
            Some((r, c)) => {
                let grid = self.grid.as_ref().ok_or(FigureError::NoGrid)?;
                let n = grid.cell_number(r, c)?;
                vec![format!("{}{}", prefix, SubplotGrid::suffix(n))]
            }
            None => {
                let mut keys: Vec<String> = self
                    .layout
                    .keys()
                    .filter(|k| {
                        k.strip_prefix(&prefix)
                            .map(|rest| rest.chars().all(|c| c.is_ascii_digit()))
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect();
                if keys.is_empty() {
                    keys.push(prefix.clone());
                }
                keys
            }
        };

        for key in keys {
            let entry = self
                .layout
                .entry(key)
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(axis) = entry {
                deep_merge(axis, patch.clone());
            }
        }
        normalize_titles(&mut self.layout);
        Ok(())
    }

    pub fn add_annotation(&mut self, annotation: Map<String, Value>) {
        let annotation = Value::Object(expand_underscore_map(annotation));
        match self.layout.get_mut("annotations") {
            Some(Value::Array(items)) => items.push(annotation),
            _ => {
                self.layout
                    .insert("annotations".to_string(), Value::Array(vec![annotation]));
            }
        }
    }

    /// `{"data": [...], "layout": {...}}` as the client library expects it
    pub fn to_json(&self) -> Value {
        let data: Vec<Value> = self
            .data
            .iter()
            .map(|t| {
                let mut obj = Map::new();
                obj.insert("type".to_string(), Value::String(t.kind.to_string()));
                obj.extend(t.attrs.clone());
                Value::Object(obj)
            })
            .collect();
        json!({"data": data, "layout": Value::Object(self.layout.clone())})
    }
}

/// `title: "x"` -> `title: {"text": "x"}` at the top level and on every axis.
fn normalize_titles(layout: &mut Map<String, Value>) {
    fn wrap(slot: Option<&mut Value>) {
        if let Some(title) = slot {
            if title.is_string() {
                *title = json!({ "text": title.take() });
            }
        }
    }

    wrap(layout.get_mut("title"));
    for (key, value) in layout.iter_mut() {
        if key.starts_with("xaxis") || key.starts_with("yaxis") {
            if let Value::Object(axis) = value {
                wrap(axis.get_mut("title"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::trace::TraceKind;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_update_layout_expands_and_wraps_titles() {
        let mut fig = Figure::new();
        fig.update_layout(obj(json!({"title": "Wins", "xaxis_title_text": "Team"})));
        fig.update_layout(obj(json!({"title_x": 0.5})));
        assert_eq!(fig.layout["title"], json!({"text": "Wins", "x": 0.5}));
        assert_eq!(fig.layout["xaxis"], json!({"title": {"text": "Team"}}));
    }

    #[test]
    fn test_grid_domains_and_titles() {
        let grid = SubplotGrid::new(1, 2).unwrap();
        let fig = Figure::with_grid(grid, &[json!("Runs"), json!("Wickets")]).unwrap();
        assert_eq!(fig.layout["xaxis"]["domain"], json!([0.0, 0.45]));
        assert_eq!(fig.layout["xaxis2"]["domain"], json!([0.55, 1.0]));
        assert_eq!(fig.layout["yaxis2"]["anchor"], json!("x2"));
        let annotations = fig.layout["annotations"].as_array().unwrap();
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[1]["text"], json!("Wickets"));
    }

    #[test]
    fn test_add_trace_to_cell_sets_axes() {
        let mut fig = Figure::with_grid(SubplotGrid::new(1, 2).unwrap(), &[]).unwrap();
        fig.add_trace(Trace::new(TraceKind::Bar), Some(1), Some(1)).unwrap();
        fig.add_trace(Trace::new(TraceKind::Bar), Some(1), Some(2)).unwrap();
        assert_eq!(fig.data[1].y_axis_ref(), "y2");

        let err = fig.add_trace(Trace::new(TraceKind::Bar), Some(2), Some(1)).unwrap_err();
        assert!(matches!(err, FigureError::CellOutOfRange { .. }));
        assert_eq!(
            Figure::new().add_trace(Trace::default(), Some(1), Some(1)),
            Err(FigureError::NoGrid)
        );
    }

    #[test]
    fn test_domain_cells_place_by_domain() {
        let mut grid = SubplotGrid::new(1, 2).unwrap();
        grid.kinds[1] = CellKind::Domain;
        let mut fig = Figure::with_grid(grid, &[]).unwrap();
        assert!(fig.layout.get("xaxis2").is_none());
        fig.add_trace(Trace::new(TraceKind::Pie), Some(1), Some(2)).unwrap();
        assert_eq!(fig.data[0].get("domain").unwrap()["x"], json!([0.55, 1.0]));
    }

    #[test]
    fn test_update_traces_with_selector() {
        let mut fig = Figure::new();
        fig.add_trace(Trace::new(TraceKind::Bar), None, None).unwrap();
        fig.add_trace(Trace::new(TraceKind::Scatter), None, None).unwrap();
        let selector = obj(json!({"type": "bar"}));
        let n = fig
            .update_traces(obj(json!({"marker_color": "teal"})), Some(&selector), None, None)
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(fig.data[0].get("marker"), Some(&json!({"color": "teal"})));
        assert!(fig.data[1].get("marker").is_none());
    }

    #[test]
    fn test_update_axes_touches_all_matching_axes() {
        let mut fig = Figure::with_grid(SubplotGrid::new(1, 2).unwrap(), &[]).unwrap();
        fig.update_axes('y', obj(json!({"type": "category"})), None, None).unwrap();
        assert_eq!(fig.layout["yaxis"]["type"], json!("category"));
        assert_eq!(fig.layout["yaxis2"]["type"], json!("category"));
        assert!(fig.layout["xaxis"].get("type").is_none());
    }

    #[test]
    fn test_to_json_puts_type_first() {
        let mut fig = Figure::new();
        fig.add_trace(Trace::new(TraceKind::Pie).with("values", json!([1])), None, None)
            .unwrap();
        fig.add_annotation(obj(json!({"text": "note", "font_size": 12})));
        let value = fig.to_json();
        assert_eq!(value["data"][0]["type"], json!("pie"));
        assert_eq!(value["layout"]["annotations"][0]["font"], json!({"size": 12}));
    }
}
