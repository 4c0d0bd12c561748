//! Chart-building API exposed to snippets: `px.*`, `go.*`, `make_subplots`
//! and the methods of figures and traces.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Map, Value as Json};
use tracing::debug;

use super::builtins::{attribute_error, to_names, to_usize, Args};
use super::error::{SandboxError, SandboxResult};
use super::frame::Frame;
use super::interpreter::{Interpreter, Step};
use super::value::{figure_value, type_error, Value};
use crate::chart::patch::{expand_underscore_map, merge_value, set_in, Segment};
use crate::chart::{CellKind, Figure, FigureError, SubplotGrid, Trace, TraceKind};

/// Default qualitative colour sequence of the chart library
pub const PLOTLY_COLORS: [&str; 10] = [
    "#636efa", "#EF553B", "#00cc96", "#ab63fa", "#FFA15A", "#19d3f3", "#FF6692", "#B6E880",
    "#FF97FF", "#FECB52",
];

const FIGURE_METHODS: &[&str] = &[
    "add_trace",
    "add_traces",
    "update_layout",
    "update_traces",
    "update_xaxes",
    "update_yaxes",
    "add_annotation",
    "add_shape",
    "add_hline",
    "add_vline",
    "show",
    "to_dict",
    "to_json",
];

fn figure_error(err: FigureError) -> SandboxError {
    SandboxError::value_error(err.to_string())
}

fn to_object(value: &Value, what: &str) -> SandboxResult<Map<String, Json>> {
    match value.to_json()? {
        Json::Object(map) => Ok(map),
        _ => Err(type_error(format!(
            "{} must be a dict, not {}",
            what,
            value.type_name()
        ))),
    }
}

/// Optional leading mapping argument merged with keyword arguments
fn patch_from(args: &mut Args, pos: usize, name: &str) -> SandboxResult<Map<String, Json>> {
    let mut patch = match args.take(pos, name) {
        Some(v) => to_object(&v, name)?,
        None => Map::new(),
    };
    for (key, value) in args.drain_keywords() {
        patch.insert(key, value.to_json()?);
    }
    Ok(expand_underscore_map(patch))
}

pub fn to_trace(value: &Value) -> SandboxResult<Trace> {
    match value {
        Value::Trace(trace) => Ok(trace.clone()),
        Value::Dict(_) => {
            let map = expand_underscore_map(to_object(value, "trace")?);
            serde_json::from_value(Json::Object(map))
                .map_err(|e| type_error(format!("invalid trace: {}", e)))
        }
        other => Err(type_error(format!(
            "expected a trace, not {}",
            other.type_name()
        ))),
    }
}

fn cell(args: &mut Args) -> SandboxResult<(Option<usize>, Option<usize>)> {
    let row = args.take_usize(usize::MAX, "row")?;
    let col = args.take_usize(usize::MAX, "col")?;
    Ok((row, col))
}

pub fn call_function(_interp: &mut Interpreter, name: &str, args: Args) -> SandboxResult<Value> {
    match name {
        "make_subplots" => make_subplots(args),
        "go.Figure" => go_figure(args),
        "go.Layout" => {
            let mut args = args;
            let patch = patch_from(&mut args, 0, "arg")?;
            Ok(Value::from_json(&Json::Object(patch)))
        }
        _ if name.starts_with("go.") => go_trace(name, args),
        _ if name.starts_with("px.") => express(name, args),
        other => Err(type_error(format!("unknown chart function {}", other))),
    }
}

fn go_trace(name: &str, mut args: Args) -> SandboxResult<Value> {
    let kind = TraceKind::from(name.trim_start_matches("go.").to_lowercase());
    let patch = patch_from(&mut args, 0, "arg")?;
    let mut trace = Trace::new(kind);
    for (key, value) in patch {
        trace.set(&key, value);
    }
    Ok(Value::Trace(trace))
}

fn go_figure(mut args: Args) -> SandboxResult<Value> {
    let data = args.take(0, "data");
    let layout = args.take(1, "layout");
    args.kw("frames");
    args.finish()?;

    let mut figure = Figure::new();
    let traces: Vec<Value> = match data {
        None => Vec::new(),
        Some(Value::Figure(other)) => {
            return Ok(figure_value(other.borrow().clone()));
        }
        Some(Value::Dict(dict)) if dict.get_str("data").is_some() || dict.get_str("layout").is_some() => {
            if let Some(layout) = dict.get_str("layout") {
                figure.update_layout(to_object(layout, "layout")?);
            }
            dict.get_str("data").map(Value::iterate).transpose()?.unwrap_or_default()
        }
        Some(single @ (Value::Trace(_) | Value::Dict(_))) => vec![single],
        Some(many) => many.iterate()?,
    };
    for trace in &traces {
        figure.add_trace(to_trace(trace)?, None, None).map_err(figure_error)?;
    }
    if let Some(layout) = layout {
        figure.update_layout(expand_underscore_map(to_object(&layout, "layout")?));
    }
    Ok(figure_value(figure))
}

fn make_subplots(mut args: Args) -> SandboxResult<Value> {
    let rows = args.take_usize(0, "rows")?.unwrap_or(1);
    let cols = args.take_usize(1, "cols")?.unwrap_or(1);
    let mut grid = SubplotGrid::new(rows, cols).map_err(figure_error)?;

    if let Some(h) = args.kw("horizontal_spacing").and_then(|v| v.as_f64()) {
        grid.horizontal_spacing = h;
    }
    if let Some(v) = args.kw("vertical_spacing").and_then(|v| v.as_f64()) {
        grid.vertical_spacing = v;
    }
    if let Some(specs) = args.kw("specs") {
        for (r, row) in specs.iterate()?.into_iter().enumerate() {
            for (c, spec) in row.iterate()?.into_iter().enumerate() {
                let kind = match &spec {
                    Value::Dict(d) => match d.get_str("type").and_then(Value::as_str) {
                        Some("domain") | Some("pie") | Some("sunburst") | Some("treemap")
                        | Some("indicator") => CellKind::Domain,
                        _ => CellKind::Xy,
                    },
                    _ => CellKind::Xy,
                };
                if r < rows && c < cols {
                    grid.kinds[r * cols + c] = kind;
                }
            }
        }
    }
    let titles: Vec<Json> = match args.kw("subplot_titles") {
        Some(t) => t
            .iterate()?
            .iter()
            .map(Value::to_json)
            .collect::<SandboxResult<_>>()?,
        None => Vec::new(),
    };
    for (key, _) in args.drain_keywords() {
        debug!(argument = %key, "Ignoring unsupported make_subplots argument");
    }

    let figure = Figure::with_grid(grid, &titles).map_err(figure_error)?;
    Ok(figure_value(figure))
}

// ---- plotly express ----

/// Resolved data columns for one express call
struct Columns {
    frame: Option<Rc<Frame>>,
    labels: Map<String, Json>,
}

impl Columns {
    /// Column spec (`"team"`, a list, a series) to values and an axis label
    fn resolve(&self, spec: &Value, role: &str) -> SandboxResult<(Vec<Value>, Option<String>)> {
        match spec {
            Value::Str(name) => {
                let frame = self.frame.as_ref().ok_or_else(|| {
                    SandboxError::value_error(format!(
                        "{}='{}' names a column but no data_frame was given",
                        role, name
                    ))
                })?;
                let values = frame.column_values(name).map_err(|_| {
                    SandboxError::value_error(format!(
                        "Value of '{}' is not the name of a column in 'data_frame'. Expected one of {:?} but received: {}",
                        role,
                        frame.columns(),
                        name
                    ))
                })?;
                Ok((values.to_vec(), Some(name.clone())))
            }
            Value::Series(s) => Ok((s.values.clone(), s.name.clone())),
            Value::List(items) | Value::Tuple(items) => Ok((items.clone(), None)),
            other => Err(type_error(format!(
                "{} must be a column name or array-like, not {}",
                role,
                other.type_name()
            ))),
        }
    }

    fn label(&self, name: &str) -> String {
        self.labels
            .get(name)
            .and_then(Json::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| name.to_string())
    }
}

fn subset(values: &[Value], rows: &[usize]) -> SandboxResult<Json> {
    Ok(Json::Array(
        rows.iter()
            .map(|&r| values.get(r).map(Value::to_json).unwrap_or(Ok(Json::Null)))
            .collect::<SandboxResult<_>>()?,
    ))
}

fn axis_title(text: &str) -> Json {
    json!({"title": {"text": text}})
}

fn express(name: &str, mut args: Args) -> SandboxResult<Value> {
    let kind = name.trim_start_matches("px.");

    let frame = match args.take(0, "data_frame") {
        None => None,
        Some(Value::Frame(f)) => Some(f),
        Some(Value::Dict(d)) => Some(Rc::new(Frame::from_dict(&d)?)),
        Some(Value::List(records)) => Some(Rc::new(Frame::from_records(&records)?)),
        Some(other) => {
            return Err(type_error(format!(
                "data_frame must be a DataFrame, not {}",
                other.type_name()
            )))
        }
    };
    let labels = match args.kw("labels") {
        Some(l) => to_object(&l, "labels")?,
        None => Map::new(),
    };
    let cols = Columns { frame, labels };

    let sequence = args.kw("color_discrete_sequence");
    let custom_palette = sequence.is_some();
    let palette: Vec<Json> = match sequence {
        Some(seq) => seq.iterate()?.iter().map(Value::to_json).collect::<SandboxResult<_>>()?,
        None => PLOTLY_COLORS.iter().map(|c| json!(c)).collect(),
    };
    let color_map = match args.kw("color_discrete_map") {
        Some(m) => to_object(&m, "color_discrete_map")?,
        None => Map::new(),
    };

    let mut layout = Map::new();
    if let Some(title) = args.kw("title") {
        layout.insert("title".into(), json!({"text": title.to_json()?}));
    }
    for key in ["height", "width"] {
        if let Some(v) = args.kw(key) {
            layout.insert(key.into(), v.to_json()?);
        }
    }

    let traces = if kind == "pie" {
        pie(&cols, &mut args, custom_palette.then_some(palette.as_slice()))?
    } else {
        cartesian(kind, &cols, &mut args, &palette, &color_map, &mut layout)?
    };

    for axis in ["x", "y"] {
        if args.kw(&format!("log_{}", axis)).map(|v| v.truthy()).transpose()? == Some(true) {
            merge_value(&mut layout, format!("{}axis", axis), json!({"type": "log"}));
        }
        if let Some(range) = args.kw(&format!("range_{}", axis)) {
            merge_value(&mut layout, format!("{}axis", axis), json!({"range": range.to_json()?}));
        }
    }
    for (key, _) in args.drain_keywords() {
        debug!(function = %name, argument = %key, "Ignoring unsupported express argument");
    }

    let mut figure = Figure::new();
    for trace in traces {
        figure.add_trace(trace, None, None).map_err(figure_error)?;
    }
    figure.update_layout(layout);
    Ok(figure_value(figure))
}

fn pie(cols: &Columns, args: &mut Args, palette: Option<&[Json]>) -> SandboxResult<Vec<Trace>> {
    let names = args.take(1, "names");
    let values = args.take(2, "values");
    let mut trace = Trace::new(TraceKind::Pie);

    if let Some(spec) = &names {
        let (labels, _) = cols.resolve(spec, "names")?;
        trace.set("labels", Value::List(labels).to_json()?);
    }
    if let Some(spec) = &values {
        let (vals, _) = cols.resolve(spec, "values")?;
        trace.set("values", Value::List(vals).to_json()?);
    }
    if names.is_none() && values.is_none() {
        return Err(SandboxError::value_error("px.pie needs names= or values="));
    }
    if let Some(hole) = args.kw("hole") {
        trace.set("hole", hole.to_json()?);
    }
    args.kw("color");
    if let Some(colors) = palette {
        trace.set("marker", json!({"colors": colors}));
    }
    Ok(vec![trace])
}

fn cartesian(
    kind: &str,
    cols: &Columns,
    args: &mut Args,
    palette: &[Json],
    color_map: &Map<String, Json>,
    layout: &mut Map<String, Json>,
) -> SandboxResult<Vec<Trace>> {
    let x_spec = args.take(1, "x");
    let y_spec = args.take(2, "y");
    let color_spec = args.take(3, "color");
    let text_spec = args.kw("text");
    let custom_spec = args.kw("custom_data");
    let orientation = args.kw("orientation").map(|o| o.to_str());
    let markers = args.kw("markers").map(|v| v.truthy()).transpose()?.unwrap_or(false);
    let nbins = args.kw("nbins");
    let histfunc = args.kw("histfunc");
    let barmode = args.kw("barmode");

    // Wide form: y names several columns, each becomes a series.
    let wide: Option<Vec<String>> = match (&y_spec, &cols.frame) {
        (Some(Value::List(items)), Some(_)) if items.iter().all(|v| matches!(v, Value::Str(_))) => {
            Some(items.iter().map(Value::to_str).collect())
        }
        _ => None,
    };

    let (x_vals, x_label) = match &x_spec {
        Some(spec) => {
            let (v, l) = cols.resolve(spec, "x")?;
            (Some(v), l)
        }
        None => (None, None),
    };

    let mut series: Vec<(Option<String>, Vec<Value>)> = Vec::new();
    let y_label: Option<String>;
    match (&wide, &y_spec) {
        (Some(names), _) => {
            for name in names {
                let (v, _) = cols.resolve(&Value::from(name.as_str()), "y")?;
                series.push((Some(name.clone()), v));
            }
            y_label = Some("value".to_string());
        }
        (None, Some(spec)) => {
            let (v, l) = cols.resolve(spec, "y")?;
            series.push((None, v));
            y_label = l;
        }
        (None, None) => y_label = None,
    }

    let len = x_vals
        .as_ref()
        .map(Vec::len)
        .or_else(|| series.first().map(|(_, v)| v.len()))
        .ok_or_else(|| SandboxError::value_error(format!("px.{} needs x= or y=", kind)))?;
    let index: Vec<Value> = (0..len).map(Value::from).collect();
    let x_vals = match x_vals {
        Some(v) => Some(v),
        None if kind != "histogram" => Some(index.clone()),
        None => None,
    };
    let x_label = x_label.or_else(|| (x_spec.is_none() && kind != "histogram").then(|| "index".to_string()));

    let color = match &color_spec {
        Some(spec) => Some(cols.resolve(spec, "color")?),
        None => None,
    };
    let text = match &text_spec {
        Some(spec) => Some(cols.resolve(spec, "text")?.0),
        None => None,
    };
    let custom: Option<Vec<Vec<Value>>> = match &custom_spec {
        Some(spec) => Some(
            to_names(spec)?
                .iter()
                .map(|c| cols.resolve(&Value::from(c.as_str()), "custom_data").map(|r| r.0))
                .collect::<SandboxResult<_>>()?,
        ),
        None => None,
    };

    // (legend name, rows, y values) per output trace
    let mut groups: Vec<(Option<String>, Vec<usize>, Option<Vec<Value>>)> = Vec::new();
    let all_rows: Vec<usize> = (0..len).collect();
    match &color {
        Some((values, _)) => {
            let mut keys: Vec<Value> = Vec::new();
            for v in values {
                if !keys.iter().any(|k| k.py_eq(v)) {
                    keys.push(v.clone());
                }
            }
            for key in keys {
                let rows: Vec<usize> = all_rows
                    .iter()
                    .copied()
                    .filter(|&r| values.get(r).is_some_and(|v| v.py_eq(&key)))
                    .collect();
                for (_, y) in &series {
                    groups.push((Some(key.to_str()), rows.clone(), Some(y.clone())));
                }
                if series.is_empty() {
                    groups.push((Some(key.to_str()), rows.clone(), None));
                }
            }
        }
        None if series.is_empty() => groups.push((None, all_rows.clone(), None)),
        None => {
            for (name, y) in &series {
                groups.push((name.clone(), all_rows.clone(), Some(y.clone())));
            }
        }
    }

    let legend = color.is_some() || wide.is_some();
    let mut traces = Vec::with_capacity(groups.len());
    for (i, (name, rows, y)) in groups.into_iter().enumerate() {
        let (trace_kind, mode) = match kind {
            "bar" => (TraceKind::Bar, None),
            "histogram" => (TraceKind::Histogram, None),
            "scatter" => (TraceKind::Scatter, Some("markers")),
            _ if markers => (TraceKind::Scatter, Some("lines+markers")),
            _ => (TraceKind::Scatter, Some("lines")),
        };
        let mut trace = Trace::new(trace_kind);
        if let Some(x) = &x_vals {
            trace.set("x", subset(x, &rows)?);
        }
        if let Some(y) = &y {
            trace.set("y", subset(y, &rows)?);
        }
        if let Some(mode) = mode {
            trace.set("mode", json!(mode));
        }
        if kind == "area" {
            trace.set("stackgroup", json!("1"));
        }
        if let Some(o) = &orientation {
            trace.set("orientation", json!(o));
        }
        if let Some(t) = &text {
            trace.set("text", subset(t, &rows)?);
        }
        if let Some(columns) = &custom {
            let per_row: Vec<Json> = rows
                .iter()
                .map(|&r| {
                    columns
                        .iter()
                        .map(|c| c.get(r).map(Value::to_json).unwrap_or(Ok(Json::Null)))
                        .collect::<SandboxResult<Vec<Json>>>()
                        .map(Json::Array)
                })
                .collect::<SandboxResult<_>>()?;
            trace.set("customdata", Json::Array(per_row));
        }
        if kind == "histogram" {
            if let Some(n) = &nbins {
                trace.set("nbinsx", n.to_json()?);
            }
            if let Some(f) = &histfunc {
                trace.set("histfunc", f.to_json()?);
            } else if y.is_some() {
                trace.set("histfunc", json!("sum"));
            }
        }

        let colour = name
            .as_ref()
            .and_then(|n| color_map.get(n).cloned())
            .or_else(|| palette.get(i % palette.len().max(1)).cloned())
            .unwrap_or(Json::Null);
        let paint = if matches!(kind, "line" | "area") {
            "line"
        } else {
            "marker"
        };
        trace.set(paint, json!({"color": colour}));
        if let Some(n) = &name {
            trace.set("name", json!(n));
            trace.set("legendgroup", json!(n));
        }
        trace.set("showlegend", json!(legend));
        traces.push(trace);
    }

    if let Some(x) = &x_label {
        merge_value(layout, "xaxis".into(), axis_title(&cols.label(x)));
    }
    let y_title = match (kind, &y_label) {
        (_, Some(y)) => Some(cols.label(y)),
        ("histogram", None) => Some("count".to_string()),
        _ => None,
    };
    if let Some(y) = y_title {
        merge_value(layout, "yaxis".into(), axis_title(&y));
    }
    if legend {
        let title = match &color {
            Some((_, Some(name))) => cols.label(name),
            _ => "variable".to_string(),
        };
        layout.insert("legend".into(), json!({"title": {"text": title}, "tracegroupgap": 0}));
    }
    if matches!(kind, "bar" | "histogram") {
        let mode = match barmode {
            Some(m) => m.to_json()?,
            None => json!("relative"),
        };
        layout.insert("barmode".into(), mode);
    }
    Ok(traces)
}

// ---- figure and trace objects ----

pub fn get_attr(value: &Value, name: &str) -> SandboxResult<Value> {
    match value {
        Value::Figure(fig) => match name {
            "data" => Ok(Value::Tuple(
                fig.borrow().data.iter().cloned().map(Value::Trace).collect(),
            )),
            "layout" => Ok(Value::from_json(&Json::Object(fig.borrow().layout.clone()))),
            _ if FIGURE_METHODS.contains(&name) => {
                Ok(Value::Method(Box::new(value.clone()), name.to_string()))
            }
            _ => Err(attribute_error(value, name)),
        },
        Value::Trace(trace) => match name {
            "type" => Ok(Value::from(trace.kind.as_str())),
            "update" => Ok(Value::Method(Box::new(value.clone()), name.to_string())),
            _ => Ok(trace.get(name).map(Value::from_json).unwrap_or(Value::None)),
        },
        other => Err(attribute_error(other, name)),
    }
}

pub fn get_item(container: &Value, key: &Value) -> SandboxResult<Value> {
    match (container, key) {
        (Value::Figure(_), Value::Str(name)) if name == "data" || name == "layout" => {
            get_attr(container, name)
        }
        (Value::Trace(_), Value::Str(name)) => get_attr(container, name),
        (c, k) => Err(type_error(format!(
            "cannot index {} with {}",
            c.type_name(),
            k.repr()
        ))),
    }
}

/// Rows/cols for `add_traces`: one per trace, or a scalar broadcast
fn per_trace(value: Option<Value>, count: usize) -> SandboxResult<Vec<Option<usize>>> {
    match value {
        None => Ok(vec![None; count]),
        Some(Value::List(items)) | Some(Value::Tuple(items)) => items
            .iter()
            .map(|v| to_usize(v, "rows/cols").map(Some))
            .collect(),
        Some(v) => Ok(vec![Some(to_usize(&v, "rows/cols")?); count]),
    }
}

fn straight_line(args: &mut Args, axis: char) -> SandboxResult<Json> {
    let at = args.required(0, if axis == 'y' { "y" } else { "x" })?.to_json()?;
    let mut line = Map::new();
    for key in ["line_color", "line_dash", "line_width"] {
        if let Some(v) = args.kw(key) {
            line.insert(key.trim_start_matches("line_").to_string(), v.to_json()?);
        }
    }
    let annotation = args.kw("annotation_text");
    let shape = if axis == 'y' {
        json!({"type": "line", "xref": "paper", "x0": 0, "x1": 1, "yref": "y", "y0": at, "y1": at, "line": line})
    } else {
        json!({"type": "line", "yref": "paper", "y0": 0, "y1": 1, "xref": "x", "x0": at, "x1": at, "line": line})
    };
    if let Some(text) = annotation {
        let note = if axis == 'y' {
            json!({"text": text.to_json()?, "xref": "paper", "x": 1, "y": at, "yref": "y", "showarrow": false, "xanchor": "right", "yanchor": "bottom"})
        } else {
            json!({"text": text.to_json()?, "yref": "paper", "y": 1, "x": at, "xref": "x", "showarrow": false, "xanchor": "left", "yanchor": "top"})
        };
        return Ok(json!([shape, note]));
    }
    Ok(json!([shape]))
}

fn push_shape(figure: &mut Figure, shape: Json) {
    match figure.layout.get_mut("shapes") {
        Some(Json::Array(items)) => items.push(shape),
        _ => {
            figure.layout.insert("shapes".into(), json!([shape]));
        }
    }
}

fn figure_method(fig: &Rc<RefCell<Figure>>, name: &str, args: &mut Args) -> SandboxResult<Value> {
    let handle = Value::Figure(Rc::clone(fig));
    match name {
        "add_trace" => {
            let trace = to_trace(&args.required(0, "trace")?)?;
            let (row, col) = cell(args)?;
            args.kw("secondary_y");
            fig.borrow_mut().add_trace(trace, row, col).map_err(figure_error)?;
        }
        "add_traces" => {
            let traces = args.required(0, "data")?.iterate()?;
            let rows = per_trace(args.kw("rows"), traces.len())?;
            let cols = per_trace(args.kw("cols"), traces.len())?;
            let mut figure = fig.borrow_mut();
            for (i, trace) in traces.iter().enumerate() {
                let row = rows.get(i).copied().flatten();
                let col = cols.get(i).copied().flatten();
                figure.add_trace(to_trace(trace)?, row, col).map_err(figure_error)?;
            }
        }
        "update_layout" => {
            args.kw("overwrite");
            let patch = patch_from(args, 0, "dict1")?;
            fig.borrow_mut().update_layout(patch);
        }
        "update_traces" => {
            let selector = match args.kw("selector") {
                Some(s) => Some(to_object(&s, "selector")?),
                None => None,
            };
            let (row, col) = cell(args)?;
            let patch = patch_from(args, 0, "patch")?;
            let touched = fig
                .borrow_mut()
                .update_traces(patch, selector.as_ref(), row, col)
                .map_err(figure_error)?;
            debug!(touched, "update_traces applied");
        }
        "update_xaxes" | "update_yaxes" => {
            let letter = if name == "update_xaxes" { 'x' } else { 'y' };
            let (row, col) = cell(args)?;
            let patch = patch_from(args, 0, "patch")?;
            fig.borrow_mut()
                .update_axes(letter, patch, row, col)
                .map_err(figure_error)?;
        }
        "add_annotation" => {
            let (row, col) = cell(args)?;
            let mut annotation = patch_from(args, 0, "arg")?;
            if let (Some(r), Some(c)) = (row, col) {
                let figure = fig.borrow();
                let grid = figure.grid.as_ref().ok_or_else(|| figure_error(FigureError::NoGrid))?;
                let (x, y) = grid.axis_refs(r, c).map_err(figure_error)?;
                annotation.entry("xref").or_insert(json!(x));
                annotation.entry("yref").or_insert(json!(y));
            }
            fig.borrow_mut().add_annotation(annotation);
        }
        "add_shape" => {
            let shape = Json::Object(patch_from(args, 0, "arg")?);
            push_shape(&mut fig.borrow_mut(), shape);
        }
        "add_hline" | "add_vline" => {
            let axis = if name == "add_hline" { 'y' } else { 'x' };
            let parts = straight_line(args, axis)?;
            let mut figure = fig.borrow_mut();
            if let Json::Array(parts) = parts {
                let mut parts = parts.into_iter();
                if let Some(shape) = parts.next() {
                    push_shape(&mut figure, shape);
                }
                for note in parts {
                    if let Json::Object(note) = note {
                        figure.add_annotation(note);
                    }
                }
            }
        }
        "show" => {
            debug!("fig.show() ignored; the figure is rendered by the pipeline");
            args.drain_keywords();
            return Ok(Value::None);
        }
        "to_dict" => return Ok(Value::from_json(&fig.borrow().to_json())),
        "to_json" => return Ok(Value::Str(fig.borrow().to_json().to_string())),
        other => return Err(attribute_error(&handle, other)),
    }
    Ok(handle)
}

pub fn call_method(
    _interp: &mut Interpreter,
    receiver: &mut Value,
    name: &str,
    mut args: Args,
) -> SandboxResult<Value> {
    args.func = name.to_string();
    let result = match receiver {
        Value::Figure(fig) => {
            let fig = Rc::clone(fig);
            figure_method(&fig, name, &mut args)?
        }
        Value::Trace(trace) if name == "update" => {
            let patch = patch_from(&mut args, 0, "dict1")?;
            for (key, value) in patch {
                if key == "type" {
                    trace.set(&key, value);
                } else {
                    merge_value(&mut trace.attrs, key, value);
                }
            }
            Value::Trace(trace.clone())
        }
        other => return Err(attribute_error(other, name)),
    };
    args.finish()?;
    Ok(result)
}

fn to_segments(steps: &[Step]) -> SandboxResult<Vec<Segment>> {
    steps
        .iter()
        .map(|step| match step {
            Step::Attr(name) => Ok(Segment::Key(name.clone())),
            Step::Key(Value::Str(key)) => Ok(Segment::Key(key.clone())),
            Step::Key(index) => index
                .as_i64()
                .and_then(|i| usize::try_from(i).ok())
                .map(Segment::Index)
                .ok_or_else(|| type_error(format!("invalid property index {}", index.repr()))),
        })
        .collect()
}

/// Assign below a trace: `trace.marker.color = ...`
pub fn assign_trace(trace: &mut Trace, steps: &[Step], value: &Value) -> SandboxResult<()> {
    let segments = to_segments(steps)?;
    let json = value.to_json()?;
    match segments.as_slice() {
        [] => Err(type_error("cannot assign to a trace")),
        [Segment::Key(key)] => {
            trace.set(key, json);
            Ok(())
        }
        [Segment::Key(key), rest @ ..] => {
            let slot = trace.attrs.entry(key.clone()).or_insert(Json::Null);
            set_in(slot, rest, json);
            Ok(())
        }
        _ => Err(type_error("trace properties are addressed by name")),
    }
}

/// Assign below a figure: `fig.layout.title.text = ...`, `fig.data[0].name = ...`
pub fn assign_figure(fig: &Rc<RefCell<Figure>>, steps: &[Step], value: &Value) -> SandboxResult<()> {
    let mut figure = fig.borrow_mut();
    match steps {
        [Step::Attr(root), rest @ ..] | [Step::Key(Value::Str(root)), rest @ ..] if root == "layout" => {
            if rest.is_empty() {
                let patch = to_object(value, "layout")?;
                figure.layout = Map::new();
                figure.update_layout(patch);
                return Ok(());
            }
            let segments = to_segments(rest)?;
            let mut layout = Json::Object(std::mem::take(&mut figure.layout));
            set_in(&mut layout, &segments, value.to_json()?);
            if let Json::Object(map) = layout {
                figure.layout = map;
            }
            Ok(())
        }
        [Step::Attr(root), Step::Key(index), rest @ ..] if root == "data" => {
            let len = figure.data.len();
            let i = index
                .as_i64()
                .map(|i| if i < 0 { i + len as i64 } else { i })
                .and_then(|i| usize::try_from(i).ok())
                .filter(|i| *i < len)
                .ok_or_else(|| {
                    SandboxError::new(super::error::ErrorKind::Index, "tuple index out of range")
                })?;
            if rest.is_empty() {
                figure.data[i] = to_trace(value)?;
                return Ok(());
            }
            assign_trace(&mut figure.data[i], rest, value)
        }
        _ => Err(type_error(
            "only fig.layout... and fig.data[i]... properties can be assigned",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_go_trace_expands_magic_underscores() {
        let trace = go_trace(
            "go.Bar",
            Args::new(
                "Bar",
                vec![],
                vec![
                    ("x".into(), Value::List(vec!["a".into()])),
                    ("marker_color".into(), Value::from("red")),
                ],
            ),
        )
        .unwrap();
        let Value::Trace(trace) = trace else { panic!() };
        assert_eq!(trace.kind, TraceKind::Bar);
        assert_eq!(trace.get("marker"), Some(&json!({"color": "red"})));
    }

    #[test]
    fn test_make_subplots_domain_cells() {
        let specs = Value::from_json(&json!([[{"type": "domain"}, {"type": "xy"}]]));
        let fig = make_subplots(Args::new(
            "make_subplots",
            vec![Value::Int(1), Value::Int(2)],
            vec![("specs".into(), specs)],
        ))
        .unwrap();
        let Value::Figure(fig) = fig else { panic!() };
        let fig = fig.borrow();
        assert!(fig.layout.contains_key("xaxis2"));
        assert!(!fig.layout.contains_key("xaxis"));
    }

    #[test]
    fn test_px_bar_color_groups() {
        let mut frame = Frame::default();
        frame.set_column("team", &Value::from_json(&json!(["MI", "DC", "MI"]))).unwrap();
        frame.set_column("season", &Value::from_json(&json!([2020, 2020, 2019]))).unwrap();
        frame.set_column("wins", &Value::from_json(&json!([11, 8, 9]))).unwrap();
        let fig = express(
            "px.bar",
            Args::new(
                "bar",
                vec![Value::Frame(Rc::new(frame))],
                vec![
                    ("x".into(), "season".into()),
                    ("y".into(), "wins".into()),
                    ("color".into(), "team".into()),
                    ("title".into(), "Wins".into()),
                ],
            ),
        )
        .unwrap();
        let Value::Figure(fig) = fig else { panic!() };
        let fig = fig.borrow();
        assert_eq!(fig.data.len(), 2);
        assert_eq!(fig.data[0].get("name"), Some(&json!("MI")));
        assert_eq!(fig.data[0].get("y"), Some(&json!([11, 9])));
        assert_eq!(fig.layout["title"], json!({"text": "Wins"}));
        assert_eq!(fig.layout["barmode"], json!("relative"));
        assert_eq!(fig.layout["legend"]["title"]["text"], json!("team"));
    }

    #[test]
    fn test_assign_figure_paths() {
        let fig = Rc::new(RefCell::new(Figure::new()));
        fig.borrow_mut().add_trace(Trace::new(TraceKind::Bar), None, None).unwrap();
        assign_figure(
            &fig,
            &[Step::Attr("layout".into()), Step::Attr("title".into()), Step::Attr("text".into())],
            &Value::from("Standings"),
        )
        .unwrap();
        assign_figure(
            &fig,
            &[Step::Attr("data".into()), Step::Key(Value::Int(-1)), Step::Attr("name".into())],
            &Value::from("wins"),
        )
        .unwrap();
        let fig = fig.borrow();
        assert_eq!(fig.layout["title"]["text"], json!("Standings"));
        assert_eq!(fig.data[0].get("name"), Some(&json!("wins")));
    }
}
