//! Builtin functions, container methods and module resolution
//!
//! Everything here works on values only; calls back into the interpreter
//! happen through [`Interpreter::call`] for user lambdas (`key=` functions).

use std::cmp::Ordering;

use tracing::debug;

use super::error::{ErrorKind, SandboxError, SandboxResult};
use super::frame::convert;
use super::interpreter::Interpreter;
use super::value::{check_len, format_spec, module_path, overflow, type_error, Dict, Value};
use super::{plotly, tables};

/// Upper bound on eagerly materialized `range()` results
const MAX_RANGE_LEN: usize = 1_000_000;

/// Arguments of one call, keywords in source order
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub func: String,
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(func: impl Into<String>, positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            func: func.into(),
            positional,
            keywords,
        }
    }

    pub fn positional(func: impl Into<String>, positional: Vec<Value>) -> Self {
        Self::new(func, positional, Vec::new())
    }

    /// Keyword `name` or positional `pos`, as passed (`None` included).
    pub fn take_raw(&mut self, pos: usize, name: &str) -> Option<Value> {
        if let Some(i) = self.keywords.iter().position(|(k, _)| k == name) {
            return Some(self.keywords.remove(i).1);
        }
        self.positional.get(pos).cloned()
    }

    /// Like [`Args::take_raw`] but an explicit `None` counts as absent.
    pub fn take(&mut self, pos: usize, name: &str) -> Option<Value> {
        self.take_raw(pos, name).filter(|v| !v.is_none())
    }

    pub fn required(&mut self, pos: usize, name: &str) -> SandboxResult<Value> {
        self.take_raw(pos, name).ok_or_else(|| {
            type_error(format!(
                "{}() missing required argument: '{}'",
                self.func, name
            ))
        })
    }

    /// Keyword-only argument; `None` counts as absent.
    pub fn kw(&mut self, name: &str) -> Option<Value> {
        let i = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(i).1).filter(|v| !v.is_none())
    }

    pub fn take_bool(&mut self, pos: usize, name: &str, default: bool) -> SandboxResult<bool> {
        match self.take(pos, name) {
            Some(v) => v.truthy(),
            None => Ok(default),
        }
    }

    pub fn take_usize(&mut self, pos: usize, name: &str) -> SandboxResult<Option<usize>> {
        self.take(pos, name).map(|v| to_usize(&v, name)).transpose()
    }

    pub fn at_most(&self, n: usize) -> SandboxResult<()> {
        if self.positional.len() > n {
            return Err(type_error(format!(
                "{}() takes at most {} positional arguments but {} were given",
                self.func,
                n,
                self.positional.len()
            )));
        }
        Ok(())
    }

    /// Remaining keywords, in source order
    pub fn drain_keywords(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.keywords)
    }

    /// Reject keywords nobody consumed.
    pub fn finish(self) -> SandboxResult<()> {
        match self.keywords.first() {
            Some((name, _)) => Err(type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                self.func, name
            ))),
            None => Ok(()),
        }
    }
}

pub fn to_usize(value: &Value, what: &str) -> SandboxResult<usize> {
    value
        .as_i64()
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| type_error(format!("'{}' must be a non-negative integer", what)))
}

/// A column name or list of column names
pub fn to_names(value: &Value) -> SandboxResult<Vec<String>> {
    match value {
        Value::Str(s) => Ok(vec![s.clone()]),
        Value::List(items) | Value::Tuple(items) => items
            .iter()
            .map(|v| match v {
                Value::Str(s) => Ok(s.clone()),
                other => Ok(other.to_str()),
            })
            .collect(),
        other => Err(type_error(format!(
            "expected a column name or list of names, not {}",
            other.type_name()
        ))),
    }
}

pub fn attribute_error(value: &Value, name: &str) -> SandboxError {
    let owner = match value {
        Value::Module(m) => format!("module '{}'", module_path(m)),
        other => format!("'{}' object", other.type_name()),
    };
    SandboxError::new(
        ErrorKind::Attribute,
        format!("{} has no attribute '{}'", owner, name),
    )
}

// ---- modules ----

const PX_FUNCTIONS: &[&str] = &[
    "px.bar",
    "px.line",
    "px.scatter",
    "px.area",
    "px.pie",
    "px.histogram",
];

const GO_NAMES: &[&str] = &[
    "go.Figure",
    "go.Layout",
    "go.Bar",
    "go.Scatter",
    "go.Pie",
    "go.Histogram",
    "go.Heatmap",
    "go.Box",
    "go.Scattergl",
    "go.Violin",
    "go.Funnel",
    "go.Waterfall",
    "go.Indicator",
    "go.Table",
    "go.Sunburst",
    "go.Treemap",
    "go.Candlestick",
    "go.Scatterpolar",
    "go.Barpolar",
    "go.Histogram2d",
    "go.Contour",
];

const PD_FUNCTIONS: &[&str] = &[
    "pd.DataFrame",
    "pd.Series",
    "pd.isna",
    "pd.isnull",
    "pd.notna",
    "pd.notnull",
    "pd.to_numeric",
];

const BUILTINS: &[&str] = &[
    "len", "str", "int", "float", "bool", "round", "list", "tuple", "dict", "sorted", "range",
    "zip", "enumerate", "min", "max", "sum", "abs", "print", "isinstance", "any", "all", "set",
    "reversed", "repr", "map", "filter",
];

/// Map an import path to its module value; anything else is refused.
pub fn resolve_module(path: &str) -> SandboxResult<Value> {
    let name = match path {
        "plotly" => "plotly",
        "plotly.express" => "px",
        "plotly.graph_objects" | "plotly.graph_objs" => "go",
        "plotly.subplots" => "subplots",
        "plotly.colors" => "px.colors",
        "pandas" => "pd",
        other => {
            return Err(SandboxError::new(
                ErrorKind::Import,
                format!(
                    "import of '{}' is not allowed; available modules are plotly and pandas",
                    other
                ),
            ))
        }
    };
    Ok(Value::Module(name))
}

fn find(names: &'static [&'static str], qualified: &str) -> Option<&'static str> {
    names.iter().copied().find(|n| *n == qualified)
}

fn palette(name: &str) -> Option<Vec<&'static str>> {
    let colors: &[&str] = match name {
        "Plotly" => &plotly::PLOTLY_COLORS,
        "D3" => &[
            "#1F77B4", "#FF7F0E", "#2CA02C", "#D62728", "#9467BD", "#8C564B", "#E377C2",
            "#7F7F7F", "#BCBD22", "#17BECF",
        ],
        "Set2" => &[
            "rgb(102,194,165)", "rgb(252,141,98)", "rgb(141,160,203)", "rgb(231,138,195)",
            "rgb(166,216,84)", "rgb(255,217,47)", "rgb(229,196,148)", "rgb(179,179,179)",
        ],
        "Pastel" => &[
            "rgb(102, 197, 204)", "rgb(246, 207, 113)", "rgb(248, 156, 116)",
            "rgb(220, 176, 242)", "rgb(135, 197, 95)", "rgb(158, 185, 243)",
            "rgb(254, 136, 177)", "rgb(201, 219, 116)", "rgb(139, 224, 164)",
            "rgb(180, 151, 231)", "rgb(179, 179, 179)",
        ],
        _ => return None,
    };
    Some(colors.to_vec())
}

fn module_attr(module: &'static str, name: &str) -> Option<Value> {
    match (module, name) {
        ("plotly", "express") => Some(Value::Module("px")),
        ("plotly", "graph_objects" | "graph_objs") => Some(Value::Module("go")),
        ("plotly", "subplots") => Some(Value::Module("subplots")),
        ("plotly", "colors") | ("px", "colors") => Some(Value::Module("px.colors")),
        ("px.colors", "qualitative") => Some(Value::Module("px.colors.qualitative")),
        ("px.colors.qualitative", palette_name) => palette(palette_name)
            .map(|colors| Value::List(colors.into_iter().map(Value::from).collect())),
        ("subplots", "make_subplots") => Some(Value::Builtin("make_subplots")),
        ("px", f) => find(PX_FUNCTIONS, &format!("px.{}", f)).map(Value::Builtin),
        ("go", f) => find(GO_NAMES, &format!("go.{}", f)).map(Value::Builtin),
        ("pd", f) => find(PD_FUNCTIONS, &format!("pd.{}", f)).map(Value::Builtin),
        _ => None,
    }
}

pub fn builtin(name: &str) -> Option<Value> {
    find(BUILTINS, name).map(Value::Builtin)
}

// ---- attribute access ----

const STR_METHODS: &[&str] = &[
    "upper", "lower", "title", "capitalize", "strip", "lstrip", "rstrip", "split", "join",
    "replace", "startswith", "endswith", "find", "count", "format", "zfill", "isdigit",
    "isalpha", "isnumeric", "ljust", "rjust",
];
const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "copy",
    "clear", "tolist",
];
const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "update", "setdefault", "pop", "copy", "clear",
];

pub fn get_attr(value: &Value, name: &str) -> SandboxResult<Value> {
    let method = |known: &[&str]| {
        if known.contains(&name) {
            Ok(Value::Method(Box::new(value.clone()), name.to_string()))
        } else {
            Err(attribute_error(value, name))
        }
    };
    match value {
        Value::Module(m) => module_attr(*m, name).ok_or_else(|| attribute_error(value, name)),
        Value::Frame(_) | Value::Series(_) | Value::GroupBy(_) => tables::get_attr(value, name),
        Value::Figure(_) | Value::Trace(_) => plotly::get_attr(value, name),
        Value::Str(_) => method(STR_METHODS),
        Value::List(_) => method(LIST_METHODS),
        Value::Tuple(_) => method(&["index", "count"]),
        Value::Dict(dict) => match dict.get_str(name) {
            Some(v) => Ok(v.clone()),
            None if DICT_METHODS.contains(&name) => {
                Ok(Value::Method(Box::new(value.clone()), name.to_string()))
            }
            // Layout-style mappings read unset properties as None.
            None => Ok(Value::None),
        },
        Value::Float(_) if name == "is_integer" => {
            Ok(Value::Method(Box::new(value.clone()), name.to_string()))
        }
        other => Err(attribute_error(other, name)),
    }
}

// ---- calls ----

/// Call a library function by qualified name.
pub fn call_function(interp: &mut Interpreter, name: &str, args: Args) -> SandboxResult<Value> {
    if name.starts_with("px.") || name.starts_with("go.") || name == "make_subplots" {
        return plotly::call_function(interp, name, args);
    }
    if name.starts_with("pd.") {
        return tables::call_function(interp, name, args);
    }
    call_builtin(interp, name, args)
}

/// Invoke `receiver.name(...)`; list and dict methods mutate `receiver`.
pub fn call_method(
    interp: &mut Interpreter,
    receiver: &mut Value,
    name: &str,
    args: Args,
) -> SandboxResult<Value> {
    match receiver {
        Value::Str(s) => {
            let s = s.clone();
            str_method(&s, name, args)
        }
        Value::List(items) => list_method(interp, items, name, args),
        Value::Tuple(items) => match name {
            "index" | "count" => {
                let mut items = items.clone();
                list_method(interp, &mut items, name, args)
            }
            _ => Err(attribute_error(receiver, name)),
        },
        Value::Dict(dict) => dict_method(dict, name, args),
        Value::Frame(_) | Value::Series(_) | Value::GroupBy(_) => {
            tables::call_method(interp, receiver, name, args)
        }
        Value::Figure(_) | Value::Trace(_) => plotly::call_method(interp, receiver, name, args),
        Value::Float(f) if name == "is_integer" => Ok(Value::Bool(f.fract() == 0.0)),
        Value::Module(_) => {
            let func = get_attr(receiver, name)?;
            interp.call(&func, args)
        }
        other => Err(attribute_error(other, name)),
    }
}

fn round_half_even(x: f64) -> f64 {
    let r = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        r
    }
}

/// Sort `items` by precomputed `keys`; stable, `reverse` keeps ties in order.
pub fn sort_by_keys(items: Vec<Value>, keys: &[Value], reverse: bool) -> SandboxResult<Vec<Value>> {
    let mut error = None;
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| match keys[a].py_cmp(&keys[b]) {
        Ok(ord) if reverse => ord.reverse(),
        Ok(ord) => ord,
        Err(e) => {
            error.get_or_insert(e);
            Ordering::Equal
        }
    });
    if let Some(e) = error {
        return Err(e);
    }
    Ok(order.into_iter().map(|i| items[i].clone()).collect())
}

fn sort_keys(interp: &mut Interpreter, items: &[Value], key: Option<&Value>) -> SandboxResult<Vec<Value>> {
    match key {
        Some(func) => items
            .iter()
            .map(|item| interp.call(func, Args::positional("key", vec![item.clone()])))
            .collect(),
        None => Ok(items.to_vec()),
    }
}

fn extreme(interp: &mut Interpreter, mut args: Args, want: Ordering) -> SandboxResult<Value> {
    let key = args.kw("key");
    let default = args.kw("default");
    let items = if args.positional.len() == 1 {
        args.positional[0].iterate()?
    } else {
        args.positional.clone()
    };
    args.positional.clear();
    let func = args.func.clone();
    args.finish()?;

    let keys = sort_keys(interp, &items, key.as_ref())?;
    let mut best: Option<usize> = None;
    for i in 0..items.len() {
        best = match best {
            None => Some(i),
            Some(b) if keys[i].py_cmp(&keys[b])? == want => Some(i),
            keep => keep,
        };
    }
    match (best, default) {
        (Some(i), _) => Ok(items[i].clone()),
        (None, Some(d)) => Ok(d),
        (None, None) => Err(SandboxError::value_error(format!(
            "{}() arg is an empty sequence",
            func
        ))),
    }
}

fn type_matches(value: &Value, ty: &Value) -> SandboxResult<bool> {
    match ty {
        Value::Tuple(types) | Value::List(types) => {
            for t in types {
                if type_matches(value, t)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Builtin(name) => Ok(match *name {
            "str" => matches!(value, Value::Str(_)),
            "int" => matches!(value, Value::Int(_) | Value::Bool(_)),
            "float" => matches!(value, Value::Float(_)),
            "bool" => matches!(value, Value::Bool(_)),
            "list" => matches!(value, Value::List(_)),
            "tuple" => matches!(value, Value::Tuple(_)),
            "dict" => matches!(value, Value::Dict(_)),
            "pd.DataFrame" => matches!(value, Value::Frame(_)),
            "pd.Series" => matches!(value, Value::Series(_)),
            "go.Figure" => matches!(value, Value::Figure(_)),
            other => return Err(type_error(format!("isinstance() arg 2 cannot be {}", other))),
        }),
        other => Err(type_error(format!(
            "isinstance() arg 2 must be a type or tuple of types, not {}",
            other.type_name()
        ))),
    }
}

pub fn range_values(start: i64, stop: i64, step: i64) -> SandboxResult<Vec<Value>> {
    if step == 0 {
        return Err(SandboxError::value_error("range() arg 3 must not be zero"));
    }
    let span = if step > 0 { stop.saturating_sub(start) } else { start.saturating_sub(stop) };
    let len = if span <= 0 {
        0
    } else {
        ((span - 1) / step.abs() + 1) as usize
    };
    if len > MAX_RANGE_LEN {
        return Err(SandboxError::new(
            ErrorKind::ResourceLimit,
            format!("range of {} elements exceeds the sandbox limit", len),
        ));
    }
    Ok((0..len as i64).map(|i| Value::Int(start + i * step)).collect())
}

fn call_builtin(interp: &mut Interpreter, name: &str, mut args: Args) -> SandboxResult<Value> {
    let first = args.positional.first().cloned();
    let one = |args: &Args| -> SandboxResult<Value> {
        args.positional.first().cloned().ok_or_else(|| {
            type_error(format!("{}() takes exactly one argument (0 given)", args.func))
        })
    };

    let result = match name {
        "len" => Value::from(one(&args)?.len()?),
        "str" => Value::Str(first.map(|v| v.to_str()).unwrap_or_default()),
        "repr" => Value::Str(one(&args)?.repr()),
        "int" => match first {
            Some(v) => convert(&v, "int")?,
            None => Value::Int(0),
        },
        "float" => match first {
            Some(Value::Str(s)) if s.trim().eq_ignore_ascii_case("nan") => Value::Float(f64::NAN),
            Some(Value::Str(s)) if s.trim().trim_start_matches(['+', '-']).eq_ignore_ascii_case("inf") => {
                Value::Float(if s.trim().starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY })
            }
            Some(v) => convert(&v, "float")?,
            None => Value::Float(0.0),
        },
        "bool" => Value::Bool(match first {
            Some(v) => v.truthy()?,
            None => false,
        }),
        "abs" => match one(&args)? {
            Value::Int(i) => Value::Int(i.checked_abs().ok_or_else(overflow)?),
            Value::Bool(b) => Value::Int(i64::from(b)),
            Value::Float(f) => Value::Float(f.abs()),
            Value::Series(s) => Value::Series(std::rc::Rc::new(s.map_values(|v| match v {
                Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(overflow),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Ok(other.clone()),
            })?)),
            other => {
                return Err(type_error(format!(
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                )))
            }
        },
        "round" => {
            let value = args.required(0, "number")?;
            let digits = args.take(1, "ndigits");
            match (&value, digits) {
                (Value::Int(_), _) | (Value::Bool(_), None) => Value::Int(value.as_i64().unwrap_or(0)),
                (v, None) => {
                    let f = v.as_f64().ok_or_else(|| {
                        type_error(format!("type {} doesn't define __round__", v.type_name()))
                    })?;
                    if !f.is_finite() {
                        return Err(SandboxError::value_error("cannot convert float NaN or infinity to integer"));
                    }
                    Value::Int(round_half_even(f) as i64)
                }
                (v, Some(nd)) => {
                    let f = v.as_f64().ok_or_else(|| {
                        type_error(format!("type {} doesn't define __round__", v.type_name()))
                    })?;
                    let nd = nd.as_i64().ok_or_else(|| type_error("ndigits must be an integer"))?;
                    let scale = 10f64.powi(nd as i32);
                    Value::Float(round_half_even(f * scale) / scale)
                }
            }
        }
        "list" => Value::List(match first {
            Some(v) => v.iterate()?,
            None => Vec::new(),
        }),
        "tuple" => Value::Tuple(match first {
            Some(v) => v.iterate()?,
            None => Vec::new(),
        }),
        "set" => {
            let mut unique: Vec<Value> = Vec::new();
            if let Some(v) = first {
                for item in v.iterate()? {
                    if !unique.iter().any(|u| u.py_eq(&item)) {
                        unique.push(item);
                    }
                }
            }
            Value::List(unique)
        }
        "reversed" => {
            let mut items = one(&args)?.iterate()?;
            items.reverse();
            Value::List(items)
        }
        "dict" => {
            let mut dict = match first {
                Some(Value::Dict(d)) => d,
                Some(other) => {
                    let mut dict = Dict::new();
                    for pair in other.iterate()? {
                        let parts = pair.iterate()?;
                        if parts.len() != 2 {
                            return Err(SandboxError::value_error(
                                "dictionary update sequence element has wrong length",
                            ));
                        }
                        dict.insert(parts[0].clone(), parts[1].clone());
                    }
                    dict
                }
                None => Dict::new(),
            };
            for (k, v) in args.drain_keywords() {
                dict.insert(Value::Str(k), v);
            }
            Value::Dict(dict)
        }
        "range" => {
            let ints: Vec<i64> = args
                .positional
                .iter()
                .map(|v| v.as_i64().ok_or_else(|| type_error("range() arguments must be integers")))
                .collect::<SandboxResult<_>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(type_error("range expected 1 to 3 arguments")),
            };
            Value::List(range_values(start, stop, step)?)
        }
        "zip" => {
            let columns: Vec<Vec<Value>> = args
                .positional
                .iter()
                .map(Value::iterate)
                .collect::<SandboxResult<_>>()?;
            let len = columns.iter().map(Vec::len).min().unwrap_or(0);
            Value::List(
                (0..len)
                    .map(|i| Value::Tuple(columns.iter().map(|c| c[i].clone()).collect()))
                    .collect(),
            )
        }
        "enumerate" => {
            let items = args.required(0, "iterable")?.iterate()?;
            let start = args.take(1, "start").and_then(|v| v.as_i64()).unwrap_or(0);
            Value::List(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| Value::Tuple(vec![Value::Int(start + i as i64), v]))
                    .collect(),
            )
        }
        "sorted" => {
            let items = args.required(0, "iterable")?.iterate()?;
            let key = args.kw("key");
            let reverse = match args.kw("reverse") {
                Some(v) => v.truthy()?,
                None => false,
            };
            let keys = sort_keys(interp, &items, key.as_ref())?;
            Value::List(sort_by_keys(items, &keys, reverse)?)
        }
        "min" => return extreme(interp, args, Ordering::Less),
        "max" => return extreme(interp, args, Ordering::Greater),
        "sum" => {
            let items = args.required(0, "iterable")?.iterate()?;
            let mut total = args.take(1, "start").unwrap_or(Value::Int(0));
            for item in &items {
                total = super::value::binary(super::ast::BinOp::Add, &total, item)?;
            }
            total
        }
        "any" | "all" => {
            let items = one(&args)?.iterate()?;
            let want_all = name == "all";
            let mut result = want_all;
            for item in items {
                if item.truthy()? != want_all {
                    result = !want_all;
                    break;
                }
            }
            Value::Bool(result)
        }
        "map" | "filter" => {
            let func = args.required(0, "function")?;
            let items = args.required(1, "iterable")?.iterate()?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                if name == "filter" && func.is_none() {
                    if item.truthy()? {
                        out.push(item);
                    }
                    continue;
                }
                let mapped = interp.call(&func, Args::positional(name, vec![item.clone()]))?;
                if name == "map" {
                    out.push(mapped);
                } else if mapped.truthy()? {
                    out.push(item);
                }
            }
            Value::List(out)
        }
        "isinstance" => {
            let value = args.required(0, "obj")?;
            let ty = args.required(1, "class_or_tuple")?;
            Value::Bool(type_matches(&value, &ty)?)
        }
        "print" => {
            let sep = args
                .kw("sep")
                .map(|v| v.to_str())
                .unwrap_or_else(|| " ".to_string());
            args.kw("end");
            let line: Vec<String> = args.positional.iter().map(Value::to_str).collect();
            debug!(output = %line.join(&sep), "Snippet print");
            Value::None
        }
        other => {
            return Err(SandboxError::new(
                ErrorKind::Name,
                format!("name '{}' is not defined", other),
            ))
        }
    };
    args.finish()?;
    Ok(result)
}

// ---- str ----

/// `str.format` with auto/explicit/named fields, conversions and specs
pub fn format_template(template: &str, positional: &[Value], named: &[(String, Value)]) -> SandboxResult<String> {
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::new();
    let mut auto = 0usize;
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                out.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                out.push('}');
                i += 2;
            }
            '{' => {
                let end = chars[i..]
                    .iter()
                    .position(|&c| c == '}')
                    .map(|p| p + i)
                    .ok_or_else(|| {
                        SandboxError::value_error("Single '{' encountered in format string")
                    })?;
                let field: String = chars[i + 1..end].iter().collect();
                let (head, spec) = match field.split_once(':') {
                    Some((h, s)) => (h.to_string(), s.to_string()),
                    None => (field.clone(), String::new()),
                };
                let (key, conversion) = match head.split_once('!') {
                    Some((k, c)) => (k.to_string(), c.chars().next()),
                    None => (head, None),
                };
                let value = if key.is_empty() {
                    let v = positional.get(auto).cloned();
                    auto += 1;
                    v
                } else if let Ok(idx) = key.parse::<usize>() {
                    positional.get(idx).cloned()
                } else {
                    named.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone())
                };
                let value = value.ok_or_else(|| {
                    if key.is_empty() || key.parse::<usize>().is_ok() {
                        SandboxError::new(
                            ErrorKind::Index,
                            "Replacement index out of range for positional args tuple",
                        )
                    } else {
                        SandboxError::new(ErrorKind::Key, format!("'{}'", key))
                    }
                })?;
                let value = match conversion {
                    Some('r') => Value::Str(value.repr()),
                    Some('s') => Value::Str(value.to_str()),
                    _ => value,
                };
                out.push_str(&format_spec(&value, &spec)?);
                i = end + 1;
            }
            '}' => {
                return Err(SandboxError::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Ok(out)
}

fn str_arg(args: &mut Args, pos: usize, name: &str) -> SandboxResult<Option<String>> {
    match args.take(pos, name) {
        Some(Value::Str(s)) => Ok(Some(s)),
        Some(other) => Err(type_error(format!(
            "{}() argument must be str, not {}",
            args.func,
            other.type_name()
        ))),
        None => Ok(None),
    }
}

fn str_method(s: &str, name: &str, mut args: Args) -> SandboxResult<Value> {
    args.func = name.to_string();
    let result = match name {
        "upper" => Value::Str(s.to_uppercase()),
        "lower" => Value::Str(s.to_lowercase()),
        "capitalize" => {
            let mut chars = s.chars();
            Value::Str(match chars.next() {
                Some(c) => c.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            })
        }
        "title" => {
            let mut out = String::with_capacity(s.len());
            let mut prev_alpha = false;
            for c in s.chars() {
                if prev_alpha {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                prev_alpha = c.is_alphabetic();
            }
            Value::Str(out)
        }
        "strip" | "lstrip" | "rstrip" => {
            let chars = str_arg(&mut args, 0, "chars")?;
            let matcher = |c: char| match &chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            Value::Str(match name {
                "strip" => s.trim_matches(matcher),
                "lstrip" => s.trim_start_matches(matcher),
                _ => s.trim_end_matches(matcher),
            }
            .to_string())
        }
        "split" => {
            let sep = str_arg(&mut args, 0, "sep")?;
            let max = args
                .take(1, "maxsplit")
                .and_then(|v| v.as_i64())
                .filter(|m| *m >= 0)
                .map(|m| m as usize + 1);
            if sep.as_deref() == Some("") {
                return Err(SandboxError::value_error("empty separator"));
            }
            let parts: Vec<Value> = match (&sep, max) {
                (Some(sep), Some(n)) => s.splitn(n, sep.as_str()).map(Value::from).collect(),
                (Some(sep), None) => s.split(sep.as_str()).map(Value::from).collect(),
                (None, _) => s.split_whitespace().map(Value::from).collect(),
            };
            Value::List(parts)
        }
        "join" => {
            let items = args.required(0, "iterable")?.iterate()?;
            let parts = items
                .iter()
                .map(|v| match v {
                    Value::Str(p) => Ok(p.clone()),
                    other => Err(type_error(format!(
                        "sequence item: expected str instance, {} found",
                        other.type_name()
                    ))),
                })
                .collect::<SandboxResult<Vec<_>>>()?;
            let total = parts
                .iter()
                .fold(s.len().saturating_mul(parts.len()), |acc, p| acc.saturating_add(p.len()));
            check_len(total)?;
            Value::Str(parts.join(s))
        }
        "replace" => {
            let old = str_arg(&mut args, 0, "old")?.unwrap_or_default();
            let new = str_arg(&mut args, 1, "new")?.unwrap_or_default();
            if new.len() > old.len() {
                let hits = if old.is_empty() { s.chars().count() + 1 } else { s.matches(&old).count() };
                check_len(s.len().saturating_add(hits.saturating_mul(new.len() - old.len())))?;
            }
            match args.take(2, "count").and_then(|v| v.as_i64()).filter(|c| *c >= 0) {
                Some(n) => Value::Str(s.replacen(&old, &new, n as usize)),
                None => Value::Str(s.replace(&old, &new)),
            }
        }
        "startswith" | "endswith" => {
            let arg = args.required(0, "prefix")?;
            let candidates = match arg {
                Value::Tuple(items) | Value::List(items) => items,
                other => vec![other],
            };
            let mut hit = false;
            for c in candidates {
                let c = c.as_str().ok_or_else(|| type_error("expected str"))?.to_string();
                hit |= if name == "startswith" {
                    s.starts_with(&c)
                } else {
                    s.ends_with(&c)
                };
            }
            Value::Bool(hit)
        }
        "find" => {
            let needle = str_arg(&mut args, 0, "sub")?.unwrap_or_default();
            Value::Int(match s.find(&needle) {
                Some(byte) => s[..byte].chars().count() as i64,
                None => -1,
            })
        }
        "count" => {
            let needle = str_arg(&mut args, 0, "sub")?.unwrap_or_default();
            Value::from(if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(&needle).count()
            })
        }
        "format" => {
            let positional = std::mem::take(&mut args.positional);
            let named = args.drain_keywords();
            Value::Str(format_template(s, &positional, &named)?)
        }
        "zfill" => {
            let width = check_len(args.take_usize(0, "width")?.unwrap_or(0))?;
            let len = s.chars().count();
            if len >= width {
                Value::Str(s.to_string())
            } else {
                let (sign, digits) = match s.chars().next() {
                    Some(c @ ('+' | '-')) => (c.to_string(), &s[1..]),
                    _ => (String::new(), s),
                };
                Value::Str(format!("{}{}{}", sign, "0".repeat(width - len), digits))
            }
        }
        "ljust" | "rjust" => {
            let width = check_len(args.take_usize(0, "width")?.unwrap_or(0))?;
            let fill = str_arg(&mut args, 1, "fillchar")?
                .and_then(|f| f.chars().next())
                .unwrap_or(' ');
            let pad: String = std::iter::repeat(fill)
                .take(width.saturating_sub(s.chars().count()))
                .collect();
            Value::Str(if name == "ljust" {
                format!("{}{}", s, pad)
            } else {
                format!("{}{}", pad, s)
            })
        }
        "isdigit" | "isnumeric" => Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_numeric())),
        "isalpha" => Value::Bool(!s.is_empty() && s.chars().all(char::is_alphabetic)),
        other => return Err(attribute_error(&Value::from(s), other)),
    };
    args.finish()?;
    Ok(result)
}

// ---- list / dict ----

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let at = if index < 0 { index + len } else { index };
    if (0..len).contains(&at) {
        Some(at as usize)
    } else {
        None
    }
}

pub fn list_index(items: &[Value], index: &Value) -> SandboxResult<usize> {
    let i = index.as_i64().ok_or_else(|| {
        type_error(format!(
            "list indices must be integers or slices, not {}",
            index.type_name()
        ))
    })?;
    normalize_index(i, items.len())
        .ok_or_else(|| SandboxError::new(ErrorKind::Index, "list index out of range"))
}

fn list_method(
    interp: &mut Interpreter,
    items: &mut Vec<Value>,
    name: &str,
    mut args: Args,
) -> SandboxResult<Value> {
    args.func = name.to_string();
    let result = match name {
        "append" => {
            items.push(args.required(0, "object")?);
            Value::None
        }
        "extend" => {
            let extra = args.required(0, "iterable")?.iterate()?;
            check_len(items.len().saturating_add(extra.len()))?;
            items.extend(extra);
            Value::None
        }
        "insert" => {
            let at = args.required(0, "index")?.as_i64().unwrap_or(0);
            let len = items.len() as i64;
            let at = if at < 0 { (at + len).max(0) } else { at.min(len) };
            items.insert(at as usize, args.required(1, "object")?);
            Value::None
        }
        "pop" => {
            if items.is_empty() {
                return Err(SandboxError::new(ErrorKind::Index, "pop from empty list"));
            }
            let at = match args.take(0, "index") {
                Some(i) => list_index(items, &i)?,
                None => items.len() - 1,
            };
            items.remove(at)
        }
        "remove" => {
            let target = args.required(0, "value")?;
            let pos = items
                .iter()
                .position(|v| v.py_eq(&target))
                .ok_or_else(|| SandboxError::value_error("list.remove(x): x not in list"))?;
            items.remove(pos);
            Value::None
        }
        "index" => {
            let target = args.required(0, "value")?;
            let pos = items
                .iter()
                .position(|v| v.py_eq(&target))
                .ok_or_else(|| SandboxError::value_error(format!("{} is not in list", target.repr())))?;
            Value::from(pos)
        }
        "count" => {
            let target = args.required(0, "value")?;
            Value::from(items.iter().filter(|v| v.py_eq(&target)).count())
        }
        "sort" => {
            let key = args.kw("key");
            let reverse = match args.kw("reverse") {
                Some(v) => v.truthy()?,
                None => false,
            };
            let keys = sort_keys(interp, items, key.as_ref())?;
            *items = sort_by_keys(std::mem::take(items), &keys, reverse)?;
            Value::None
        }
        "reverse" => {
            items.reverse();
            Value::None
        }
        // `df.columns.tolist()` reaches here since column labels are plain lists.
        "copy" | "tolist" => Value::List(items.clone()),
        "clear" => {
            items.clear();
            Value::None
        }
        other => return Err(attribute_error(&Value::List(Vec::new()), other)),
    };
    args.finish()?;
    Ok(result)
}

fn dict_method(dict: &mut Dict, name: &str, mut args: Args) -> SandboxResult<Value> {
    args.func = name.to_string();
    let result = match name {
        "get" => {
            let key = args.required(0, "key")?;
            let default = args.take_raw(1, "default").unwrap_or(Value::None);
            dict.get(&key).cloned().unwrap_or(default)
        }
        "keys" => Value::List(dict.keys().cloned().collect()),
        "values" => Value::List(dict.values().cloned().collect()),
        "items" => Value::List(
            dict.iter()
                .map(|(k, v)| Value::Tuple(vec![k.clone(), v.clone()]))
                .collect(),
        ),
        "update" => {
            if let Some(other) = args.take(0, "other") {
                match other {
                    Value::Dict(other) => {
                        for (k, v) in other.iter() {
                            dict.insert(k.clone(), v.clone());
                        }
                    }
                    pairs => {
                        for pair in pairs.iterate()? {
                            let parts = pair.iterate()?;
                            if parts.len() != 2 {
                                return Err(SandboxError::value_error(
                                    "dictionary update sequence element has wrong length",
                                ));
                            }
                            dict.insert(parts[0].clone(), parts[1].clone());
                        }
                    }
                }
            }
            for (k, v) in args.drain_keywords() {
                dict.insert(Value::Str(k), v);
            }
            Value::None
        }
        "setdefault" => {
            let key = args.required(0, "key")?;
            let default = args.take_raw(1, "default").unwrap_or(Value::None);
            match dict.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    dict.insert(key, default.clone());
                    default
                }
            }
        }
        "pop" => {
            let key = args.required(0, "key")?;
            match (dict.remove(&key), args.take_raw(1, "default")) {
                (Some(v), _) => v,
                (None, Some(default)) => default,
                (None, None) => return Err(SandboxError::new(ErrorKind::Key, key.repr())),
            }
        }
        "copy" => Value::Dict(dict.clone()),
        "clear" => {
            dict.clear();
            Value::None
        }
        other => return Err(attribute_error(&Value::Dict(Dict::new()), other)),
    };
    args.finish()?;
    Ok(result)
}

// ---- subscripts ----

/// Positions selected by a Python slice over a sequence of `len` items
pub fn slice_positions(len: usize, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> SandboxResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(SandboxError::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
    let resolve = |v: Option<i64>, default: i64, lo: i64, hi: i64| match v {
        Some(i) if i < 0 => clamp(i + len, lo, hi),
        Some(i) => clamp(i, lo, hi),
        None => default,
    };
    let mut out = Vec::new();
    if step > 0 {
        let start = resolve(lower, 0, 0, len);
        let stop = resolve(upper, len, 0, len);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let start = resolve(lower, len - 1, -1, len - 1);
        let stop = resolve(upper, -1, -1, len - 1);
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

pub fn slice(container: &Value, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> SandboxResult<Value> {
    match container {
        Value::List(items) | Value::Tuple(items) => {
            let picked: Vec<Value> = slice_positions(items.len(), lower, upper, step)?
                .into_iter()
                .map(|i| items[i].clone())
                .collect();
            Ok(if matches!(container, Value::Tuple(_)) {
                Value::Tuple(picked)
            } else {
                Value::List(picked)
            })
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(Value::Str(
                slice_positions(chars.len(), lower, upper, step)?
                    .into_iter()
                    .map(|i| chars[i])
                    .collect(),
            ))
        }
        Value::Frame(_) | Value::Series(_) | Value::ILoc(_) => {
            tables::slice(container, lower, upper, step)
        }
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn get_item(container: &Value, key: &Value) -> SandboxResult<Value> {
    match container {
        Value::List(items) | Value::Tuple(items) => Ok(items[list_index(items, key)?].clone()),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = key
                .as_i64()
                .and_then(|i| normalize_index(i, chars.len()))
                .ok_or_else(|| SandboxError::new(ErrorKind::Index, "string index out of range"))?;
            Ok(Value::Str(chars[i].to_string()))
        }
        Value::Dict(dict) => dict
            .get(key)
            .cloned()
            .ok_or_else(|| SandboxError::new(ErrorKind::Key, key.repr())),
        Value::Frame(_) | Value::Series(_) | Value::GroupBy(_) | Value::ILoc(_) => {
            tables::get_item(container, key)
        }
        Value::Figure(_) | Value::Trace(_) => plotly::get_item(container, key),
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_template() {
        let out = format_template(
            "{} scored {wins:>3} ({0!r}) {{ok}}",
            &[Value::from("MI")],
            &[("wins".to_string(), Value::Int(7))],
        )
        .unwrap();
        assert_eq!(out, "MI scored   7 ('MI') {ok}");
    }

    #[test]
    fn test_slice_positions_follow_python() {
        assert_eq!(slice_positions(5, None, Some(2), None).unwrap(), vec![0, 1]);
        assert_eq!(slice_positions(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert_eq!(slice_positions(5, None, None, Some(-1)).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_positions(5, Some(1), None, Some(2)).unwrap(), vec![1, 3]);
        assert!(slice_positions(5, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_disallowed_import() {
        let err = resolve_module("os").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Import);
        assert!(matches!(resolve_module("plotly.express").unwrap(), Value::Module("px")));
    }

    #[test]
    fn test_range_values() {
        let values = range_values(10, 0, -3).unwrap();
        let ints: Vec<i64> = values.iter().filter_map(Value::as_i64).collect();
        assert_eq!(ints, vec![10, 7, 4, 1]);
        assert!(range_values(0, i64::MAX, 1).is_err());
    }

    #[test]
    fn test_args_keyword_precedence_and_leftovers() {
        let mut args = Args::new(
            "f",
            vec![Value::Int(1)],
            vec![("x".into(), Value::Int(2)), ("extra".into(), Value::None)],
        );
        assert_eq!(args.take(0, "x").and_then(|v| v.as_i64()), Some(2));
        let err = args.finish().unwrap_err();
        assert!(err.message.contains("'extra'"));
    }
}
