//! Runtime values of the snippet language

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use serde_json::{Map, Number, Value as Json};

use super::ast::{BinOp, Expr};
use super::error::{ErrorKind, SandboxError, SandboxResult};
use super::frame::{Frame, GroupBy, Series};
use crate::chart::{Figure, Trace, TraceKind};
use crate::data::Scalar;

/// Insertion-ordered mapping with value-equality keys
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &Value) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k.py_eq(key))
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.position(key).map(|i| &self.entries[i].1)
    }

    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| matches!(k, Value::Str(s) if s == key))
            .map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &Value) -> Option<&mut Value> {
        self.position(key).map(move |i| &mut self.entries[i].1)
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        match self.position(&key) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    pub fn contains(&self, key: &Value) -> bool {
        self.position(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }
}

impl FromIterator<(Value, Value)> for Dict {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut dict = Dict::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Expr,
}

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Dict),
    Frame(Rc<Frame>),
    Series(Rc<Series>),
    GroupBy(Rc<GroupBy>),
    /// `.iloc` indexer over a frame or series
    ILoc(Box<Value>),
    /// Figures are shared handles; every binding sees the same chart.
    Figure(Rc<RefCell<Figure>>),
    Trace(Trace),
    Module(&'static str),
    /// Library callable or type object, by qualified name (`len`, `px.bar`)
    Builtin(&'static str),
    /// Method bound to a receiver copy
    Method(Box<Value>, String),
    Lambda(Rc<Lambda>),
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

pub fn type_error(message: impl Into<String>) -> SandboxError {
    SandboxError::type_error(message)
}

pub fn figure_value(figure: Figure) -> Value {
    Value::Figure(Rc::new(RefCell::new(figure)))
}

impl Value {
    pub fn type_name(&self) -> String {
        match self {
            Value::None => "NoneType".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::Str(_) => "str".into(),
            Value::List(_) => "list".into(),
            Value::Tuple(_) => "tuple".into(),
            Value::Dict(_) => "dict".into(),
            Value::Frame(_) => "DataFrame".into(),
            Value::Series(_) => "Series".into(),
            Value::GroupBy(_) => "DataFrameGroupBy".into(),
            Value::ILoc(_) => "_iLocIndexer".into(),
            Value::Figure(_) => "Figure".into(),
            Value::Trace(t) => trace_class_name(&t.kind),
            Value::Module(_) => "module".into(),
            Value::Builtin(_) | Value::Method(..) => "builtin_function_or_method".into(),
            Value::Lambda(_) => "function".into(),
        }
    }

    pub fn from_scalar(scalar: &Scalar) -> Value {
        match scalar {
            Scalar::Null => Value::None,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::Int(*i),
            Scalar::Float(f) => Value::Float(*f),
            Scalar::Text(s) => Value::Str(s.clone()),
            Scalar::Timestamp(ts) => Value::Str(ts.to_rfc3339()),
        }
    }

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::Dict(
                map.iter()
                    .map(|(k, v)| (Value::Str(k.clone()), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON for the chart model; non-finite floats become null.
    pub fn to_json(&self) -> SandboxResult<Json> {
        Ok(match self {
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.clone()),
            Value::List(items) | Value::Tuple(items) => {
                Json::Array(items.iter().map(Value::to_json).collect::<SandboxResult<_>>()?)
            }
            Value::Dict(dict) => {
                let mut map = Map::new();
                for (k, v) in dict.iter() {
                    map.insert(json_key(k)?, v.to_json()?);
                }
                Json::Object(map)
            }
            Value::Series(series) => Json::Array(
                series
                    .values
                    .iter()
                    .map(Value::to_json)
                    .collect::<SandboxResult<_>>()?,
            ),
            Value::Frame(frame) => Json::Array(
                frame
                    .records()
                    .iter()
                    .map(Value::to_json)
                    .collect::<SandboxResult<_>>()?,
            ),
            Value::Figure(fig) => fig.borrow().to_json(),
            Value::Trace(trace) => serde_json::to_value(trace)
                .map_err(|e| SandboxError::value_error(e.to_string()))?,
            other => {
                return Err(type_error(format!(
                    "Object of type {} is not JSON serializable",
                    other.type_name()
                )))
            }
        })
    }

    /// Python truthiness; tables and columns refuse to collapse to a bool.
    pub fn truthy(&self) -> SandboxResult<bool> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) | Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !dict.is_empty(),
            Value::Frame(_) | Value::Series(_) => {
                return Err(SandboxError::value_error(format!(
                    "The truth value of a {} is ambiguous. Use a.empty, a.any() or a.all().",
                    self.type_name()
                )))
            }
            _ => true,
        })
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Value::Bool(_) | Value::Int(_) | Value::Float(_))
    }

    /// Missing-value test used by `fillna`, `dropna` and `isna`
    pub fn is_missing(&self) -> bool {
        match self {
            Value::None => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn py_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (a, b) if a.is_number() && b.is_number() => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_f64() == b.as_f64(),
            },
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
            }
            (Value::Dict(a), Value::Dict(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).is_some_and(|w| v.py_eq(w)))
            }
            (Value::Figure(a), Value::Figure(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) | (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Trace(a), Value::Trace(b)) => a == b,
            _ => false,
        }
    }

    pub fn py_cmp(&self, other: &Value) -> SandboxResult<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (a, b) if a.is_number() && b.is_number() => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Ok(x.cmp(&y)),
                _ => Ok(a
                    .as_f64()
                    .partial_cmp(&b.as_f64())
                    .unwrap_or(Ordering::Equal)),
            },
            (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.py_cmp(y)?;
                    if ord != Ordering::Equal {
                        return Ok(ord);
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => Err(type_error(format!(
                "'<' not supported between instances of '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// `str(value)`
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// `repr(value)`
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".into(),
            Value::Bool(true) => "True".into(),
            Value::Bool(false) => "False".into(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::List(items) => format!("[{}]", join_repr(items)),
            Value::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Value::Tuple(items) => format!("({})", join_repr(items)),
            Value::Dict(dict) => {
                let body: Vec<String> = dict
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", body.join(", "))
            }
            Value::Series(series) => series.describe(),
            Value::Frame(frame) => frame.describe(),
            Value::Module(name) => format!("<module '{}'>", module_path(name)),
            Value::Builtin(name) => format!("<built-in function {}>", name),
            Value::Method(recv, name) => format!("<bound method {}.{}>", recv.type_name(), name),
            Value::Lambda(_) => "<function <lambda>>".into(),
            Value::Figure(fig) => format!("Figure({} traces)", fig.borrow().data.len()),
            Value::Trace(trace) => format!("{}({})", trace_class_name(&trace.kind), trace.attrs.len()),
            other => format!("<{}>", other.type_name()),
        }
    }

    /// Elements produced by `for x in value`
    pub fn iterate(&self) -> SandboxResult<Vec<Value>> {
        match self {
            Value::List(items) | Value::Tuple(items) => Ok(items.clone()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
            Value::Dict(dict) => Ok(dict.keys().cloned().collect()),
            Value::Series(series) => Ok(series.values.clone()),
            Value::Frame(frame) => Ok(frame.columns().iter().map(|c| Value::from(c.as_str())).collect()),
            other => Err(type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    pub fn len(&self) -> SandboxResult<usize> {
        match self {
            Value::Str(s) => Ok(s.chars().count()),
            Value::List(items) | Value::Tuple(items) => Ok(items.len()),
            Value::Dict(dict) => Ok(dict.len()),
            Value::Series(series) => Ok(series.values.len()),
            Value::Frame(frame) => Ok(frame.len()),
            other => Err(type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        }
    }

    pub fn contains(&self, needle: &Value) -> SandboxResult<bool> {
        match self {
            Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(needle))),
            Value::Dict(dict) => Ok(dict.contains(needle)),
            Value::Str(s) => match needle {
                Value::Str(n) => Ok(s.contains(n.as_str())),
                other => Err(type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Value::Series(series) => Ok(series.labels().iter().any(|v| v.py_eq(needle))),
            Value::Frame(frame) => Ok(needle
                .as_str()
                .is_some_and(|c| frame.columns().iter().any(|col| col == c))),
            other => Err(type_error(format!(
                "argument of type '{}' is not iterable",
                other.type_name()
            ))),
        }
    }
}

fn json_key(key: &Value) -> SandboxResult<String> {
    match key {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(_) | Value::Float(_) => Ok(key.to_str()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::None => Ok("null".into()),
        other => Err(type_error(format!(
            "keys must be str, int, float, bool or None, not {}",
            other.type_name()
        ))),
    }
}

fn join_repr(items: &[Value]) -> String {
    items.iter().map(Value::repr).collect::<Vec<_>>().join(", ")
}

pub fn module_path(name: &str) -> &str {
    match name {
        "px" => "plotly.express",
        "go" => "plotly.graph_objects",
        "pd" => "pandas",
        "subplots" => "plotly.subplots",
        other => other,
    }
}

pub fn trace_class_name(kind: &TraceKind) -> String {
    let name = kind.as_str();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf".into() } else { "-inf".into() };
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let text = format!("{:e}", f);
        return match text.split_once('e') {
            Some((mantissa, exp)) => {
                let exp: i32 = exp.parse().unwrap_or(0);
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exp.abs())
            }
            None => text,
        };
    }
    if f.fract() == 0.0 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn group_thousands(digits: &str, sep: char) -> String {
    let (sign, digits) = match digits.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", digits),
    };
    let (int_part, frac) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    let mut grouped = String::new();
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(sep);
        }
        grouped.push(c);
    }
    match frac {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

/// Apply a format-spec mini-language string (`>8`, `,.2f`, `.1%`, `03d`).
pub fn format_spec(value: &Value, spec: &str) -> SandboxResult<String> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let chars: Vec<char> = spec.chars().collect();
    let mut i = 0;
    let mut fill = ' ';
    let mut align = None;
    if chars.len() >= 2 && "<>^=".contains(chars[1]) {
        fill = chars[0];
        align = Some(chars[1]);
        i = 2;
    } else if "<>^=".contains(chars[0]) {
        align = Some(chars[0]);
        i = 1;
    }
    let mut sign = '-';
    if i < chars.len() && "+- ".contains(chars[i]) {
        sign = chars[i];
        i += 1;
    }
    if i < chars.len() && chars[i] == '0' && align.is_none() {
        fill = '0';
        align = Some('=');
        i += 1;
    }
    let mut width = 0usize;
    while i < chars.len() && chars[i].is_ascii_digit() {
        width = width
            .saturating_mul(10)
            .saturating_add(chars[i].to_digit(10).unwrap_or(0) as usize);
        i += 1;
    }
    let mut grouping = None;
    if i < chars.len() && (chars[i] == ',' || chars[i] == '_') {
        grouping = Some(chars[i]);
        i += 1;
    }
    let mut precision = None;
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        let mut p = 0usize;
        while i < chars.len() && chars[i].is_ascii_digit() {
            p = p
                .saturating_mul(10)
                .saturating_add(chars[i].to_digit(10).unwrap_or(0) as usize);
            i += 1;
        }
        precision = Some(check_len(p)?);
    }
    let kind = chars.get(i).copied();
    if i + 1 < chars.len() {
        return Err(SandboxError::value_error(format!(
            "Invalid format specifier '{}'",
            spec
        )));
    }

    let numeric = value.is_number();
    let mut body = match (kind, value) {
        (Some('s'), _) | (None, Value::Str(_)) => {
            let s = value.to_str();
            match precision {
                Some(p) => s.chars().take(p).collect(),
                None => s,
            }
        }
        (Some('d'), v) if numeric => {
            let n = v.as_f64().unwrap_or(0.0).round() as i64;
            n.to_string()
        }
        (Some('f') | Some('F'), v) if numeric => {
            format!("{:.*}", precision.unwrap_or(6), v.as_f64().unwrap_or(0.0))
        }
        (Some('%'), v) if numeric => {
            format!("{:.*}%", precision.unwrap_or(6), v.as_f64().unwrap_or(0.0) * 100.0)
        }
        (Some('e'), v) if numeric => {
            let text = format!("{:.*e}", precision.unwrap_or(6), v.as_f64().unwrap_or(0.0));
            match text.split_once('e') {
                Some((m, exp)) => {
                    let exp: i32 = exp.parse().unwrap_or(0);
                    format!("{}e{}{:02}", m, if exp < 0 { '-' } else { '+' }, exp.abs())
                }
                None => text,
            }
        }
        (Some('g') | None, Value::Float(f)) if precision.is_some() => {
            let p = precision.unwrap_or(6).max(1);
            significant(*f, p)
        }
        (None | Some('g'), v) => v.to_str(),
        (Some(k), v) => {
            return Err(SandboxError::value_error(format!(
                "Unknown format code '{}' for object of type '{}'",
                k,
                v.type_name()
            )))
        }
    };

    if let Some(sep) = grouping {
        if numeric {
            body = match body.strip_suffix('%') {
                Some(inner) => format!("{}%", group_thousands(inner, sep)),
                None => group_thousands(&body, sep),
            };
        }
    }
    if numeric && sign != '-' && !body.starts_with('-') {
        body.insert(0, sign);
    }

    let len = body.chars().count();
    if len >= width {
        return Ok(body);
    }
    let pad = check_len(width)? - len;
    let align = align.unwrap_or(if numeric { '>' } else { '<' });
    let fill_str = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
    Ok(match align {
        '<' => format!("{}{}", body, fill_str(pad)),
        '^' => format!("{}{}{}", fill_str(pad / 2), body, fill_str(pad - pad / 2)),
        '=' => match body.chars().next() {
            Some(c) if c == '-' || c == '+' || c == ' ' => {
                format!("{}{}{}", c, fill_str(pad), &body[c.len_utf8()..])
            }
            _ => format!("{}{}", fill_str(pad), body),
        },
        _ => format!("{}{}", fill_str(pad), body),
    })
}

fn significant(f: f64, digits: usize) -> String {
    if f == 0.0 || !f.is_finite() {
        return format_float(f);
    }
    let magnitude = f.abs().log10().floor() as i64;
    let decimals = (digits as i64 - 1 - magnitude).max(0) as usize;
    let text = format!("{:.*}", decimals, f);
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

pub(crate) fn overflow() -> SandboxError {
    SandboxError::value_error("integer overflow")
}

fn zero_division(what: &str) -> SandboxError {
    SandboxError::new(ErrorKind::ZeroDivision, what.to_string())
}

/// Largest string or sequence a snippet may build
pub const MAX_SEQUENCE_LEN: usize = 10_000_000;

/// Gate for any result whose length the snippet controls; call before allocating.
pub fn check_len(len: usize) -> SandboxResult<usize> {
    if len > MAX_SEQUENCE_LEN {
        return Err(SandboxError::new(
            ErrorKind::ResourceLimit,
            format!("result of length {} exceeds the limit of {}", len, MAX_SEQUENCE_LEN),
        ));
    }
    Ok(len)
}

fn repeat_count(len: usize, n: i64) -> SandboxResult<usize> {
    let n = usize::try_from(n).unwrap_or(0);
    check_len(len.saturating_mul(n))?;
    Ok(n)
}

fn repeat<T: Clone>(items: &[T], n: i64) -> SandboxResult<Vec<T>> {
    let n = repeat_count(items.len(), n)?;
    let mut out = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        out.extend_from_slice(items);
    }
    Ok(out)
}

fn py_mod_f(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

/// Binary arithmetic on scalars and containers; columns broadcast.
pub fn binary(op: BinOp, left: &Value, right: &Value) -> SandboxResult<Value> {
    if matches!(left, Value::Series(_)) || matches!(right, Value::Series(_)) {
        return super::frame::series_binary(op, left, right);
    }

    let unsupported = || {
        type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op_symbol(op),
            left.type_name(),
            right.type_name()
        ))
    };

    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            check_len(a.len().saturating_add(b.len()))?;
            return Ok(Value::Str(format!("{}{}", a, b)));
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            check_len(a.len().saturating_add(b.len()))?;
            return Ok(Value::List(a.iter().chain(b).cloned().collect()));
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            check_len(a.len().saturating_add(b.len()))?;
            return Ok(Value::Tuple(a.iter().chain(b).cloned().collect()));
        }
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s)) if n.as_i64().is_some() => {
            let n = repeat_count(s.len(), n.as_i64().unwrap_or(0))?;
            return Ok(Value::Str(s.repeat(n)));
        }
        (BinOp::Mul, Value::List(items), n) | (BinOp::Mul, n, Value::List(items))
            if n.as_i64().is_some() =>
        {
            return Ok(Value::List(repeat(items, n.as_i64().unwrap_or(0))?))
        }
        (BinOp::BitAnd, Value::Bool(a), Value::Bool(b)) => return Ok(Value::Bool(*a && *b)),
        (BinOp::BitOr, Value::Bool(a), Value::Bool(b)) => return Ok(Value::Bool(*a || *b)),
        _ => {}
    }

    if !left.is_number() || !right.is_number() {
        return Err(unsupported());
    }

    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        return match op {
            BinOp::Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
            BinOp::Div => {
                if b == 0 {
                    Err(zero_division("division by zero"))
                } else {
                    Ok(Value::Float(a as f64 / b as f64))
                }
            }
            BinOp::FloorDiv => {
                if b == 0 {
                    Err(zero_division("integer division or modulo by zero"))
                } else {
                    let q = a.checked_div_euclid(b).ok_or_else(overflow)?;
                    let r = a.checked_rem_euclid(b).ok_or_else(overflow)?;
                    Ok(Value::Int(q - i64::from(b < 0 && r != 0)))
                }
            }
            BinOp::Mod => {
                if b == 0 {
                    Err(zero_division("integer division or modulo by zero"))
                } else {
                    // MIN % -1 is 0; wrapping_rem returns that instead of trapping
                    let r = a.wrapping_rem(b);
                    Ok(Value::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
                }
            }
            BinOp::Pow => {
                if b >= 0 {
                    u32::try_from(b)
                        .ok()
                        .and_then(|e| a.checked_pow(e))
                        .map(Value::Int)
                        .ok_or_else(overflow)
                } else {
                    Ok(Value::Float((a as f64).powf(b as f64)))
                }
            }
            BinOp::BitAnd => Ok(Value::Int(a & b)),
            BinOp::BitOr => Ok(Value::Int(a | b)),
        };
    }

    let (a, b) = match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(unsupported()),
    };
    match op {
        BinOp::Add => Ok(Value::Float(a + b)),
        BinOp::Sub => Ok(Value::Float(a - b)),
        BinOp::Mul => Ok(Value::Float(a * b)),
        BinOp::Div if b == 0.0 => Err(zero_division("float division by zero")),
        BinOp::Div => Ok(Value::Float(a / b)),
        BinOp::FloorDiv if b == 0.0 => Err(zero_division("float floor division by zero")),
        BinOp::FloorDiv => Ok(Value::Float((a / b).floor())),
        BinOp::Mod if b == 0.0 => Err(zero_division("float modulo")),
        BinOp::Mod => Ok(Value::Float(py_mod_f(a, b))),
        BinOp::Pow => Ok(Value::Float(a.powf(b))),
        BinOp::BitAnd | BinOp::BitOr => Err(unsupported()),
    }
}

pub fn op_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
        BinOp::BitAnd => "&",
        BinOp::BitOr => "|",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_semantics() {
        assert!(binary(BinOp::Div, &Value::Int(7), &Value::Int(2))
            .unwrap()
            .py_eq(&Value::Float(3.5)));
        assert!(binary(BinOp::FloorDiv, &Value::Int(-7), &Value::Int(2))
            .unwrap()
            .py_eq(&Value::Int(-4)));
        assert!(binary(BinOp::Mod, &Value::Int(-7), &Value::Int(3))
            .unwrap()
            .py_eq(&Value::Int(2)));
        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ZeroDivision);
        let err = binary(BinOp::Add, &Value::from("a"), &Value::Int(1)).unwrap_err();
        assert!(err.message.contains("'str' and 'int'"));
    }

    #[test]
    fn test_json_round_trip_keeps_order_and_nulls_nan() {
        let value = Value::from_json(&json!({"b": [1, 2.5, "x"], "a": null}));
        assert_eq!(value.to_json().unwrap(), json!({"b": [1, 2.5, "x"], "a": null}));
        assert_eq!(Value::Float(f64::NAN).to_json().unwrap(), Json::Null);
        assert!(Value::Lambda(Rc::new(Lambda {
            params: vec![],
            body: Expr::Name("x".into())
        }))
        .to_json()
        .is_err());
    }

    #[test]
    fn test_repr_matches_python() {
        assert_eq!(Value::Float(2.0).repr(), "2.0");
        assert_eq!(Value::Float(0.25).repr(), "0.25");
        assert_eq!(Value::Float(1e20).repr(), "1e+20");
        assert_eq!(Value::Tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(
            Value::List(vec![Value::from("a"), Value::None, Value::Bool(true)]).repr(),
            "['a', None, True]"
        );
    }

    #[test]
    fn test_format_spec() {
        assert_eq!(format_spec(&Value::Float(3.14159), ".2f").unwrap(), "3.14");
        assert_eq!(format_spec(&Value::Float(0.256), ".1%").unwrap(), "25.6%");
        assert_eq!(format_spec(&Value::Int(1234567), ",").unwrap(), "1,234,567");
        assert_eq!(format_spec(&Value::Int(7), "03d").unwrap(), "007");
        assert_eq!(format_spec(&Value::from("MI"), ">4").unwrap(), "  MI");
        assert_eq!(format_spec(&Value::from("MI"), "^6").unwrap(), "  MI  ");
    }

    #[test]
    fn test_dict_keys_use_value_equality() {
        let mut dict = Dict::new();
        dict.insert(Value::Int(1), Value::from("one"));
        dict.insert(Value::Float(1.0), Value::from("uno"));
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(&Value::Int(1)).and_then(Value::as_str), Some("uno"));
    }
}
