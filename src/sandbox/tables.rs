//! Snippet-facing table API: `pd.*`, frame, column and group methods

use std::rc::Rc;

use super::builtins::{attribute_error, slice_positions, to_names, to_usize, Args};
use super::error::{ErrorKind, SandboxError, SandboxResult};
use super::frame::{aggregate, convert, Frame, GroupBy, Index, Selection, Series};
use super::interpreter::Interpreter;
use super::value::{type_error, Dict, Value};

const FRAME_METHODS: &[&str] = &[
    "head", "tail", "sort_values", "to_dict", "to_numpy", "copy", "reset_index", "fillna",
    "dropna", "rename", "drop", "groupby", "iterrows", "nlargest", "nsmallest", "drop_duplicates",
];

const SERIES_METHODS: &[&str] = &[
    "tolist", "to_list", "unique", "nunique", "sum", "mean", "median", "min", "max", "count",
    "astype", "isin", "round", "abs", "fillna", "isna", "isnull", "notna", "notnull",
    "reset_index", "sort_values", "head", "tail", "value_counts", "map", "apply", "to_numpy",
    "copy", "cumsum", "idxmax", "idxmin", "any", "all", "to_dict",
];

const GROUP_METHODS: &[&str] = &[
    "sum", "mean", "median", "min", "max", "count", "size", "nunique", "first", "last", "agg",
    "aggregate",
];

fn frame(value: Frame) -> Value {
    Value::Frame(Rc::new(value))
}

fn series(value: Series) -> Value {
    Value::Series(Rc::new(value))
}

fn bound(value: &Value, name: &str) -> Value {
    Value::Method(Box::new(value.clone()), name.to_string())
}

pub fn get_attr(value: &Value, name: &str) -> SandboxResult<Value> {
    match value {
        Value::Frame(f) => match name {
            "columns" => Ok(Value::List(f.columns().iter().map(|c| Value::from(c.as_str())).collect())),
            "shape" => Ok(Value::Tuple(vec![Value::from(f.len()), Value::from(f.columns().len())])),
            "empty" => Ok(Value::Bool(f.is_empty())),
            "values" => Ok(Value::List(f.rows())),
            "index" => Ok(Value::List((0..f.len()).map(Value::from).collect())),
            "iloc" => Ok(Value::ILoc(Box::new(value.clone()))),
            _ if FRAME_METHODS.contains(&name) => Ok(bound(value, name)),
            _ if f.has_column(name) => Ok(series(f.column(name)?)),
            _ => Err(attribute_error(value, name)),
        },
        Value::Series(s) => match name {
            "values" => Ok(Value::List(s.values.clone())),
            "index" => Ok(Value::List(s.labels())),
            "name" => Ok(s.name.clone().map(Value::Str).unwrap_or(Value::None)),
            "empty" => Ok(Value::Bool(s.values.is_empty())),
            "shape" => Ok(Value::Tuple(vec![Value::from(s.values.len())])),
            "iloc" => Ok(Value::ILoc(Box::new(value.clone()))),
            _ if SERIES_METHODS.contains(&name) => Ok(bound(value, name)),
            _ => Err(attribute_error(value, name)),
        },
        Value::GroupBy(_) if GROUP_METHODS.contains(&name) => Ok(bound(value, name)),
        other => Err(attribute_error(other, name)),
    }
}

pub fn get_item(container: &Value, key: &Value) -> SandboxResult<Value> {
    match (container, key) {
        (Value::Frame(f), Value::Str(name)) => Ok(series(f.column(name)?)),
        (Value::Frame(f), Value::List(_) | Value::Tuple(_)) => Ok(frame(f.select(&to_names(key)?)?)),
        (Value::Frame(f), Value::Series(mask)) => Ok(frame(f.filter(mask)?)),
        (Value::Series(s), Value::Series(mask)) => Ok(series(s.filter(mask)?)),
        (Value::Series(s), Value::List(labels)) => {
            let values = labels.iter().map(|l| s.get(l)).collect::<SandboxResult<_>>()?;
            Ok(series(Series {
                name: s.name.clone(),
                values,
                index: Some(Index {
                    names: s.index.as_ref().map(|i| i.names.clone()).unwrap_or_default(),
                    labels: labels.clone(),
                }),
            }))
        }
        (Value::Series(s), label) => s.get(label),
        (Value::GroupBy(g), Value::Str(col)) => Ok(Value::GroupBy(Rc::new(GroupBy {
            selection: Some(Selection::Column(col.clone())),
            ..(**g).clone()
        }))),
        (Value::GroupBy(g), Value::List(_)) => Ok(Value::GroupBy(Rc::new(GroupBy {
            selection: Some(Selection::Columns(to_names(key)?)),
            ..(**g).clone()
        }))),
        (Value::ILoc(inner), index) => {
            let i = index.as_i64().ok_or_else(|| {
                type_error(format!(
                    "Cannot index by location index with a non-integer key {}",
                    index.repr()
                ))
            })?;
            match inner.as_ref() {
                Value::Series(s) => s.positional(i),
                Value::Frame(f) => {
                    let len = f.len() as i64;
                    let at = if i < 0 { i + len } else { i };
                    if !(0..len).contains(&at) {
                        return Err(SandboxError::new(
                            ErrorKind::Index,
                            "single positional indexer is out-of-bounds",
                        ));
                    }
                    let row = at as usize;
                    let picked = f.take(&[row]);
                    Ok(series(Series {
                        name: Some(row.to_string()),
                        values: picked
                            .columns()
                            .iter()
                            .map(|c| picked.column_values(c).map(|v| v[0].clone()))
                            .collect::<SandboxResult<_>>()?,
                        index: Some(Index {
                            names: Vec::new(),
                            labels: f.columns().iter().map(|c| Value::from(c.as_str())).collect(),
                        }),
                    }))
                }
                other => Err(type_error(format!("cannot index {}", other.type_name()))),
            }
        }
        (c, k) => Err(type_error(format!(
            "cannot index {} with {}",
            c.type_name(),
            k.type_name()
        ))),
    }
}

pub fn slice(container: &Value, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> SandboxResult<Value> {
    match container {
        Value::Frame(f) => Ok(frame(f.take(&slice_positions(f.len(), lower, upper, step)?))),
        Value::Series(s) => Ok(series(s.take(&slice_positions(s.values.len(), lower, upper, step)?))),
        Value::ILoc(inner) => slice(inner, lower, upper, step),
        other => Err(type_error(format!("cannot slice {}", other.type_name()))),
    }
}

/// `df["col"] = values`
pub fn set_item(container: &mut Value, key: &Value, value: &Value) -> SandboxResult<()> {
    match (container, key) {
        (Value::Frame(f), Value::Str(name)) => Rc::make_mut(f).set_column(name, value),
        (c, k) => Err(type_error(format!(
            "'{}' does not support item assignment with {} keys",
            c.type_name(),
            k.type_name()
        ))),
    }
}

fn type_target(value: &Value) -> SandboxResult<String> {
    match value {
        Value::Builtin(name) => Ok(name.to_string()),
        Value::Str(s) => Ok(s.clone()),
        other => Err(type_error(format!("data type {} not understood", other.repr()))),
    }
}

pub fn call_function(_interp: &mut Interpreter, name: &str, mut args: Args) -> SandboxResult<Value> {
    let result = match name {
        "pd.DataFrame" => {
            let data = args.take(0, "data");
            let columns = args.take(2, "columns").map(|c| to_names(&c)).transpose()?;
            args.kw("index");
            let built = match &data {
                None => Frame::new(
                    columns.clone().unwrap_or_default(),
                    vec![Vec::new(); columns.as_ref().map(Vec::len).unwrap_or(0)],
                )?,
                Some(Value::Frame(f)) => (**f).clone(),
                Some(Value::Dict(d)) => Frame::from_dict(d)?,
                Some(Value::List(rows)) | Some(Value::Tuple(rows)) => {
                    if rows.iter().all(|r| matches!(r, Value::Dict(_))) {
                        Frame::from_records(rows)?
                    } else {
                        Frame::from_rows(rows, columns.clone())?
                    }
                }
                Some(other) => {
                    return Err(type_error(format!(
                        "DataFrame constructor not properly called with {}",
                        other.type_name()
                    )))
                }
            };
            match (&data, columns) {
                (Some(Value::List(_) | Value::Tuple(_)), Some(cols))
                    if built.columns() != cols.as_slice() =>
                {
                    frame(built.select(&cols)?)
                }
                _ => frame(built),
            }
        }
        "pd.Series" => {
            let values = match args.take(0, "data") {
                Some(v) => v.iterate()?,
                None => Vec::new(),
            };
            let name = args.take(2, "name").map(|n| n.to_str());
            args.kw("index");
            series(Series::new(name, values))
        }
        "pd.isna" | "pd.isnull" | "pd.notna" | "pd.notnull" => {
            let negate = name.contains("not");
            let value = args.required(0, "obj")?;
            match value {
                Value::Series(s) => {
                    let flags = s.isna();
                    if negate {
                        series(Series {
                            values: flags.values.iter().map(|v| Value::Bool(!matches!(v, Value::Bool(true)))).collect(),
                            ..flags
                        })
                    } else {
                        series(flags)
                    }
                }
                scalar => Value::Bool(scalar.is_missing() != negate),
            }
        }
        "pd.to_numeric" => {
            let value = args.required(0, "arg")?;
            let coerce = matches!(args.kw("errors"), Some(Value::Str(ref e)) if e == "coerce");
            let numeric = |v: &Value| -> SandboxResult<Value> {
                match v {
                    Value::Str(s) if s.trim().parse::<i64>().is_ok() => convert(v, "int"),
                    Value::Int(_) | Value::Float(_) | Value::None => Ok(v.clone()),
                    other => match convert(other, "float") {
                        Ok(f) => Ok(f),
                        Err(_) if coerce => Ok(Value::Float(f64::NAN)),
                        Err(e) => Err(e),
                    },
                }
            };
            match value {
                Value::Series(s) => series(s.map_values(numeric)?),
                Value::List(items) => Value::List(items.iter().map(numeric).collect::<SandboxResult<_>>()?),
                scalar => numeric(&scalar)?,
            }
        }
        other => {
            return Err(SandboxError::new(
                ErrorKind::Attribute,
                format!("module 'pandas' has no attribute '{}'", other.trim_start_matches("pd.")),
            ))
        }
    };
    args.finish()?;
    Ok(result)
}

pub fn call_method(
    interp: &mut Interpreter,
    receiver: &mut Value,
    name: &str,
    mut args: Args,
) -> SandboxResult<Value> {
    args.func = name.to_string();
    let result = match &*receiver {
        Value::Frame(f) => frame_method(interp, f, name, &mut args)?,
        Value::Series(s) => series_method(interp, s, name, &mut args)?,
        Value::GroupBy(g) => group_method(g, name, &mut args)?,
        other => return Err(attribute_error(other, name)),
    };
    args.finish()?;
    Ok(result)
}

fn ascending_flags(args: &mut Args, pos: usize) -> SandboxResult<Vec<bool>> {
    match args.take(pos, "ascending") {
        None => Ok(vec![true]),
        Some(Value::List(flags)) | Some(Value::Tuple(flags)) => {
            flags.iter().map(Value::truthy).collect()
        }
        Some(flag) => Ok(vec![flag.truthy()?]),
    }
}

fn frame_method(
    _interp: &mut Interpreter,
    f: &Rc<Frame>,
    name: &str,
    args: &mut Args,
) -> SandboxResult<Value> {
    Ok(match name {
        "head" => frame(f.head(args.take_usize(0, "n")?.unwrap_or(5))),
        "tail" => frame(f.tail(args.take_usize(0, "n")?.unwrap_or(5))),
        "sort_values" => {
            let by = to_names(&args.required(0, "by")?)?;
            let ascending = ascending_flags(args, 1)?;
            args.kw("kind");
            frame(f.sort_values(&by, &ascending)?)
        }
        "nlargest" | "nsmallest" => {
            let n = to_usize(&args.required(0, "n")?, "n")?;
            let by = to_names(&args.required(1, "columns")?)?;
            frame(f.sort_values(&by, &[name == "nsmallest"])?.head(n))
        }
        "to_dict" => {
            let orient = args
                .take(0, "orient")
                .map(|o| o.to_str())
                .unwrap_or_else(|| "dict".to_string());
            match orient.as_str() {
                "records" => Value::List(f.records()),
                "list" => f.column_lists(),
                "dict" => Value::Dict(
                    f.columns()
                        .iter()
                        .map(|c| {
                            let col = f.column_values(c)?;
                            Ok((
                                Value::from(c.as_str()),
                                Value::Dict(
                                    col.iter()
                                        .enumerate()
                                        .map(|(i, v)| (Value::from(i), v.clone()))
                                        .collect(),
                                ),
                            ))
                        })
                        .collect::<SandboxResult<Vec<_>>>()?
                        .into_iter()
                        .collect(),
                ),
                other => {
                    return Err(SandboxError::value_error(format!(
                        "orient '{}' not understood",
                        other
                    )))
                }
            }
        }
        "to_numpy" => Value::List(f.rows()),
        "copy" => frame((**f).clone()),
        "reset_index" => {
            args.kw("drop");
            args.kw("inplace");
            frame((**f).clone())
        }
        "fillna" => frame(f.fillna(&args.required(0, "value")?)),
        "dropna" => {
            let subset = args.take(0, "subset").map(|s| to_names(&s)).transpose()?;
            frame(f.dropna(subset.as_deref())?)
        }
        "rename" => match args.kw("columns") {
            Some(Value::Dict(mapping)) => frame(f.rename(&mapping)),
            Some(other) => {
                return Err(type_error(format!(
                    "rename(columns=) expects a dict, not {}",
                    other.type_name()
                )))
            }
            None => frame((**f).clone()),
        },
        "drop" => {
            let columns = match args.kw("columns") {
                Some(c) => c,
                None => {
                    let labels = args.required(0, "labels")?;
                    let axis = args.take(1, "axis");
                    let is_columns = matches!(&axis, Some(Value::Int(1)))
                        || matches!(&axis, Some(Value::Str(a)) if a == "columns");
                    if !is_columns {
                        return Err(SandboxError::value_error(
                            "row labels cannot be dropped; pass columns= or axis=1",
                        ));
                    }
                    labels
                }
            };
            frame(f.drop_columns(&to_names(&columns)?)?)
        }
        "drop_duplicates" => {
            let subset = match args.take(0, "subset") {
                Some(s) => to_names(&s)?,
                None => f.columns().to_vec(),
            };
            let keys = f.select(&subset)?.rows();
            let mut kept: Vec<usize> = Vec::new();
            for (i, key) in keys.iter().enumerate() {
                if !kept.iter().any(|&k| keys[k].py_eq(key)) {
                    kept.push(i);
                }
            }
            frame(f.take(&kept))
        }
        "groupby" => {
            let keys = to_names(&args.required(0, "by")?)?;
            for key in &keys {
                f.column_values(key)?;
            }
            let as_index = args.kw("as_index").map(|v| v.truthy()).transpose()?;
            let sort = args.kw("sort").map(|v| v.truthy()).transpose()?;
            Value::GroupBy(Rc::new(GroupBy {
                as_index: as_index.unwrap_or(true),
                sort: sort.unwrap_or(true),
                ..GroupBy::new(Rc::clone(f), keys)
            }))
        }
        "iterrows" => Value::List(f.iterrows()),
        other => return Err(attribute_error(&Value::Frame(Rc::clone(f)), other)),
    })
}

fn round_to(value: &Value, digits: i32) -> Value {
    match value {
        Value::Float(x) => {
            let scale = 10f64.powi(digits);
            Value::Float((x * scale).round() / scale)
        }
        other => other.clone(),
    }
}

fn series_method(
    interp: &mut Interpreter,
    s: &Rc<Series>,
    name: &str,
    args: &mut Args,
) -> SandboxResult<Value> {
    Ok(match name {
        "tolist" | "to_list" | "to_numpy" => Value::List(s.values.clone()),
        "unique" => Value::List(s.unique()),
        "sum" | "mean" | "median" | "min" | "max" | "count" | "nunique" => {
            aggregate(&s.values, name)?
        }
        "astype" => series(s.astype(&type_target(&args.required(0, "dtype")?)?)?),
        "isin" => series(s.isin(&args.required(0, "values")?.iterate()?)),
        "round" => {
            let digits = args.take(0, "decimals").and_then(|d| d.as_i64()).unwrap_or(0) as i32;
            series(s.map_values(|v| Ok(round_to(v, digits)))?)
        }
        "abs" => series(s.map_values(|v| match v {
            Value::Int(i) => Ok(Value::Int(i.abs())),
            Value::Float(f) => Ok(Value::Float(f.abs())),
            other => Ok(other.clone()),
        })?),
        "fillna" => series(s.fillna(&args.required(0, "value")?)),
        "isna" | "isnull" => series(s.isna()),
        "notna" | "notnull" => series(s.map_values(|v| Ok(Value::Bool(!v.is_missing())))?),
        "reset_index" => {
            let value_name = args.take(0, "name").map(|n| n.to_str());
            args.kw("drop");
            frame(s.reset_index(value_name)?)
        }
        "sort_values" => series(s.sort_values(args.take_bool(0, "ascending", true)?)),
        "head" => series(s.head(args.take_usize(0, "n")?.unwrap_or(5))),
        "tail" => series(s.tail(args.take_usize(0, "n")?.unwrap_or(5))),
        "value_counts" => series(s.value_counts()),
        "copy" => series((**s).clone()),
        "map" | "apply" => {
            let func = args.required(0, "func")?;
            let mapped = match &func {
                Value::Dict(mapping) => s.map_values(|v| Ok(mapping.get(v).cloned().unwrap_or(Value::Float(f64::NAN))))?,
                callable => {
                    let mut out = Vec::with_capacity(s.values.len());
                    for v in &s.values {
                        out.push(interp.call(callable, Args::positional(name, vec![v.clone()]))?);
                    }
                    Series {
                        values: out,
                        ..(**s).clone()
                    }
                }
            };
            series(mapped)
        }
        "cumsum" => {
            let mut total = Value::Int(0);
            let mut out = Vec::with_capacity(s.values.len());
            for v in &s.values {
                if v.is_missing() {
                    out.push(v.clone());
                    continue;
                }
                total = super::value::binary(super::ast::BinOp::Add, &total, v)?;
                out.push(total.clone());
            }
            series(Series {
                values: out,
                ..(**s).clone()
            })
        }
        "idxmax" | "idxmin" => {
            let target = aggregate(&s.values, if name == "idxmax" { "max" } else { "min" })?;
            let pos = s
                .values
                .iter()
                .position(|v| v.py_eq(&target))
                .ok_or_else(|| SandboxError::value_error("attempt to get argmax of an empty sequence"))?;
            s.labels()[pos].clone()
        }
        "any" | "all" => {
            let want_all = name == "all";
            let mut result = want_all;
            for v in s.values.iter().filter(|v| !v.is_missing()) {
                if v.truthy()? != want_all {
                    result = !want_all;
                    break;
                }
            }
            Value::Bool(result)
        }
        "to_dict" => Value::Dict(s.labels().into_iter().zip(s.values.iter().cloned()).collect::<Dict>()),
        other => return Err(attribute_error(&Value::Series(Rc::clone(s)), other)),
    })
}

fn group_method(g: &Rc<GroupBy>, name: &str, args: &mut Args) -> SandboxResult<Value> {
    match name {
        "size" => g.size(),
        "agg" | "aggregate" => {
            let spec = args.required(0, "func")?;
            let funcs: Vec<(String, String)> = match spec {
                Value::Str(func) => vec![(String::new(), func)],
                Value::Dict(mapping) => mapping
                    .iter()
                    .map(|(col, func)| match func {
                        Value::Str(f) => Ok((col.to_str(), f.clone())),
                        other => Err(type_error(format!(
                            "aggregation for '{}' must be a function name, not {}",
                            col.to_str(),
                            other.type_name()
                        ))),
                    })
                    .collect::<SandboxResult<_>>()?,
                other => {
                    return Err(type_error(format!(
                        "agg() expects a function name or a mapping, not {}",
                        other.type_name()
                    )))
                }
            };
            g.aggregate(&funcs)
        }
        func => {
            args.kw("numeric_only");
            g.aggregate(&[(String::new(), func.to_string())])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxLimits;

    fn record(team: &str, wins: i64) -> Value {
        let mut dict = Dict::new();
        dict.insert(Value::from("team"), Value::from(team));
        dict.insert(Value::from("wins"), Value::Int(wins));
        Value::Dict(dict)
    }

    fn sample() -> Value {
        frame(
            Frame::from_records(&[
                record("MI", 11),
                record("DC", 8),
            ])
            .unwrap(),
        )
    }

    fn call(interp: &mut Interpreter, recv: &Value, name: &str, positional: Vec<Value>) -> Value {
        let mut recv = recv.clone();
        call_method(interp, &mut recv, name, Args::positional(name, positional)).unwrap()
    }

    #[test]
    fn test_column_access_and_listing() {
        let df = sample();
        let teams = get_item(&df, &Value::from("team")).unwrap();
        let mut interp = Interpreter::new(&SandboxLimits::default());
        let listed = call(&mut interp, &teams, "tolist", vec![]);
        assert_eq!(listed.repr(), "['MI', 'DC']");
        assert_eq!(get_attr(&df, "shape").unwrap().repr(), "(2, 2)");
        assert!(get_attr(&df, "nope").is_err());
    }

    #[test]
    fn test_to_dict_records() {
        let mut interp = Interpreter::new(&SandboxLimits::default());
        let records = call(&mut interp, &sample(), "to_dict", vec!["records".into()]);
        assert_eq!(records.repr(), "[{'team': 'MI', 'wins': 11}, {'team': 'DC', 'wins': 8}]");
    }

    #[test]
    fn test_nlargest_and_iloc() {
        let mut interp = Interpreter::new(&SandboxLimits::default());
        let top = call(&mut interp, &sample(), "nsmallest", vec![Value::Int(1), "wins".into()]);
        let iloc = get_attr(&top, "iloc").unwrap();
        let row = get_item(&iloc, &Value::Int(0)).unwrap();
        assert_eq!(get_item(&row, &Value::from("team")).unwrap().as_str(), Some("DC"));
    }

    #[test]
    fn test_column_assignment() {
        let mut df = sample();
        set_item(&mut df, &Value::from("season"), &Value::Int(2020)).unwrap();
        let Value::Frame(f) = &df else { panic!() };
        assert_eq!(f.columns(), ["team", "wins", "season"]);
    }

    #[test]
    fn test_pd_dataframe_from_rows_with_columns() {
        let mut interp = Interpreter::new(&SandboxLimits::default());
        let rows = Value::List(vec![
            Value::List(vec!["MI".into(), Value::Int(3)]),
            Value::List(vec!["DC".into(), Value::Int(1)]),
        ]);
        let df = call_function(
            &mut interp,
            "pd.DataFrame",
            Args::new(
                "DataFrame",
                vec![rows],
                vec![("columns".into(), Value::List(vec!["team".into(), "titles".into()]))],
            ),
        )
        .unwrap();
        assert_eq!(get_attr(&df, "columns").unwrap().repr(), "['team', 'titles']");
    }
}
