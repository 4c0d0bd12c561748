//! Property paths
//!
//! Relayout/restyle patches address nested attributes with dotted paths such
//! as `yaxis2.type`, `title.text` or `annotations[1].text`. Keyword arguments
//! use the underscore form (`title_text`, `marker_color`) which expands to
//! the same nesting.

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ChartError, ChartResult};

lazy_static! {
    static ref PATH_PART: Regex = Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)((?:\[\d+\])*)$").unwrap();
    static ref INDEX: Regex = Regex::new(r"\[(\d+)\]").unwrap();
}

/// Attribute names that legitimately contain an underscore
const UNDERSCORE_NAMES: &[&str] = &["error_x", "error_y", "error_z"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Split `annotations[1].text` into `[Key, Index, Key]`.
pub fn parse_path(path: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    for part in path.split('.') {
        let caps = PATH_PART.captures(part)?;
        segments.push(Segment::Key(caps[1].to_string()));
        for idx in INDEX.captures_iter(&caps[2]) {
            segments.push(Segment::Index(idx[1].parse().ok()?));
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments)
    }
}

/// Expand an underscore keyword into nested path parts.
///
/// `xaxis2_title_text` becomes `["xaxis2", "title", "text"]`; a leading
/// `error_y` stays whole.
pub fn expand_underscore_key(key: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut rest = key;
    while !rest.is_empty() {
        if let Some(name) = UNDERSCORE_NAMES
            .iter()
            .find(|n| rest == **n || rest.starts_with(&format!("{}_", n)))
            .copied()
        {
            parts.push(name.to_string());
            rest = rest[name.len()..].trim_start_matches('_');
            continue;
        }
        match rest.find('_') {
            Some(0) => rest = &rest[1..],
            Some(pos) => {
                parts.push(rest[..pos].to_string());
                rest = &rest[pos + 1..];
            }
            None => {
                parts.push(rest.to_string());
                rest = "";
            }
        }
    }
    parts
}

/// Turn `{"title_text": "A", "marker": {...}}` into nested mappings.
pub fn expand_underscore_map(map: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        let parts = expand_underscore_key(&key);
        if parts.len() <= 1 {
            merge_value(&mut out, key, value);
            continue;
        }
        let mut nested = value;
        for part in parts[1..].iter().rev() {
            let mut wrapper = Map::new();
            wrapper.insert(part.clone(), nested);
            nested = Value::Object(wrapper);
        }
        merge_value(&mut out, parts[0].clone(), nested);
    }
    out
}

/// Insert `value` at `key`, merging when both sides are mappings.
pub fn merge_value(target: &mut Map<String, Value>, key: String, value: Value) {
    if let Value::Object(incoming) = value {
        if let Some(Value::Object(existing)) = target.get_mut(&key) {
            deep_merge(existing, incoming);
            return;
        }
        target.insert(key, Value::Object(incoming));
        return;
    }
    target.insert(key, value);
}

/// Recursively merge `patch` into `target`; non-mapping values replace.
pub fn deep_merge(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        merge_value(target, key, value);
    }
}

/// Set `new` at `segments` below `root`, creating intermediate containers.
/// A `null` at a key removes it.
pub fn set_in(root: &mut Value, segments: &[Segment], new: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *root = new;
        return;
    };

    match first {
        Segment::Key(key) => {
            if !root.is_object() {
                *root = Value::Object(Map::new());
            }
            let Value::Object(obj) = root else { return };
            if rest.is_empty() {
                if new.is_null() {
                    obj.remove(key);
                } else {
                    obj.insert(key.clone(), new);
                }
                return;
            }
            let child = obj.entry(key.clone()).or_insert(Value::Null);
            set_in(child, rest, new);
        }
        Segment::Index(idx) => {
            if !root.is_array() {
                *root = Value::Array(Vec::new());
            }
            let Value::Array(items) = root else { return };
            while items.len() <= *idx {
                items.push(Value::Null);
            }
            if rest.is_empty() {
                items[*idx] = new;
            } else {
                set_in(&mut items[*idx], rest, new);
            }
        }
    }
}

pub fn get_in<'a>(root: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |node, segment| match segment {
        Segment::Key(key) => node.get(key.as_str()),
        Segment::Index(idx) => node.get(*idx),
    })
}

/// Apply a dotted-path assignment to any serde model by round-tripping it
/// through JSON.
pub fn set_path<T>(target: &mut T, path: &str, value: Value) -> ChartResult<()>
where
    T: Serialize + DeserializeOwned,
{
    let segments = parse_path(path)
        .ok_or_else(|| ChartError::Serialization(format!("invalid property path '{}'", path)))?;
    let mut json = serde_json::to_value(&*target)?;
    set_in(&mut json, &segments, value);
    *target = serde_json::from_value(json)
        .map_err(|e| ChartError::Serialization(format!("patch '{}' breaks the chart: {}", path, e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_path_with_indices() {
        assert_eq!(
            parse_path("annotations[1].text").unwrap(),
            vec![
                Segment::Key("annotations".into()),
                Segment::Index(1),
                Segment::Key("text".into())
            ]
        );
        assert!(parse_path("annotations[x].text").is_none());
        assert!(parse_path("").is_none());
    }

    #[test]
    fn test_expand_underscore_key() {
        assert_eq!(expand_underscore_key("title_text"), vec!["title", "text"]);
        assert_eq!(expand_underscore_key("xaxis2_type"), vec!["xaxis2", "type"]);
        assert_eq!(expand_underscore_key("error_y_array"), vec!["error_y", "array"]);
        assert_eq!(expand_underscore_key("showlegend"), vec!["showlegend"]);
    }

    #[test]
    fn test_expand_merges_siblings() {
        let map = json!({"title_text": "A", "title_x": 0.5, "height": 300});
        let expanded = expand_underscore_map(map.as_object().unwrap().clone());
        assert_eq!(
            Value::Object(expanded),
            json!({"title": {"text": "A", "x": 0.5}, "height": 300})
        );
    }

    #[test]
    fn test_set_in_grows_arrays_and_removes_null() {
        let mut root = json!({"annotations": [{"text": "a"}], "width": 800});
        set_in(&mut root, &parse_path("annotations[1].text").unwrap(), json!("b"));
        set_in(&mut root, &parse_path("width").unwrap(), Value::Null);
        assert_eq!(root, json!({"annotations": [{"text": "a"}, {"text": "b"}]}));
        assert_eq!(
            get_in(&root, &parse_path("annotations[1].text").unwrap()),
            Some(&json!("b"))
        );
    }

    #[test]
    fn test_deep_merge_keeps_untouched_keys() {
        let mut target = json!({"xaxis": {"title": {"text": "t"}, "type": "linear"}});
        let patch = json!({"xaxis": {"type": "category"}});
        deep_merge(
            target.as_object_mut().unwrap(),
            patch.as_object().unwrap().clone(),
        );
        assert_eq!(target, json!({"xaxis": {"title": {"text": "t"}, "type": "category"}}));
    }
}
