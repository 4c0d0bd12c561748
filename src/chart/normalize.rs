//! Payload Normalizer
//!
//! Update-menu buttons written for a single trace break multi-trace charts:
//! the chart library reads the data patch positionally, one entry per trace.
//! This pass reshapes those patches and removes annotation-text keys that
//! would wipe titles on subplot layouts. It runs once, before first render,
//! and is idempotent.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use super::document::ChartDocument;

/// Data-patch keys whose values are positional per trace
pub const PER_TRACE_KEYS: [&str; 4] = ["x", "y", "text", "customdata"];

lazy_static! {
    static ref FRAGILE_ANNOTATION_KEY: Regex = Regex::new(r"^annotations\[\d+\]\.text$").unwrap();
}

/// What a normalization pass changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub buttons_visited: usize,
    pub values_wrapped: usize,
    pub keys_stripped: usize,
}

fn is_sequence_or_null(value: &Value) -> bool {
    matches!(value, Value::Array(_) | Value::Null)
}

/// Shape one data-patch value so it holds one entry per trace.
pub fn normalize_per_trace_value(value: &Value, trace_count: usize) -> Value {
    let items = match value {
        Value::Null => return Value::Null,
        Value::Array(items) => items,
        scalar => return Value::Array(vec![scalar.clone()]),
    };

    let nested = items.first().map(Value::is_array).unwrap_or(false);
    // A nested value of the wrong length has already been wrapped once;
    // wrapping again would break idempotence.
    let already_shaped = if trace_count <= 1 {
        items.is_empty() || nested
    } else {
        (items.len() == trace_count && items.iter().all(is_sequence_or_null)) || nested
    };

    if already_shaped {
        value.clone()
    } else {
        Value::Array(vec![value.clone()])
    }
}

pub fn is_fragile_annotation_key(key: &str) -> bool {
    FRAGILE_ANNOTATION_KEY.is_match(key)
}

/// Remove `annotations[<n>].text` keys; returns how many were dropped.
pub fn strip_fragile_annotation_keys(patch: &mut Map<String, Value>) -> usize {
    let before = patch.len();
    patch.retain(|key, _| !is_fragile_annotation_key(key));
    before - patch.len()
}

/// Normalize every `update` button of every menu in `doc`.
pub fn normalize_update_menus(doc: &mut ChartDocument) -> NormalizeReport {
    let trace_count = doc.trace_count();
    let mut report = NormalizeReport::default();

    for menu in &mut doc.layout.updatemenus {
        for button in &mut menu.buttons {
            if !button.is_update() || button.args.is_empty() {
                continue;
            }
            report.buttons_visited += 1;

            if let Some(Value::Object(data_patch)) = button.args.get_mut(0) {
                for key in PER_TRACE_KEYS {
                    if let Some(value) = data_patch.get_mut(key) {
                        let shaped = normalize_per_trace_value(value, trace_count);
                        if shaped != *value {
                            *value = shaped;
                            report.values_wrapped += 1;
                        }
                    }
                }
                report.keys_stripped += strip_fragile_annotation_keys(data_patch);
            }

            if let Some(Value::Object(layout_patch)) = button.args.get_mut(1) {
                report.keys_stripped += strip_fragile_annotation_keys(layout_patch);
            }
        }
    }

    debug!(
        trace_count,
        buttons = report.buttons_visited,
        wrapped = report.values_wrapped,
        stripped = report.keys_stripped,
        "Normalized update menus"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_trace_shapes() {
        assert_eq!(normalize_per_trace_value(&json!([1, 2, 3]), 1), json!([[1, 2, 3]]));
        assert_eq!(normalize_per_trace_value(&json!([[1, 2, 3]]), 1), json!([[1, 2, 3]]));
        assert_eq!(normalize_per_trace_value(&json!([]), 1), json!([]));
        assert_eq!(normalize_per_trace_value(&json!(5), 1), json!([5]));
        assert_eq!(normalize_per_trace_value(&Value::Null, 1), Value::Null);
    }

    #[test]
    fn test_multi_trace_shapes() {
        assert_eq!(
            normalize_per_trace_value(&json!([[1], [2]]), 2),
            json!([[1], [2]])
        );
        assert_eq!(normalize_per_trace_value(&json!([[1], null]), 2), json!([[1], null]));
        assert_eq!(normalize_per_trace_value(&json!([1, 2]), 2), json!([[1, 2]]));
        assert_eq!(normalize_per_trace_value(&json!([1, 2, 3]), 2), json!([[1, 2, 3]]));
        assert_eq!(normalize_per_trace_value(&json!([[1, 2]]), 2), json!([[1, 2]]));
        assert_eq!(normalize_per_trace_value(&json!("a"), 3), json!(["a"]));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        for (value, n) in [
            (json!([1, 2, 3]), 1),
            (json!([1, 2]), 2),
            (json!([[4, 5]]), 1),
            (json!([1, 2, 3]), 3),
            (json!([]), 2),
        ] {
            let once = normalize_per_trace_value(&value, n);
            assert_eq!(normalize_per_trace_value(&once, n), once);
        }
    }

    #[test]
    fn test_fragile_key_detection() {
        assert!(is_fragile_annotation_key("annotations[0].text"));
        assert!(is_fragile_annotation_key("annotations[12].text"));
        assert!(!is_fragile_annotation_key("annotations[0].font"));
        assert!(!is_fragile_annotation_key("title.text"));
    }

    #[test]
    fn test_normalize_update_menus() {
        let mut doc: ChartDocument = serde_json::from_value(json!({
            "data": [{"type": "bar"}, {"type": "bar"}],
            "layout": {"updatemenus": [{"buttons": [
                {"method": "UPDATE", "label": "2020", "args": [
                    {"x": ["a", "b"], "y": [[1], [2]], "annotations[0].text": "t"},
                    {"title.text": "2020", "annotations[1].text": "u"}
                ]},
                {"method": "relayout", "args": [{"annotations[0].text": "kept"}]}
            ]}]}
        }))
        .unwrap();

        let report = normalize_update_menus(&mut doc);
        assert_eq!(report.buttons_visited, 1);
        assert_eq!(report.keys_stripped, 2);

        let buttons = &doc.layout.updatemenus[0].buttons;
        assert_eq!(buttons[0].args[0], json!({"x": [["a", "b"]], "y": [[1], [2]]}));
        assert_eq!(buttons[0].args[1], json!({"title.text": "2020"}));
        assert_eq!(buttons[1].args[0], json!({"annotations[0].text": "kept"}));

        let again = normalize_update_menus(&mut doc);
        assert_eq!(again.values_wrapped, 0);
        assert_eq!(again.keys_stripped, 0);
    }
}
