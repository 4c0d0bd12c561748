//! Chart Document
//!
//! The declarative description handed to the client chart library. Only the
//! parts the pipeline reasons about are typed; every other key rides along in
//! a passthrough map so nothing the snippet set is lost.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::trace::Trace;
use crate::error::ChartResult;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChartDocument {
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Vec<Trace>,
    #[serde(default)]
    pub layout: Layout,
}

impl ChartDocument {
    /// Trace count used when shaping per-trace payloads; never zero.
    pub fn trace_count(&self) -> usize {
        self.data.len().max(1)
    }

    pub fn to_json(&self) -> ChartResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json_string(&self) -> ChartResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Layout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autosize: Option<bool>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub updatemenus: Vec<Menu>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub annotations: Vec<Annotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Layout {
    /// Layout key of an axis reference: `y` -> `yaxis`, `y2` -> `yaxis2`.
    pub fn axis_key(axis_ref: &str) -> String {
        let (letter, suffix) = axis_ref.split_at(axis_ref.len().min(1));
        format!("{}axis{}", letter, suffix)
    }

    /// Declared `type` of an axis (`linear`, `category`, ...), if set
    pub fn axis_type(&self, axis_key: &str) -> Option<&str> {
        self.extra.get(axis_key)?.get("type")?.as_str()
    }

    /// Entry of `layout.meta` when meta is a mapping
    pub fn meta_entry(&self, key: &str) -> Option<&Value> {
        self.meta.as_ref()?.as_object()?.get(key)
    }

    pub fn title_text(&self) -> Option<&str> {
        match self.extra.get("title")? {
            Value::String(s) => Some(s),
            other => other.get("text")?.as_str(),
        }
    }
}

/// A dropdown or button group
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Menu {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub buttons: Vec<Button>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Menu {
    /// Button currently shown as selected; plotly treats a missing `active` as 0.
    pub fn active_button(&self) -> Option<&Button> {
        let idx = usize::try_from(self.active.unwrap_or(0)).ok()?;
        self.buttons.get(idx)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Button {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Value>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub args: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Button {
    pub fn is_update(&self) -> bool {
        self.method
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case("update"))
            .unwrap_or(false)
    }

    /// Plotly's default when `method` is omitted is `restyle`.
    pub fn method_name(&self) -> String {
        self.method
            .as_deref()
            .unwrap_or("restyle")
            .to_ascii_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_passthrough_keys_survive() {
        let raw = json!({
            "data": [{"type": "bar", "x": ["a"], "marker": {"color": "red"}}],
            "layout": {"bargap": 0.2, "height": 300, "xaxis": {"type": "category"}}
        });
        let doc: ChartDocument = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(doc.layout.height, Some(300.0));
        assert_eq!(doc.layout.axis_type("xaxis"), Some("category"));
        let back = doc.to_json().unwrap();
        assert_eq!(back["layout"]["bargap"], json!(0.2));
        assert_eq!(back["data"][0]["marker"], raw["data"][0]["marker"]);
    }

    #[test]
    fn test_non_numeric_height_is_rejected() {
        let raw = json!({"data": [], "layout": {"height": "tall"}});
        assert!(serde_json::from_value::<ChartDocument>(raw).is_err());
    }

    #[test]
    fn test_updatemenus_must_be_a_list() {
        let raw = json!({"data": [], "layout": {"updatemenus": {"buttons": []}}});
        assert!(serde_json::from_value::<ChartDocument>(raw).is_err());
    }

    #[test]
    fn test_axis_key_and_active_button() {
        assert_eq!(Layout::axis_key("y"), "yaxis");
        assert_eq!(Layout::axis_key("y2"), "yaxis2");

        let menu: Menu = serde_json::from_value(json!({
            "buttons": [{"label": 2019}, {"label": "2020"}],
            "active": 1
        }))
        .unwrap();
        assert_eq!(menu.active_button().unwrap().label, Some(json!("2020")));

        let menu: Menu = serde_json::from_value(json!({"buttons": [], "active": -1})).unwrap();
        assert!(menu.active_button().is_none());
    }

    #[test]
    fn test_button_method_is_case_insensitive() {
        let button = Button {
            method: Some("Update".into()),
            ..Default::default()
        };
        assert!(button.is_update());
        assert_eq!(Button::default().method_name(), "restyle");
    }
}
