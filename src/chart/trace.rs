//! Traces
//!
//! A trace is one data series: a known chart kind plus an open attribute map
//! for every visual-encoding key the pipeline passes through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Chart kind of a trace, serialized as the `type` string
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TraceKind {
    Bar,
    #[default]
    Scatter,
    Pie,
    Histogram,
    Heatmap,
    Box,
    Other(String),
}

impl TraceKind {
    pub fn as_str(&self) -> &str {
        match self {
            TraceKind::Bar => "bar",
            TraceKind::Scatter => "scatter",
            TraceKind::Pie => "pie",
            TraceKind::Histogram => "histogram",
            TraceKind::Heatmap => "heatmap",
            TraceKind::Box => "box",
            TraceKind::Other(name) => name,
        }
    }

    /// Pie-like traces are placed by `domain` instead of x/y axes
    pub fn uses_domain(&self) -> bool {
        matches!(self, TraceKind::Pie)
    }
}

impl From<String> for TraceKind {
    fn from(name: String) -> Self {
        match name.to_lowercase().as_str() {
            "bar" => TraceKind::Bar,
            "scatter" => TraceKind::Scatter,
            "pie" => TraceKind::Pie,
            "histogram" => TraceKind::Histogram,
            "heatmap" => TraceKind::Heatmap,
            "box" => TraceKind::Box,
            _ => TraceKind::Other(name),
        }
    }
}

impl From<&str> for TraceKind {
    fn from(name: &str) -> Self {
        TraceKind::from(name.to_string())
    }
}

impl From<TraceKind> for String {
    fn from(kind: TraceKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for TraceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trace {
    #[serde(rename = "type", default)]
    pub kind: TraceKind,
    #[serde(flatten)]
    pub attrs: Map<String, Value>,
}

impl Trace {
    pub fn new(kind: TraceKind) -> Self {
        Self {
            kind,
            attrs: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attrs.get(key)
    }

    /// Set a top-level attribute; `type` switches the kind.
    pub fn set(&mut self, key: &str, value: Value) {
        if key == "type" {
            if let Value::String(name) = value {
                self.kind = TraceKind::from(name);
            }
            return;
        }
        self.attrs.insert(key.to_string(), value);
    }

    /// Axis reference of the y-axis this trace is drawn against (`y`, `y2`, ...)
    pub fn y_axis_ref(&self) -> &str {
        self.attrs.get("yaxis").and_then(Value::as_str).unwrap_or("y")
    }

    /// Number of category points on the x encoding, if it is an array
    pub fn x_len(&self) -> Option<usize> {
        self.attrs.get("x").and_then(Value::as_array).map(Vec::len)
    }

    /// Whether this trace matches every key of a `selector` mapping
    pub fn matches(&self, selector: &Map<String, Value>) -> bool {
        selector.iter().all(|(key, expected)| {
            if key == "type" {
                expected.as_str().map(|t| TraceKind::from(t) == self.kind).unwrap_or(false)
            } else {
                self.attrs.get(key) == Some(expected)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_round_trips_through_type_key() {
        let trace: Trace = serde_json::from_value(json!({"type": "bar", "x": [1, 2]})).unwrap();
        assert_eq!(trace.kind, TraceKind::Bar);
        assert_eq!(trace.x_len(), Some(2));
        assert_eq!(serde_json::to_value(&trace).unwrap(), json!({"type": "bar", "x": [1, 2]}));
    }

    #[test]
    fn test_unknown_kind_passes_through() {
        let trace: Trace = serde_json::from_value(json!({"type": "sankey"})).unwrap();
        assert_eq!(trace.kind, TraceKind::Other("sankey".into()));
        assert_eq!(serde_json::to_value(&trace).unwrap()["type"], "sankey");
    }

    #[test]
    fn test_missing_type_defaults_to_scatter() {
        let trace: Trace = serde_json::from_value(json!({"y": [3]})).unwrap();
        assert_eq!(trace.kind, TraceKind::Scatter);
    }

    #[test]
    fn test_selector_matching() {
        let trace = Trace::new(TraceKind::Bar).with("name", "MI");
        let selector = json!({"type": "bar", "name": "MI"});
        assert!(trace.matches(selector.as_object().unwrap()));
        let other = json!({"type": "scatter"});
        assert!(!trace.matches(other.as_object().unwrap()));
    }
}
