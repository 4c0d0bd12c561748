//! Linked-Interaction Engine
//!
//! Clicking a category on the source trace swaps the target trace's data for
//! a precomputed payload, keyed by the season shown in a dropdown and the
//! clicked category. The contract lives in `layout.meta` so the snippet
//! author never writes event wiring.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::debug;

use super::document::{ChartDocument, Layout};
use super::render_state::{ChartEvent, EventHandler, RenderCommand, RenderState};
use crate::error::{ChartError, ChartResult};

/// Meta entry snippet authors write the contract under
pub const LINKED_INTERACTION_META_KEY: &str = "pylogue_linked_interaction";

/// Separator of composite `season||category` lookup keys
pub const KEY_SEPARATOR: &str = "||";

const PAYLOAD_KEYS: [&str; 4] = ["x", "y", "text", "customdata"];

/// Label text the way the browser stringifies it: integral numbers lose
/// their fraction, null becomes empty.
pub fn label_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            (_, _, Some(f)) => f.to_string(),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn label_from_json<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(label_text(&Value::deserialize(deserializer)?))
}

fn default_target_trace() -> usize {
    1
}

/// Contract read from `layout.meta.<meta_key>`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedInteractionSpec {
    #[serde(default)]
    pub source_trace: usize,
    #[serde(default = "default_target_trace")]
    pub target_trace: usize,
    #[serde(default)]
    pub season_menu_index: usize,
    #[serde(default, deserialize_with = "label_from_json")]
    pub default_season: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_title_annotation_index: Option<usize>,
    #[serde(default)]
    pub lookup: Map<String, Value>,
}

impl LinkedInteractionSpec {
    /// Contract of `layout`, declared under `meta_key` or, failing that,
    /// under [`LINKED_INTERACTION_META_KEY`].
    pub fn from_layout(layout: &Layout, meta_key: &str) -> ChartResult<Option<Self>> {
        let found = layout
            .meta_entry(meta_key)
            .map(|raw| (meta_key, raw))
            .or_else(|| {
                layout
                    .meta_entry(LINKED_INTERACTION_META_KEY)
                    .map(|raw| (LINKED_INTERACTION_META_KEY, raw))
            });
        let Some((meta_key, raw)) = found else {
            return Ok(None);
        };
        let spec: Self = serde_json::from_value(raw.clone()).map_err(|e| {
            ChartError::Serialization(format!("invalid {} contract: {}", meta_key, e))
        })?;
        Ok(Some(spec))
    }

    /// Both trace indices must address traces of `doc`.
    pub fn check_traces(&self, doc: &ChartDocument) -> ChartResult<()> {
        for (field, idx) in [("source_trace", self.source_trace), ("target_trace", self.target_trace)] {
            if idx >= doc.data.len() {
                return Err(ChartError::Serialization(format!(
                    "linked interaction {} = {} but the chart has {} trace(s)",
                    field,
                    idx,
                    doc.data.len()
                )));
            }
        }
        Ok(())
    }

    pub fn composite_key(season: &str, category: &str) -> String {
        format!("{}{}{}", season, KEY_SEPARATOR, category)
    }

    /// Composite key first, bare category second. Returns the key that hit.
    pub fn resolve(&self, season: &str, category: &str) -> Option<(String, &Value)> {
        let composite = Self::composite_key(season, category);
        if let Some(entry) = self.lookup.get(&composite).filter(|v| !v.is_null()) {
            return Some((composite, entry));
        }
        self.lookup
            .get(category)
            .filter(|v| !v.is_null())
            .map(|entry| (category.to_string(), entry))
    }

    /// Label of the active button in the season menu, else `default_season`.
    pub fn active_season(&self, layout: &Layout) -> String {
        layout
            .updatemenus
            .get(self.season_menu_index)
            .and_then(|menu| menu.active_button())
            .and_then(|button| button.label.as_ref())
            .filter(|label| !label.is_null())
            .map(label_text)
            .unwrap_or_else(|| self.default_season.clone())
    }
}

/// One lookup entry
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Payload {
    pub series: Map<String, Value>,
    pub title: Option<String>,
}

impl Payload {
    /// `None` for non-object entries.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let series = PAYLOAD_KEYS
            .iter()
            .filter_map(|key| obj.get(*key).map(|v| (key.to_string(), v.clone())))
            .collect();
        let title = obj
            .get("title")
            .map(label_text)
            .filter(|t| !t.is_empty() && t != "false");
        Some(Self { series, title })
    }

    /// Restyle patch for a single target trace.
    pub fn restyle_patch(&self) -> Map<String, Value> {
        self.series
            .iter()
            .map(|(key, value)| {
                let series = if key == "customdata" {
                    value.clone()
                } else {
                    unwrap_single_nested(value)
                };
                (key.clone(), Value::Array(vec![series]))
            })
            .collect()
    }

    fn first_y_is_text(&self) -> bool {
        self.series
            .get("y")
            .map(unwrap_single_nested)
            .and_then(|y| y.get(0).map(Value::is_string))
            .unwrap_or(false)
    }
}

/// `[[a, b]]` -> `[a, b]`; anything else unchanged
fn unwrap_single_nested(value: &Value) -> Value {
    match value {
        Value::Array(items) if items.len() == 1 && items[0].is_array() => items[0].clone(),
        other => other.clone(),
    }
}

/// Which annotation carries the target subplot's title when the contract
/// does not name one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TitleAnnotationFallback {
    /// Index 1 when exactly two annotations exist, else 0
    #[default]
    SecondWhenPaired,
    /// Index 1 whenever more than one annotation exists
    SecondWhenMultiple,
    First,
    Last,
}

impl TitleAnnotationFallback {
    pub fn index_for(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        Some(match self {
            TitleAnnotationFallback::SecondWhenPaired if count == 2 => 1,
            TitleAnnotationFallback::SecondWhenPaired => 0,
            TitleAnnotationFallback::SecondWhenMultiple if count > 1 => 1,
            TitleAnnotationFallback::SecondWhenMultiple => 0,
            TitleAnnotationFallback::First => 0,
            TitleAnnotationFallback::Last => count - 1,
        })
    }
}

impl FromStr for TitleAnnotationFallback {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "second_when_paired" => Ok(Self::SecondWhenPaired),
            "second_when_multiple" => Ok(Self::SecondWhenMultiple),
            "first" => Ok(Self::First),
            "last" => Ok(Self::Last),
            other => Err(format!(
                "unknown title fallback '{}' (expected second_when_paired, second_when_multiple, first or last)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionState {
    Idle,
    /// Last applied payload and the lookup key it came from
    Updated { key: String },
}

pub struct LinkedInteractionEngine {
    spec: LinkedInteractionSpec,
    fallback: TitleAnnotationFallback,
    state: InteractionState,
}

impl LinkedInteractionEngine {
    pub fn new(spec: LinkedInteractionSpec, fallback: TitleAnnotationFallback) -> Self {
        Self {
            spec,
            fallback,
            state: InteractionState::Idle,
        }
    }

    pub fn spec(&self) -> &LinkedInteractionSpec {
        &self.spec
    }

    pub fn state(&self) -> &InteractionState {
        &self.state
    }

    fn title_command(&self, title: &str, layout: &Layout) -> RenderCommand {
        let count = layout.annotations.len();
        let idx = match self.spec.target_title_annotation_index {
            Some(idx) => Some(idx).filter(|i| *i < count),
            None => self.fallback.index_for(count),
        };
        let (path, value) = match idx {
            Some(i) => (format!("annotations[{}].text", i), title),
            None => ("title.text".to_string(), title),
        };
        let mut patch = Map::new();
        patch.insert(path, Value::String(value.to_string()));
        RenderCommand::Relayout { patch }
    }

    /// Commands for a click on `curve_number` at category `x`; empty when
    /// the click is ignored.
    pub fn on_click(&mut self, curve_number: usize, x: &Value, doc: &ChartDocument) -> Vec<RenderCommand> {
        if curve_number != self.spec.source_trace {
            return Vec::new();
        }

        let category = label_text(x);
        let season = self.spec.active_season(&doc.layout);
        let Some((key, entry)) = self.spec.resolve(&season, &category) else {
            debug!(%season, %category, "No linked payload for click");
            return Vec::new();
        };
        let Some(payload) = Payload::from_value(entry) else {
            debug!(%key, "Ignoring non-object linked payload");
            return Vec::new();
        };

        let patch = payload.restyle_patch();
        if patch.is_empty() {
            return Vec::new();
        }

        let target = self.spec.target_trace;
        let mut commands = Vec::new();

        let y_ref = doc.data.get(target).map(|t| t.y_axis_ref()).unwrap_or("y");
        let axis_key = Layout::axis_key(y_ref);
        let categorical = matches!(
            doc.layout.axis_type(&axis_key),
            Some("category" | "multicategory")
        );
        if payload.first_y_is_text() && !categorical {
            let mut relayout = Map::new();
            relayout.insert(format!("{}.type", axis_key), Value::String("category".into()));
            commands.push(RenderCommand::Relayout { patch: relayout });
        }

        commands.push(RenderCommand::Restyle {
            patch,
            traces: vec![target],
        });

        if let Some(title) = &payload.title {
            commands.push(self.title_command(title, &doc.layout));
        }

        debug!(%key, commands = commands.len(), "Linked interaction applied");
        self.state = InteractionState::Updated { key };
        commands
    }
}

impl EventHandler for LinkedInteractionEngine {
    fn name(&self) -> &'static str {
        "linked_interaction"
    }

    fn handle(&mut self, event: &ChartEvent, state: &RenderState) -> Vec<RenderCommand> {
        match event {
            ChartEvent::Click { curve_number, x } => self.on_click(*curve_number, x, &state.document),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(layout: Value) -> ChartDocument {
        serde_json::from_value(json!({
            "data": [{"type": "bar", "x": ["MI", "CSK"]}, {"type": "bar", "x": [], "yaxis": "y2"}],
            "layout": layout
        }))
        .unwrap()
    }

    fn spec(meta: Value) -> LinkedInteractionSpec {
        serde_json::from_value(meta).unwrap()
    }

    #[test]
    fn test_defaults_and_stringified_season() {
        let s = spec(json!({"default_season": 2020}));
        assert_eq!(s.source_trace, 0);
        assert_eq!(s.target_trace, 1);
        assert_eq!(s.season_menu_index, 0);
        assert_eq!(s.default_season, "2020");
        assert!(s.lookup.is_empty());
    }

    #[test]
    fn test_from_layout_reads_meta_key() {
        let d = doc(json!({"meta": {"pylogue_linked_interaction": {"source_trace": 0}}}));
        assert!(LinkedInteractionSpec::from_layout(&d.layout, LINKED_INTERACTION_META_KEY)
            .unwrap()
            .is_some());
        // A custom key still falls back to the standard entry.
        assert!(LinkedInteractionSpec::from_layout(&d.layout, "other").unwrap().is_some());

        let custom = doc(json!({"meta": {"drill": {"source_trace": 0, "target_trace": 1}}}));
        let spec = LinkedInteractionSpec::from_layout(&custom.layout, "drill").unwrap().unwrap();
        assert_eq!(spec.target_trace, 1);
        assert!(LinkedInteractionSpec::from_layout(&custom.layout, LINKED_INTERACTION_META_KEY)
            .unwrap()
            .is_none());

        let bad = doc(json!({"meta": {"pylogue_linked_interaction": {"source_trace": "zero"}}}));
        assert!(LinkedInteractionSpec::from_layout(&bad.layout, LINKED_INTERACTION_META_KEY).is_err());
    }

    #[test]
    fn test_composite_key_wins() {
        let s = spec(json!({"lookup": {"2020||MI": {"y": [1]}, "MI": {"y": [2]}}}));
        let (key, _) = s.resolve("2020", "MI").unwrap();
        assert_eq!(key, "2020||MI");
        let (key, _) = s.resolve("2019", "MI").unwrap();
        assert_eq!(key, "MI");
        assert!(s.resolve("2019", "RCB").is_none());
    }

    #[test]
    fn test_active_season_fallbacks() {
        let s = spec(json!({"default_season": "2018"}));
        assert_eq!(s.active_season(&doc(json!({})).layout), "2018");

        let d = doc(json!({"updatemenus": [{"buttons": [{"label": 2019}, {"label": "2020"}], "active": 1}]}));
        assert_eq!(s.active_season(&d.layout), "2020");

        let d = doc(json!({"updatemenus": [{"buttons": [{"label": 2019}]}]}));
        assert_eq!(s.active_season(&d.layout), "2019");

        let d = doc(json!({"updatemenus": [{"buttons": [{"method": "update"}]}]}));
        assert_eq!(s.active_season(&d.layout), "2018");
    }

    #[test]
    fn test_payload_patch_unwraps_except_customdata() {
        let payload = Payload::from_value(&json!({
            "x": [["a", "b"]],
            "y": [1, 2],
            "customdata": [[1, 2]],
            "title": ""
        }))
        .unwrap();
        let patch = payload.restyle_patch();
        assert_eq!(patch["x"], json!([["a", "b"]]));
        assert_eq!(patch["y"], json!([[1, 2]]));
        assert_eq!(patch["customdata"], json!([[[1, 2]]]));
        assert!(payload.title.is_none());
        assert!(Payload::from_value(&json!("MI")).is_none());
    }

    #[test]
    fn test_click_on_other_trace_is_ignored() {
        let mut engine = LinkedInteractionEngine::new(
            spec(json!({"lookup": {"MI": {"y": [1]}}})),
            TitleAnnotationFallback::default(),
        );
        assert!(engine.on_click(1, &json!("MI"), &doc(json!({}))).is_empty());
        assert_eq!(engine.state(), &InteractionState::Idle);
    }

    #[test]
    fn test_text_y_switches_axis_to_category() {
        let mut engine = LinkedInteractionEngine::new(
            spec(json!({"lookup": {"MI": {"y": ["Rohit", "Ishan"], "x": [50, 40]}}})),
            TitleAnnotationFallback::default(),
        );
        let commands = engine.on_click(0, &json!("MI"), &doc(json!({})));
        assert_eq!(commands.len(), 2);
        match &commands[0] {
            RenderCommand::Relayout { patch } => assert_eq!(patch["yaxis2.type"], json!("category")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(&commands[1], RenderCommand::Restyle { traces, .. } if traces == &vec![1]));

        let d = doc(json!({"yaxis2": {"type": "category"}}));
        assert_eq!(engine.on_click(0, &json!("MI"), &d).len(), 1);
    }

    #[test]
    fn test_title_goes_to_annotation_or_title() {
        let s = spec(json!({"lookup": {"MI": {"y": [1], "title": "MI squad"}}}));
        let mut engine = LinkedInteractionEngine::new(s.clone(), TitleAnnotationFallback::SecondWhenPaired);

        let paired = doc(json!({"annotations": [{"text": "a"}, {"text": "b"}]}));
        let commands = engine.on_click(0, &json!("MI"), &paired);
        assert_eq!(
            commands.last(),
            Some(&RenderCommand::Relayout {
                patch: json!({"annotations[1].text": "MI squad"}).as_object().unwrap().clone()
            })
        );

        let bare = doc(json!({}));
        let commands = engine.on_click(0, &json!("MI"), &bare);
        assert_eq!(
            commands.last(),
            Some(&RenderCommand::Relayout {
                patch: json!({"title.text": "MI squad"}).as_object().unwrap().clone()
            })
        );
    }

    #[test]
    fn test_fallback_policies() {
        use TitleAnnotationFallback::*;
        assert_eq!(SecondWhenPaired.index_for(2), Some(1));
        assert_eq!(SecondWhenPaired.index_for(3), Some(0));
        assert_eq!(SecondWhenMultiple.index_for(3), Some(1));
        assert_eq!(SecondWhenMultiple.index_for(1), Some(0));
        assert_eq!(Last.index_for(4), Some(3));
        assert_eq!(First.index_for(0), None);
        assert_eq!("second-when-multiple".parse::<TitleAnnotationFallback>(), Ok(SecondWhenMultiple));
        assert!("middle".parse::<TitleAnnotationFallback>().is_err());
    }

    #[test]
    fn test_numeric_labels() {
        assert_eq!(label_text(&json!(2020)), "2020");
        assert_eq!(label_text(&json!(2020.0)), "2020");
        assert_eq!(label_text(&json!(2.5)), "2.5");
        assert_eq!(label_text(&Value::Null), "");
    }
}
