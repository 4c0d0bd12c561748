//! Render state and event dispatch
//!
//! `RenderState` is the live chart instance: the document as currently
//! drawn plus the side effects the browser runtime performs. Handlers are
//! registered on a `ChartSession` and receive the state explicitly for every
//! event; the commands they return are applied in order, so a later handler
//! sees what an earlier one changed. The embedded client runtime follows the
//! same command vocabulary.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::document::ChartDocument;
use super::linked::LinkedInteractionEngine;
use super::patch;
use super::sizing::{SizingController, SizingPolicy};
use crate::error::{ChartError, ChartResult};

#[derive(Debug, Clone, PartialEq)]
pub enum ChartEvent {
    Mount { viewport_width: f64 },
    Resize { viewport_width: f64 },
    /// Click on a point; `x` is the category under the pointer
    Click { curve_number: usize, x: Value },
    /// A dropdown/button entry was chosen
    MenuSelect { menu: usize, button: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RenderCommand {
    /// Full reconciliation of data and layout at `height`
    React { height: f64 },
    NativeResize,
    SyncContainerHeight { height: f64 },
    Relayout { patch: Map<String, Value> },
    Restyle { patch: Map<String, Value>, traces: Vec<usize> },
}

pub trait EventHandler: Send {
    fn name(&self) -> &'static str;
    fn handle(&mut self, event: &ChartEvent, state: &RenderState) -> Vec<RenderCommand>;
}

#[derive(Debug, Clone)]
pub struct RenderState {
    pub document: ChartDocument,
    pub container_height: Option<f64>,
    pub viewport_width: Option<f64>,
    pub reconciliations: usize,
    pub native_resizes: usize,
    pub history: Vec<RenderCommand>,
}

impl RenderState {
    pub fn new(document: ChartDocument) -> Self {
        Self {
            document,
            container_height: None,
            viewport_width: None,
            reconciliations: 0,
            native_resizes: 0,
            history: Vec::new(),
        }
    }

    /// Height the chart was last drawn at
    pub fn rendered_height(&self) -> Option<f64> {
        self.document.layout.height
    }

    pub fn apply(&mut self, command: RenderCommand) -> ChartResult<()> {
        match &command {
            RenderCommand::React { height } => {
                self.document.layout.height = Some(*height);
                self.reconciliations += 1;
            }
            RenderCommand::NativeResize => self.native_resizes += 1,
            RenderCommand::SyncContainerHeight { height } => self.container_height = Some(*height),
            RenderCommand::Relayout { patch } => self.relayout(patch)?,
            RenderCommand::Restyle { patch, traces } => self.restyle(patch, traces)?,
        }
        self.history.push(command);
        Ok(())
    }

    fn relayout(&mut self, patch: &Map<String, Value>) -> ChartResult<()> {
        for (path, value) in patch {
            patch::set_path(&mut self.document.layout, path, value.clone())?;
        }
        Ok(())
    }

    /// Array values address the listed traces positionally (cycling when
    /// shorter); anything else applies to every listed trace.
    fn restyle(&mut self, patch: &Map<String, Value>, traces: &[usize]) -> ChartResult<()> {
        for (position, &idx) in traces.iter().enumerate() {
            let trace_count = self.document.data.len();
            let trace = self.document.data.get_mut(idx).ok_or_else(|| {
                ChartError::Serialization(format!(
                    "restyle targets trace {} but the chart has {}",
                    idx, trace_count
                ))
            })?;
            for (path, value) in patch {
                let value = match value {
                    Value::Array(items) if items.is_empty() => continue,
                    Value::Array(items) => items[position % items.len()].clone(),
                    other => other.clone(),
                };
                patch::set_path(&mut *trace, path, value)?;
            }
        }
        Ok(())
    }
}

/// Applies the chosen button the way the chart library's own menus do.
#[derive(Default)]
pub struct MenuController;

impl MenuController {
    fn trace_indices(arg: Option<&Value>, trace_count: usize) -> Vec<usize> {
        match arg {
            Some(Value::Number(n)) => n.as_u64().map(|i| vec![i as usize]).unwrap_or_default(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_u64().map(|i| i as usize))
                .collect(),
            _ => (0..trace_count).collect(),
        }
    }
}

impl EventHandler for MenuController {
    fn name(&self) -> &'static str {
        "menus"
    }

    fn handle(&mut self, event: &ChartEvent, state: &RenderState) -> Vec<RenderCommand> {
        let ChartEvent::MenuSelect { menu, button } = event else {
            return Vec::new();
        };
        let Some(chosen) = state
            .document
            .layout
            .updatemenus
            .get(*menu)
            .and_then(|m| m.buttons.get(*button))
        else {
            warn!(menu, button, "Menu selection out of range");
            return Vec::new();
        };

        let trace_count = state.document.data.len();
        let mut active = Map::new();
        active.insert(format!("updatemenus[{}].active", menu), Value::from(*button));
        let mut commands = vec![RenderCommand::Relayout { patch: active }];

        let object_arg = |i: usize| chosen.args.get(i).and_then(Value::as_object).cloned();
        match chosen.method_name().as_str() {
            "update" => {
                if let Some(patch) = object_arg(0) {
                    let traces = Self::trace_indices(chosen.args.get(2), trace_count);
                    commands.push(RenderCommand::Restyle { patch, traces });
                }
                if let Some(patch) = object_arg(1) {
                    commands.push(RenderCommand::Relayout { patch });
                }
            }
            "restyle" => {
                if let Some(patch) = object_arg(0) {
                    let traces = Self::trace_indices(chosen.args.get(1), trace_count);
                    commands.push(RenderCommand::Restyle { patch, traces });
                }
            }
            "relayout" => {
                if let Some(patch) = object_arg(0) {
                    commands.push(RenderCommand::Relayout { patch });
                }
            }
            other => debug!(method = other, "Menu method has no data effect"),
        }
        commands
    }
}

/// A live chart with its registered handlers
pub struct ChartSession {
    state: RenderState,
    handlers: Vec<Box<dyn EventHandler>>,
}

impl ChartSession {
    pub fn new(document: ChartDocument) -> Self {
        Self {
            state: RenderState::new(document),
            handlers: Vec::new(),
        }
    }

    /// Session wired like the embedded runtime: sizing, native menus and,
    /// when a contract is present, linked interaction.
    pub fn standard(
        document: ChartDocument,
        sizing: SizingPolicy,
        linked: Option<LinkedInteractionEngine>,
    ) -> Self {
        let mut session = Self::new(document);
        session.register(Box::new(SizingController::new(sizing)));
        session.register(Box::new(MenuController));
        if let Some(engine) = linked {
            session.register(Box::new(engine));
        }
        session
    }

    pub fn register(&mut self, handler: Box<dyn EventHandler>) {
        debug!(handler = handler.name(), "Registered chart event handler");
        self.handlers.push(handler);
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    /// Dispatch one event to every handler in registration order; returns the
    /// commands that were applied.
    pub fn dispatch(&mut self, event: ChartEvent) -> ChartResult<Vec<RenderCommand>> {
        if let ChartEvent::Mount { viewport_width } | ChartEvent::Resize { viewport_width } = &event {
            self.state.viewport_width = Some(*viewport_width);
        }

        let mut applied = Vec::new();
        for handler in &mut self.handlers {
            let commands = handler.handle(&event, &self.state);
            for command in commands {
                self.state.apply(command.clone())?;
                applied.push(command);
            }
        }
        Ok(applied)
    }
}

/// Result of replaying a document's menus before it is embedded
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PreflightReport {
    pub initial_height: f64,
    /// `(menu, button)` pairs that leave a trace without array `x`/`y`
    pub blanking_buttons: Vec<(usize, usize)>,
}

/// Mount `document` at `viewport_width` and press every menu button once,
/// flagging buttons that would leave a trace blank.
pub fn preflight(
    document: &ChartDocument,
    sizing: &SizingPolicy,
    viewport_width: f64,
) -> ChartResult<PreflightReport> {
    let mut report = PreflightReport::default();

    for (m, menu) in document.layout.updatemenus.iter().enumerate() {
        for b in 0..menu.buttons.len() {
            let mut session = ChartSession::standard(document.clone(), sizing.clone(), None);
            session.dispatch(ChartEvent::Mount { viewport_width })?;
            session.dispatch(ChartEvent::MenuSelect { menu: m, button: b })?;

            let blank = session.state().document.data.iter().any(|trace| {
                ["x", "y"]
                    .iter()
                    .any(|key| matches!(trace.get(key), Some(v) if !v.is_array() && !v.is_null()))
            });
            if blank {
                report.blanking_buttons.push((m, b));
            }
        }
    }

    report.initial_height = sizing.height_for(viewport_width);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::normalize::normalize_update_menus;
    use crate::chart::sizing::SizingConfig;
    use serde_json::json;

    fn menu_doc() -> ChartDocument {
        serde_json::from_value(json!({
            "data": [{"type": "bar", "x": ["a"], "y": [1]}],
            "layout": {
                "title": {"text": "2019"},
                "updatemenus": [{"buttons": [
                    {"method": "update", "label": "2019", "args": [{"x": ["a"], "y": [1]}, {"title.text": "2019"}]},
                    {"method": "update", "label": "2020", "args": [{"x": ["b", "c"], "y": [2, 3]}, {"title.text": "2020"}]}
                ]}]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_mount_reconciles_then_resizes() {
        let mut session = ChartSession::standard(
            menu_doc(),
            SizingPolicy::Responsive(SizingConfig::default()),
            None,
        );
        let applied = session.dispatch(ChartEvent::Mount { viewport_width: 600.0 }).unwrap();
        assert_eq!(
            applied,
            vec![
                RenderCommand::React { height: 360.0 },
                RenderCommand::NativeResize,
                RenderCommand::SyncContainerHeight { height: 360.0 },
            ]
        );
        let state = session.state();
        assert_eq!(state.reconciliations, 1);
        assert_eq!(state.container_height, state.rendered_height());
    }

    #[test]
    fn test_menu_select_applies_update() {
        let mut doc = menu_doc();
        normalize_update_menus(&mut doc);
        let mut session = ChartSession::standard(doc, SizingPolicy::Fixed { height: 300.0 }, None);
        session.dispatch(ChartEvent::MenuSelect { menu: 0, button: 1 }).unwrap();

        let state = session.state();
        assert_eq!(state.document.data[0].get("x"), Some(&json!(["b", "c"])));
        assert_eq!(state.document.layout.title_text(), Some("2020"));
        assert_eq!(state.document.layout.updatemenus[0].active, Some(1));
    }

    #[test]
    fn test_restyle_out_of_range_trace_fails() {
        let mut state = RenderState::new(menu_doc());
        let err = state
            .apply(RenderCommand::Restyle {
                patch: Map::new(),
                traces: vec![4],
            })
            .unwrap_err();
        assert!(matches!(err, ChartError::Serialization(_)));
    }

    #[test]
    fn test_preflight_flags_unshaped_buttons() {
        let policy = SizingPolicy::Responsive(SizingConfig::default());
        let raw = menu_doc();
        let report = preflight(&raw, &policy, 1024.0).unwrap();
        assert_eq!(report.blanking_buttons, vec![(0, 0), (0, 1)]);

        let mut normalized = raw.clone();
        normalize_update_menus(&mut normalized);
        let report = preflight(&normalized, &policy, 1024.0).unwrap();
        assert!(report.blanking_buttons.is_empty());
        assert_eq!(report.initial_height, 560.0);
    }
}
