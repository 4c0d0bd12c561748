//! Snippet Sandbox
//!
//! Runs untrusted chart snippets written in a small Python subset. The
//! snippet sees only the fetched rows and the chart/table libraries it is
//! allowed to import; there is no filesystem, network or process access,
//! and every run is bounded by a step budget.

pub mod ast;
pub mod builtins;
pub mod error;
pub mod frame;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod plotly;
pub mod tables;
pub mod value;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chart::Figure;
use crate::data::ResultSet;
use crate::error::{ChartError, ChartResult};
use crate::utils::preview;

pub use error::{ErrorKind, SandboxError, SandboxResult};
pub use frame::Frame;
pub use interpreter::Interpreter;
pub use value::Value;

/// Execution bounds for one snippet run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxLimits {
    /// Statements, loop iterations and lambda calls a run may take
    pub max_steps: u64,
    pub max_source_bytes: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_steps: 100_000,
            max_source_bytes: 65_536,
        }
    }
}

/// Executes chart snippets against fetched rows
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    limits: SandboxLimits,
}

impl Sandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Run `code` and return the figure it bound to `fig`.
    ///
    /// With `data`, the rows are exposed as `df` (a table) and `data`
    /// (a list of row dicts). The chart libraries are pre-bound as `px`,
    /// `go`, `make_subplots` and `pd`, and may also be imported.
    pub fn run(&self, data: Option<&ResultSet>, code: &str) -> ChartResult<Figure> {
        info!(
            has_data = data.is_some(),
            chars = code.len(),
            code = %preview(code, 240),
            "Executing chart snippet"
        );

        if code.len() > self.limits.max_source_bytes {
            return Err(ChartError::SnippetExecution(format!(
                "{}: snippet is {} bytes; the limit is {}",
                ErrorKind::ResourceLimit,
                code.len(),
                self.limits.max_source_bytes
            )));
        }

        let program =
            parser::parse_program(code).map_err(|e| ChartError::SnippetExecution(e.to_string()))?;

        let mut interp = Interpreter::new(&self.limits);
        interp.set_global("px", Value::Module("px"));
        interp.set_global("go", Value::Module("go"));
        interp.set_global("pd", Value::Module("pd"));
        interp.set_global("make_subplots", Value::Builtin("make_subplots"));
        if let Some(rows) = data {
            let frame = Frame::from_result_set(rows);
            interp.set_global("data", Value::List(frame.records()));
            interp.set_global("df", Value::Frame(std::rc::Rc::new(frame)));
        }

        if let Err(err) = interp.run(&program) {
            warn!(kind = %err.kind, line = err.line, steps = interp.steps(), "Chart snippet failed");
            return Err(ChartError::SnippetExecution(err.to_string()));
        }

        match interp.get_global("fig") {
            Some(Value::Figure(fig)) => {
                debug!(
                    traces = fig.borrow().data.len(),
                    steps = interp.steps(),
                    "Chart snippet produced a figure"
                );
                Ok(fig.borrow().clone())
            }
            Some(other) => {
                warn!(found = %other.type_name(), "`fig` is not a figure");
                Err(ChartError::MissingFigure)
            }
            None => Err(ChartError::MissingFigure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ResultRow, Scalar};
    use serde_json::json;

    fn standings() -> ResultSet {
        ResultSet::from_json_records(&[
            json!({"team": "MI", "season": 2020, "wins": 11}),
            json!({"team": "DC", "season": 2020, "wins": 9}),
            json!({"team": "MI", "season": 2019, "wins": 9}),
        ])
        .unwrap()
    }

    #[test]
    fn test_run_builds_figure_from_rows() {
        let code = r#"
fig = px.bar(df, x="season", y="wins", color="team", title="Wins by season")
fig.update_layout(height=420)
"#;
        let fig = Sandbox::default().run(Some(&standings()), code).unwrap();
        assert_eq!(fig.data.len(), 2);
        assert_eq!(fig.layout["height"], json!(420));
        assert_eq!(fig.layout["title"]["text"], json!("Wins by season"));
    }

    #[test]
    fn test_run_with_row_dicts_and_imports() {
        let code = r#"
import plotly.graph_objects as go
from plotly.subplots import make_subplots

teams = sorted(set(r["team"] for r in data))
fig = make_subplots(rows=1, cols=2, subplot_titles=["Wins", "Share"], specs=[[{"type": "xy"}, {"type": "domain"}]])
fig.add_trace(go.Bar(x=teams, y=[sum(r["wins"] for r in data if r["team"] == t) for t in teams]), row=1, col=1)
fig.add_trace(go.Pie(labels=teams, values=[1, 1]), row=1, col=2)
"#;
        let fig = Sandbox::default().run(Some(&standings()), code).unwrap();
        assert_eq!(fig.data.len(), 2);
        assert_eq!(fig.data[0].get("y"), Some(&json!([9, 20])));
        assert_eq!(fig.data[1].kind.as_str(), "pie");
    }

    #[test]
    fn test_groupby_flat_results_keep_key_columns() {
        let code = r#"
totals = df.groupby(["season", "team"], as_index=False)["wins"].sum()
seasons = totals["season"].tolist()
order = df.groupby("team", sort=False)["wins"].sum().index
fig = px.bar(totals, x="season", y="wins", color="team")
fig.update_layout(title=",".join(totals.columns) + "|" + ",".join(order))
"#;
        let fig = Sandbox::default().run(Some(&standings()), code).unwrap();
        assert_eq!(fig.data.len(), 2);
        assert_eq!(fig.layout["title"]["text"], json!("season,team,wins|MI,DC"));
    }

    #[test]
    fn test_missing_fig_is_reported() {
        let err = Sandbox::default().run(None, "x = 1").unwrap_err();
        assert_eq!(err, ChartError::MissingFigure);

        let err = Sandbox::default().run(None, "fig = 3").unwrap_err();
        assert_eq!(err, ChartError::MissingFigure);
    }

    #[test]
    fn test_snippet_errors_surface_as_execution_failures() {
        let err = Sandbox::default()
            .run(None, "import os\nfig = os.system('ls')")
            .unwrap_err();
        match err {
            ChartError::SnippetExecution(msg) => assert!(msg.contains("ImportError")),
            other => panic!("unexpected {:?}", other),
        }

        let err = Sandbox::default().run(None, "fig = 1 / 0").unwrap_err();
        assert!(err.to_string().contains("ZeroDivisionError"));
    }

    #[test]
    fn test_source_and_step_limits() {
        let sandbox = Sandbox::new(SandboxLimits {
            max_steps: 1_000,
            max_source_bytes: 64,
        });
        let err = sandbox.run(None, &"x = 1\n".repeat(20)).unwrap_err();
        assert!(err.to_string().contains("ResourceLimitError"));

        let err = sandbox.run(None, "while True:\n    pass").unwrap_err();
        assert!(err.to_string().contains("ResourceLimitError"));
    }

    #[test]
    fn test_timestamps_reach_snippets_as_text() {
        let day = chrono::DateTime::parse_from_rfc3339("2024-04-01T00:00:00Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        let rows = ResultSet::new(vec![ResultRow::new().with("day", Scalar::Timestamp(day))]).unwrap();
        let fig = Sandbox::default()
            .run(Some(&rows), "fig = go.Figure(go.Scatter(x=df['day'].tolist(), y=[1]))")
            .unwrap();
        assert_eq!(fig.data[0].get("x"), Some(&json!(["2024-04-01T00:00:00+00:00"])));
    }
}
