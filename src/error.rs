//! Error Taxonomy
//!
//! Every stage of the render pipeline reports failure through `ChartError`.
//! The renderer converts these into short, user-safe strings so a failed
//! chart never aborts the conversational turn.

use thiserror::Error;

use crate::utils::{truncate_text, TruncationPolicy};

/// Result alias used across the pipeline
pub type ChartResult<T> = Result<T, ChartError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChartError {
    /// The snippet raised while executing in the sandbox
    #[error("Error executing Plotly code: {0}")]
    SnippetExecution(String),

    /// The snippet finished without binding a chart to `fig`
    #[error("Error: Plotly code must define a `fig` variable.")]
    MissingFigure,

    /// The chart object could not be turned into a declarative document
    #[error("Error serializing Plotly figure: {0}")]
    Serialization(String),

    /// The query is not a single read-only retrieval
    #[error("Error: Only SELECT queries are allowed. {0}")]
    DisallowedQuery(String),

    /// The injected data-fetch capability failed or returned inconsistent rows
    #[error("Error fetching chart data: {0}")]
    DataFetch(String),

    #[error("Invalid chart configuration: {0}")]
    Config(String),

    /// Catch-all for anything the stages above did not anticipate
    #[error("Error in render_chart: {0}")]
    Unhandled(String),
}

impl ChartError {
    /// Stable machine-readable name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ChartError::SnippetExecution(_) => "snippet_execution",
            ChartError::MissingFigure => "missing_figure",
            ChartError::Serialization(_) => "serialization",
            ChartError::DisallowedQuery(_) => "disallowed_query",
            ChartError::DataFetch(_) => "data_fetch",
            ChartError::Config(_) => "config",
            ChartError::Unhandled(_) => "unhandled",
        }
    }

    /// Message safe to hand back to the calling agent
    pub fn user_message(&self, max_bytes: usize) -> String {
        truncate_text(&self.to_string(), TruncationPolicy::Bytes(max_bytes))
    }
}

impl From<serde_json::Error> for ChartError {
    fn from(err: serde_json::Error) -> Self {
        ChartError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_figure_message_is_literal() {
        assert_eq!(
            ChartError::MissingFigure.to_string(),
            "Error: Plotly code must define a `fig` variable."
        );
    }

    #[test]
    fn test_user_message_is_truncated() {
        let err = ChartError::SnippetExecution("x".repeat(5000));
        let msg = err.user_message(200);
        assert!(msg.len() < 300);
        assert!(msg.starts_with("Error executing Plotly code"));
        assert!(msg.contains("chars truncated"));
    }
}
