//! Chart Serializer
//!
//! Thin boundary between the figure a snippet built and the typed document
//! the rest of the pipeline works on. Shape problems surface here as
//! `Serialization` errors; nothing is normalized.

use serde_json::Value;
use tracing::debug;

use super::document::ChartDocument;
use super::figure::Figure;
use super::linked::LinkedInteractionSpec;
use crate::error::{ChartError, ChartResult};

pub fn to_document(figure: &Figure, meta_key: &str) -> ChartResult<ChartDocument> {
    document_from_value(figure.to_json(), meta_key)
}

/// Parse and check a `{data, layout}` value.
pub fn document_from_value(value: Value, meta_key: &str) -> ChartResult<ChartDocument> {
    let document: ChartDocument =
        serde_json::from_value(value).map_err(|e| ChartError::Serialization(e.to_string()))?;
    validate(&document, meta_key)?;
    debug!(
        traces = document.data.len(),
        menus = document.layout.updatemenus.len(),
        annotations = document.layout.annotations.len(),
        "Serialized chart document"
    );
    Ok(document)
}

fn check_dimension(name: &str, value: Option<f64>) -> ChartResult<()> {
    match value {
        Some(v) if !v.is_finite() || v <= 0.0 => Err(ChartError::Serialization(format!(
            "layout.{} must be a positive number, got {}",
            name, v
        ))),
        _ => Ok(()),
    }
}

pub fn validate(document: &ChartDocument, meta_key: &str) -> ChartResult<()> {
    check_dimension("height", document.layout.height)?;
    check_dimension("width", document.layout.width)?;

    if let Some(spec) = LinkedInteractionSpec::from_layout(&document.layout, meta_key)? {
        spec.check_traces(document)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::linked::LINKED_INTERACTION_META_KEY;
    use crate::chart::trace::{Trace, TraceKind};
    use serde_json::json;

    #[test]
    fn test_figure_round_trip() {
        let mut fig = Figure::new();
        fig.add_trace(Trace::new(TraceKind::Bar).with("x", json!(["a", "b"])), None, None)
            .unwrap();
        fig.update_layout(json!({"title_text": "Wins"}).as_object().unwrap().clone());

        let doc = to_document(&fig, LINKED_INTERACTION_META_KEY).unwrap();
        assert_eq!(doc.data.len(), 1);
        assert_eq!(doc.data[0].x_len(), Some(2));
        assert_eq!(doc.layout.title_text(), Some("Wins"));
    }

    #[test]
    fn test_non_positive_height_fails() {
        let err = document_from_value(
            json!({"data": [], "layout": {"height": 0}}),
            LINKED_INTERACTION_META_KEY,
        )
        .unwrap_err();
        assert!(matches!(err, ChartError::Serialization(_)));
        assert!(err.to_string().starts_with("Error serializing Plotly figure:"));
    }

    #[test]
    fn test_linked_trace_indices_are_checked() {
        let value = json!({
            "data": [{"type": "bar"}],
            "layout": {"meta": {"pylogue_linked_interaction": {"source_trace": 0, "target_trace": 1}}}
        });
        let err = document_from_value(value, LINKED_INTERACTION_META_KEY).unwrap_err();
        assert!(err.to_string().contains("target_trace"));
    }

    #[test]
    fn test_malformed_annotations_fail() {
        let value = json!({"data": [], "layout": {"annotations": "title"}});
        assert!(document_from_value(value, LINKED_INTERACTION_META_KEY).is_err());
    }
}
