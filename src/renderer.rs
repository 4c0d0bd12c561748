//! Render entry point
//!
//! `ChartRenderer::render` runs one chart request end to end: optional data
//! fetch, snippet, serialization, menu normalization, sizing and embedding.
//! Failures never escape as errors; the caller always gets either an
//! artifact handle or a short diagnostic string.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::chart::{
    normalize_update_menus, preflight, serializer, LinkedInteractionSpec, SizingPolicy,
};
use crate::config::ChartConfig;
use crate::data::{DataFetcher, QueryGuard, ResultSet};
use crate::embed::{wrap_document, Artifact, ArtifactRef, ArtifactStore, BootPayload};
use crate::error::{ChartError, ChartResult};
use crate::sandbox::Sandbox;
use crate::utils::preview;

/// Viewport used to replay menus before embedding
const PREFLIGHT_VIEWPORT: f64 = 1024.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered(ArtifactRef),
    /// User-safe diagnostic
    Failed(String),
}

impl RenderOutcome {
    pub fn is_rendered(&self) -> bool {
        matches!(self, RenderOutcome::Rendered(_))
    }

    pub fn to_json(&self) -> Value {
        match self {
            RenderOutcome::Rendered(artifact) => json!({
                "status": "rendered",
                "artifact_id": artifact.artifact_id,
                "message": artifact.message,
            }),
            RenderOutcome::Failed(message) => json!({
                "status": "failed",
                "error": message,
            }),
        }
    }
}

/// Markup plus the height stored alongside it
struct Prepared {
    markup: String,
    default_height: u32,
}

pub struct ChartRenderer {
    config: ChartConfig,
    sandbox: Sandbox,
    guard: Option<QueryGuard>,
    store: Arc<ArtifactStore>,
}

impl ChartRenderer {
    pub fn new(
        config: ChartConfig,
        fetcher: Option<Arc<dyn DataFetcher>>,
        store: Arc<ArtifactStore>,
    ) -> Self {
        let guard = fetcher.map(|f| QueryGuard::new(f, config.row_limit));
        Self {
            sandbox: Sandbox::new(config.sandbox),
            config,
            guard,
            store,
        }
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn config(&self) -> &ChartConfig {
        &self.config
    }

    /// Render `snippet`, running `query` first when one is given.
    pub async fn render(&self, query: Option<&str>, snippet: &str) -> RenderOutcome {
        let query = query.filter(|q| !q.trim().is_empty());
        match self.try_render(query, snippet).await {
            Ok(artifact) => RenderOutcome::Rendered(artifact),
            Err(err) => {
                error!(
                    kind = err.kind(),
                    error = %err,
                    sql_attached = query.is_some(),
                    code = %preview(snippet, self.config.preview_chars),
                    "Chart render failed"
                );
                RenderOutcome::Failed(err.user_message(self.config.error_message_limit))
            }
        }
    }

    async fn try_render(&self, query: Option<&str>, snippet: &str) -> ChartResult<ArtifactRef> {
        let rows = match query {
            Some(q) => {
                let guard = self.guard.as_ref().ok_or_else(|| {
                    ChartError::DataFetch("no data-fetch capability is configured".to_string())
                })?;
                let rows = guard.fetch(q).await?;
                debug!(rows = rows.len(), columns = rows.columns().len(), "Chart data fetched");
                Some(rows)
            }
            None => None,
        };

        let id = ArtifactStore::next_id();
        let prepared = catch_unwind(AssertUnwindSafe(|| self.prepare(&id, rows.as_ref(), snippet)))
            .map_err(|panic| {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "render pipeline panicked".to_string());
                ChartError::Unhandled(detail)
            })??;

        self.store
            .insert(Artifact::new(id.clone(), prepared.markup, prepared.default_height))
            .await;
        info!(artifact_id = %id, height = prepared.default_height, "Chart rendered");

        Ok(ArtifactRef {
            artifact_id: id,
            message: self.config.embed.rendered_message.clone(),
        })
    }

    /// The synchronous part of the pipeline.
    fn prepare(&self, id: &str, rows: Option<&ResultSet>, snippet: &str) -> ChartResult<Prepared> {
        let figure = self.sandbox.run(rows, snippet)?;
        let mut document = serializer::to_document(&figure, &self.config.meta_key)?;

        let report = normalize_update_menus(&mut document);
        if report.buttons_visited > 0 {
            debug!(
                buttons = report.buttons_visited,
                wrapped = report.values_wrapped,
                stripped = report.keys_stripped,
                "Normalized update menus"
            );
        }

        let linked = LinkedInteractionSpec::from_layout(&document.layout, &self.config.meta_key)?;
        let sizing = SizingPolicy::prepare(&mut document.layout, &self.config.sizing);

        let check = preflight(&document, &sizing, PREFLIGHT_VIEWPORT)?;
        for (menu, button) in &check.blanking_buttons {
            warn!(menu, button, "Menu button leaves a trace without array data");
        }

        let initial_height = sizing.initial_height();
        let payload = BootPayload {
            artifact_id: id,
            document: &document,
            sizing: &sizing,
            linked: linked.as_ref(),
            title_fallback: self.config.title_fallback,
        };
        let markup = wrap_document(&payload, initial_height, &self.config.embed)?;

        Ok(Prepared {
            markup,
            default_height: initial_height.round().max(1.0) as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InMemoryFetcher;

    fn renderer(fetcher: Option<Arc<dyn DataFetcher>>) -> ChartRenderer {
        ChartRenderer::new(ChartConfig::default(), fetcher, Arc::new(ArtifactStore::new()))
    }

    #[tokio::test]
    async fn test_render_without_query() {
        let r = renderer(None);
        let outcome = r
            .render(None, "fig = go.Figure(go.Bar(x=['a', 'b'], y=[1, 2]))")
            .await;
        let RenderOutcome::Rendered(artifact) = outcome else {
            panic!("expected a rendered chart");
        };
        assert_eq!(artifact.message, "Plotly chart rendered.");
        let stored = r.store().get(&artifact.artifact_id).await.unwrap();
        assert_eq!(stored.default_height, 420);
    }

    #[tokio::test]
    async fn test_explicit_height_is_stored() {
        let r = renderer(None);
        let outcome = r
            .render(None, "fig = go.Figure(go.Bar(x=['a'], y=[1]))\nfig.update_layout(height=333)")
            .await;
        let RenderOutcome::Rendered(artifact) = outcome else {
            panic!("expected a rendered chart");
        };
        let stored = r.store().get(&artifact.artifact_id).await.unwrap();
        assert_eq!(stored.default_height, 333);
        assert!(stored.markup.contains("height=\"333\""));
    }

    #[tokio::test]
    async fn test_query_without_fetcher_fails_softly() {
        let outcome = renderer(None).render(Some("SELECT 1"), "fig = go.Figure()").await;
        match outcome {
            RenderOutcome::Failed(msg) => assert!(msg.starts_with("Error fetching chart data")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_blank_query_is_ignored() {
        let fetcher = Arc::new(InMemoryFetcher::new(ResultSet::default()));
        let r = renderer(Some(fetcher.clone()));
        let outcome = r.render(Some("   "), "fig = go.Figure()").await;
        assert!(outcome.is_rendered());
        assert!(fetcher.queries().await.is_empty());
    }

    #[tokio::test]
    async fn test_error_messages_are_truncated() {
        let mut config = ChartConfig::default();
        config.error_message_limit = 40;
        let r = ChartRenderer::new(config, None, Arc::new(ArtifactStore::new()));
        let long_name = "x".repeat(500);
        let outcome = r.render(None, &format!("fig = {}", long_name)).await;
        let RenderOutcome::Failed(msg) = outcome else {
            panic!("expected a failure");
        };
        assert!(msg.starts_with("Error executing"));
        assert!(msg.contains("chars truncated"));
        assert!(msg.len() < 100, "{}", msg);
    }

    #[test]
    fn test_outcome_json() {
        let failed = RenderOutcome::Failed("boom".into()).to_json();
        assert_eq!(failed, json!({"status": "failed", "error": "boom"}));
    }
}
