//! Artifact host
//!
//! HTTP surface over the renderer: render requests in, embeddable markup out.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::renderer::{ChartRenderer, RenderOutcome};

#[derive(Clone)]
pub struct AppState {
    pub renderer: Arc<ChartRenderer>,
}

#[derive(Debug, Deserialize)]
pub struct RenderRequest {
    #[serde(default)]
    pub sql_query: Option<String>,
    pub chart_code: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/charts/render", post(render_chart))
        .route("/v1/artifacts/{id}", get(resolve_artifact))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let addr = state.renderer.config().bind_addr.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Chart host listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let artifacts = state.renderer.store().len().await;
    Json(serde_json::json!({ "status": "ok", "artifacts": artifacts }))
}

async fn render_chart(
    State(state): State<AppState>,
    Json(request): Json<RenderRequest>,
) -> Json<serde_json::Value> {
    debug!(
        sql_attached = request.sql_query.is_some(),
        chars = request.chart_code.len(),
        "Render request"
    );
    let outcome = state
        .renderer
        .render(request.sql_query.as_deref(), &request.chart_code)
        .await;
    if let RenderOutcome::Rendered(artifact) = &outcome {
        debug!(artifact_id = %artifact.artifact_id, "Render request served");
    }
    Json(outcome.to_json())
}

async fn resolve_artifact(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.renderer.store().resolve(&id).await {
        Some(markup) => Html(markup).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown artifact '{}'", id) })),
        )
            .into_response(),
    }
}
