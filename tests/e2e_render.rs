use serde_json::json;
use std::sync::Arc;

use chart_agency::chart::{normalize_update_menus, serializer, LINKED_INTERACTION_META_KEY};
use chart_agency::config::ChartConfig;
use chart_agency::data::{DataFetcher, InMemoryFetcher, ResultSet};
use chart_agency::embed::ArtifactStore;
use chart_agency::renderer::{ChartRenderer, RenderOutcome};
use chart_agency::sandbox::Sandbox;

fn standings() -> ResultSet {
    ResultSet::from_json_records(&[
        json!({"team": "MI", "wins": 11}),
        json!({"team": "CSK", "wins": 9}),
        json!({"team": "DC", "wins": 8}),
    ])
    .unwrap()
}

fn renderer(fetcher: Arc<InMemoryFetcher>) -> ChartRenderer {
    let fetcher: Arc<dyn DataFetcher> = fetcher;
    ChartRenderer::new(
        ChartConfig::default(),
        Some(fetcher),
        Arc::new(ArtifactStore::new()),
    )
}

#[test]
fn test_px_bar_serializes_one_trace_with_three_categories() {
    let figure = Sandbox::default()
        .run(Some(&standings()), r#"fig = px.bar(df, x="team", y="wins")"#)
        .unwrap();
    let mut document = serializer::to_document(&figure, LINKED_INTERACTION_META_KEY).unwrap();
    normalize_update_menus(&mut document);

    assert_eq!(document.data.len(), 1);
    assert_eq!(document.data[0].kind.as_str(), "bar");
    assert_eq!(document.data[0].get("x"), Some(&json!(["MI", "CSK", "DC"])));
    assert_eq!(document.data[0].get("y"), Some(&json!([11, 9, 8])));
}

#[tokio::test]
async fn test_render_with_query_stores_embeddable_artifact() {
    let fetcher = Arc::new(InMemoryFetcher::new(standings()));
    let r = renderer(fetcher.clone());

    let outcome = r
        .render(
            Some("```sql\nSELECT team, wins FROM standings;\n```"),
            "fig = px.bar(df, x='team', y='wins', title='Wins')",
        )
        .await;
    let RenderOutcome::Rendered(artifact) = outcome else {
        panic!("expected a rendered chart, got {:?}", outcome);
    };

    assert_eq!(
        fetcher.queries().await,
        vec!["SELECT * FROM (SELECT team, wins FROM standings) AS bounded LIMIT 2000".to_string()]
    );

    let markup = r.store().resolve(&artifact.artifact_id).await.unwrap();
    assert!(markup.starts_with("<iframe"));
    assert!(markup.contains(&format!("data-artifact-id=\"{}\"", artifact.artifact_id)));
    assert!(markup.contains("height=\"420\""));
    assert!(markup.contains("chart:resize"));
}

#[tokio::test]
async fn test_drop_is_rejected_before_fetching() {
    let fetcher = Arc::new(InMemoryFetcher::new(standings()));
    let r = renderer(fetcher.clone());

    let outcome = r.render(Some("  DROP TABLE standings"), "fig = px.bar(df)").await;
    match outcome {
        RenderOutcome::Failed(msg) => {
            assert!(msg.starts_with("Error: Only SELECT queries are allowed."), "{}", msg)
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(fetcher.queries().await.is_empty());
}

#[tokio::test]
async fn test_missing_fig_returns_literal_message() {
    let fetcher = Arc::new(InMemoryFetcher::new(standings()));
    let outcome = renderer(fetcher)
        .render(None, "chart = px.bar(x=['a'], y=[1])")
        .await;
    assert_eq!(
        outcome,
        RenderOutcome::Failed("Error: Plotly code must define a `fig` variable.".to_string())
    );
}

#[tokio::test]
async fn test_snippet_failures_are_reported_not_raised() {
    let fetcher = Arc::new(InMemoryFetcher::new(standings()));
    let r = renderer(fetcher);

    let outcome = r
        .render(Some("SELECT * FROM standings"), "fig = px.bar(df, x='season', y='wins')")
        .await;
    match outcome {
        RenderOutcome::Failed(msg) => {
            assert!(msg.starts_with("Error executing Plotly code:"), "{}", msg);
            assert!(msg.contains("season"), "{}", msg);
        }
        other => panic!("unexpected {:?}", other),
    }

    let outcome = r
        .render(None, "fig = go.Figure()\nfig.update_layout(height=-5)")
        .await;
    match outcome {
        RenderOutcome::Failed(msg) => {
            assert!(msg.starts_with("Error serializing Plotly figure:"), "{}", msg)
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(r.store().is_empty().await);
}

#[tokio::test]
async fn test_linked_contract_reaches_the_frame() {
    let r = renderer(Arc::new(InMemoryFetcher::new(standings())));
    let snippet = r#"
fig = go.Figure([go.Bar(x=["MI", "CSK"], y=[11, 9]), go.Bar(x=["a"], y=[1])])
fig.update_layout(meta={"pylogue_linked_interaction": {
    "source_trace": 0,
    "target_trace": 1,
    "lookup": {"MI": {"y": [3, 4]}},
}})
"#;
    let RenderOutcome::Rendered(artifact) = r.render(None, snippet).await else {
        panic!("expected a rendered chart");
    };
    let stored = r.store().get(&artifact.artifact_id).await.unwrap();
    assert!(stored.markup.contains("&quot;linked&quot;:{"));
    assert!(!stored.markup.contains("&quot;linked&quot;:null"));
}
