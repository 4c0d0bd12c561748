use serde_json::json;

use chart_agency::chart::{
    normalize_update_menus, serializer, ChartDocument, ChartEvent, ChartSession, InteractionState,
    LinkedInteractionEngine, LinkedInteractionSpec, RenderCommand, SizingConfig, SizingPolicy,
    TitleAnnotationFallback, LINKED_INTERACTION_META_KEY,
};
use chart_agency::sandbox::Sandbox;

const SEASON_CHART: &str = r#"
fig = make_subplots(rows=1, cols=2, subplot_titles=["Wins by team", "Detail"])
fig.add_trace(go.Bar(x=["MI", "CSK"], y=[11, 9], name="wins"), row=1, col=1)
fig.add_trace(go.Bar(x=["a", "b"], y=[1, 2], name="detail"), row=1, col=2)
fig.update_layout(
    updatemenus=[{
        "active": 1,
        "buttons": [
            {"method": "update", "label": "2019", "args": [{"y": [9, 8]}, {}, [0]]},
            {"method": "update", "label": "2020", "args": [{"y": [11, 9]}, {}, [0]]},
        ],
    }],
    meta={"pylogue_linked_interaction": {
        "source_trace": 0,
        "target_trace": 1,
        "default_season": 2020,
        "lookup": {"2020||MI": {"y": [10, 20], "title": "MI 2020"}},
    }},
)
"#;

fn prepared() -> (ChartDocument, LinkedInteractionSpec) {
    let figure = Sandbox::default().run(None, SEASON_CHART).unwrap();
    let mut document = serializer::to_document(&figure, LINKED_INTERACTION_META_KEY).unwrap();
    normalize_update_menus(&mut document);
    let spec = LinkedInteractionSpec::from_layout(&document.layout, LINKED_INTERACTION_META_KEY)
        .unwrap()
        .expect("contract declared under layout.meta");
    (document, spec)
}

fn session() -> ChartSession {
    let (mut document, spec) = prepared();
    let sizing = SizingPolicy::prepare(&mut document.layout, &SizingConfig::default());
    let engine = LinkedInteractionEngine::new(spec, TitleAnnotationFallback::default());
    let mut session = ChartSession::standard(document, sizing, Some(engine));
    session.dispatch(ChartEvent::Mount { viewport_width: 900.0 }).unwrap();
    session
}

#[test]
fn test_contract_survives_the_snippet() {
    let (document, spec) = prepared();
    assert_eq!(spec.source_trace, 0);
    assert_eq!(spec.target_trace, 1);
    assert_eq!(spec.default_season, "2020");
    assert_eq!(document.layout.annotations.len(), 2);
    // Single-trace patches are reshaped for the two-trace chart.
    assert_eq!(
        document.layout.updatemenus[0].buttons[0].args[0],
        json!({"y": [[9, 8]]})
    );
}

#[test]
fn test_click_in_active_season_updates_target() {
    let mut session = session();
    let commands = session
        .dispatch(ChartEvent::Click {
            curve_number: 0,
            x: json!("MI"),
        })
        .unwrap();

    let mut restyle = serde_json::Map::new();
    restyle.insert("y".to_string(), json!([[10, 20]]));
    let mut title = serde_json::Map::new();
    title.insert("annotations[1].text".to_string(), json!("MI 2020"));
    assert_eq!(
        commands,
        vec![
            RenderCommand::Restyle {
                patch: restyle,
                traces: vec![1],
            },
            RenderCommand::Relayout { patch: title },
        ]
    );

    let document = &session.state().document;
    assert_eq!(document.data[1].get("y"), Some(&json!([10, 20])));
    assert_eq!(document.data[0].get("y"), Some(&json!([11, 9])));
    assert_eq!(document.layout.annotations[1].text, Some(json!("MI 2020")));
    assert_eq!(document.layout.annotations[0].text, Some(json!("Wins by team")));
}

#[test]
fn test_click_in_other_season_is_ignored() {
    let mut session = session();
    session
        .dispatch(ChartEvent::MenuSelect { menu: 0, button: 0 })
        .unwrap();
    assert_eq!(session.state().document.layout.updatemenus[0].active, Some(0));
    assert_eq!(session.state().document.data[0].get("y"), Some(&json!([9, 8])));

    let before = session.state().document.clone();
    let commands = session
        .dispatch(ChartEvent::Click {
            curve_number: 0,
            x: json!("MI"),
        })
        .unwrap();
    assert!(commands.is_empty());
    assert_eq!(session.state().document, before);
}

#[test]
fn test_clicks_on_other_traces_do_nothing() {
    let mut session = session();
    let commands = session
        .dispatch(ChartEvent::Click {
            curve_number: 1,
            x: json!("a"),
        })
        .unwrap();
    assert!(commands.is_empty());
}

#[test]
fn test_engine_records_the_key_it_applied() {
    let (document, spec) = prepared();
    let mut engine = LinkedInteractionEngine::new(spec, TitleAnnotationFallback::default());
    assert_eq!(engine.state(), &InteractionState::Idle);

    let commands = engine.on_click(0, &json!("MI"), &document);
    assert_eq!(commands.len(), 2);
    assert_eq!(
        engine.state(),
        &InteractionState::Updated {
            key: "2020||MI".to_string()
        }
    );

    assert!(engine.on_click(0, &json!("CSK"), &document).is_empty());
}
