use serde_json::{json, Map, Value};

use chart_agency::chart::{
    normalize_per_trace_value, normalize_update_menus, serializer, strip_fragile_annotation_keys,
    ChartEvent, ChartSession, SizingConfig, SizingPolicy, LINKED_INTERACTION_META_KEY,
};

fn session_for(layout: Value) -> ChartSession {
    let mut document = serializer::document_from_value(
        json!({"data": [{"type": "bar", "x": ["a"], "y": [1]}], "layout": layout}),
        LINKED_INTERACTION_META_KEY,
    )
    .unwrap();
    let sizing = SizingPolicy::prepare(&mut document.layout, &SizingConfig::default());
    ChartSession::standard(document, sizing, None)
}

#[test]
fn test_explicit_height_never_changes() {
    let mut session = session_for(json!({"height": 300}));
    session.dispatch(ChartEvent::Mount { viewport_width: 280.0 }).unwrap();
    assert_eq!(session.state().rendered_height(), Some(300.0));

    let mut width = 280.0;
    while width <= 1400.0 {
        session.dispatch(ChartEvent::Resize { viewport_width: width }).unwrap();
        assert_eq!(session.state().rendered_height(), Some(300.0));
        assert_eq!(session.state().container_height, Some(300.0));
        width += 70.0;
    }
}

#[test]
fn test_responsive_height_is_monotone_and_bounded() {
    let mut session = session_for(json!({"width": 1200}));
    assert_eq!(session.state().document.layout.width, None);
    assert_eq!(session.state().document.layout.autosize, Some(true));

    session.dispatch(ChartEvent::Mount { viewport_width: 200.0 }).unwrap();
    let mut previous = session.state().rendered_height().unwrap();
    assert_eq!(previous, 280.0);

    for width in (200..=2000).step_by(50) {
        session
            .dispatch(ChartEvent::Resize { viewport_width: width as f64 })
            .unwrap();
        let height = session.state().rendered_height().unwrap();
        assert!((280.0..=560.0).contains(&height), "{} at {}", height, width);
        assert!(height >= previous);
        assert_eq!(session.state().container_height, Some(height));
        previous = height;
    }
    assert_eq!(previous, 560.0);
}

#[test]
fn test_each_resize_reconciles_then_resizes_natively() {
    let mut session = session_for(json!({}));
    session.dispatch(ChartEvent::Mount { viewport_width: 800.0 }).unwrap();
    session.dispatch(ChartEvent::Resize { viewport_width: 600.0 }).unwrap();
    assert_eq!(session.state().reconciliations, 2);
    assert_eq!(session.state().native_resizes, 2);
}

#[test]
fn test_per_trace_shapes() {
    assert_eq!(normalize_per_trace_value(&json!(["a", "b"]), 1), json!([["a", "b"]]));
    assert_eq!(normalize_per_trace_value(&json!([["a", "b"]]), 1), json!([["a", "b"]]));
    assert_eq!(normalize_per_trace_value(&json!([[1], [2]]), 2), json!([[1], [2]]));
    assert_eq!(normalize_per_trace_value(&json!([1, 2]), 3), json!([[1, 2]]));
    assert_eq!(normalize_per_trace_value(&json!("label"), 2), json!(["label"]));

    let once = normalize_per_trace_value(&json!([4, 5, 6]), 2);
    assert_eq!(normalize_per_trace_value(&once, 2), once);
}

#[test]
fn test_annotation_text_keys_are_stripped() {
    let mut patch: Map<String, Value> = json!({
        "annotations[0].text": "gone",
        "annotations[12].text": "gone",
        "annotations[0].font": {"size": 10},
        "title.text": "kept"
    })
    .as_object()
    .unwrap()
    .clone();
    assert_eq!(strip_fragile_annotation_keys(&mut patch), 2);
    assert!(patch.contains_key("annotations[0].font"));
    assert!(patch.contains_key("title.text"));
}

#[test]
fn test_menu_normalization_is_idempotent() {
    let mut document = serializer::document_from_value(
        json!({
            "data": [
                {"type": "bar", "x": ["a"], "y": [1]},
                {"type": "bar", "x": ["b"], "y": [2]}
            ],
            "layout": {"updatemenus": [{"buttons": [
                {"method": "update", "label": "A",
                 "args": [{"x": ["a", "b"], "text": ["t"]}, {"annotations[1].text": "x", "title.text": "A"}]},
                {"method": "restyle", "label": "B", "args": [{"x": ["c"]}]}
            ]}]}
        }),
        LINKED_INTERACTION_META_KEY,
    )
    .unwrap();

    let report = normalize_update_menus(&mut document);
    assert_eq!(report.buttons_visited, 1);
    assert_eq!(report.values_wrapped, 2);
    assert_eq!(report.keys_stripped, 1);

    let buttons = &document.layout.updatemenus[0].buttons;
    assert_eq!(buttons[0].args[0], json!({"x": [["a", "b"]], "text": [["t"]]}));
    assert_eq!(buttons[0].args[1], json!({"title.text": "A"}));
    assert_eq!(buttons[1].args[0], json!({"x": ["c"]}));

    let snapshot = document.clone();
    let again = normalize_update_menus(&mut document);
    assert_eq!(again.values_wrapped, 0);
    assert_eq!(again.keys_stripped, 0);
    assert_eq!(document, snapshot);
}
