use super::*;
use serde_json::json;

fn map(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(m) => m,
        _ => panic!("expected mapping"),
    }
}

#[test]
fn scalars_and_lists_override() {
    let base = map(json!({"duration": 5, "effects": [{"type": "fade-in"}], "bg_color": "red"}));
    let top = map(json!({"duration": 3, "effects": []}));
    let out = merge(&base, &top);
    assert_eq!(out["duration"], 3);
    assert_eq!(out["effects"], json!([]));
    assert_eq!(out["bg_color"], "red");
}

#[test]
fn mappings_merge_per_key_at_every_level() {
    let base = map(json!({"transition": {"type": "cross-fade", "duration": 1.5, "x": {"a": 1, "b": 2}}}));
    let top = map(json!({"transition": {"duration": 0.5, "x": {"b": 3}}}));
    let out = merge(&base, &top);
    assert_eq!(
        out["transition"],
        json!({"type": "cross-fade", "duration": 0.5, "x": {"a": 1, "b": 3}})
    );
}

#[test]
fn explicit_null_suppresses_while_absence_inherits() {
    let defaults = map(json!({"transition": {"type": "cross-fade", "duration": 1.5}}));

    let suppressed = merge(&defaults, &map(json!({"id": "a", "transition": null})));
    assert_eq!(Slot::of(&suppressed, "transition"), Slot::Null);

    let inherited = merge(&defaults, &map(json!({"id": "a"})));
    assert_eq!(
        Slot::of(&inherited, "transition").value(),
        Some(&json!({"type": "cross-fade", "duration": 1.5}))
    );
    assert_eq!(Slot::of(&inherited, "cache"), Slot::Absent);
}

#[test]
fn merge_leaves_inputs_untouched() {
    let base = map(json!({"a": {"b": 1}}));
    let top = map(json!({"a": {"c": 2}}));
    let before = base.clone();
    let _ = merge(&base, &top);
    assert_eq!(base, before);
}

#[test]
fn layers_fold_in_precedence_order() {
    let defaults = map(json!({"duration": 5, "cache": true}));
    let template = map(json!({"duration": 4, "type": "svg"}));
    let overrides = map(json!({"duration": 2}));
    let out = merge_layers([&defaults, &template, &overrides]);
    assert_eq!(out, map(json!({"duration": 2, "cache": true, "type": "svg"})));
}
