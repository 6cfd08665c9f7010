use super::*;
use serde_json::json;

fn vars() -> Map<String, Value> {
    match json!({
        "title": "Hello",
        "size": 48,
        "colors": {"fg": "white"},
        "empty": null
    }) {
        Value::Object(m) => m,
        _ => unreachable!(),
    }
}

#[test]
fn renders_inline_placeholders() {
    let r = PlaceholderRenderer;
    assert_eq!(r.render_text("Say {{ title }}!", &vars()).unwrap(), "Say Hello!");
    assert_eq!(r.render_text("{{title}}/{{size}}", &vars()).unwrap(), "Hello/48");
    assert_eq!(r.render_text("fg={{ colors.fg }}", &vars()).unwrap(), "fg=white");
    assert_eq!(r.render_text("no placeholders", &vars()).unwrap(), "no placeholders");
}

#[test]
fn whole_placeholder_keeps_type() {
    let r = PlaceholderRenderer;
    assert_eq!(r.render_value("{{ size }}", &vars()).unwrap(), json!(48));
    assert_eq!(r.render_value("{{ colors }}", &vars()).unwrap(), json!({"fg": "white"}));
    assert_eq!(r.render_value("{{ size }}px", &vars()).unwrap(), json!("48px"));
}

#[test]
fn default_filter_applies_to_undefined_and_null() {
    let r = PlaceholderRenderer;
    assert_eq!(
        r.render_text("{{ subtitle | default('none') }}", &vars()).unwrap(),
        "none"
    );
    assert_eq!(r.render_value("{{ empty | default(3) }}", &vars()).unwrap(), json!(3));
    assert_eq!(
        r.render_text("{{ title | default(\"x\") }}", &vars()).unwrap(),
        "Hello"
    );
}

#[test]
fn undefined_variables_fail() {
    let r = PlaceholderRenderer;
    let err = r.render_text("{{ missing }}", &vars()).unwrap_err();
    assert!(err.to_string().contains("undefined template variable 'missing'"));
    assert!(r.render_text("{{ title", &vars()).is_err());
    assert!(r.render_text("{{ title | upper }}", &vars()).is_err());
}

#[test]
fn substitute_walks_nested_values_and_reports_paths() {
    let body = json!({
        "type": "svg",
        "params": {"title": "{{ title }}", "size": "{{ size }}"},
        "effects": [{"type": "fade-in", "duration": 1}]
    });
    let out = substitute(&body, &vars(), &PlaceholderRenderer, &KeyPath::root()).unwrap();
    assert_eq!(out["params"], json!({"title": "Hello", "size": 48}));
    assert_eq!(out["effects"], body["effects"]);

    let bad = json!({"params": ["{{ nope }}"]});
    let err = substitute(&bad, &vars(), &PlaceholderRenderer, &KeyPath::root()).unwrap_err();
    assert!(err.to_string().contains("$.params[0]"));
}

#[test]
fn rendering_is_deterministic() {
    let r = PlaceholderRenderer;
    let a = r.render_text("{{ title }} {{ colors.fg }}", &vars()).unwrap();
    let b = r.render_text("{{ title }} {{ colors.fg }}", &vars()).unwrap();
    assert_eq!(a, b);
}
