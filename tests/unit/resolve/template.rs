use super::*;
use crate::resolve::registry::{StaticTemplateRegistry, TemplateDef};
use crate::resolve::substitute::PlaceholderRenderer;
use serde_json::json;

fn registry() -> StaticTemplateRegistry {
    let card = r#"
params:
  title: {required: true}
  subtitle: {required: true}
  seconds: {default: 3}
scenes:
  - id: card
    type: svg
    template: card.svg
    duration: "{{ seconds }}"
    params:
      title: "{{ title }}"
      subtitle: "{{ subtitle }}"
      font: "{{ font | default('serif') }}"
  - type: color
    duration: 1
"#;
    let outer = r#"
scenes:
  - type: template
    id: inner
    name: card
    with: {title: "{{ t }}", subtitle: sub}
  - id: tail
    type: color
    duration: 2
"#;
    let selfref = "- {type: template, name: loop_a}\n";
    let a_to_b = "- {type: template, name: loop_c}\n";
    let b_to_a = "- {type: template, name: loop_b}\n";
    StaticTemplateRegistry::new()
        .with(TemplateDef::parse("card", card, PathBuf::from("/tpl/card")).unwrap())
        .with(TemplateDef::parse("outer", outer, PathBuf::from("/tpl/outer")).unwrap())
        .with(TemplateDef::parse("loop_a", selfref, PathBuf::new()).unwrap())
        .with(TemplateDef::parse("loop_b", a_to_b, PathBuf::new()).unwrap())
        .with(TemplateDef::parse("loop_c", b_to_a, PathBuf::new()).unwrap())
}

fn spec(scenes: &str, defaults: &str) -> Specification {
    let text = format!(
        "settings: {{width: 64, height: 64, fps: 10, output_file: o.mp4, font: Mono, scene_defaults: {defaults}}}\nscenes:\n{scenes}"
    );
    Specification::from_yaml_str(&text, "/work").unwrap()
}

fn expand(spec: &Specification) -> WeaveResult<Vec<ExpandedScene>> {
    let reg = registry();
    let ex = Expander::new(
        &reg,
        &PlaceholderRenderer,
        &spec.settings.scene_defaults,
        spec.settings.font.as_deref(),
    );
    ex.expand_spec(spec)
}

#[test]
fn expands_with_ids_params_and_base_dir() {
    let s = spec(
        "  - {type: template, id: title, name: card, with: {title: X, subtitle: Y}}\n",
        "{cache: true}",
    );
    let out = expand(&s).unwrap();
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].id, "title");
    assert_eq!(out[1].id, "title.1");
    assert_eq!(out[0].body["id"], "title");
    assert_eq!(out[0].body["duration"], 3);
    assert_eq!(out[0].body["params"], json!({"title": "X", "subtitle": "Y", "font": "Mono"}));
    assert_eq!(out[0].body["cache"], true);
    assert_eq!(out[0].base_dir, PathBuf::from("/tpl/card"));
    let origin = out[1].origin.as_ref().unwrap();
    assert_eq!(origin.invocation, "title");
    assert_eq!(origin.template, "card");
}

#[test]
fn overrides_apply_to_first_scene_only_and_win_over_defaults() {
    let s = spec(
        "  - {type: template, id: t, name: card, with: {title: X, subtitle: Y}, duration: 9}\n",
        "{duration: 5}",
    );
    let out = expand(&s).unwrap();
    assert_eq!(out[0].body["duration"], 9);
    assert_eq!(out[1].body["duration"], 1);
}

#[test]
fn missing_required_params_name_template_and_params() {
    let s = spec("  - {type: template, id: t, name: card, with: {title: X}}\n", "{}");
    match expand(&s).unwrap_err() {
        WeaveError::MissingTemplateParams { template, missing } => {
            assert_eq!(template, "card");
            assert_eq!(missing, ["subtitle"]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let s = spec("  - {type: template, id: t, name: card, with: {title: X, subtitle: null}}\n", "{}");
    assert!(matches!(
        expand(&s).unwrap_err(),
        WeaveError::MissingTemplateParams { .. }
    ));
}

#[test]
fn nested_templates_expand_recursively() {
    let s = spec("  - {type: template, id: o, name: outer, with: {t: Nested}}\n", "{}");
    let out = expand(&s).unwrap();
    let ids: Vec<_> = out.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["o", "o.inner.1", "o.tail"]);
    assert_eq!(out[0].body["params"]["title"], "Nested");
    assert_eq!(out[0].base_dir, PathBuf::from("/tpl/card"));
    assert_eq!(out[2].base_dir, PathBuf::from("/tpl/outer"));
}

#[test]
fn recursion_is_rejected_with_chain() {
    let s = spec("  - {type: template, id: x, name: loop_a}\n", "{}");
    match expand(&s).unwrap_err() {
        WeaveError::TemplateRecursion { chain } => assert_eq!(chain, ["loop_a", "loop_a"]),
        other => panic!("unexpected error: {other}"),
    }

    let s = spec("  - {type: template, id: x, name: loop_b}\n", "{}");
    match expand(&s).unwrap_err() {
        WeaveError::TemplateRecursion { chain } => {
            assert_eq!(chain, ["loop_b", "loop_c", "loop_b"])
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn plain_scenes_get_defaults_and_duplicates_after_expansion_fail() {
    let s = spec(
        "  - {id: a, type: color, transition: null}\n  - {id: b, type: color}\n",
        "{transition: {type: cross-fade, duration: 1}}",
    );
    let out = expand(&s).unwrap();
    assert_eq!(out[0].body["transition"], Value::Null);
    assert_eq!(out[1].body["transition"]["type"], "cross-fade");
    assert!(out[0].origin.is_none());

    let s = spec(
        "  - {id: t.1, type: color}\n  - {type: template, id: t, name: card, with: {title: X, subtitle: Y}}\n",
        "{}",
    );
    let err = expand(&s).unwrap_err();
    assert!(err.to_string().contains("duplicate scene id 't.1'"));
}

#[test]
fn expansion_is_deterministic() {
    let s = spec(
        "  - {type: template, id: t, name: card, with: {title: X, subtitle: Y}}\n",
        "{}",
    );
    assert_eq!(expand(&s).unwrap(), expand(&s).unwrap());
}
