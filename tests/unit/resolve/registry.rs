use super::*;

const TEMPLATE: &str = r#"
description: Title card
params:
  title:
    required: true
  subtitle:
    required: true
    description: Second line
  color:
    default: white
scenes:
  - type: svg
    template: card.svg
    params:
      title: "{{ title }}"
"#;

#[test]
fn parses_declared_params() {
    let def = TemplateDef::parse("card", TEMPLATE, PathBuf::from("/t/card")).unwrap();
    assert_eq!(def.description.as_deref(), Some("Title card"));
    assert!(def.params["title"].required);
    assert_eq!(def.params["subtitle"].description.as_deref(), Some("Second line"));
    assert_eq!(def.params["color"].default, Some(Value::from("white")));
    assert!(!def.params["color"].required);
    assert_eq!(def.scenes.len(), 1);
}

#[test]
fn bare_list_and_single_scene_forms() {
    let list = TemplateDef::parse("a", "- {type: color, duration: 1}\n- {type: color, duration: 2}\n", PathBuf::new()).unwrap();
    assert_eq!(list.scenes.len(), 2);
    assert!(list.params.is_empty());

    let single = TemplateDef::parse("b", "type: color\nduration: 1\n", PathBuf::new()).unwrap();
    assert_eq!(single.scenes.len(), 1);
}

#[test]
fn dir_registry_searches_roots_in_order() {
    let user = tempfile::tempdir().unwrap();
    let builtin = tempfile::tempdir().unwrap();
    for (root, dur) in [(user.path(), 1), (builtin.path(), 2)] {
        let dir = root.join("card");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(TEMPLATE_FILE), format!("- {{type: color, duration: {dur}}}\n")).unwrap();
    }
    std::fs::create_dir_all(builtin.path().join("other")).unwrap();
    std::fs::write(builtin.path().join("other").join(TEMPLATE_FILE), "[]\n").unwrap();
    std::fs::create_dir_all(builtin.path().join("not_a_template")).unwrap();

    let reg = DirTemplateRegistry::new(vec![user.path().to_path_buf(), builtin.path().to_path_buf()]);
    let def = reg.lookup("card").unwrap();
    assert_eq!(def.scenes[0]["duration"], 1);
    assert_eq!(def.base_dir, user.path().join("card"));
    assert_eq!(reg.names(), ["card", "other"]);

    assert!(reg.lookup("missing").unwrap_err().to_string().contains("unknown template 'missing'"));
}

#[test]
fn names_must_be_single_components() {
    let reg = StaticTemplateRegistry::new();
    for bad in ["", "..", "a/b", "a\\b"] {
        assert!(reg.lookup(bad).unwrap_err().to_string().contains("single path component"));
    }
}

#[test]
fn builtin_templates_parse() {
    let reg = DirTemplateRegistry::new(vec![builtin_template_dir()]);
    assert!(reg.names().contains(&"title_and_subtitle".to_string()));
    let def = reg.lookup("title_and_subtitle").unwrap();
    assert!(def.params["title"].required);
    assert!(def.params["subtitle"].required);
}
