use super::*;
use crate::foundation::error::KeyPath;
use crate::resolve::scene::locate_assets;
use crate::spec::model::SceneDef;
use serde_json::{Map, json};

fn settings() -> Settings {
    serde_json::from_value(json!({
        "width": 640, "height": 360, "fps": 30, "output_file": "out.mp4"
    }))
    .unwrap()
}

fn body(v: Value) -> Map<String, Value> {
    let Value::Object(m) = v else { panic!() };
    m
}

fn scene(params: Value, dir: &Path) -> ResolvedScene {
    let params = body(params);
    let def = SceneDef::from_body(&params, &KeyPath::root()).unwrap();
    let assets = locate_assets(&def, dir, dir).unwrap();
    ResolvedScene {
        id: def.id().to_string(),
        origin: None,
        def,
        params,
        base_dir: dir.to_path_buf(),
        assets,
        duration_frames: 60,
        path: KeyPath::root(),
    }
}

fn index(s: &ResolvedScene) -> ContentIndex {
    ContentIndex::build(s.assets.refs().into_iter().map(|(_, p)| p.to_path_buf())).unwrap()
}

fn fp(s: &ResolvedScene, settings: &Settings) -> Fingerprint {
    fingerprint_scene(s, settings, None, &index(s)).unwrap()
}

#[test]
fn display_and_parse_agree() {
    let f = Fingerprint {
        hi: 0x0123_4567_89ab_cdef,
        lo: 42,
    };
    let s = f.to_string();
    assert_eq!(s, "0123456789abcdef000000000000002a");
    assert_eq!(s.parse::<Fingerprint>().unwrap(), f);
    assert!("xyz".parse::<Fingerprint>().is_err());
    assert_eq!(serde_json::to_value(f).unwrap(), json!(s));
}

#[test]
fn fingerprint_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let s = scene(json!({"id": "a", "type": "color", "color": "red"}), dir.path());
    assert_eq!(fp(&s, &settings()), fp(&s, &settings()));
}

#[test]
fn key_order_does_not_matter() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("t.svg"), "<svg/>").unwrap();
    let a = scene(
        json!({"id": "a", "type": "svg", "template": "t.svg", "params": {"x": 1, "y": 2}}),
        dir.path(),
    );
    let b = scene(
        json!({"params": {"y": 2, "x": 1}, "template": "t.svg", "type": "svg", "id": "a"}),
        dir.path(),
    );
    assert_eq!(fp(&a, &settings()), fp(&b, &settings()));
}

#[test]
fn parameter_changes_change_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    let red = scene(json!({"id": "a", "type": "color", "color": "red"}), dir.path());
    let blue = scene(json!({"id": "a", "type": "color", "color": "blue"}), dir.path());
    assert_ne!(fp(&red, &settings()), fp(&blue, &settings()));

    let mut longer = red.clone();
    longer.duration_frames = 61;
    assert_ne!(fp(&red, &settings()), fp(&longer, &settings()));
}

#[test]
fn transition_and_cache_keys_are_excluded() {
    let dir = tempfile::tempdir().unwrap();
    let plain = scene(json!({"id": "a", "type": "color"}), dir.path());
    let decorated = scene(
        json!({
            "id": "a", "type": "color",
            "transition": {"type": "cross-fade", "duration": 1},
            "cache": {"max-size": "10MB"}
        }),
        dir.path(),
    );
    assert_eq!(fp(&plain, &settings()), fp(&decorated, &settings()));
}

#[test]
fn file_content_changes_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    let img = dir.path().join("pic.png");
    std::fs::write(&img, b"one").unwrap();
    let s = scene(json!({"id": "a", "type": "image", "image": "pic.png"}), dir.path());
    let before = fp(&s, &settings());
    std::fs::write(&img, b"two").unwrap();
    let after = fp(&s, &settings());
    assert_ne!(before, after);
}

#[test]
fn pixel_settings_change_fingerprint_but_output_does_not() {
    let dir = tempfile::tempdir().unwrap();
    let s = scene(json!({"id": "a", "type": "color"}), dir.path());
    let base = fp(&s, &settings());

    let mut renamed = settings();
    renamed.output_file = "elsewhere.mp4".to_string();
    renamed.audio_recording_path = Some("rec".to_string());
    assert_eq!(base, fp(&s, &renamed));

    let mut wider = settings();
    wider.width = 1280;
    assert_ne!(base, fp(&s, &wider));

    let mut font = settings();
    font.font = Some("Serif".to_string());
    assert_ne!(base, fp(&s, &font));

    let mut loud = settings();
    loud.normalization = Some(Default::default());
    assert_ne!(base, fp(&s, &loud));
}

#[test]
fn font_file_content_is_hashed() {
    let dir = tempfile::tempdir().unwrap();
    let font = dir.path().join("font.ttf");
    std::fs::write(&font, b"v1").unwrap();
    let s = scene(json!({"id": "a", "type": "color"}), dir.path());
    let mut settings = settings();
    settings.font = Some("font.ttf".to_string());

    let idx = ContentIndex::build([font.clone()]).unwrap();
    let before = fingerprint_scene(&s, &settings, Some(font.as_path()), &idx).unwrap();
    std::fs::write(&font, b"v2").unwrap();
    let idx = ContentIndex::build([font.clone()]).unwrap();
    let after = fingerprint_scene(&s, &settings, Some(font.as_path()), &idx).unwrap();
    assert_ne!(before, after);
}

#[test]
fn unindexed_file_is_a_resource_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("pic.png"), b"x").unwrap();
    let s = scene(json!({"id": "a", "type": "image", "image": "pic.png"}), dir.path());
    let err = fingerprint_scene(&s, &settings(), None, &ContentIndex::default()).unwrap_err();
    assert_eq!(err.kind(), crate::foundation::error::ErrorKind::Resource);
}
