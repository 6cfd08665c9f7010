use super::*;
use crate::resolve::registry::{StaticTemplateRegistry, TemplateDef};
use crate::resolve::substitute::PlaceholderRenderer;
use std::path::Path;

struct NoProbe;

impl MediaProbe for NoProbe {
    fn media_duration(&self, path: &Path) -> WeaveResult<f64> {
        Err(WeaveError::resource(
            None,
            format!("unexpected probe of {}", path.display()),
        ))
    }
}

fn registry() -> StaticTemplateRegistry {
    let pair = r#"
params:
  color: {default: red}
scenes:
  - id: first
    type: color
    color: "{{ color }}"
    duration: 2
  - id: second
    type: color
    duration: 3
"#;
    StaticTemplateRegistry::new()
        .with(TemplateDef::parse("pair", pair, PathBuf::from("/tpl/pair")).unwrap())
}

fn run(yaml: &str) -> WeaveResult<Timeline> {
    let spec = Specification::from_yaml_str(yaml, "/project")?;
    let registry = registry();
    let ctx = ResolveContext {
        registry: &registry,
        renderer: &PlaceholderRenderer,
        probe: &NoProbe,
    };
    resolve(&spec, ctx)
}

const HEADER: &str = "settings: {width: 64, height: 36, fps: 30, output_file: out.mp4}\n";

#[test]
fn default_transition_overlaps_neighbours() {
    let tl = run(r#"
settings:
  width: 64
  height: 36
  fps: 30
  output_file: out.mp4
  scene_defaults:
    transition: {type: cross-fade, duration: 1.5}
scenes:
  - {id: a, type: color, duration: 5}
  - {id: b, type: color, duration: 5}
"#)
    .unwrap();
    assert_eq!(tl.total_frames(), 255);
    assert!((tl.duration_secs() - 8.5).abs() < 1e-9);
    assert_eq!(tl.entries[1].range.start.0, 105);
    assert_eq!(tl.transitions.len(), 1);
    assert_eq!(tl.transitions[0].frames, 45);
    assert_eq!(tl.output, PathBuf::from("/project/out.mp4"));
}

#[test]
fn declared_transition_on_last_scene_is_rejected() {
    let err = run(&format!(
        "{HEADER}scenes:\n  - {{id: a, type: color, duration: 2}}\n  - {{id: b, type: color, duration: 2, transition: {{type: cross-fade, duration: 1}}}}\n"
    ))
    .unwrap_err();
    assert_eq!(err.kind(), crate::foundation::error::ErrorKind::Configuration);
    assert!(err.to_string().contains("last scene"), "{err}");
}

#[test]
fn frames_resolve_to_exact_seconds() {
    let tl = run(&format!("{HEADER}scenes:\n  - {{id: a, type: color, frames: 90}}\n")).unwrap();
    assert_eq!(tl.entries[0].scene.duration_frames, 90);
    assert!((tl.duration_secs() - 3.0).abs() < 1e-12);
    assert_eq!(tl.entries[0].duration_source, DurationSource::Frames);
}

#[test]
fn resolving_twice_yields_identical_fingerprints() {
    let yaml = format!(
        "{HEADER}scenes:\n  - {{id: a, type: color, duration: 1, color: blue}}\n  - {{type: template, id: p, name: pair}}\n"
    );
    let a = run(&yaml).unwrap();
    let b = run(&yaml).unwrap();
    let fa: Vec<_> = a.entries.iter().map(|e| e.fingerprint).collect();
    let fb: Vec<_> = b.entries.iter().map(|e| e.fingerprint).collect();
    assert_eq!(fa, fb);
    let ids: Vec<_> = a.entries.iter().map(|e| e.scene.id.as_str()).collect();
    assert_eq!(ids, ["a", "p", "p.second"]);
}

#[test]
fn changing_one_scene_changes_only_its_fingerprint() {
    let before = run(&format!(
        "{HEADER}scenes:\n  - {{id: a, type: color, duration: 1, color: blue}}\n  - {{id: b, type: color, duration: 1}}\n"
    ))
    .unwrap();
    let after = run(&format!(
        "{HEADER}scenes:\n  - {{id: a, type: color, duration: 1, color: green}}\n  - {{id: b, type: color, duration: 1}}\n"
    ))
    .unwrap();
    assert_ne!(before.entries[0].fingerprint, after.entries[0].fingerprint);
    assert_eq!(before.entries[1].fingerprint, after.entries[1].fingerprint);
}

#[test]
fn transition_change_keeps_fingerprints() {
    let plain = run(&format!(
        "{HEADER}scenes:\n  - {{id: a, type: color, duration: 2}}\n  - {{id: b, type: color, duration: 2}}\n"
    ))
    .unwrap();
    let faded = run(&format!(
        "{HEADER}scenes:\n  - {{id: a, type: color, duration: 2, transition: {{type: fade-through-black, duration: 0.5}}}}\n  - {{id: b, type: color, duration: 2}}\n"
    ))
    .unwrap();
    assert_eq!(plain.entries[0].fingerprint, faded.entries[0].fingerprint);
    assert_eq!(plain.entries[1].fingerprint, faded.entries[1].fingerprint);
    assert_eq!(faded.total_frames(), 105);
}

#[test]
fn output_file_does_not_affect_fingerprints() {
    let a = run(&format!("{HEADER}scenes:\n  - {{id: a, type: color, duration: 1}}\n")).unwrap();
    let b = run(
        "settings: {width: 64, height: 36, fps: 30, output_file: other.mp4, audio_recording_path: rec}\nscenes:\n  - {id: a, type: color, duration: 1}\n",
    )
    .unwrap();
    assert_eq!(a.entries[0].fingerprint, b.entries[0].fingerprint);
}

#[test]
fn scope_selects_invocation_and_relays_ranges() {
    let tl = run(&format!(
        "{HEADER}scenes:\n  - {{id: a, type: color, duration: 1, transition: {{type: cross-fade, duration: 0.5}}}}\n  - {{type: template, id: p, name: pair}}\n"
    ))
    .unwrap();
    assert_eq!(tl.transitions.len(), 1);

    let scoped = tl.scoped("p").unwrap();
    let ids: Vec<_> = scoped.entries.iter().map(|e| e.scene.id.as_str()).collect();
    assert_eq!(ids, ["p", "p.second"]);
    assert!(scoped.transitions.is_empty());
    assert_eq!(scoped.entries[0].range.start.0, 0);
    assert_eq!(scoped.total_frames(), 150);

    let one = tl.scoped("p.second").unwrap();
    assert_eq!(one.entries.len(), 1);
    assert!(tl.scoped("nope").is_err());
}

#[test]
fn view_serializes_scene_summary() {
    let tl = run(&format!(
        "{HEADER}scenes:\n  - {{id: a, type: color, duration: 1, cache: {{max-size: 1KB}}}}\n"
    ))
    .unwrap();
    let v = serde_json::to_value(tl.view()).unwrap();
    assert_eq!(v["total_frames"], 30);
    assert_eq!(v["scenes"][0]["id"], "a");
    assert_eq!(v["scenes"][0]["kind"], "color");
    assert_eq!(v["scenes"][0]["cached"], true);
    assert_eq!(v["scenes"][0]["max_size"], 1024);
    assert_eq!(v["scenes"][0]["fingerprint"].as_str().unwrap().len(), 32);
}

#[test]
fn unknown_template_stops_resolution() {
    let yaml = format!("{HEADER}scenes:\n  - {{type: template, name: nope}}\n");
    assert!(run(&yaml).is_err());
}
