use super::*;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

struct FakeProbe(HashMap<PathBuf, f64>);

impl MediaProbe for FakeProbe {
    fn media_duration(&self, path: &Path) -> WeaveResult<f64> {
        self.0
            .get(path)
            .copied()
            .ok_or_else(|| WeaveError::resource(None, format!("probe failed: {}", path.display())))
    }
}

fn probe() -> FakeProbe {
    FakeProbe(HashMap::from([
        (PathBuf::from("/m/clip.mp4"), 12.0),
        (PathBuf::from("/m/voice.mp3"), 4.2),
        (PathBuf::from("/m/music.mp3"), 6.0),
    ]))
}

fn def(v: Value) -> SceneDef {
    let Value::Object(m) = v else { panic!() };
    SceneDef::from_body(&m, &KeyPath::root()).unwrap()
}

fn fps30() -> Fps {
    Fps::new(30).unwrap()
}

fn run(d: &SceneDef, assets: &SceneAssets) -> WeaveResult<ResolvedDuration> {
    resolve_duration(d, assets, fps30(), &probe(), &KeyPath::root())
}

#[test]
fn frames_resolve_exactly() {
    let d = def(json!({"id": "a", "type": "color", "frames": 90}));
    let r = run(&d, &SceneAssets::default()).unwrap();
    assert_eq!(r.frames, 90);
    assert_eq!(fps30().secs(r.frames), 3.0);
    assert_eq!(r.source, DurationSource::Frames);
}

#[test]
fn explicit_duration_wins_and_rounds_to_frames() {
    let d = def(json!({"id": "a", "type": "color", "duration": 1.01, "frames": 5}));
    let r = run(&d, &SceneAssets::default()).unwrap();
    assert_eq!(r.frames, 30);
    assert_eq!(r.source, DurationSource::Explicit);

    let d = def(json!({"id": "a", "type": "color", "duration": 0}));
    assert_eq!(run(&d, &SceneAssets::default()).unwrap().frames, 1);
}

#[test]
fn video_length_comes_from_probe_and_trim() {
    let d = def(json!({"id": "v", "type": "video", "file": "clip.mp4", "start": 2}));
    let assets = SceneAssets {
        primary: Some(PathBuf::from("/m/clip.mp4")),
        ..SceneAssets::default()
    };
    let r = run(&d, &assets).unwrap();
    assert_eq!(r.frames, 300);
    assert_eq!(r.source, DurationSource::Media);

    let d = def(json!({"id": "v", "type": "video", "file": "clip.mp4", "start": 1, "end": 3.5}));
    assert_eq!(run(&d, &assets).unwrap().frames, 75);

    let d = def(json!({"id": "v", "type": "video", "file": "clip.mp4", "start": 20}));
    assert!(run(&d, &assets).is_err());
}

#[test]
fn image_sequence_length_uses_sequence_fps() {
    let frames: Vec<PathBuf> = (0..48).map(|i| PathBuf::from(format!("/s/{i}.png"))).collect();
    let assets = SceneAssets {
        frames,
        ..SceneAssets::default()
    };
    let d = def(json!({"id": "s", "type": "video-images", "file": "*.png", "fps": 24}));
    assert_eq!(run(&d, &assets).unwrap().frames, 60);

    let d = def(json!({"id": "s", "type": "video-images", "file": "*.png"}));
    assert_eq!(run(&d, &assets).unwrap().frames, 48);
}

#[test]
fn still_scenes_use_longest_audio_track() {
    let d = def(json!({
        "id": "a", "type": "image", "image": "a.png",
        "audio": ["voice.mp3", {"file": "music.mp3", "start": 0.5}]
    }));
    let assets = SceneAssets {
        primary: Some(PathBuf::from("/m/a.png")),
        audio: vec![PathBuf::from("/m/voice.mp3"), PathBuf::from("/m/music.mp3")],
        ..SceneAssets::default()
    };
    let r = run(&d, &assets).unwrap();
    assert_eq!(r.frames, 195);
    assert_eq!(r.source, DurationSource::Audio);
}

#[test]
fn missing_duration_names_the_scene() {
    let d = def(json!({"id": "lonely", "type": "svg", "template": "t.svg"}));
    match run(&d, &SceneAssets::default()).unwrap_err() {
        WeaveError::MissingDuration { scene_id } => assert_eq!(scene_id, "lonely"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn explicit_duration_shorter_than_audio_still_wins() {
    let d = def(json!({
        "id": "a", "type": "color", "duration": 2, "audio": "music.mp3"
    }));
    let assets = SceneAssets {
        audio: vec![PathBuf::from("/m/music.mp3")],
        ..SceneAssets::default()
    };
    assert_eq!(run(&d, &assets).unwrap().frames, 60);
}
