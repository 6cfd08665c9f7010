use std::path::{Path, PathBuf};

use crate::assets::{list_sequence, locate};
use crate::foundation::error::{KeyPath, WeaveError, WeaveResult};
use crate::spec::model::{SceneDef, SceneKind};
use serde_json::{Map, Value};

/// Template invocation a scene was expanded from.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Origin {
    /// Invocation id, or the template name when the invocation has none.
    pub invocation: String,
    pub template: String,
}

/// A scene after defaults merge and template expansion, still in mapping form.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedScene {
    pub id: String,
    pub origin: Option<Origin>,
    pub body: Map<String, Value>,
    /// Directory the scene's relative asset paths resolve against.
    pub base_dir: PathBuf,
    /// Location in the document (or template) for error messages.
    pub path: KeyPath,
    /// Whether `transition` (if any) came only from `scene_defaults`.
    pub transition_inherited: bool,
}

/// Files referenced by one scene, resolved to existing paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneAssets {
    /// `image` of image scenes, `file` of video scenes, `template` of svg scenes.
    pub primary: Option<PathBuf>,
    /// Frames of a video-images scene, naturally ordered.
    pub frames: Vec<PathBuf>,
    /// One entry per audio track, parallel to the scene's `audio` list.
    pub audio: Vec<PathBuf>,
    /// Resolved svg `image_params` entries that name files.
    pub image_params: Vec<(String, PathBuf)>,
}

impl SceneAssets {
    /// Every referenced file tagged with its role, in a stable order.
    pub fn refs(&self) -> Vec<(String, &Path)> {
        let mut out = Vec::new();
        if let Some(p) = &self.primary {
            out.push(("primary".to_string(), p.as_path()));
        }
        for (i, p) in self.frames.iter().enumerate() {
            out.push((format!("frame[{i}]"), p.as_path()));
        }
        for (i, p) in self.audio.iter().enumerate() {
            out.push((format!("audio[{i}]"), p.as_path()));
        }
        for (k, p) in &self.image_params {
            out.push((format!("image_params.{k}"), p.as_path()));
        }
        out
    }
}

/// A validated scene with every reference resolved and its duration fixed.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedScene {
    pub id: String,
    pub origin: Option<Origin>,
    pub def: SceneDef,
    /// Fully merged parameter mapping the scene was decoded from.
    pub params: Map<String, Value>,
    pub base_dir: PathBuf,
    pub assets: SceneAssets,
    pub duration_frames: u64,
    pub path: KeyPath,
}

impl ResolvedScene {
    pub fn kind(&self) -> &SceneKind {
        &self.def.kind
    }

    /// Whether `scope` names this scene or the invocation it came from.
    pub fn in_scope(&self, scope: &str) -> bool {
        self.id == scope || self.origin.as_ref().is_some_and(|o| o.invocation == scope)
    }
}

/// Resolve the files `def` references.
///
/// Scene assets are searched in the scene's own directory, then the spec directory; svg
/// `image_params` search the spec directory first.
pub fn locate_assets(def: &SceneDef, base_dir: &Path, spec_dir: &Path) -> WeaveResult<SceneAssets> {
    let id = def.id();
    let scene_dirs: Vec<&Path> = if base_dir == spec_dir {
        vec![base_dir]
    } else {
        vec![base_dir, spec_dir]
    };
    let find = |what: &str, p: &str, dirs: &[&Path]| -> WeaveResult<PathBuf> {
        locate(p, dirs).ok_or_else(|| {
            let searched = dirs
                .iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            WeaveError::resource(
                Some(id),
                format!("{what} file '{p}' not found (searched: {searched})"),
            )
        })
    };

    let mut out = SceneAssets::default();
    match &def.kind {
        SceneKind::Image(s) => out.primary = Some(find("image", &s.image, &scene_dirs)?),
        SceneKind::Video(s) => out.primary = Some(find("video", &s.file, &scene_dirs)?),
        SceneKind::Svg(s) => {
            out.primary = Some(find("svg template", &s.template, &scene_dirs)?);
            let mut param_dirs = scene_dirs.clone();
            param_dirs.reverse();
            for (key, v) in &s.image_params {
                if let Value::String(p) = v {
                    out.image_params
                        .push((key.clone(), find("image parameter", p, &param_dirs)?));
                }
            }
        }
        SceneKind::VideoImages(s) => {
            out.frames = list_sequence(&s.file, base_dir).map_err(|e| e.in_scene(id))?;
        }
        SceneKind::Color(_) => {}
    }
    for track in &def.common.audio {
        out.audio.push(find("audio", &track.file, &scene_dirs)?);
    }
    Ok(out)
}
