//! Timeline assembly: expansion, validation, durations, transitions and fingerprints.

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::assets::{ContentIndex, locate};
use crate::cache::fingerprint::{Fingerprint, fingerprint_scene};
use crate::foundation::core::FrameRange;
use crate::foundation::error::{KeyPath, WeaveError, WeaveResult};
use crate::render::backend::MediaProbe;
use crate::resolve::duration::{DurationSource, resolve_duration};
use crate::resolve::registry::TemplateRegistry;
use crate::resolve::scene::{Origin, ResolvedScene, locate_assets};
use crate::resolve::substitute::TextRenderer;
use crate::resolve::template::Expander;
use crate::resolve::transition::{TransitionSpan, WeaveItem, weave};
use crate::spec::document::{Settings, Specification};
use crate::spec::model::{SceneDef, TransitionKind};

/// External collaborators consulted while resolving a specification.
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    pub registry: &'a dyn TemplateRegistry,
    pub renderer: &'a dyn TextRenderer,
    pub probe: &'a dyn MediaProbe,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub scene: ResolvedScene,
    /// Frames of the output timeline this scene covers, overlaps included.
    pub range: FrameRange,
    pub duration_source: DurationSource,
    pub fingerprint: Fingerprint,
}

/// The fully resolved, ordered render plan of one specification.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub settings: Settings,
    pub entries: Vec<TimelineEntry>,
    /// Overlaps between adjacent entries, indexed into `entries`.
    pub transitions: Vec<TransitionSpan>,
    pub output: PathBuf,
    pub spec_dir: PathBuf,
    /// Font file, when `settings.font` names an existing file.
    pub font_file: Option<PathBuf>,
}

impl Timeline {
    pub fn total_frames(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.range.end.0)
    }

    pub fn duration_secs(&self) -> f64 {
        self.settings.fps.secs(self.total_frames())
    }

    pub fn transition_after(&self, idx: usize) -> Option<&TransitionSpan> {
        self.transitions.iter().find(|t| t.from == idx)
    }

    /// Restrict the timeline to the entries matching `scope` (a scene id or invocation id).
    ///
    /// A transition survives only when both of its scenes stay in scope; ranges are re-laid.
    pub fn scoped(&self, scope: &str) -> WeaveResult<Self> {
        let keep: Vec<usize> = (0..self.entries.len())
            .filter(|&i| self.entries[i].scene.in_scope(scope))
            .collect();
        if keep.is_empty() {
            return Err(WeaveError::config(
                KeyPath::root().field("scenes"),
                format!("no scene or template invocation with id '{scope}'"),
            ));
        }

        let items: Vec<WeaveItem<'_>> = keep
            .iter()
            .map(|&i| {
                let e = &self.entries[i];
                let transition = self
                    .transition_after(i)
                    .filter(|_| keep.contains(&(i + 1)))
                    .and_then(|_| e.scene.def.common.transition);
                WeaveItem {
                    id: &e.scene.id,
                    frames: e.scene.duration_frames,
                    transition,
                    path: &e.scene.path,
                }
            })
            .collect();
        let woven = weave(&items, self.settings.fps)?;

        let entries = keep
            .iter()
            .zip(woven.ranges)
            .map(|(&i, range)| TimelineEntry {
                range,
                ..self.entries[i].clone()
            })
            .collect();
        Ok(Self {
            settings: self.settings.clone(),
            entries,
            transitions: woven.transitions,
            output: self.output.clone(),
            spec_dir: self.spec_dir.clone(),
            font_file: self.font_file.clone(),
        })
    }

    /// Serializable summary, as printed by `sceneweave resolve`.
    pub fn view(&self) -> TimelineView<'_> {
        let fps = self.settings.fps;
        TimelineView {
            output: &self.output,
            width: self.settings.width,
            height: self.settings.height,
            fps: fps.get(),
            total_frames: self.total_frames(),
            duration_secs: self.duration_secs(),
            scenes: self
                .entries
                .iter()
                .map(|e| EntryView {
                    id: &e.scene.id,
                    kind: e.scene.kind().tag(),
                    origin: e.scene.origin.as_ref(),
                    start_frame: e.range.start.0,
                    end_frame: e.range.end.0,
                    start_secs: fps.secs(e.range.start.0),
                    end_secs: fps.secs(e.range.end.0),
                    duration_source: e.duration_source,
                    fingerprint: e.fingerprint,
                    cached: e.scene.def.common.cache.is_enabled(),
                    max_size: e.scene.def.common.cache.max_size().map(|b| b.0),
                })
                .collect(),
            transitions: self
                .transitions
                .iter()
                .map(|t| TransitionView {
                    from: &self.entries[t.from].scene.id,
                    to: &self.entries[t.to].scene.id,
                    kind: t.kind,
                    frames: t.frames,
                    start_frame: t.range.start.0,
                })
                .collect(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct TimelineView<'a> {
    pub output: &'a Path,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub total_frames: u64,
    pub duration_secs: f64,
    pub scenes: Vec<EntryView<'a>>,
    pub transitions: Vec<TransitionView<'a>>,
}

#[derive(Debug, serde::Serialize)]
pub struct EntryView<'a> {
    pub id: &'a str,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<&'a Origin>,
    pub start_frame: u64,
    pub end_frame: u64,
    pub start_secs: f64,
    pub end_secs: f64,
    pub duration_source: DurationSource,
    pub fingerprint: Fingerprint,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

#[derive(Debug, serde::Serialize)]
pub struct TransitionView<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub kind: TransitionKind,
    pub frames: u64,
    pub start_frame: u64,
}

/// Resolve `spec` into a timeline.
///
/// Configuration errors are reported fail-fast in scene order; no partial timeline is returned.
pub fn resolve(spec: &Specification, ctx: ResolveContext<'_>) -> WeaveResult<Timeline> {
    let settings = &spec.settings;
    let spec_dir = spec.base_dir.as_path();

    let expander = Expander::new(
        ctx.registry,
        ctx.renderer,
        &settings.scene_defaults,
        settings.font.as_deref(),
    );
    let expanded = expander.expand_spec(spec)?;
    tracing::debug!(scenes = expanded.len(), "expanded scene list");

    let last = expanded.len().saturating_sub(1);
    let mut staged = Vec::with_capacity(expanded.len());
    for (i, mut scene) in expanded.into_iter().enumerate() {
        // A default transition has nothing to lead into after the final scene.
        if i == last && scene.transition_inherited && scene.body.remove("transition").is_some() {
            tracing::debug!(scene = %scene.id, "dropping default transition on the last scene");
        }
        let def = SceneDef::from_body(&scene.body, &scene.path)?;
        let assets = locate_assets(&def, &scene.base_dir, spec_dir)?;
        staged.push((scene, def, assets));
    }

    // Media probes may shell out; run them in parallel but report the first failure in order.
    let durations = staged
        .par_iter()
        .map(|(scene, def, assets)| {
            resolve_duration(def, assets, settings.fps, ctx.probe, &scene.path)
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect::<WeaveResult<Vec<_>>>()?;

    let woven = {
        let items: Vec<WeaveItem<'_>> = staged
            .iter()
            .zip(&durations)
            .map(|((scene, def, _), d)| WeaveItem {
                id: &scene.id,
                frames: d.frames,
                transition: def.common.transition,
                path: &scene.path,
            })
            .collect();
        weave(&items, settings.fps)?
    };

    let font_file = settings
        .font
        .as_deref()
        .and_then(|f| locate(f, &[spec_dir]));
    if let Some(f) = &font_file {
        tracing::debug!(font = %f.display(), "using font file");
    }

    let scenes: Vec<ResolvedScene> = staged
        .into_iter()
        .zip(&durations)
        .map(|((scene, def, assets), d)| ResolvedScene {
            id: scene.id,
            origin: scene.origin,
            def,
            params: scene.body,
            base_dir: scene.base_dir,
            assets,
            duration_frames: d.frames,
            path: scene.path,
        })
        .collect();

    let content = ContentIndex::build(
        scenes
            .iter()
            .flat_map(|s| s.assets.refs().into_iter().map(|(_, p)| p.to_path_buf()))
            .chain(font_file.clone()),
    )?;

    let mut entries = Vec::with_capacity(scenes.len());
    for ((scene, range), d) in scenes.into_iter().zip(woven.ranges).zip(&durations) {
        let fingerprint = fingerprint_scene(&scene, settings, font_file.as_deref(), &content)?;
        tracing::debug!(scene = %scene.id, %fingerprint, "fingerprinted scene");
        entries.push(TimelineEntry {
            scene,
            range,
            duration_source: d.source,
            fingerprint,
        });
    }

    Ok(Timeline {
        settings: settings.clone(),
        entries,
        transitions: woven.transitions,
        output: spec.output_path(),
        spec_dir: spec.base_dir.clone(),
        font_file,
    })
}

#[cfg(test)]
#[path = "../../tests/unit/resolve/timeline.rs"]
mod tests;
