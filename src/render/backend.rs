use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::foundation::core::Fps;
use crate::foundation::error::{WeaveError, WeaveResult};
use crate::resolve::scene::ResolvedScene;
use crate::spec::document::Settings;
use crate::spec::model::TransitionKind;

/// Shared cancellation flag checked by long-running work.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Return [`WeaveError::Cancelled`] once the token has been cancelled.
    pub fn check(&self) -> WeaveResult<()> {
        if self.is_cancelled() {
            return Err(WeaveError::Cancelled);
        }
        Ok(())
    }
}

/// Read-only media length probe.
pub trait MediaProbe: Send + Sync {
    /// Length of the media at `path`, in seconds.
    fn media_duration(&self, path: &Path) -> WeaveResult<f64>;
}

/// Everything a backend needs to render one scene.
#[derive(Clone, Copy, Debug)]
pub struct SceneJob<'a> {
    pub scene: &'a ResolvedScene,
    pub settings: &'a Settings,
    /// Font file, when `settings.font` names one.
    pub font_file: Option<&'a Path>,
}

impl SceneJob<'_> {
    pub fn fps(&self) -> Fps {
        self.settings.fps
    }
}

/// One clip of the final assembly, in timeline order.
#[derive(Clone, Debug, PartialEq)]
pub struct AssemblyClip {
    pub scene_id: String,
    pub path: PathBuf,
    pub frames: u64,
}

/// Overlap between `clips[after]` and `clips[after + 1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AssemblyTransition {
    pub after: usize,
    pub kind: TransitionKind,
    pub frames: u64,
}

/// Ordered clips plus transition metadata handed to the backend for final assembly.
#[derive(Clone, Debug, PartialEq)]
pub struct AssemblyPlan {
    pub clips: Vec<AssemblyClip>,
    pub transitions: Vec<AssemblyTransition>,
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
}

impl AssemblyPlan {
    pub fn transition_after(&self, idx: usize) -> Option<&AssemblyTransition> {
        self.transitions.iter().find(|t| t.after == idx)
    }

    /// Sum of clip lengths minus transition overlaps.
    pub fn total_frames(&self) -> u64 {
        let clips: u64 = self.clips.iter().map(|c| c.frames).sum();
        let overlaps: u64 = self.transitions.iter().map(|t| t.frames).sum();
        clips.saturating_sub(overlaps)
    }
}

/// Media rendering backend: per-scene compositing plus final assembly.
pub trait RenderBackend: Send + Sync {
    /// Render `job` into the file at `out`. The file must be complete when this returns `Ok`.
    fn render_scene(&self, job: &SceneJob<'_>, out: &Path, cancel: &CancelToken)
    -> WeaveResult<()>;

    /// Concatenate `plan.clips` with transitions into `plan.output`.
    fn assemble(&self, plan: &AssemblyPlan, cancel: &CancelToken) -> WeaveResult<()>;
}
