use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::cache::store::{ArtifactSource, CacheRequest, CacheStore, CachedArtifact, sanitize};
use crate::foundation::error::{KeyPath, SceneFailure, WeaveError, WeaveResult};
use crate::render::backend::{
    AssemblyClip, AssemblyPlan, AssemblyTransition, CancelToken, RenderBackend, SceneJob,
};
use crate::resolve::timeline::{Timeline, TimelineEntry};

/// Options controlling one [`render`] run.
#[derive(Clone, Debug, Default)]
pub struct RenderOpts {
    /// Render only the scene or template invocation with this id.
    pub scope: Option<String>,
    /// Ignore existing cache entries and overwrite them.
    pub force: bool,
    /// Override the number of rayon worker threads. `None` uses rayon defaults.
    pub threads: Option<usize>,
    /// Where clips of uncached scenes are written. Defaults to a fresh directory under the
    /// cache store's scratch area, unique to this call and removed after assembly.
    pub work_dir: Option<PathBuf>,
}

/// Outcome of a successful [`render`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderReport {
    /// Scenes rendered and stored in the cache.
    pub rendered: Vec<String>,
    /// Scenes served from the cache.
    pub reused: Vec<String>,
    /// Scenes rendered without caching (disabled, or larger than their cap).
    pub uncached: Vec<String>,
    pub output: PathBuf,
    pub total_frames: u64,
}

struct Clip<'s> {
    path: PathBuf,
    source: ArtifactSource,
    /// Holds the cache pin until assembly is done.
    artifact: Option<CachedArtifact<'s>>,
}

/// Render every in-scope scene (in parallel, through the cache) and assemble them in timeline
/// order into `timeline.output`.
///
/// Scene failures do not stop the other scenes; they are reported together as
/// [`WeaveError::RenderFailures`] and nothing is assembled.
#[tracing::instrument(level = "debug", skip_all, fields(scope = ?opts.scope))]
pub fn render(
    timeline: &Timeline,
    store: &CacheStore,
    backend: &dyn RenderBackend,
    opts: &RenderOpts,
    cancel: &CancelToken,
) -> WeaveResult<RenderReport> {
    let scoped;
    let timeline = match opts.scope.as_deref() {
        Some(scope) => {
            scoped = timeline.scoped(scope)?;
            &scoped
        }
        None => timeline,
    };
    let pool = build_thread_pool(opts.threads)?;
    let run_dir;
    let work_dir: &Path = match &opts.work_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                WeaveError::resource(
                    None,
                    format!("create work directory '{}': {e}", dir.display()),
                )
            })?;
            dir
        }
        None => {
            run_dir = run_scratch_dir(store)?;
            run_dir.path()
        }
    };

    let check = store.verify();
    tracing::debug!(entries = check.entries, dropped = check.dropped, drift = check.drift, "cache verified");

    tracing::info!(
        scenes = timeline.entries.len(),
        frames = timeline.total_frames(),
        "rendering timeline"
    );
    let results: Vec<WeaveResult<Clip<'_>>> = pool.install(|| {
        timeline
            .entries
            .par_iter()
            .enumerate()
            .map(|(i, entry)| render_entry(timeline, i, entry, store, backend, opts, work_dir, cancel))
            .collect()
    });

    finish(timeline, results, backend, cancel)
}

/// A directory under the store's scratch area that no other run shares.
fn run_scratch_dir(store: &CacheStore) -> WeaveResult<tempfile::TempDir> {
    let scratch = store.scratch_dir();
    std::fs::create_dir_all(&scratch)
        .and_then(|()| tempfile::Builder::new().prefix("run-").tempdir_in(&scratch))
        .map_err(|e| {
            WeaveError::resource(
                None,
                format!("create work directory in '{}': {e}", scratch.display()),
            )
        })
}

fn finish(
    timeline: &Timeline,
    results: Vec<WeaveResult<Clip<'_>>>,
    backend: &dyn RenderBackend,
    cancel: &CancelToken,
) -> WeaveResult<RenderReport> {
    let mut clips = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    let mut cancelled = false;
    for (entry, result) in timeline.entries.iter().zip(results) {
        match result {
            Ok(clip) => clips.push(clip),
            Err(WeaveError::Cancelled) => cancelled = true,
            Err(e) => {
                tracing::error!(scene = %entry.scene.id, error = %e, "scene failed");
                failures.push(SceneFailure {
                    scene_id: entry.scene.id.clone(),
                    message: e.to_string(),
                });
            }
        }
    }
    if cancelled {
        return Err(WeaveError::Cancelled);
    }
    if !failures.is_empty() {
        return Err(WeaveError::RenderFailures(failures));
    }

    let mut report = RenderReport {
        output: timeline.output.clone(),
        total_frames: timeline.total_frames(),
        ..RenderReport::default()
    };
    for (entry, clip) in timeline.entries.iter().zip(&clips) {
        let id = entry.scene.id.clone();
        match clip.source {
            ArtifactSource::Hit => report.reused.push(id),
            ArtifactSource::Rendered => report.rendered.push(id),
            ArtifactSource::Uncached => report.uncached.push(id),
        }
    }

    let plan = AssemblyPlan {
        clips: timeline
            .entries
            .iter()
            .zip(&clips)
            .map(|(entry, clip)| AssemblyClip {
                scene_id: entry.scene.id.clone(),
                path: clip.path.clone(),
                frames: entry.scene.duration_frames,
            })
            .collect(),
        transitions: timeline
            .transitions
            .iter()
            .map(|t| AssemblyTransition {
                after: t.from,
                kind: t.kind,
                frames: t.frames,
            })
            .collect(),
        output: timeline.output.clone(),
        width: timeline.settings.width,
        height: timeline.settings.height,
        fps: timeline.settings.fps,
    };
    cancel.check()?;
    backend.assemble(&plan, cancel)?;

    // Oversized artifacts live in the cache scratch area and are not needed any more.
    for clip in &clips {
        if clip.source == ArtifactSource::Uncached && clip.artifact.is_some() {
            let _ = std::fs::remove_file(&clip.path);
        }
    }
    tracing::info!(
        output = %report.output.display(),
        rendered = report.rendered.len(),
        reused = report.reused.len(),
        uncached = report.uncached.len(),
        "video written"
    );
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn render_entry<'s>(
    timeline: &Timeline,
    idx: usize,
    entry: &TimelineEntry,
    store: &'s CacheStore,
    backend: &dyn RenderBackend,
    opts: &RenderOpts,
    work_dir: &Path,
    cancel: &CancelToken,
) -> WeaveResult<Clip<'s>> {
    cancel.check()?;
    let scene = &entry.scene;
    let job = SceneJob {
        scene,
        settings: &timeline.settings,
        font_file: timeline.font_file.as_deref(),
    };
    let policy = scene.def.common.cache;

    if !policy.is_enabled() {
        let out = work_dir.join(format!("{idx:04}-{}.mp4", sanitize(&scene.id)));
        tracing::debug!(scene = %scene.id, "cache disabled, rendering directly");
        backend.render_scene(&job, &out, cancel)?;
        if !out.is_file() {
            return Err(WeaveError::render(
                &scene.id,
                "backend reported success but wrote no file",
            ));
        }
        return Ok(Clip {
            path: out,
            source: ArtifactSource::Uncached,
            artifact: None,
        });
    }

    let req = CacheRequest {
        scene_id: &scene.id,
        fingerprint: entry.fingerprint,
        max_size: policy.max_size(),
        force: opts.force,
    };
    let artifact = store.get_or_render(&req, |out| backend.render_scene(&job, out, cancel))?;
    if artifact.source == ArtifactSource::Hit {
        tracing::info!(scene = %scene.id, fingerprint = %artifact.fingerprint, "cache hit");
    }
    Ok(Clip {
        path: artifact.path.clone(),
        source: artifact.source,
        artifact: Some(artifact),
    })
}

fn build_thread_pool(threads: Option<usize>) -> WeaveResult<rayon::ThreadPool> {
    if let Some(n) = threads
        && n == 0
    {
        return Err(WeaveError::config(
            KeyPath::root(),
            "render 'threads' must be >= 1 when set",
        ));
    }
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = threads {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| WeaveError::Other(anyhow::anyhow!("failed to build rayon thread pool: {e}")))
}
