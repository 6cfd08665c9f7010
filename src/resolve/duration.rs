//! Scene duration resolution.

use crate::foundation::core::Fps;
use crate::foundation::error::{KeyPath, WeaveError, WeaveResult};
use crate::render::backend::MediaProbe;
use crate::resolve::scene::SceneAssets;
use crate::spec::model::{SceneDef, SceneKind};

/// Where a scene's duration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DurationSource {
    Explicit,
    Frames,
    Media,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDuration {
    pub frames: u64,
    pub source: DurationSource,
}

/// Resolve the frame count of a scene.
///
/// Precedence: explicit `duration`, then `frames`, then the length implied by the scene's media
/// (video length, image-sequence length, or the longest attached audio track). Seconds are
/// rounded to the nearest frame and never fall below one frame.
pub fn resolve_duration(
    def: &SceneDef,
    assets: &SceneAssets,
    fps: Fps,
    probe: &dyn MediaProbe,
    path: &KeyPath,
) -> WeaveResult<ResolvedDuration> {
    let id = def.id();
    let c = &def.common;

    let resolved = if let Some(secs) = c.duration {
        if c.frames.is_some() {
            tracing::debug!(scene = id, "both 'duration' and 'frames' set; 'duration' wins");
        }
        ResolvedDuration {
            frames: fps.frames_for_secs(secs),
            source: DurationSource::Explicit,
        }
    } else if let Some(frames) = c.frames {
        ResolvedDuration {
            frames: frames.max(1),
            source: DurationSource::Frames,
        }
    } else {
        let secs = match &def.kind {
            SceneKind::Video(v) => video_secs(v.start, v.end, assets, probe, id, path)?,
            SceneKind::VideoImages(v) => {
                let seq_fps = v.fps.unwrap_or(fps.get());
                assets.frames.len() as f64 / f64::from(seq_fps)
            }
            SceneKind::Image(_) | SceneKind::Svg(_) | SceneKind::Color(_) => {
                longest_audio(def, assets, probe)?.ok_or_else(|| WeaveError::MissingDuration {
                    scene_id: id.to_owned(),
                })?
            }
        };
        let source = match def.kind {
            SceneKind::Video(_) | SceneKind::VideoImages(_) => DurationSource::Media,
            _ => DurationSource::Audio,
        };
        ResolvedDuration {
            frames: fps.frames_for_secs(secs),
            source,
        }
    };

    if matches!(
        resolved.source,
        DurationSource::Explicit | DurationSource::Frames
    ) && !assets.audio.is_empty()
    {
        warn_if_audio_truncated(def, assets, probe, fps.secs(resolved.frames));
    }

    tracing::debug!(
        scene = id,
        frames = resolved.frames,
        source = ?resolved.source,
        "resolved duration"
    );
    Ok(resolved)
}

fn video_secs(
    start: Option<f64>,
    end: Option<f64>,
    assets: &SceneAssets,
    probe: &dyn MediaProbe,
    id: &str,
    path: &KeyPath,
) -> WeaveResult<f64> {
    let start = start.unwrap_or(0.0);
    if let Some(end) = end {
        return Ok(end - start);
    }
    let file = assets
        .primary
        .as_deref()
        .ok_or_else(|| WeaveError::resource(Some(id), "video file was not resolved"))?;
    let len = probe.media_duration(file).map_err(|e| e.in_scene(id))?;
    if len <= start {
        return Err(WeaveError::scene_config(
            id,
            path.field("start"),
            format!("trim start {start}s is beyond the media length {len}s"),
        ));
    }
    Ok(len - start)
}

/// Length of the longest audio track including its start offset, if any audio is attached.
fn longest_audio(
    def: &SceneDef,
    assets: &SceneAssets,
    probe: &dyn MediaProbe,
) -> WeaveResult<Option<f64>> {
    let mut longest: Option<f64> = None;
    for (track, file) in def.common.audio.iter().zip(&assets.audio) {
        let len = probe.media_duration(file).map_err(|e| e.in_scene(def.id()))?;
        let end = track.start + len;
        longest = Some(longest.map_or(end, |l| l.max(end)));
    }
    Ok(longest)
}

fn warn_if_audio_truncated(def: &SceneDef, assets: &SceneAssets, probe: &dyn MediaProbe, secs: f64) {
    match longest_audio(def, assets, probe) {
        Ok(Some(audio)) if audio > secs + 1e-9 => tracing::warn!(
            scene = def.id(),
            duration = secs,
            audio = audio,
            "audio is longer than the scene duration and will be truncated"
        ),
        Ok(_) => {}
        Err(e) => tracing::debug!(scene = def.id(), error = %e, "audio probe skipped"),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/resolve/duration.rs"]
mod tests;
