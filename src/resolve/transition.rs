//! Transition weaving: timeline placement of scenes that overlap during transitions.

use crate::foundation::core::{Fps, FrameRange};
use crate::foundation::error::{KeyPath, WeaveError, WeaveResult};
use crate::spec::model::{TransitionDef, TransitionKind};

/// Input to [`weave`]: one scene in timeline order.
#[derive(Debug, Clone, Copy)]
pub struct WeaveItem<'a> {
    pub id: &'a str,
    pub frames: u64,
    /// Transition into the next scene.
    pub transition: Option<TransitionDef>,
    pub path: &'a KeyPath,
}

/// Overlap between `entries[from]` and `entries[to]` (always `from + 1`).
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct TransitionSpan {
    pub from: usize,
    pub to: usize,
    pub kind: TransitionKind,
    pub frames: u64,
    /// Timeline frames during which both scenes are visible.
    pub range: FrameRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Woven {
    pub ranges: Vec<FrameRange>,
    pub transitions: Vec<TransitionSpan>,
    pub total_frames: u64,
}

/// Place scenes on the timeline.
///
/// A transition on scene `i` overlaps the tail of `i` with the head of `i + 1`, so the total
/// length is the sum of scene lengths minus the sum of transition lengths.
pub fn weave(items: &[WeaveItem<'_>], fps: Fps) -> WeaveResult<Woven> {
    let n = items.len();
    let mut overlap = vec![0u64; n];
    let mut transitions = Vec::new();

    for (i, item) in items.iter().enumerate() {
        let Some(t) = item.transition else {
            continue;
        };
        let tpath = item.path.field("transition");
        let err = |msg: String| WeaveError::scene_config(item.id, tpath.clone(), msg);

        let Some(next) = items.get(i + 1) else {
            return Err(err(
                "the last scene cannot declare a transition (there is no following scene)"
                    .to_string(),
            ));
        };
        let frames = (t.duration * fps.as_f64()).round() as u64;
        if frames == 0 {
            return Err(err(format!(
                "transition duration {}s is shorter than one frame",
                t.duration
            )));
        }
        if frames > item.frames {
            return Err(err(format!(
                "transition ({frames} frames) is longer than scene '{}' ({} frames)",
                item.id, item.frames
            )));
        }
        if frames > next.frames {
            return Err(err(format!(
                "transition ({frames} frames) is longer than the next scene '{}' ({} frames)",
                next.id, next.frames
            )));
        }
        overlap[i] = frames;
        transitions.push((i, t.kind, frames));
    }

    // Incoming and outgoing overlaps must not meet inside a scene.
    for i in 1..n {
        let incoming = overlap[i - 1];
        let outgoing = overlap[i];
        if incoming + outgoing > items[i].frames {
            return Err(WeaveError::scene_config(
                items[i].id,
                items[i].path.field("transition"),
                format!(
                    "incoming ({incoming}) and outgoing ({outgoing}) transitions overlap inside \
                     scene '{}' ({} frames)",
                    items[i].id, items[i].frames
                ),
            ));
        }
    }

    let mut ranges = Vec::with_capacity(n);
    let mut start = 0u64;
    for (i, item) in items.iter().enumerate() {
        let r = FrameRange::at(start, item.frames);
        ranges.push(r);
        start = r.end.0 - overlap[i];
    }
    let total_frames = ranges.last().map_or(0, |r| r.end.0);

    let transitions = transitions
        .into_iter()
        .map(|(i, kind, frames)| TransitionSpan {
            from: i,
            to: i + 1,
            kind,
            frames,
            range: FrameRange::at(ranges[i + 1].start.0, frames),
        })
        .collect();

    Ok(Woven {
        ranges,
        transitions,
        total_frames,
    })
}

#[cfg(test)]
#[path = "../../tests/unit/resolve/transition.rs"]
mod tests;
