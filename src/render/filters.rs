//! ffmpeg filtergraph construction for scene effects, placement, audio and assembly.

use crate::foundation::core::Fps;
use crate::foundation::error::{WeaveError, WeaveResult};
use crate::render::backend::AssemblyPlan;
use crate::spec::document::Normalization;
use crate::spec::model::{AccelDecel, Anchor, Effect, Position, Side, Zoom};

pub(crate) const AUDIO_RATE: u32 = 48_000;

/// Output frame geometry and length of one scene.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Canvas {
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
    pub frames: u64,
}

impl Canvas {
    pub fn secs(&self) -> f64 {
        self.fps.secs(self.frames)
    }

    pub fn size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Incrementally built `-filter_complex` graph.
#[derive(Debug, Default)]
pub(crate) struct FilterGraph {
    chains: Vec<String>,
    next: usize,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `inputs -> filter -> [fresh label]` and return the fresh label.
    pub fn push(&mut self, inputs: &[&str], filter: &str) -> String {
        let out = format!("[s{}]", self.next);
        self.next += 1;
        self.chains.push(format!("{}{filter}{out}", inputs.concat()));
        out
    }

    pub fn finish(self) -> String {
        self.chains.join(";")
    }
}

/// Format a number for filter arguments without trailing zeros.
pub(crate) fn num(v: f64) -> String {
    let s = format!("{v:.6}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Validate a color for use inside a filtergraph (`red`, `#102030`, `0x102030@0.5`).
pub(crate) fn color(c: &str) -> WeaveResult<String> {
    let ok = !c.is_empty()
        && c
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '#' | '@' | '.'));
    if !ok {
        return Err(WeaveError::serde(format!("unsupported color '{c}'")));
    }
    Ok(c.to_string())
}

/// Solid color source covering the whole scene.
pub(crate) fn color_source(c: &str, canvas: &Canvas) -> WeaveResult<String> {
    Ok(format!(
        "color=c={}:s={}:r={}:d={}",
        color(c)?,
        canvas.size(),
        canvas.fps.get(),
        num(canvas.secs())
    ))
}

/// Overlay coordinates placing content of size `w x h` on the canvas.
pub(crate) fn placement(position: Position) -> (String, String) {
    match position {
        Position::Anchor(Anchor::Center) => ("(W-w)/2".into(), "(H-h)/2".into()),
        Position::Anchor(Anchor::Top) => ("(W-w)/2".into(), "0".into()),
        Position::Anchor(Anchor::Bottom) => ("(W-w)/2".into(), "H-h".into()),
        Position::Anchor(Anchor::Left) => ("0".into(), "(H-h)/2".into()),
        Position::Anchor(Anchor::Right) => ("W-w".into(), "(H-h)/2".into()),
        Position::Percent([x, y]) => (format!("W*{}", num(x / 100.0)), format!("H*{}", num(y / 100.0))),
    }
}

/// Scale-and-letterbox a source of arbitrary size to the canvas.
pub(crate) fn fit_to_canvas(canvas: &Canvas) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black,setsar=1",
        w = canvas.width,
        h = canvas.height
    )
}

/// Apply `effects` in order to the canvas-sized stream `input`.
///
/// With `progress_driven` set, effects that remap scene progress were already applied while
/// generating frames and are skipped here.
pub(crate) fn apply_effects(
    g: &mut FilterGraph,
    input: String,
    effects: &[Effect],
    canvas: &Canvas,
    progress_driven: bool,
) -> WeaveResult<String> {
    let total = canvas.secs();
    let mut cur = input;
    for effect in effects {
        cur = match effect {
            Effect::FadeIn { duration } => g.push(
                &[&cur],
                &format!("fade=t=in:st=0:d={}", num(duration.min(total))),
            ),
            Effect::FadeOut { duration } => {
                let d = duration.min(total);
                g.push(
                    &[&cur],
                    &format!("fade=t=out:st={}:d={}", num(total - d), num(d)),
                )
            }
            Effect::SlideIn(s) | Effect::SlideOut(s) => {
                let d = s.duration.min(total).max(canvas.fps.frame_secs());
                let incoming = matches!(effect, Effect::SlideIn(_));
                let (x, y) = slide_offsets(s.side, incoming, d, total);
                let bg = g.push(&[], &color_source("black", canvas)?);
                g.push(
                    &[&bg, &cur],
                    &format!("overlay=x='{x}':y='{y}':eof_action=pass"),
                )
            }
            Effect::Zoom(z) => g.push(&[&cur], &zoom_filter(z, canvas)),
            Effect::Scroll(s) => {
                let d = s.duration.unwrap_or(total).min(total);
                let cw = s.w.unwrap_or(canvas.width).clamp(1, canvas.width);
                let ch = s.h.unwrap_or(canvas.height).clamp(1, canvas.height);
                let x = format!(
                    "clip({}+{}*min(t,{}),0,iw-ow)",
                    num(s.x_start),
                    num(s.x_speed),
                    num(d)
                );
                let y = format!(
                    "clip({}+{}*min(t,{}),0,ih-oh)",
                    num(s.y_start),
                    num(s.y_speed),
                    num(d)
                );
                g.push(
                    &[&cur],
                    &format!(
                        "crop=w={cw}:h={ch}:x='{x}':y='{y}',scale={}:{},setsar=1",
                        canvas.width, canvas.height
                    ),
                )
            }
            Effect::AccelDecel(a) => {
                if progress_driven {
                    continue;
                }
                g.push(
                    &[&cur],
                    &format!(
                        "setpts='({})/TB',fps={}",
                        time_remap(a, total),
                        canvas.fps.get()
                    ),
                )
            }
        };
    }
    Ok(cur)
}

fn slide_offsets(side: Side, incoming: bool, d: f64, total: f64) -> (String, String) {
    // q runs 1 -> 0 while sliding in and 0 -> 1 while sliding out.
    let q = if incoming {
        format!("(1-min(t/{},1))", num(d))
    } else {
        format!("max(0,min((t-{})/{},1))", num(total - d), num(d))
    };
    match side {
        Side::Left => (format!("-w*{q}"), "0".into()),
        Side::Right => (format!("w*{q}"), "0".into()),
        Side::Top => ("0".into(), format!("-h*{q}")),
        Side::Bottom => ("0".into(), format!("h*{q}")),
    }
}

/// Animated crop expressed with `zoompan`; the zoom factor follows the rectangle width.
fn zoom_filter(z: &Zoom, canvas: &Canvas) -> String {
    let frames = z
        .duration
        .map_or(canvas.frames, |d| canvas.fps.frames_for_secs(d))
        .clamp(1, canvas.frames.max(1));
    let p = format!("min(on/{},1)", frames.saturating_sub(1).max(1));
    let lerp = |a: f64, b: f64| format!("({}+{}*{p})", num(a), num(b - a));
    let [x0, y0, w0, _] = z.start_rect;
    let [x1, y1, w1, _] = z.end_rect;
    format!(
        "zoompan=z='100/max({w},0.01)':x='iw*{x}/100':y='ih*{y}/100':d=1:s={size}:fps={fps},setsar=1",
        w = lerp(w0, w1),
        x = lerp(x0, x1),
        y = lerp(y0, y1),
        size = canvas.size(),
        fps = canvas.fps.get(),
    )
}

/// Output timestamp as a function of input time `T`: the inverse of the accel-decel progress
/// curve over its window, identity afterwards.
///
/// The `min_speed` blend has no closed-form inverse and only affects progress-driven scenes.
pub(crate) fn time_remap(a: &AccelDecel, total: f64) -> String {
    let w = a.duration.min(total);
    if a.abruptness == 0.0 || w <= 0.0 {
        return "T".to_string();
    }
    let e = num(1.0 / a.abruptness.abs());
    let x = format!("(T/{})", num(w));
    let inv = if a.abruptness > 0.0 {
        format!("if(lt({x},0.5),pow(2*{x},{e})/2,1-pow(2-2*{x},{e})/2)")
    } else {
        format!("if(lt({x},0.5),(1-pow(1-2*{x},{e}))/2,(pow(2*{x}-1,{e})+1)/2)")
    };
    format!("if(lt(T,{w}),{w}*{inv},T)", w = num(w))
}

/// One audio input feeding a scene's mix.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AudioInput {
    /// Stream specifier such as `[2:a]`.
    pub label: String,
    pub volume: f64,
    /// Offset into the scene in seconds.
    pub start: f64,
}

/// Mix `inputs` into one stereo track of exactly `secs`, optionally loudness-normalized.
pub(crate) fn mix_audio(
    g: &mut FilterGraph,
    inputs: &[AudioInput],
    secs: f64,
    normalization: Option<Normalization>,
) -> String {
    let tail = format!(
        "aformat=sample_rates={AUDIO_RATE}:channel_layouts=stereo,apad,atrim=0:{}",
        num(secs)
    );
    if inputs.is_empty() {
        return g.push(
            &[],
            &format!(
                "anullsrc=r={AUDIO_RATE}:cl=stereo,atrim=0:{}",
                num(secs)
            ),
        );
    }

    let tracks: Vec<String> = inputs
        .iter()
        .map(|a| {
            let ms = (a.start * 1000.0).round() as u64;
            g.push(
                &[&a.label],
                &format!(
                    "aformat=sample_rates={AUDIO_RATE}:channel_layouts=stereo,adelay={ms}|{ms},volume={}",
                    num(a.volume)
                ),
            )
        })
        .collect();
    let mixed = if tracks.len() == 1 {
        tracks[0].clone()
    } else {
        let refs: Vec<&str> = tracks.iter().map(String::as_str).collect();
        g.push(
            &refs,
            &format!(
                "amix=inputs={}:duration=longest:normalize=0",
                tracks.len()
            ),
        )
    };
    let trimmed = g.push(&[&mixed], &tail);
    match normalization {
        Some(n) => g.push(
            &[&trimmed],
            &format!(
                "loudnorm=I={}:TP={},aresample={AUDIO_RATE},{tail}",
                num(n.loudness),
                num(n.true_peak)
            ),
        ),
        None => trimmed,
    }
}

/// Filtergraph joining the plan's clips in order; returns `(graph, video label, audio label)`.
///
/// Clips linked by a transition are blended with `xfade`/`acrossfade` over the overlap; the
/// others are concatenated.
pub(crate) fn assembly_graph(plan: &AssemblyPlan) -> (String, String, String) {
    let mut g = FilterGraph::new();
    let fps = plan.fps;
    let mut v = "[0:v]".to_string();
    let mut a = "[0:a]".to_string();
    let mut len = plan.clips.first().map_or(0, |c| c.frames);

    for (i, clip) in plan.clips.iter().enumerate().skip(1) {
        let (vi, ai) = (format!("[{i}:v]"), format!("[{i}:a]"));
        match plan.transition_after(i - 1) {
            Some(t) => {
                let d = num(fps.secs(t.frames));
                let offset = num(fps.secs(len.saturating_sub(t.frames)));
                v = g.push(
                    &[&v, &vi],
                    &format!(
                        "xfade=transition={}:duration={d}:offset={offset}",
                        t.kind.xfade_name()
                    ),
                );
                a = g.push(&[&a, &ai], &format!("acrossfade=d={d}"));
                len = len + clip.frames - t.frames;
            }
            None => {
                let joined = g.push(&[&v, &a, &vi, &ai], "concat=n=2:v=1:a=1");
                // concat has two outputs; split the shared label into distinct ones.
                let (nv, na) = split_concat_label(&mut g, joined);
                v = nv;
                a = na;
                len += clip.frames;
            }
        }
    }
    (g.finish(), v, a)
}

/// `concat` emits video then audio; rewrite the last chain to name both outputs.
fn split_concat_label(g: &mut FilterGraph, joined: String) -> (String, String) {
    let v = joined;
    let a = format!("{}a]", v.trim_end_matches(']'));
    if let Some(last) = g.chains.last_mut() {
        last.push_str(&a);
    }
    (v, a)
}

#[cfg(test)]
#[path = "../../tests/unit/render/filters.rs"]
mod tests;
