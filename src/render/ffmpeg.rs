//! Scene rendering and final assembly through the system `ffmpeg`/`ffprobe` binaries.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde_json::{Map, Value};

use crate::foundation::error::{WeaveError, WeaveResult};
use crate::render::backend::{AssemblyPlan, CancelToken, MediaProbe, RenderBackend, SceneJob};
use crate::render::filters::{
    AUDIO_RATE, AudioInput, Canvas, FilterGraph, apply_effects, assembly_graph, color_source,
    fit_to_canvas, mix_audio, num, placement,
};
use crate::render::svg::{SvgRasterizer, annotation_svg};
use crate::resolve::substitute::{PlaceholderRenderer, TextRenderer};
use crate::spec::model::{Effect, ImageScene, SceneKind, SvgScene};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Returns `true` when `ffmpeg` can be spawned from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Stream facts reported by `ffprobe`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MediaInfo {
    /// Container duration in seconds, when known.
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub has_audio: bool,
}

/// Probe `path` with `ffprobe`.
pub fn probe_media(path: &Path) -> WeaveResult<MediaInfo> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        #[serde(default)]
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output()
        .map_err(|e| WeaveError::resource(None, format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(WeaveError::resource(
            None,
            format!(
                "ffprobe failed for '{}': {}",
                path.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            ),
        ));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| WeaveError::resource(None, format!("ffprobe json parse failed: {e}")))?;
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    Ok(MediaInfo {
        duration: parsed
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0),
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
        has_audio: parsed
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio")),
    })
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// [`RenderBackend`] and [`MediaProbe`] backed by the system `ffmpeg` and `ffprobe`.
#[derive(Debug, Default)]
pub struct FfmpegBackend {
    rasterizers: Mutex<HashMap<(Option<String>, Option<PathBuf>), SvgRasterizer>>,
}

impl FfmpegBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail early when `ffmpeg` is missing.
    pub fn check_available(&self) -> WeaveResult<()> {
        if !is_ffmpeg_on_path() {
            return Err(WeaveError::resource(
                None,
                "ffmpeg is required for rendering, but was not found on PATH",
            ));
        }
        Ok(())
    }

    fn rasterizer(&self, font: Option<&str>, font_file: Option<&Path>) -> WeaveResult<SvgRasterizer> {
        let key = (font.map(str::to_owned), font_file.map(Path::to_path_buf));
        let mut cache = self
            .rasterizers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(r) = cache.get(&key) {
            return Ok(r.clone());
        }
        let r = SvgRasterizer::new(font, font_file)?;
        cache.insert(key, r.clone());
        Ok(r)
    }

    fn scene_command(&self, job: &SceneJob<'_>, out: &Path) -> WeaveResult<SceneCommand> {
        let scene = job.scene;
        let canvas = Canvas {
            width: job.settings.width,
            height: job.settings.height,
            fps: job.fps(),
            frames: scene.duration_frames,
        };
        let mut cmd = SceneCommand::default();
        let mut g = FilterGraph::new();
        let mut audio = Vec::new();

        let video = match scene.kind() {
            SceneKind::Color(c) => g.push(&[], &color_source(&c.color, &canvas)?),
            SceneKind::Image(img) => {
                let path = primary(job)?;
                let idx = cmd.input([
                    "-loop".into(),
                    "1".into(),
                    "-framerate".into(),
                    canvas.fps.get().to_string().into(),
                    "-t".into(),
                    num(canvas.secs()).into(),
                    "-i".into(),
                    path.as_os_str().to_owned(),
                ]);
                let input = format!("[{idx}:v]");
                self.image_layer(&mut g, &mut cmd, &input, img, &canvas, job, out)?
            }
            SceneKind::Video(v) => {
                let path = primary(job)?;
                let info = probe_media(path).map_err(|e| e.in_scene(&scene.id))?;
                let start = v.start.unwrap_or(0.0).max(0.0);
                let mut args: Vec<OsString> = vec!["-ss".into(), num(start).into()];
                if let Some(end) = v.end
                    && end > start
                {
                    args.extend(["-t".into(), num(end - start).into()]);
                }
                args.extend(["-i".into(), path.as_os_str().to_owned()]);
                let idx = cmd.input(args);
                if info.has_audio {
                    audio.push(AudioInput {
                        label: format!("[{idx}:a]"),
                        volume: 1.0,
                        start: 0.0,
                    });
                }
                g.push(
                    &[&format!("[{idx}:v]")],
                    &format!(
                        "{},fps={},tpad=stop_mode=clone:stop_duration={}",
                        fit_to_canvas(&canvas),
                        canvas.fps.get(),
                        num(canvas.secs())
                    ),
                )
            }
            SceneKind::VideoImages(s) => {
                let list = out.with_extension("frames.txt");
                let src_fps = s.fps.unwrap_or(canvas.fps.get()).max(1);
                write_concat_list(&list, &scene.assets.frames, src_fps)
                    .map_err(|e| WeaveError::render(&scene.id, format!("{e:#}")))?;
                cmd.scratch.push(list.clone());
                let idx = cmd.input([
                    "-f".into(),
                    "concat".into(),
                    "-safe".into(),
                    "0".into(),
                    "-i".into(),
                    list.into_os_string(),
                ]);
                g.push(
                    &[&format!("[{idx}:v]")],
                    &format!(
                        "{},fps={},tpad=stop_mode=clone:stop_duration={}",
                        fit_to_canvas(&canvas),
                        canvas.fps.get(),
                        num(canvas.secs())
                    ),
                )
            }
            SceneKind::Svg(svg) => {
                let idx = cmd.input([
                    "-f".into(),
                    "rawvideo".into(),
                    "-pix_fmt".into(),
                    "rgba".into(),
                    "-s".into(),
                    canvas.size().into(),
                    "-framerate".into(),
                    canvas.fps.get().to_string().into(),
                    "-i".into(),
                    "pipe:0".into(),
                ]);
                cmd.feed = Some(self.svg_feed(job, svg, canvas)?);
                let frames = format!("[{idx}:v]");
                match svg.background() {
                    Some(bg) => {
                        let bg = g.push(&[], &color_source(bg, &canvas)?);
                        g.push(&[&bg, &frames], "overlay=0:0:shortest=1")
                    }
                    None => g.push(&[&frames], "null"),
                }
            }
        };

        for (track, path) in scene.def.common.audio.iter().zip(&scene.assets.audio) {
            let idx = cmd.input(["-i".into(), path.as_os_str().to_owned()]);
            audio.push(AudioInput {
                label: format!("[{idx}:a]"),
                volume: track.volume,
                start: track.start,
            });
        }

        let progress_driven = matches!(scene.kind(), SceneKind::Svg(_));
        let video = apply_effects(
            &mut g,
            video,
            &scene.def.common.effects,
            &canvas,
            progress_driven,
        )
        .map_err(|e| WeaveError::render(&scene.id, e.to_string()))?;
        let video = g.push(&[&video], "format=yuv420p");
        let audio = mix_audio(&mut g, &audio, canvas.secs(), job.settings.normalization);

        let mut args: Vec<OsString> = vec!["-y".into()];
        for input in &cmd.inputs {
            args.extend(input.iter().cloned());
        }
        args.extend([
            "-filter_complex".into(),
            g.finish().into(),
            "-map".into(),
            video.into(),
            "-map".into(),
            audio.into(),
            "-frames:v".into(),
            canvas.frames.to_string().into(),
            "-r".into(),
            canvas.fps.get().to_string().into(),
        ]);
        args.extend(encode_args());
        args.push(out.as_os_str().to_owned());
        cmd.args = args;
        Ok(cmd)
    }

    #[allow(clippy::too_many_arguments)]
    fn image_layer(
        &self,
        g: &mut FilterGraph,
        cmd: &mut SceneCommand,
        input: &str,
        img: &ImageScene,
        canvas: &Canvas,
        job: &SceneJob<'_>,
        out: &Path,
    ) -> WeaveResult<String> {
        let (w, h) = (canvas.width, canvas.height);
        let mut layer = if img.stretch {
            g.push(&[input], &format!("scale={w}:{h},setsar=1"))
        } else {
            let scale = match (img.width, img.height) {
                (Some(pw), _) => Some(format!("scale={}:-2", even(w as f64 * pw / 100.0))),
                (None, Some(ph)) => Some(format!("scale=-2:{}", even(h as f64 * ph / 100.0))),
                (None, None) => None,
            };
            let fg = match scale {
                Some(s) => g.push(&[input], &format!("{s},setsar=1")),
                None => g.push(&[input], "setsar=1"),
            };
            let bg = g.push(&[], &color_source(&img.bg_color, canvas)?);
            let (x, y) = placement(img.position);
            g.push(&[&bg, &fg], &format!("overlay=x='{x}':y='{y}':shortest=1"))
        };

        if !img.annotations.is_empty() {
            let svg = annotation_svg(&img.annotations, w, h);
            let pixels = self
                .rasterizer(job.settings.font.as_deref(), job.font_file)?
                .rasterize(&svg, None, w, h)
                .map_err(|e| WeaveError::render(&job.scene.id, format!("annotations: {e}")))?;
            let file = out.with_extension("annotations.rgba");
            std::fs::write(&file, &pixels)
                .with_context(|| format!("write annotation overlay '{}'", file.display()))?;
            cmd.scratch.push(file.clone());
            let idx = cmd.input([
                "-f".into(),
                "rawvideo".into(),
                "-pix_fmt".into(),
                "rgba".into(),
                "-s".into(),
                canvas.size().into(),
                "-i".into(),
                file.into_os_string(),
            ]);
            layer = g.push(
                &[&layer, &format!("[{idx}:v]")],
                "overlay=0:0:eof_action=repeat",
            );
        }
        Ok(layer)
    }

    fn svg_feed(&self, job: &SceneJob<'_>, svg: &SvgScene, canvas: Canvas) -> WeaveResult<FrameFeed> {
        let scene = job.scene;
        let template_path = primary(job)?;
        let template = std::fs::read_to_string(template_path).map_err(|e| {
            WeaveError::resource(
                Some(&scene.id),
                format!("read svg template '{}': {e}", template_path.display()),
            )
        })?;

        let mut vars: Map<String, Value> = svg.params.clone();
        for (key, path) in &scene.assets.image_params {
            vars.insert(key.clone(), Value::String(path.display().to_string()));
        }
        if let Some(font) = &job.settings.font {
            vars.insert("font".into(), Value::String(font.clone()));
        }
        vars.insert("width".into(), canvas.width.into());
        vars.insert("height".into(), canvas.height.into());
        vars.insert("duration".into(), canvas.secs().into());
        vars.insert("total_frames".into(), canvas.frames.into());

        Ok(FrameFeed {
            scene_id: scene.id.clone(),
            rasterizer: self.rasterizer(job.settings.font.as_deref(), job.font_file)?,
            template,
            vars,
            resources_dir: template_path.parent().map(Path::to_path_buf),
            effects: scene.def.common.effects.clone(),
            canvas,
        })
    }
}

impl MediaProbe for FfmpegBackend {
    fn media_duration(&self, path: &Path) -> WeaveResult<f64> {
        probe_media(path)?.duration.ok_or_else(|| {
            WeaveError::resource(
                None,
                format!("ffprobe reported no duration for '{}'", path.display()),
            )
        })
    }
}

impl RenderBackend for FfmpegBackend {
    #[tracing::instrument(level = "debug", skip_all, fields(scene = %job.scene.id))]
    fn render_scene(&self, job: &SceneJob<'_>, out: &Path, cancel: &CancelToken) -> WeaveResult<()> {
        cancel.check()?;
        ensure_parent_dir(out)?;
        let mut cmd = self.scene_command(job, out)?;
        let feed = cmd.feed.take();
        let result = run_ffmpeg(&cmd.args, feed, cancel);
        for f in &cmd.scratch {
            let _ = std::fs::remove_file(f);
        }
        match result {
            Ok(()) => Ok(()),
            Err(RunFailure::Cancelled) => Err(WeaveError::Cancelled),
            Err(RunFailure::Failed(msg)) => Err(WeaveError::render(&job.scene.id, msg)),
            Err(RunFailure::Feed(e)) => Err(e),
        }
    }

    fn assemble(&self, plan: &AssemblyPlan, cancel: &CancelToken) -> WeaveResult<()> {
        if plan.clips.is_empty() {
            return Err(WeaveError::Other(anyhow!("nothing to assemble")));
        }
        ensure_parent_dir(&plan.output)?;

        let mut args: Vec<OsString> = vec!["-y".into()];
        for clip in &plan.clips {
            args.extend(["-i".into(), clip.path.as_os_str().to_owned()]);
        }
        if plan.clips.len() == 1 {
            args.extend(["-c".into(), "copy".into(), "-movflags".into(), "+faststart".into()]);
        } else {
            let (graph, v, a) = assembly_graph(plan);
            args.extend([
                "-filter_complex".into(),
                graph.into(),
                "-map".into(),
                v.into(),
                "-map".into(),
                a.into(),
                "-frames:v".into(),
                plan.total_frames().to_string().into(),
            ]);
            args.extend(encode_args());
        }
        args.push(plan.output.as_os_str().to_owned());

        tracing::info!(
            clips = plan.clips.len(),
            transitions = plan.transitions.len(),
            frames = plan.total_frames(),
            output = %plan.output.display(),
            "assembling"
        );
        match run_ffmpeg(&args, None, cancel) {
            Ok(()) => Ok(()),
            Err(RunFailure::Cancelled) => Err(WeaveError::Cancelled),
            Err(RunFailure::Failed(msg)) => Err(WeaveError::Other(anyhow!(
                "ffmpeg assembly of '{}' failed: {msg}",
                plan.output.display()
            ))),
            Err(RunFailure::Feed(e)) => Err(e),
        }
    }
}

fn primary<'a>(job: &'a SceneJob<'_>) -> WeaveResult<&'a Path> {
    job.scene.assets.primary.as_deref().ok_or_else(|| {
        WeaveError::resource(Some(&job.scene.id), "scene has no located source file")
    })
}

fn even(v: f64) -> u32 {
    ((v / 2.0).round() as u32).max(1) * 2
}

fn encode_args() -> [OsString; 14] {
    [
        "-c:v".into(),
        "libx264".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-c:a".into(),
        "aac".into(),
        "-ar".into(),
        AUDIO_RATE.to_string().into(),
        "-ac".into(),
        "2".into(),
        "-movflags".into(),
        "+faststart".into(),
        "-f".into(),
        "mp4".into(),
    ]
}

fn write_concat_list(list: &Path, frames: &[PathBuf], fps: u32) -> anyhow::Result<()> {
    let mut text = String::from("ffconcat version 1.0\n");
    let step = num(1.0 / fps as f64);
    for f in frames {
        let abs = std::path::absolute(f).with_context(|| format!("resolve '{}'", f.display()))?;
        let quoted = abs.display().to_string().replace('\'', r"'\''");
        text.push_str(&format!("file '{quoted}'\nduration {step}\n"));
    }
    // The concat demuxer ignores the last duration unless the final entry is repeated.
    if let Some(last) = frames.last() {
        let abs = std::path::absolute(last)?;
        let quoted = abs.display().to_string().replace('\'', r"'\''");
        text.push_str(&format!("file '{quoted}'\n"));
    }
    std::fs::write(list, text).with_context(|| format!("write frame list '{}'", list.display()))
}

#[derive(Default)]
struct SceneCommand {
    inputs: Vec<Vec<OsString>>,
    args: Vec<OsString>,
    feed: Option<FrameFeed>,
    /// Side files removed once ffmpeg exits.
    scratch: Vec<PathBuf>,
}

impl SceneCommand {
    /// Register an input and return its ffmpeg input index.
    fn input(&mut self, args: impl IntoIterator<Item = OsString>) -> usize {
        self.inputs.push(args.into_iter().collect());
        self.inputs.len() - 1
    }
}

/// Per-frame SVG generator streamed to ffmpeg's stdin.
struct FrameFeed {
    scene_id: String,
    rasterizer: SvgRasterizer,
    template: String,
    vars: Map<String, Value>,
    resources_dir: Option<PathBuf>,
    effects: Vec<Effect>,
    canvas: Canvas,
}

impl FrameFeed {
    fn progress(&self, frame: u64) -> f64 {
        let linear = frame as f64 / self.canvas.frames.max(1) as f64;
        self.effects
            .iter()
            .fold(linear, |p, e| e.transform_progress(p))
            .clamp(0.0, 1.0)
    }

    /// Write every frame; identical substituted documents reuse the previous raster.
    fn write_frames(&self, w: &mut dyn Write, cancel: &CancelToken) -> WeaveResult<()> {
        let renderer = PlaceholderRenderer;
        let mut vars = self.vars.clone();
        let mut last: Option<(String, Vec<u8>)> = None;
        let (width, height) = (self.canvas.width, self.canvas.height);

        for frame in 0..self.canvas.frames {
            cancel.check()?;
            vars.insert("frame".into(), frame.into());
            vars.insert("timestamp".into(), self.canvas.fps.secs(frame).into());
            vars.insert("progress".into(), self.progress(frame).into());
            let text = renderer
                .render_text(&self.template, &vars)
                .map_err(|e| WeaveError::render(&self.scene_id, e.to_string()))?;

            let reuse = matches!(&last, Some((prev, _)) if *prev == text);
            if !reuse {
                let px = self
                    .rasterizer
                    .rasterize(&text, self.resources_dir.as_deref(), width, height)
                    .map_err(|e| {
                        WeaveError::render(&self.scene_id, format!("frame {frame}: {e}"))
                    })?;
                last = Some((text, px));
            }
            if let Some((_, px)) = &last {
                w.write_all(px).map_err(|e| {
                    WeaveError::Other(anyhow::Error::new(e).context("write frame to ffmpeg"))
                })?;
            }
        }
        Ok(())
    }
}

enum RunFailure {
    Cancelled,
    Failed(String),
    Feed(WeaveError),
}

fn run_ffmpeg(
    args: &[OsString],
    feed: Option<FrameFeed>,
    cancel: &CancelToken,
) -> Result<(), RunFailure> {
    if cancel.is_cancelled() {
        return Err(RunFailure::Cancelled);
    }
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-loglevel", "error"])
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    if feed.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    tracing::debug!(args = ?args, "spawning ffmpeg");

    let mut child = cmd.spawn().map_err(|e| {
        RunFailure::Failed(format!(
            "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
        ))
    })?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| RunFailure::Failed("failed to open ffmpeg stderr (unexpected)".into()))?;
    let stderr_drain = std::thread::spawn(move || {
        let mut bytes = Vec::new();
        stderr.read_to_end(&mut bytes)?;
        Ok::<_, std::io::Error>(bytes)
    });

    let mut feed_error = None;
    if let Some(feed) = feed
        && let Some(mut stdin) = child.stdin.take()
    {
        if let Err(e) = feed.write_frames(&mut stdin, cancel) {
            let broken_pipe = matches!(
                &e,
                WeaveError::Other(err) if err
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io| io.kind() == IoErrorKind::BrokenPipe)
            );
            // A broken pipe means ffmpeg exited early; its status and stderr explain why.
            if !broken_pipe {
                feed_error = Some(e);
            }
        }
        drop(stdin);
    }

    let status = loop {
        if feed_error.is_some() || cancel.is_cancelled() {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stderr_drain.join();
            return Err(match feed_error {
                Some(WeaveError::Cancelled) | None => RunFailure::Cancelled,
                Some(e) => RunFailure::Feed(e),
            });
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(RunFailure::Failed(format!("wait for ffmpeg: {e}"))),
        }
    };

    let stderr = match stderr_drain.join() {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).trim().to_string(),
        _ => String::new(),
    };
    if !status.success() {
        return Err(RunFailure::Failed(format!(
            "ffmpeg exited with status {status}: {stderr}"
        )));
    }
    if !stderr.is_empty() {
        tracing::debug!(stderr = %stderr, "ffmpeg diagnostics");
    }
    Ok(())
}
