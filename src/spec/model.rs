//! Typed scene model.
//!
//! Scene bodies travel through merging and template expansion as plain mappings; once a scene is
//! fully expanded it is decoded into the closed enums below and validated.

use crate::foundation::error::{KeyPath, WeaveError, WeaveResult};
use crate::foundation::size::ByteSize;
use crate::spec::value::{decode, null_as_default};
use serde::Deserialize;
use serde_json::{Map, Value};

/// A fully expanded, validated scene definition.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneDef {
    pub common: SceneCommon,
    pub kind: SceneKind,
}

impl SceneDef {
    /// Decode and validate a merged scene body located at `path`.
    pub fn from_body(body: &Map<String, Value>, path: &KeyPath) -> WeaveResult<Self> {
        let value = Value::Object(body.clone());
        let scene_id = body.get("id").and_then(Value::as_str).unwrap_or_default();

        match body.get("type") {
            None | Some(Value::Null) => {
                return Err(WeaveError::scene_config(
                    scene_id,
                    path.field("type"),
                    "scene is missing required field 'type'",
                ));
            }
            Some(Value::String(t)) if t == "template" => {
                return Err(WeaveError::scene_config(
                    scene_id,
                    path.field("type"),
                    "template scene was not expanded",
                ));
            }
            _ => {}
        }

        let common: SceneCommon = decode(&value, path).map_err(|e| e.in_scene(scene_id))?;
        let kind: SceneKind = decode(&value, path).map_err(|e| e.in_scene(scene_id))?;
        let def = Self { common, kind };
        def.validate(path)?;
        Ok(def)
    }

    pub fn id(&self) -> &str {
        &self.common.id
    }

    fn validate(&self, path: &KeyPath) -> WeaveResult<()> {
        let id = self.id();
        let err = |p: KeyPath, msg: String| WeaveError::scene_config(id, p, msg);
        let c = &self.common;

        if let Some(d) = c.duration
            && (!d.is_finite() || d < 0.0)
        {
            return Err(err(
                path.field("duration"),
                format!("duration must be a non-negative number, got {d}"),
            ));
        }
        if c.frames == Some(0) {
            return Err(err(path.field("frames"), "frames must be > 0".to_string()));
        }

        for (i, track) in c.audio.iter().enumerate() {
            let p = path.field("audio").index(i);
            if track.file.trim().is_empty() {
                return Err(err(p.field("file"), "audio file must be non-empty".to_string()));
            }
            if !track.volume.is_finite() || track.volume < 0.0 {
                return Err(err(p.field("volume"), "volume must be >= 0".to_string()));
            }
            if !track.start.is_finite() || track.start < 0.0 {
                return Err(err(p.field("start"), "start must be >= 0".to_string()));
            }
        }

        if let Some(t) = &c.transition
            && (!t.duration.is_finite() || t.duration <= 0.0)
        {
            return Err(err(
                path.field("transition").field("duration"),
                format!("transition duration must be > 0, got {}", t.duration),
            ));
        }

        for (i, fx) in c.effects.iter().enumerate() {
            if let Some(d) = fx.duration()
                && (!d.is_finite() || d < 0.0)
            {
                return Err(err(
                    path.field("effects").index(i).field("duration"),
                    format!("effect '{}' duration must be >= 0", fx.name()),
                ));
            }
        }

        match &self.kind {
            SceneKind::Image(s) => {
                if s.image.trim().is_empty() {
                    return Err(err(path.field("image"), "image must be non-empty".to_string()));
                }
                if !s.stretch && s.width.is_some() && s.height.is_some() {
                    return Err(err(
                        path.field("height"),
                        "cannot set both 'width' and 'height' unless 'stretch' is true"
                            .to_string(),
                    ));
                }
                for (i, a) in s.annotations.iter().enumerate() {
                    if let Annotation::Text(t) = a
                        && t.position.is_some() == t.location.is_some()
                    {
                        return Err(err(
                            path.field("annotations").index(i),
                            "text annotation needs exactly one of 'position' or 'location'"
                                .to_string(),
                        ));
                    }
                }
            }
            SceneKind::Video(s) => {
                if s.file.trim().is_empty() {
                    return Err(err(path.field("file"), "file must be non-empty".to_string()));
                }
                if s.start.is_some_and(|v| !v.is_finite() || v < 0.0) {
                    return Err(err(path.field("start"), "start must be >= 0".to_string()));
                }
                if let (Some(a), Some(b)) = (s.start, s.end)
                    && b <= a
                {
                    return Err(err(path.field("end"), "end must be after start".to_string()));
                }
            }
            SceneKind::VideoImages(s) => {
                if s.file.trim().is_empty() {
                    return Err(err(path.field("file"), "file must be non-empty".to_string()));
                }
                if s.fps == Some(0) {
                    return Err(err(path.field("fps"), "fps must be > 0".to_string()));
                }
            }
            SceneKind::Svg(s) => {
                if s.template.trim().is_empty() {
                    return Err(err(
                        path.field("template"),
                        "template must be non-empty".to_string(),
                    ));
                }
            }
            SceneKind::Color(_) => {}
        }
        Ok(())
    }
}

/// Fields shared by every scene kind.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SceneCommon {
    pub id: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub frames: Option<u64>,
    #[serde(default, deserialize_with = "audio_tracks")]
    pub audio: Vec<AudioTrack>,
    #[serde(default)]
    pub transition: Option<TransitionDef>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub effects: Vec<Effect>,
    #[serde(default)]
    pub cache: CachePolicy,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SceneKind {
    Image(ImageScene),
    Video(VideoScene),
    VideoImages(VideoImagesScene),
    Svg(SvgScene),
    Color(ColorScene),
}

impl SceneKind {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Video(_) => "video",
            Self::VideoImages(_) => "video-images",
            Self::Svg(_) => "svg",
            Self::Color(_) => "color",
        }
    }
}

fn black() -> String {
    "black".to_string()
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageScene {
    pub image: String,
    #[serde(default)]
    pub stretch: bool,
    #[serde(default)]
    pub position: Position,
    /// Width as a percentage of the frame width.
    #[serde(default)]
    pub width: Option<f64>,
    /// Height as a percentage of the frame height.
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default = "black")]
    pub bg_color: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VideoScene {
    pub file: String,
    /// Trim start in seconds.
    #[serde(default)]
    pub start: Option<f64>,
    /// Trim end in seconds.
    #[serde(default)]
    pub end: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VideoImagesScene {
    /// Glob pattern; wildcards are allowed in the file name only.
    pub file: String,
    /// Frame rate of the sequence; defaults to the output fps.
    #[serde(default)]
    pub fps: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SvgScene {
    pub template: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub params: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub image_params: Map<String, Value>,
    /// Background the SVG is flattened onto; `None` or `"none"` keeps it transparent.
    #[serde(default = "some_black")]
    pub composite_on: Option<String>,
}

fn some_black() -> Option<String> {
    Some(black())
}

impl SvgScene {
    pub fn background(&self) -> Option<&str> {
        self.composite_on
            .as_deref()
            .filter(|c| !c.eq_ignore_ascii_case("none"))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ColorScene {
    #[serde(default = "black")]
    pub color: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    #[default]
    Center,
    Top,
    Bottom,
    Left,
    Right,
}

/// Placement of an image inside the frame: a named anchor or `[x%, y%]` of its top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Position {
    Anchor(Anchor),
    Percent([f64; 2]),
}

impl Default for Position {
    fn default() -> Self {
        Self::Anchor(Anchor::Center)
    }
}

/// One audio track attached to a scene.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub file: String,
    pub volume: f64,
    /// Offset into the scene, in seconds.
    pub start: f64,
}

impl<'de> Deserialize<'de> for AudioTrack {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Path(String),
            Full {
                file: String,
                #[serde(default = "one")]
                volume: f64,
                #[serde(default)]
                start: f64,
            },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Path(file) => Ok(Self {
                file,
                volume: 1.0,
                start: 0.0,
            }),
            Repr::Full {
                file,
                volume,
                start,
            } => Ok(Self {
                file,
                volume,
                start,
            }),
        }
    }
}

fn audio_tracks<'de, D>(deserializer: D) -> Result<Vec<AudioTrack>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<AudioTrack>),
        One(AudioTrack),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::Many(v)) => v,
        Some(OneOrMany::One(t)) => vec![t],
    })
}

/// Overlap between a scene and the next one.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TransitionDef {
    #[serde(rename = "type")]
    pub kind: TransitionKind,
    /// Overlap length in seconds.
    pub duration: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionKind {
    #[serde(alias = "crossfade")]
    CrossFade,
    FadeThroughBlack,
    WipeLeft,
    WipeRight,
    WipeUp,
    WipeDown,
    SlideLeft,
    SlideRight,
    SlideUp,
    SlideDown,
}

impl TransitionKind {
    /// Name of the matching ffmpeg `xfade` transition.
    pub fn xfade_name(self) -> &'static str {
        match self {
            Self::CrossFade => "fade",
            Self::FadeThroughBlack => "fadeblack",
            Self::WipeLeft => "wipeleft",
            Self::WipeRight => "wiperight",
            Self::WipeUp => "wipeup",
            Self::WipeDown => "wipedown",
            Self::SlideLeft => "slideleft",
            Self::SlideRight => "slideright",
            Self::SlideUp => "slideup",
            Self::SlideDown => "slidedown",
        }
    }
}

/// Per-scene caching behavior.
///
/// Absent or `false` disables caching; `true`, `null` or an empty mapping enable it without a
/// cap; `{max-size: 500MB}` enables it with a per-scene cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    #[default]
    Disabled,
    Enabled { max_size: Option<ByteSize> },
}

impl CachePolicy {
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled { .. })
    }

    pub fn max_size(self) -> Option<ByteSize> {
        match self {
            Self::Enabled { max_size } => max_size,
            Self::Disabled => None,
        }
    }
}

impl<'de> Deserialize<'de> for CachePolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Limits {
            #[serde(default, rename = "max-size", alias = "max_size")]
            max_size: Option<ByteSize>,
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Limits(Limits),
        }

        Ok(match Option::<Repr>::deserialize(deserializer)? {
            None | Some(Repr::Flag(true)) => Self::Enabled { max_size: None },
            Some(Repr::Flag(false)) => Self::Disabled,
            Some(Repr::Limits(l)) => Self::Enabled {
                max_size: l.max_size,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[default]
    Left,
    Right,
    Top,
    Bottom,
}

/// Time-based transformation applied to one scene. Effects compose left-to-right.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Effect {
    FadeIn { duration: f64 },
    FadeOut { duration: f64 },
    SlideIn(Slide),
    SlideOut(Slide),
    Zoom(Zoom),
    Scroll(Scroll),
    AccelDecel(AccelDecel),
}

impl Effect {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FadeIn { .. } => "fade-in",
            Self::FadeOut { .. } => "fade-out",
            Self::SlideIn(_) => "slide-in",
            Self::SlideOut(_) => "slide-out",
            Self::Zoom(_) => "zoom",
            Self::Scroll(_) => "scroll",
            Self::AccelDecel(_) => "accel-decel",
        }
    }

    pub fn duration(&self) -> Option<f64> {
        match self {
            Self::FadeIn { duration } | Self::FadeOut { duration } => Some(*duration),
            Self::SlideIn(s) | Self::SlideOut(s) => Some(s.duration),
            Self::Zoom(z) => z.duration,
            Self::Scroll(s) => s.duration,
            Self::AccelDecel(a) => Some(a.duration),
        }
    }

    /// Remap linear scene progress (`0..=1`); only progress-driven effects change it.
    pub fn transform_progress(&self, t: f64) -> f64 {
        match self {
            Self::AccelDecel(a) => a.transform_progress(t),
            _ => t,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Slide {
    pub duration: f64,
    #[serde(default)]
    pub side: Side,
}

fn full_rect() -> [f64; 4] {
    [0.0, 0.0, 100.0, 100.0]
}

/// Animated crop between two `[x, y, w, h]` rectangles given in percent of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Zoom {
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default = "full_rect")]
    pub start_rect: [f64; 4],
    #[serde(default = "full_rect")]
    pub end_rect: [f64; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Scroll {
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub w: Option<u32>,
    #[serde(default)]
    pub h: Option<u32>,
    /// Pixels per second.
    #[serde(default)]
    pub x_speed: f64,
    #[serde(default)]
    pub y_speed: f64,
    #[serde(default)]
    pub x_start: f64,
    #[serde(default)]
    pub y_start: f64,
}

fn default_abruptness() -> f64 {
    1.5
}

fn one() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AccelDecel {
    pub duration: f64,
    #[serde(default = "default_abruptness")]
    pub abruptness: f64,
    #[serde(default = "one")]
    pub soonness: f64,
    #[serde(default)]
    pub min_speed: f64,
}

impl AccelDecel {
    /// Ease `t` through a symmetric power curve, blended with linear progress by `min_speed`.
    ///
    /// Positive abruptness is slow-fast-slow, negative is fast-slow-fast, zero is linear.
    pub fn transform_progress(&self, t: f64) -> f64 {
        if self.abruptness == 0.0 {
            return t;
        }
        let p = self.abruptness.abs();
        let eased = if self.abruptness > 0.0 {
            if t < 0.5 {
                (2.0 * t).powf(p) / 2.0
            } else {
                1.0 - (2.0 - 2.0 * t).powf(p) / 2.0
            }
        } else if t < 0.5 {
            (1.0 - (1.0 - 2.0 * t).powf(p)) / 2.0
        } else {
            (2.0 * t - 1.0).powf(p) / 2.0 + 0.5
        };
        let min_speed = self.min_speed.clamp(0.0, 1.0);
        eased * (1.0 - min_speed) + t * min_speed
    }
}

/// Static overlay drawn on an image scene.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Annotation {
    Highlight(Highlight),
    Text(TextAnnotation),
    Arrow(Arrow),
}

fn yellow() -> String {
    "yellow".to_string()
}

fn white() -> String {
    "white".to_string()
}

fn red() -> String {
    "red".to_string()
}

fn half() -> f64 {
    0.5
}

/// Translucent rectangle; `rect` is `[x, y, w, h]` in output pixels.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Highlight {
    pub rect: [f64; 4],
    #[serde(default = "yellow")]
    pub color: String,
    #[serde(default = "half")]
    pub opacity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextLocation {
    Top,
    Bottom,
    Center,
}

fn default_fontsize() -> u32 {
    36
}

fn default_bg_opacity() -> f64 {
    0.7
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextAnnotation {
    #[serde(alias = "caption")]
    pub content: String,
    #[serde(default)]
    pub position: Option<[f64; 2]>,
    #[serde(default)]
    pub location: Option<TextLocation>,
    #[serde(default = "default_fontsize")]
    pub fontsize: u32,
    #[serde(default = "white")]
    pub color: String,
    #[serde(default = "black")]
    pub bg_color: String,
    #[serde(default = "default_bg_opacity")]
    pub bg_opacity: f64,
}

fn default_arrow_width() -> f64 {
    4.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Arrow {
    pub start: [f64; 2],
    pub end: [f64; 2],
    #[serde(default = "red")]
    pub color: String,
    #[serde(default = "default_arrow_width")]
    pub width: f64,
}

#[cfg(test)]
#[path = "../../tests/unit/spec/model.rs"]
mod tests;
