//! Media backend seam and the ffmpeg implementation behind it.

pub mod backend;
pub mod ffmpeg;
pub(crate) mod filters;
pub mod svg;

pub use backend::{
    AssemblyClip, AssemblyPlan, AssemblyTransition, CancelToken, MediaProbe, RenderBackend,
    SceneJob,
};
pub use ffmpeg::{FfmpegBackend, MediaInfo, is_ffmpeg_on_path, probe_media};
pub use svg::SvgRasterizer;
