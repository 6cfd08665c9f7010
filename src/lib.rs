//! Sceneweave turns declarative YAML video specifications into deterministic render timelines.
//!
//! A run has two halves:
//!
//! - [`resolve`] loads nothing from the network and touches no pixels. It merges `scene_defaults`,
//!   expands template invocations, derives every scene's length in frames, weaves transitions
//!   into overlaps and fingerprints each scene's render-relevant content.
//! - [`render`] walks the resulting [`Timeline`], renders scenes in parallel through the
//!   content-addressed [`CacheStore`] (at most one render per fingerprint) and hands the clips to
//!   a [`RenderBackend`] for assembly. [`FfmpegBackend`] is the default backend.
#![forbid(unsafe_code)]

pub mod assets;
pub mod cache;
pub mod foundation;
pub mod render;
pub mod resolve;
pub mod session;
pub mod spec;

pub use crate::foundation::core::{Fps, FrameIndex, FrameRange};
pub use crate::foundation::error::{ErrorKind, KeyPath, SceneFailure, WeaveError, WeaveResult};
pub use crate::foundation::size::ByteSize;

pub use crate::cache::{CacheStore, Fingerprint, default_cache_root};
pub use crate::render::{CancelToken, FfmpegBackend, MediaProbe, RenderBackend};
pub use crate::resolve::{
    DirTemplateRegistry, PlaceholderRenderer, ResolveContext, StaticTemplateRegistry, TemplateDef,
    TemplateRegistry, TextRenderer, Timeline, resolve,
};
pub use crate::session::{RenderOpts, RenderReport, render};
pub use crate::spec::{Settings, SpecTarget, Specification};
