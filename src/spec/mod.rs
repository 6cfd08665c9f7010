//! Specification document: loading, validation and the typed scene model.

pub mod document;
pub mod model;
pub mod value;

pub use document::{
    CacheSettings, Normalization, RawScene, Settings, SpecTarget, Specification,
    TemplateInvocation,
};
pub use model::{
    AccelDecel, Anchor, Annotation, Arrow, AudioTrack, CachePolicy, ColorScene, Effect, Highlight,
    ImageScene, Position, SceneCommon, SceneDef, SceneKind, Scroll, Side, Slide, SvgScene,
    TextAnnotation, TextLocation, TransitionDef, TransitionKind, VideoImagesScene, VideoScene,
    Zoom,
};
