//! Specification resolution: defaults, templates, durations and transitions.

pub mod defaults;
pub mod duration;
pub mod registry;
pub mod scene;
pub mod substitute;
pub mod template;
pub mod timeline;
pub mod transition;

pub use defaults::{Slot, merge, merge_layers};
pub use duration::{DurationSource, ResolvedDuration, resolve_duration};
pub use registry::{
    DirTemplateRegistry, ParamDef, StaticTemplateRegistry, TemplateDef, TemplateRegistry,
};
pub use scene::{ExpandedScene, Origin, ResolvedScene, SceneAssets};
pub use substitute::{PlaceholderRenderer, TextRenderer, substitute};
pub use template::{Expander, MAX_TEMPLATE_DEPTH};
pub use timeline::{ResolveContext, Timeline, TimelineEntry, TimelineView, resolve};
pub use transition::{TransitionSpan, Woven, weave};
