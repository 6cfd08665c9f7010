//! End-to-end runs: render a resolved timeline through the cache and assemble the video.

pub mod render_session;

pub use render_session::{RenderOpts, RenderReport, render};
