//! Content fingerprints and the on-disk artifact cache.

pub mod fingerprint;
pub mod store;

pub use fingerprint::{Fingerprint, fingerprint_scene};
pub use store::{
    ArtifactSource, CacheEntry, CacheRequest, CacheStore, CachedArtifact, CleanReport,
    VerifyReport,
};

use std::path::PathBuf;

/// Per-user cache root (`~/.cache/sceneweave` on Linux).
pub fn default_cache_root() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "sceneweave").map(|d| d.cache_dir().to_path_buf())
}
