//! Referenced files: path lookup, image sequences and content identity.

pub mod identity;
pub mod sequence;

pub use identity::{ContentId, ContentIndex};
pub use sequence::{list_sequence, natural_cmp};

use std::path::{Path, PathBuf};

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let home = || directories::BaseDirs::new().map(|b| b.home_dir().to_path_buf());
    if path == "~" {
        if let Some(h) = home() {
            return h;
        }
    } else if let Some(rest) = path.strip_prefix("~/")
        && let Some(h) = home()
    {
        return h.join(rest);
    }
    PathBuf::from(path)
}

/// Resolve `path` against `search` directories in order, returning the first existing file.
///
/// Absolute paths (after `~` expansion) are returned as-is when they exist.
pub fn locate(path: &str, search: &[&Path]) -> Option<PathBuf> {
    let p = expand_tilde(path);
    if p.is_absolute() {
        return p.is_file().then_some(p);
    }
    search.iter().map(|dir| dir.join(&p)).find(|c| c.is_file())
}
