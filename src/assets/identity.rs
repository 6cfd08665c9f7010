use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use xxhash_rust::xxh3::Xxh3;

use crate::foundation::error::{WeaveError, WeaveResult};

const CONTENT_SEED: u64 = 0x5c3a_91d0_7e2b_44f1;

/// Content identity of one referenced file: a 128-bit hash of its bytes plus its length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ContentId {
    pub hi: u64,
    pub lo: u64,
    pub len: u64,
}

impl ContentId {
    pub fn of_file(path: &Path) -> WeaveResult<Self> {
        let mut f = std::fs::File::open(path).map_err(|e| {
            WeaveError::resource(None, format!("cannot open '{}': {e}", path.display()))
        })?;
        let mut h = Xxh3::with_seed(CONTENT_SEED);
        let mut buf = vec![0u8; 64 * 1024];
        let mut len = 0u64;
        loop {
            let n = f.read(&mut buf).map_err(|e| {
                WeaveError::resource(None, format!("cannot read '{}': {e}", path.display()))
            })?;
            if n == 0 {
                break;
            }
            h.update(&buf[..n]);
            len += n as u64;
        }
        let v = h.digest128();
        Ok(Self {
            hi: (v >> 64) as u64,
            lo: v as u64,
            len,
        })
    }
}

/// Precomputed content identities for every file a timeline references.
///
/// Built once per resolve so that fingerprinting stays a pure lookup.
#[derive(Clone, Debug, Default)]
pub struct ContentIndex {
    ids: HashMap<PathBuf, ContentId>,
}

impl ContentIndex {
    /// Hash `paths` in parallel. Duplicates are hashed once.
    pub fn build<I>(paths: I) -> WeaveResult<Self>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut unique: Vec<PathBuf> = paths.into_iter().collect();
        unique.sort();
        unique.dedup();

        let ids = unique
            .into_par_iter()
            .map(|p| ContentId::of_file(&p).map(|id| (p, id)))
            .collect::<WeaveResult<HashMap<_, _>>>()?;
        tracing::debug!(files = ids.len(), "indexed referenced file contents");
        Ok(Self { ids })
    }

    pub fn get(&self, path: &Path) -> Option<ContentId> {
        self.ids.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
