use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Context as _;
use lru::LruCache;

use crate::cache::fingerprint::Fingerprint;
use crate::foundation::error::{WeaveError, WeaveResult};
use crate::foundation::size::ByteSize;

pub const ARTIFACT_FILE: &str = "clip.mp4";
pub const PARTIAL_FILE: &str = "clip.partial.mp4";
pub const ENTRY_FILE: &str = "entry.json";
const SCRATCH_DIR: &str = ".scratch";

/// Persisted metadata of one cached artifact (`entry.json`).
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub scene_id: String,
    /// Artifact file name inside the entry directory.
    pub artifact: String,
    pub size_bytes: u64,
    /// Unix time in milliseconds.
    pub created_at: u64,
    /// Unix time in milliseconds of the last hit.
    pub last_used_at: u64,
    /// Logical clock of the last use; restores recency order on reopen.
    pub use_seq: u64,
    /// Per-scene cap requested by the last use.
    #[serde(default)]
    pub max_size: Option<ByteSize>,
}

/// One `get_or_render` call.
#[derive(Clone, Copy, Debug)]
pub struct CacheRequest<'a> {
    pub scene_id: &'a str,
    pub fingerprint: Fingerprint,
    /// Per-scene cap over every entry of `scene_id`.
    pub max_size: Option<ByteSize>,
    /// Ignore an existing entry; render and overwrite.
    pub force: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Served from an existing entry (or from a concurrent render of the same fingerprint).
    Hit,
    /// Rendered by this call and stored.
    Rendered,
    /// Rendered but larger than its cap; kept outside the cache.
    Uncached,
}

/// An artifact handed out by the store.
///
/// Cached artifacts stay pinned (exempt from eviction) until this value is dropped.
#[derive(Debug)]
pub struct CachedArtifact<'s> {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub source: ArtifactSource,
    pin: Option<&'s CacheStore>,
}

impl Drop for CachedArtifact<'_> {
    fn drop(&mut self) {
        if let Some(store) = self.pin {
            store.unpin(self.fingerprint);
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub entries: usize,
    pub bytes: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub entries: usize,
    /// Entries dropped because their artifact vanished.
    pub dropped: usize,
    /// Whether the in-memory totals disagreed with the recount.
    pub drift: bool,
}

/// How a finished render ended, shared with every caller that joined it.
#[derive(Debug)]
enum FlightOutcome {
    Stored,
    Uncached(PathBuf),
    Failed(Failure),
}

#[derive(Debug, Clone)]
enum Failure {
    Cancelled,
    Resource(String),
    Render(String),
}

impl Failure {
    fn of(e: &WeaveError) -> Self {
        match e {
            WeaveError::Cancelled => Self::Cancelled,
            WeaveError::Resource { message, .. } => Self::Resource(message.clone()),
            WeaveError::Render { message, .. } => Self::Render(message.clone()),
            other => Self::Render(other.to_string()),
        }
    }

    fn to_error(&self, scene_id: &str) -> WeaveError {
        match self {
            Self::Cancelled => WeaveError::Cancelled,
            Self::Resource(m) => WeaveError::resource(Some(scene_id), m.clone()),
            Self::Render(m) => WeaveError::render(scene_id, m.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct Flight {
    outcome: OnceLock<FlightOutcome>,
}

/// Entries are kept in recency order, most recently used first.
#[derive(Debug)]
struct StoreState {
    entries: LruCache<Fingerprint, CacheEntry>,
    in_flight: HashMap<Fingerprint, Arc<Flight>>,
    pins: HashMap<Fingerprint, usize>,
    total_bytes: u64,
    scene_bytes: HashMap<String, u64>,
    clock: u64,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            entries: LruCache::unbounded(),
            in_flight: HashMap::new(),
            pins: HashMap::new(),
            total_bytes: 0,
            scene_bytes: HashMap::new(),
            clock: 0,
        }
    }
}

impl StoreState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, entry: CacheEntry) {
        if let Some(old) = self.entries.pop(&entry.fingerprint) {
            self.account_remove(&old);
        }
        self.total_bytes += entry.size_bytes;
        *self.scene_bytes.entry(entry.scene_id.clone()).or_default() += entry.size_bytes;
        self.entries.put(entry.fingerprint, entry);
    }

    fn remove(&mut self, fp: Fingerprint) -> Option<CacheEntry> {
        let old = self.entries.pop(&fp)?;
        self.account_remove(&old);
        Some(old)
    }

    fn account_remove(&mut self, e: &CacheEntry) {
        self.total_bytes = self.total_bytes.saturating_sub(e.size_bytes);
        if let Some(b) = self.scene_bytes.get_mut(&e.scene_id) {
            *b = b.saturating_sub(e.size_bytes);
            if *b == 0 {
                self.scene_bytes.remove(&e.scene_id);
            }
        }
    }

    fn pin(&mut self, fp: Fingerprint) {
        *self.pins.entry(fp).or_default() += 1;
    }

    fn evictable(&self, fp: &Fingerprint) -> bool {
        !self.pins.contains_key(fp) && !self.in_flight.contains_key(fp)
    }
}

/// Size-bounded, fingerprint-addressed store of rendered scene artifacts.
///
/// Layout: `<root>/<scene id>/<fingerprint>/{clip.mp4, entry.json}`. At most one render per
/// fingerprint runs at a time; concurrent requests for it wait and share the outcome.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    global_cap: Option<ByteSize>,
    state: Mutex<StoreState>,
    cond: Condvar,
}

impl CacheStore {
    /// Open (or create) the store at `root`, loading persisted entries.
    ///
    /// Leftover partial renders, unreadable entries and scratch files are removed.
    pub fn open(root: impl Into<PathBuf>, global_cap: Option<ByteSize>) -> WeaveResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("create cache root '{}'", root.display()))?;
        remove_path(&root.join(SCRATCH_DIR));

        let mut loaded = Vec::new();
        for scene_dir in read_dirs(&root)? {
            if file_name(&scene_dir).starts_with('.') {
                continue;
            }
            for entry_dir in read_dirs(&scene_dir)? {
                remove_path(&entry_dir.join(PARTIAL_FILE));
                match load_entry(&entry_dir) {
                    Some(e) => loaded.push(e),
                    None => {
                        tracing::debug!(dir = %entry_dir.display(), "removing incomplete cache entry");
                        remove_path(&entry_dir);
                    }
                }
            }
            let _ = std::fs::remove_dir(&scene_dir);
        }

        let mut state = StoreState::default();
        loaded.sort_by_key(|e| e.use_seq);
        for e in loaded {
            state.clock = state.clock.max(e.use_seq);
            state.insert(e);
        }

        tracing::debug!(
            root = %root.display(),
            entries = state.entries.len(),
            bytes = state.total_bytes,
            "opened cache store"
        );
        let store = Self {
            root,
            global_cap,
            state: Mutex::new(state),
            cond: Condvar::new(),
        };
        {
            let mut st = store.lock();
            store.evict_global(&mut st);
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn global_cap(&self) -> Option<ByteSize> {
        self.global_cap
    }

    /// Directory for throwaway files; emptied whenever a store opens on this root.
    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    pub fn total_bytes(&self) -> u64 {
        self.lock().total_bytes
    }

    pub fn scene_bytes(&self, scene_id: &str) -> u64 {
        self.lock().scene_bytes.get(scene_id).copied().unwrap_or(0)
    }

    pub fn contains(&self, fp: Fingerprint) -> bool {
        self.lock().entries.contains(&fp)
    }

    /// Snapshot of every entry, least recently used first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let st = self.lock();
        st.entries.iter().rev().map(|(_, e)| e.clone()).collect()
    }

    /// Return the artifact for `req.fingerprint`, invoking `render` only on a miss.
    ///
    /// `render` receives the path it must write the artifact to. A failed or cancelled render
    /// never commits an entry.
    pub fn get_or_render<F>(&self, req: &CacheRequest<'_>, render: F) -> WeaveResult<CachedArtifact<'_>>
    where
        F: FnOnce(&Path) -> WeaveResult<()>,
    {
        let fp = req.fingerprint;
        let mut st = self.lock();
        let mut joined = false;

        loop {
            if let Some(flight) = st.in_flight.get(&fp).cloned() {
                tracing::debug!(scene = req.scene_id, %fp, "waiting for concurrent render");
                st = self
                    .cond
                    .wait_while(st, |_| flight.outcome.get().is_none())
                    .unwrap_or_else(PoisonError::into_inner);
                match flight.outcome.get() {
                    Some(FlightOutcome::Failed(f)) => return Err(f.to_error(req.scene_id)),
                    Some(FlightOutcome::Uncached(path)) => {
                        return Ok(CachedArtifact {
                            path: path.clone(),
                            fingerprint: fp,
                            source: ArtifactSource::Uncached,
                            pin: None,
                        });
                    }
                    Some(FlightOutcome::Stored) | None => {
                        joined = true;
                        continue;
                    }
                }
            }

            if (!req.force || joined)
                && let Some(artifact) = self.try_hit(&mut st, req)
            {
                return Ok(artifact);
            }
            break;
        }

        let flight = Arc::new(Flight::default());
        st.in_flight.insert(fp, Arc::clone(&flight));
        drop(st);

        let mut guard = FlightGuard {
            store: self,
            fp,
            flight: flight.as_ref(),
            done: false,
        };
        tracing::info!(scene = req.scene_id, %fp, "rendering scene");
        let rendered = self.render_entry(req, render);

        let mut st = self.lock();
        let result = match rendered {
            Ok(partial) => self.commit(&mut st, req, &partial),
            Err(e) => Err(e),
        };
        let outcome = match &result {
            Ok(a) if a.source == ArtifactSource::Uncached => FlightOutcome::Uncached(a.path.clone()),
            Ok(_) => FlightOutcome::Stored,
            Err(e) => FlightOutcome::Failed(Failure::of(e)),
        };
        guard.finish(&mut st, outcome);
        result
    }

    /// Remove every entry. Waits for in-flight renders to finish first.
    pub fn clean(&self) -> WeaveResult<CleanReport> {
        let st = self.lock();
        let mut st = self
            .cond
            .wait_while(st, |s| !s.in_flight.is_empty())
            .unwrap_or_else(PoisonError::into_inner);

        let report = CleanReport {
            entries: st.entries.len(),
            bytes: st.total_bytes,
        };
        let pinned = st.pins.len();
        if pinned > 0 {
            tracing::warn!(pinned, "cleaning cache while artifacts are still in use");
        }
        for dir in read_dirs(&self.root)? {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("remove cache directory '{}'", dir.display()))?;
        }
        st.entries.clear();
        st.total_bytes = 0;
        st.scene_bytes.clear();
        tracing::info!(entries = report.entries, bytes = report.bytes, "cleaned cache");
        Ok(report)
    }

    /// Recount size totals from entries and disk, repairing any drift.
    pub fn verify(&self) -> VerifyReport {
        let mut st = self.lock();
        let mut report = VerifyReport::default();

        let fps: Vec<Fingerprint> = st.entries.iter().map(|(fp, _)| *fp).collect();
        for fp in fps {
            let Some(e) = st.entries.peek(&fp) else {
                continue;
            };
            let recorded = e.size_bytes;
            let path = self.entry_dir(&e.scene_id, fp).join(&e.artifact);
            match std::fs::metadata(&path) {
                Ok(m) if m.len() == recorded => {}
                Ok(m) => {
                    report.drift = true;
                    let len = m.len();
                    if let Some(e) = st.entries.peek_mut(&fp) {
                        e.size_bytes = len;
                    }
                }
                Err(_) => {
                    report.drift = true;
                    report.dropped += 1;
                    st.entries.pop(&fp);
                }
            }
        }

        let total: u64 = st.entries.iter().map(|(_, e)| e.size_bytes).sum();
        let mut per_scene: HashMap<String, u64> = HashMap::new();
        for (_, e) in st.entries.iter() {
            *per_scene.entry(e.scene_id.clone()).or_default() += e.size_bytes;
        }
        if total != st.total_bytes || per_scene != st.scene_bytes {
            report.drift = true;
        }
        if report.drift {
            let err = WeaveError::CacheInconsistency(format!(
                "recorded {} bytes, recounted {total} bytes",
                st.total_bytes
            ));
            tracing::warn!(error = %err, dropped = report.dropped, "repaired cache accounting");
        }
        st.total_bytes = total;
        st.scene_bytes = per_scene;
        report.entries = st.entries.len();
        report
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry_dir(&self, scene_id: &str, fp: Fingerprint) -> PathBuf {
        self.root.join(sanitize(scene_id)).join(fp.to_string())
    }

    fn try_hit(&self, st: &mut StoreState, req: &CacheRequest<'_>) -> Option<CachedArtifact<'_>> {
        let fp = req.fingerprint;
        let e = st.entries.peek(&fp)?;
        let path = self.entry_dir(&e.scene_id, fp).join(&e.artifact);
        if !path.is_file() {
            let err = WeaveError::CacheInconsistency(format!(
                "artifact '{}' vanished; dropping entry",
                path.display()
            ));
            tracing::warn!(scene = req.scene_id, error = %err, "stale cache entry");
            st.remove(fp);
            return None;
        }

        let seq = st.tick();
        let updated = st.entries.get_mut(&fp).map(|e| {
            e.use_seq = seq;
            e.last_used_at = now_ms();
            e.max_size = req.max_size;
            e.clone()
        })?;
        self.persist(&updated);
        st.pin(fp);
        tracing::info!(scene = req.scene_id, %fp, "cache hit");
        self.evict_scene(st, req.scene_id, req.max_size);
        Some(CachedArtifact {
            path,
            fingerprint: fp,
            source: ArtifactSource::Hit,
            pin: Some(self),
        })
    }

    /// Render into the partial file of the entry directory. Runs without the lock.
    fn render_entry<F>(&self, req: &CacheRequest<'_>, render: F) -> WeaveResult<PathBuf>
    where
        F: FnOnce(&Path) -> WeaveResult<()>,
    {
        let dir = self.entry_dir(req.scene_id, req.fingerprint);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create cache entry directory '{}'", dir.display()))?;
        let partial = dir.join(PARTIAL_FILE);
        remove_path(&partial);

        if let Err(e) = render(&partial) {
            remove_path(&partial);
            remove_empty_dir(&dir);
            return Err(e);
        }
        if !partial.is_file() {
            remove_empty_dir(&dir);
            return Err(WeaveError::render(
                req.scene_id,
                "backend reported success but produced no artifact",
            ));
        }
        Ok(partial)
    }

    fn commit(
        &self,
        st: &mut StoreState,
        req: &CacheRequest<'_>,
        partial: &Path,
    ) -> WeaveResult<CachedArtifact<'_>> {
        let fp = req.fingerprint;
        let dir = self.entry_dir(req.scene_id, fp);
        let size = std::fs::metadata(partial)
            .with_context(|| format!("stat rendered artifact '{}'", partial.display()))?
            .len();

        let over_scene = req.max_size.is_some_and(|cap| size > cap.0);
        let over_global = self.global_cap.is_some_and(|cap| size > cap.0);
        if over_scene || over_global {
            if st.remove(fp).is_some() {
                remove_path(&dir.join(ARTIFACT_FILE));
                remove_path(&dir.join(ENTRY_FILE));
            }
            let scratch = self.root.join(SCRATCH_DIR);
            std::fs::create_dir_all(&scratch)
                .with_context(|| format!("create scratch directory '{}'", scratch.display()))?;
            let path = scratch.join(format!("{}-{fp}.mp4", sanitize(req.scene_id)));
            std::fs::rename(partial, &path)
                .with_context(|| format!("move oversized artifact to '{}'", path.display()))?;
            remove_empty_dir(&dir);
            tracing::warn!(
                scene = req.scene_id,
                size = %ByteSize(size),
                "artifact exceeds its cache cap; not cached"
            );
            return Ok(CachedArtifact {
                path,
                fingerprint: fp,
                source: ArtifactSource::Uncached,
                pin: None,
            });
        }

        let artifact = dir.join(ARTIFACT_FILE);
        std::fs::rename(partial, &artifact)
            .with_context(|| format!("commit artifact '{}'", artifact.display()))?;
        let now = now_ms();
        let entry = CacheEntry {
            fingerprint: fp,
            scene_id: req.scene_id.to_owned(),
            artifact: ARTIFACT_FILE.to_string(),
            size_bytes: size,
            created_at: now,
            last_used_at: now,
            use_seq: st.tick(),
            max_size: req.max_size,
        };
        self.persist(&entry);
        st.insert(entry);
        st.pin(fp);

        self.evict_scene(st, req.scene_id, req.max_size);
        self.evict_global(st);
        Ok(CachedArtifact {
            path: artifact,
            fingerprint: fp,
            source: ArtifactSource::Rendered,
            pin: Some(self),
        })
    }

    fn persist(&self, entry: &CacheEntry) {
        let dir = self.entry_dir(&entry.scene_id, entry.fingerprint);
        let tmp = dir.join(format!("{ENTRY_FILE}.tmp"));
        let res = serde_json::to_vec_pretty(entry)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| std::fs::write(&tmp, bytes).map_err(anyhow::Error::from))
            .and_then(|()| std::fs::rename(&tmp, dir.join(ENTRY_FILE)).map_err(anyhow::Error::from));
        if let Err(e) = res {
            tracing::warn!(scene = %entry.scene_id, error = %e, "failed to persist cache entry");
        }
    }

    fn evict_scene(&self, st: &mut StoreState, scene_id: &str, cap: Option<ByteSize>) {
        let Some(cap) = cap else {
            return;
        };
        let used = |st: &StoreState| st.scene_bytes.get(scene_id).copied().unwrap_or(0);
        self.evict_lru(st, cap, used, |e| e.scene_id == scene_id, scene_id);
    }

    fn evict_global(&self, st: &mut StoreState) {
        let Some(cap) = self.global_cap else {
            return;
        };
        self.evict_lru(st, cap, |st| st.total_bytes, |_| true, "*");
    }

    fn evict_lru(
        &self,
        st: &mut StoreState,
        cap: ByteSize,
        used: impl Fn(&StoreState) -> u64,
        governed: impl Fn(&CacheEntry) -> bool,
        scope: &str,
    ) {
        if used(st) <= cap.0 {
            return;
        }
        let candidates: Vec<Fingerprint> = st
            .entries
            .iter()
            .rev()
            .filter(|&(fp, e)| governed(e) && st.evictable(fp))
            .map(|(fp, _)| *fp)
            .collect();

        for fp in candidates {
            if used(st) <= cap.0 {
                break;
            }
            if let Some(e) = st.remove(fp) {
                remove_path(&self.entry_dir(&e.scene_id, fp));
                tracing::info!(scene = %e.scene_id, %fp, size = %ByteSize(e.size_bytes), "evicted");
            }
        }
        if used(st) > cap.0 {
            tracing::warn!(
                scope,
                used = %ByteSize(used(st)),
                cap = %cap,
                "cache cap exceeded by entries in use"
            );
        }
    }

    /// Release one pin. Once nothing holds the entry, caps it was exempt from apply again.
    fn unpin(&self, fp: Fingerprint) {
        let mut st = self.lock();
        let Some(n) = st.pins.get_mut(&fp) else {
            return;
        };
        *n -= 1;
        if *n > 0 {
            return;
        }
        st.pins.remove(&fp);
        let scope = st
            .entries
            .peek(&fp)
            .map(|e| (e.scene_id.clone(), e.max_size));
        if let Some((scene_id, cap)) = scope {
            self.evict_scene(&mut st, &scene_id, cap);
        }
        self.evict_global(&mut st);
    }
}

/// Publishes the outcome of a render exactly once, even if the render panics.
struct FlightGuard<'a> {
    store: &'a CacheStore,
    fp: Fingerprint,
    flight: &'a Flight,
    done: bool,
}

impl FlightGuard<'_> {
    fn finish(&mut self, st: &mut StoreState, outcome: FlightOutcome) {
        let _ = self.flight.outcome.set(outcome);
        st.in_flight.remove(&self.fp);
        self.done = true;
        self.store.cond.notify_all();
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut st = self.store.lock();
        let _ = self
            .flight
            .outcome
            .set(FlightOutcome::Failed(Failure::Render("render aborted".to_string())));
        st.in_flight.remove(&self.fp);
        self.store.cond.notify_all();
    }
}

fn load_entry(dir: &Path) -> Option<CacheEntry> {
    let bytes = std::fs::read(dir.join(ENTRY_FILE)).ok()?;
    let mut entry: CacheEntry = serde_json::from_slice(&bytes).ok()?;
    if file_name(dir) != entry.fingerprint.to_string() {
        return None;
    }
    let meta = std::fs::metadata(dir.join(&entry.artifact)).ok()?;
    if !meta.is_file() {
        return None;
    }
    entry.size_bytes = meta.len();
    Some(entry)
}

fn read_dirs(dir: &Path) -> WeaveResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    let rd = std::fs::read_dir(dir).with_context(|| format!("read '{}'", dir.display()))?;
    for ent in rd {
        let ent = ent.with_context(|| format!("read '{}'", dir.display()))?;
        if ent.file_type().is_ok_and(|t| t.is_dir()) {
            out.push(ent.path());
        }
    }
    out.sort();
    Ok(out)
}

fn file_name(p: &Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn remove_path(p: &Path) {
    let res = if p.is_dir() {
        std::fs::remove_dir_all(p)
    } else {
        std::fs::remove_file(p)
    };
    if let Err(e) = res
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(path = %p.display(), error = %e, "failed to remove cache file");
    }
}

/// Remove `dir` if it is empty. Empty scene directories are pruned by [`CacheStore::open`].
fn remove_empty_dir(dir: &Path) {
    let _ = std::fs::remove_dir(dir);
}

/// Directory name for a scene id.
pub(crate) fn sanitize(scene_id: &str) -> String {
    let s: String = scene_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if s.is_empty() || s.starts_with('.') {
        format!("_{s}")
    } else {
        s
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "../../tests/unit/cache/store.rs"]
mod tests;
