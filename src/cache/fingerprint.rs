use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::assets::ContentIndex;
use crate::foundation::error::{WeaveError, WeaveResult};
use crate::resolve::scene::ResolvedScene;
use crate::spec::document::Settings;
use serde_json::Value;
use xxhash_rust::xxh3::Xxh3;

const XXH3_SEED: u64 = 0x8b5a_d4a0_c7d8_e9f1;

/// Bumped whenever the hashed layout changes, invalidating every cached artifact.
const FINGERPRINT_VERSION: u32 = 1;

/// Parameter keys that never affect a scene's own pixels.
///
/// `transition` belongs to the timeline (a neighbor's change must not invalidate this scene) and
/// `cache` only steers storage.
const EXCLUDED_KEYS: [&str; 2] = ["transition", "cache"];

/// Stable 128-bit content fingerprint of a resolved scene.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    pub hi: u64,
    pub lo: u64,
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.hi, self.lo)
    }
}

impl FromStr for Fingerprint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("invalid fingerprint '{s}'"));
        }
        let hi = u64::from_str_radix(&s[..16], 16).map_err(|e| e.to_string())?;
        let lo = u64::from_str_radix(&s[16..], 16).map_err(|e| e.to_string())?;
        Ok(Self { hi, lo })
    }
}

impl serde::Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Fingerprint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Compute the fingerprint of `scene`.
///
/// Covers the pixel-relevant settings subset (size, fps, font, normalization), the scene kind,
/// its merged parameters, its resolved length, and the content identity of every referenced file.
/// `output_file` and `audio_recording_path` are not part of it.
pub fn fingerprint_scene(
    scene: &ResolvedScene,
    settings: &Settings,
    font_file: Option<&Path>,
    content: &ContentIndex,
) -> WeaveResult<Fingerprint> {
    let mut h = StableHasher::new();
    h.write_u32(FINGERPRINT_VERSION);

    h.write_u32(settings.width);
    h.write_u32(settings.height);
    h.write_u32(settings.fps.get());
    write_opt_str(&mut h, settings.font.as_deref());
    match font_file {
        Some(p) => {
            h.write_u8(1);
            write_content(&mut h, content, p, &scene.id)?;
        }
        None => h.write_u8(0),
    }
    match settings.normalization {
        Some(n) => {
            h.write_u8(1);
            h.write_f64(n.loudness);
            h.write_f64(n.true_peak);
        }
        None => h.write_u8(0),
    }

    h.write_str(scene.kind().tag());
    let params: Vec<(&String, &Value)> = scene
        .params
        .iter()
        .filter(|(k, _)| !EXCLUDED_KEYS.contains(&k.as_str()))
        .collect();
    h.write_u64(params.len() as u64);
    for (k, v) in params {
        h.write_str(k);
        write_json_value(&mut h, v);
    }
    h.write_u64(scene.duration_frames);

    let refs = scene.assets.refs();
    h.write_u64(refs.len() as u64);
    for (role, path) in refs {
        h.write_str(&role);
        write_content(&mut h, content, path, &scene.id)?;
    }

    Ok(h.finish())
}

fn write_content(
    h: &mut StableHasher,
    content: &ContentIndex,
    path: &Path,
    scene_id: &str,
) -> WeaveResult<()> {
    let id = content.get(path).ok_or_else(|| {
        WeaveError::resource(
            Some(scene_id),
            format!("no content identity for '{}'", path.display()),
        )
    })?;
    h.write_u64(id.hi);
    h.write_u64(id.lo);
    h.write_u64(id.len);
    Ok(())
}

fn write_opt_str(h: &mut StableHasher, s: Option<&str>) {
    match s {
        Some(s) => {
            h.write_u8(1);
            h.write_str(s);
        }
        None => h.write_u8(0),
    }
}

fn write_json_value(h: &mut StableHasher, v: &Value) {
    match v {
        Value::Null => h.write_u8(0),
        Value::Bool(x) => {
            h.write_u8(1);
            h.write_u8(u8::from(*x));
        }
        Value::Number(n) => {
            h.write_u8(2);
            h.write_str(&n.to_string());
        }
        Value::String(s) => {
            h.write_u8(3);
            h.write_str(s);
        }
        Value::Array(items) => {
            h.write_u8(4);
            h.write_u64(items.len() as u64);
            for item in items {
                write_json_value(h, item);
            }
        }
        Value::Object(map) => {
            h.write_u8(5);
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort_unstable();
            h.write_u64(keys.len() as u64);
            for k in keys {
                h.write_str(k);
                write_json_value(h, &map[k]);
            }
        }
    }
}

struct StableHasher {
    inner: Xxh3,
}

impl StableHasher {
    fn new() -> Self {
        Self {
            inner: Xxh3::with_seed(XXH3_SEED),
        }
    }

    fn write_bytes(&mut self, b: &[u8]) {
        self.inner.update(b);
    }

    fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    fn write_str(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.write_bytes(s.as_bytes());
    }

    fn finish(self) -> Fingerprint {
        let v = self.inner.digest128();
        Fingerprint {
            hi: (v >> 64) as u64,
            lo: v as u64,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/fingerprint.rs"]
mod tests;
