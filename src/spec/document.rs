use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::assets::expand_tilde;
use crate::foundation::core::Fps;
use crate::foundation::error::{KeyPath, WeaveError, WeaveResult};
use crate::foundation::size::ByteSize;
use crate::spec::value::{decode, expect_map, null_as_default, parse_yaml, type_name};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Global render settings shared (read-only) by every scene.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub width: u32,
    pub height: u32,
    pub fps: Fps,
    pub output_file: String,
    #[serde(default)]
    pub font: Option<String>,
    #[serde(default)]
    pub audio_recording_path: Option<String>,
    #[serde(default)]
    pub normalization: Option<Normalization>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub scene_defaults: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cache: CacheSettings,
}

fn default_loudness() -> f64 {
    -16.0
}

fn default_true_peak() -> f64 {
    -1.5
}

/// Loudness normalization target applied to scene audio.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Normalization {
    /// Integrated loudness target in LUFS.
    #[serde(default = "default_loudness")]
    pub loudness: f64,
    /// Maximum true peak in dBTP.
    #[serde(default = "default_true_peak")]
    pub true_peak: f64,
}

impl Default for Normalization {
    fn default() -> Self {
        Self {
            loudness: default_loudness(),
            true_peak: default_true_peak(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CacheSettings {
    /// Global cap over every cached artifact.
    #[serde(default, rename = "max-size", alias = "max_size")]
    pub max_size: Option<ByteSize>,
    /// Cache root; relative paths are resolved against the spec directory.
    #[serde(default)]
    pub dir: Option<String>,
}

/// Invocation of a named template in the scene list.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateInvocation {
    pub id: Option<String>,
    pub name: String,
    pub with: Map<String, Value>,
    /// Keys other than `type`, `name`, `with`; applied on top of the first expanded scene.
    pub overrides: Map<String, Value>,
}

impl TemplateInvocation {
    pub(crate) fn from_body(body: &Map<String, Value>, path: &KeyPath) -> WeaveResult<Self> {
        let id = match body.get("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(other) => {
                return Err(WeaveError::config(
                    path.field("id"),
                    format!("id must be a non-empty string, found {}", type_name(other)),
                ));
            }
        };
        let name = body
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                WeaveError::config(
                    path.field("name"),
                    "template scene requires a string 'name'",
                )
            })?
            .to_owned();
        let with = match body.get("with") {
            None | Some(Value::Null) => Map::new(),
            Some(v) => expect_map(v, &path.field("with"))?.clone(),
        };
        let overrides = body
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "type" | "name" | "with"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self {
            id,
            name,
            with,
            overrides,
        })
    }
}

/// One authored entry of the `scenes` list.
#[derive(Debug, Clone, PartialEq)]
pub enum RawScene {
    /// A concrete scene; `body` is the mapping exactly as written.
    Scene { id: String, body: Map<String, Value> },
    Template(TemplateInvocation),
}

impl RawScene {
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Scene { id, .. } => Some(id),
            Self::Template(t) => t.id.as_deref(),
        }
    }
}

/// A loaded specification document. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Specification {
    pub settings: Settings,
    pub scenes: Vec<RawScene>,
    /// Directory relative paths in the document resolve against.
    pub base_dir: PathBuf,
    /// File the document was read from, when loaded from disk.
    pub source: Option<PathBuf>,
}

impl Specification {
    pub fn from_path(path: &Path) -> WeaveResult<Self> {
        use anyhow::Context as _;

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read spec '{}'", path.display()))
            .map_err(|e| WeaveError::resource(None, format!("{e:#}")))?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut spec = Self::from_yaml_str(&text, base_dir)?;
        spec.source = Some(path.to_path_buf());
        Ok(spec)
    }

    pub fn from_yaml_str(text: &str, base_dir: impl Into<PathBuf>) -> WeaveResult<Self> {
        let doc = parse_yaml(text)?;
        Self::from_value(&doc, base_dir.into())
    }

    pub fn from_value(doc: &Value, base_dir: PathBuf) -> WeaveResult<Self> {
        let root = KeyPath::root();
        let doc = expect_map(doc, &root)?;

        let settings_path = root.field("settings");
        let settings_v = doc.get("settings").ok_or_else(|| {
            WeaveError::config(settings_path.clone(), "missing required 'settings' block")
        })?;
        expect_map(settings_v, &settings_path)?;
        let settings: Settings = decode(settings_v, &settings_path)?;
        validate_settings(&settings, &settings_path)?;

        let scenes_path = root.field("scenes");
        let scenes_v = match doc.get("scenes") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(WeaveError::config(
                    scenes_path,
                    format!("expected a list of scenes, found {}", type_name(other)),
                ));
            }
            None => {
                return Err(WeaveError::config(scenes_path, "missing required 'scenes' list"));
            }
        };
        if scenes_v.is_empty() {
            return Err(WeaveError::config(
                scenes_path,
                "specification must have at least one scene",
            ));
        }

        let mut scenes = Vec::with_capacity(scenes_v.len());
        let mut seen = BTreeSet::new();
        for (i, item) in scenes_v.iter().enumerate() {
            let path = scenes_path.index(i);
            let body = expect_map(item, &path)?;
            let raw = if body.get("type").and_then(Value::as_str) == Some("template") {
                RawScene::Template(TemplateInvocation::from_body(body, &path)?)
            } else {
                let id = match body.get("id") {
                    Some(Value::String(s)) if !s.is_empty() => s.clone(),
                    _ => {
                        return Err(WeaveError::config(
                            path.field("id"),
                            "scene requires a non-empty string 'id'",
                        ));
                    }
                };
                RawScene::Scene {
                    id,
                    body: body.clone(),
                }
            };
            if let Some(id) = raw.id()
                && !seen.insert(id.to_owned())
            {
                return Err(WeaveError::scene_config(
                    id,
                    path.field("id"),
                    format!("duplicate scene id '{id}'; scene ids must be unique"),
                ));
            }
            scenes.push(raw);
        }

        Ok(Self {
            settings,
            scenes,
            base_dir,
            source: None,
        })
    }

    /// Absolute-or-relative path of the assembled output file.
    pub fn output_path(&self) -> PathBuf {
        let p = expand_tilde(&self.settings.output_file);
        if p.is_absolute() {
            p
        } else {
            self.base_dir.join(p)
        }
    }

    /// Cache root configured in `settings.cache.dir`, resolved against the spec directory.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        let dir = self.settings.cache.dir.as_deref()?;
        let p = expand_tilde(dir);
        Some(if p.is_absolute() {
            p
        } else {
            self.base_dir.join(p)
        })
    }
}

fn validate_settings(s: &Settings, path: &KeyPath) -> WeaveResult<()> {
    if s.width == 0 || s.height == 0 {
        return Err(WeaveError::config(
            path.field(if s.width == 0 { "width" } else { "height" }),
            "width and height must be > 0",
        ));
    }
    if s.output_file.trim().is_empty() {
        return Err(WeaveError::config(
            path.field("output_file"),
            "output_file must be non-empty",
        ));
    }
    if s.scene_defaults.contains_key("id") {
        return Err(WeaveError::config(
            path.field("scene_defaults").field("id"),
            "scene_defaults must not define 'id'",
        ));
    }
    if let Some(n) = s.normalization
        && (!n.loudness.is_finite() || !n.true_peak.is_finite())
    {
        return Err(WeaveError::config(
            path.field("normalization"),
            "normalization targets must be finite numbers",
        ));
    }
    Ok(())
}

/// `generate` target: a spec path with an optional `:<scene id>` scope suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecTarget {
    pub path: PathBuf,
    pub scope: Option<String>,
}

impl SpecTarget {
    pub fn parse(arg: &str) -> Self {
        if let Some((path, scope)) = arg.rsplit_once(':') {
            // `C:\x.yaml` style drive prefixes and scopes containing separators are not scopes.
            let is_drive = path.len() == 1;
            let has_sep = scope.contains('/') || scope.contains('\\');
            if !is_drive && !has_sep && !path.is_empty() && !scope.is_empty() {
                return Self {
                    path: PathBuf::from(path),
                    scope: Some(scope.to_owned()),
                };
            }
        }
        Self {
            path: PathBuf::from(arg),
            scope: None,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/spec/document.rs"]
mod tests;
