//! Template lookup.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::foundation::error::{KeyPath, WeaveError, WeaveResult};
use crate::spec::value::{expect_map, parse_yaml, type_name};
use serde_json::{Map, Value};

/// File name of a template definition inside its directory.
pub const TEMPLATE_FILE: &str = "template.yaml";

/// Declared template parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamDef {
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

/// A parsed template: declared parameters plus a body of one or more scene mappings.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateDef {
    pub name: String,
    pub description: Option<String>,
    pub params: BTreeMap<String, ParamDef>,
    pub scenes: Vec<Map<String, Value>>,
    /// Directory relative asset paths inside the template resolve against.
    pub base_dir: PathBuf,
}

impl TemplateDef {
    pub fn parse(name: &str, text: &str, base_dir: PathBuf) -> WeaveResult<Self> {
        let doc = parse_yaml(text).map_err(|e| match e {
            WeaveError::Configuration { message, .. } => WeaveError::config(
                KeyPath::root(),
                format!("template '{name}': {message}"),
            ),
            other => other,
        })?;
        Self::from_value(name, &doc, base_dir)
    }

    /// Accepts `{description?, params?, scenes}`, a bare list of scenes, or a single scene mapping.
    pub fn from_value(name: &str, doc: &Value, base_dir: PathBuf) -> WeaveResult<Self> {
        let root = KeyPath::root();
        let ctx = |e: WeaveError| match e {
            WeaveError::Configuration { path, message, .. } => WeaveError::config(
                path,
                format!("in template '{name}': {message}"),
            ),
            other => other,
        };

        let (description, params, scenes_v) = match doc {
            Value::Array(_) => (None, BTreeMap::new(), doc.clone()),
            Value::Object(m) if m.contains_key("scenes") => {
                let description = m
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_owned);
                let params = match m.get("params") {
                    None | Some(Value::Null) => BTreeMap::new(),
                    Some(v) => parse_params(v, &root.field("params")).map_err(ctx)?,
                };
                (description, params, m["scenes"].clone())
            }
            Value::Object(_) => (None, BTreeMap::new(), Value::Array(vec![doc.clone()])),
            Value::Null => (None, BTreeMap::new(), Value::Array(Vec::new())),
            other => {
                return Err(ctx(WeaveError::config(
                    root,
                    format!("expected a mapping or list, found {}", type_name(other)),
                )));
            }
        };

        let scenes_path = root.field("scenes");
        let scenes = match &scenes_v {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| expect_map(v, &scenes_path.index(i)).cloned())
                .collect::<WeaveResult<Vec<_>>>()
                .map_err(ctx)?,
            Value::Object(m) => vec![m.clone()],
            Value::Null => Vec::new(),
            other => {
                return Err(ctx(WeaveError::config(
                    scenes_path,
                    format!("expected a list of scenes, found {}", type_name(other)),
                )));
            }
        };

        Ok(Self {
            name: name.to_owned(),
            description,
            params,
            scenes,
            base_dir,
        })
    }
}

fn parse_params(v: &Value, path: &KeyPath) -> WeaveResult<BTreeMap<String, ParamDef>> {
    let mut out = BTreeMap::new();
    for (name, decl) in expect_map(v, path)? {
        let p = path.field(name);
        let def = match decl {
            Value::Null => ParamDef::default(),
            Value::Object(m) => ParamDef {
                required: match m.get("required") {
                    None | Some(Value::Null) => false,
                    Some(Value::Bool(b)) => *b,
                    Some(other) => {
                        return Err(WeaveError::config(
                            p.field("required"),
                            format!("expected a boolean, found {}", type_name(other)),
                        ));
                    }
                },
                default: m.get("default").filter(|v| !v.is_null()).cloned(),
                description: m
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            },
            other => {
                return Err(WeaveError::config(
                    p,
                    format!("expected a parameter mapping, found {}", type_name(other)),
                ));
            }
        };
        out.insert(name.clone(), def);
    }
    Ok(out)
}

/// Read-only name to template lookup.
pub trait TemplateRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> WeaveResult<Arc<TemplateDef>>;

    /// Sorted names of every available template.
    fn names(&self) -> Vec<String>;
}

fn validate_name(name: &str) -> WeaveResult<()> {
    let ok = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\');
    if !ok {
        return Err(WeaveError::config(
            KeyPath::root(),
            format!("invalid template name '{name}': must be a single path component"),
        ));
    }
    Ok(())
}

/// Templates stored as `<root>/<name>/template.yaml`, searched across ordered roots.
#[derive(Debug, Clone)]
pub struct DirTemplateRegistry {
    roots: Vec<PathBuf>,
}

impl DirTemplateRegistry {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// User template directory first, then the templates shipped with the crate.
    pub fn with_default_roots() -> Self {
        let mut roots = Vec::new();
        if let Some(dir) = user_template_dir() {
            roots.push(dir);
        }
        roots.push(builtin_template_dir());
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn find(&self, name: &str) -> Option<PathBuf> {
        self.roots
            .iter()
            .map(|r| r.join(name))
            .find(|d| d.join(TEMPLATE_FILE).is_file())
    }
}

/// Per-user template directory (`<data dir>/sceneweave/templates`).
pub fn user_template_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "sceneweave").map(|d| d.data_dir().join("templates"))
}

pub fn builtin_template_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("templates")
}

impl TemplateRegistry for DirTemplateRegistry {
    fn lookup(&self, name: &str) -> WeaveResult<Arc<TemplateDef>> {
        validate_name(name)?;
        let dir = self.find(name).ok_or_else(|| {
            let searched = self
                .roots
                .iter()
                .map(|r| r.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            WeaveError::config(
                KeyPath::root(),
                format!("unknown template '{name}' (searched: {searched})"),
            )
        })?;
        let file = dir.join(TEMPLATE_FILE);
        let text = std::fs::read_to_string(&file).map_err(|e| {
            WeaveError::resource(None, format!("cannot read '{}': {e}", file.display()))
        })?;
        tracing::debug!(template = name, dir = %dir.display(), "loaded template");
        Ok(Arc::new(TemplateDef::parse(name, &text, dir)?))
    }

    fn names(&self) -> Vec<String> {
        let mut names = BTreeSet::new();
        for root in &self.roots {
            let Ok(entries) = std::fs::read_dir(root) else {
                continue;
            };
            for entry in entries.flatten() {
                if entry.path().join(TEMPLATE_FILE).is_file()
                    && let Some(n) = entry.file_name().to_str()
                {
                    names.insert(n.to_owned());
                }
            }
        }
        names.into_iter().collect()
    }
}

/// In-memory registry.
#[derive(Debug, Clone, Default)]
pub struct StaticTemplateRegistry {
    templates: BTreeMap<String, Arc<TemplateDef>>,
}

impl StaticTemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, def: TemplateDef) {
        self.templates.insert(def.name.clone(), Arc::new(def));
    }

    pub fn with(mut self, def: TemplateDef) -> Self {
        self.insert(def);
        self
    }
}

impl TemplateRegistry for StaticTemplateRegistry {
    fn lookup(&self, name: &str) -> WeaveResult<Arc<TemplateDef>> {
        validate_name(name)?;
        self.templates.get(name).cloned().ok_or_else(|| {
            WeaveError::config(KeyPath::root(), format!("unknown template '{name}'"))
        })
    }

    fn names(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/resolve/registry.rs"]
mod tests;
