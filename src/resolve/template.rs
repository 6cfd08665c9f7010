//! Template expansion and defaults application.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::foundation::error::{KeyPath, WeaveError, WeaveResult};
use crate::resolve::defaults::{merge, merge_layers};
use crate::resolve::registry::TemplateRegistry;
use crate::resolve::scene::{ExpandedScene, Origin};
use crate::resolve::substitute::{TextRenderer, substitute};
use crate::spec::document::{RawScene, Specification, TemplateInvocation};
use crate::spec::value::expect_map;
use serde_json::{Map, Value};

/// Maximum nesting of template invocations.
pub const MAX_TEMPLATE_DEPTH: usize = 8;

/// One scene produced by an invocation before defaults are applied.
#[derive(Debug, Clone)]
struct Piece {
    id: String,
    /// Body layers, lowest precedence first.
    layers: Vec<Map<String, Value>>,
    base_dir: PathBuf,
    path: KeyPath,
}

/// Expands template invocations and merges `scene_defaults` into every scene.
pub struct Expander<'a> {
    registry: &'a dyn TemplateRegistry,
    renderer: &'a dyn TextRenderer,
    defaults: &'a Map<String, Value>,
    base_vars: Map<String, Value>,
}

impl<'a> Expander<'a> {
    pub fn new(
        registry: &'a dyn TemplateRegistry,
        renderer: &'a dyn TextRenderer,
        defaults: &'a Map<String, Value>,
        font: Option<&str>,
    ) -> Self {
        let mut base_vars = Map::new();
        if let Some(f) = font {
            base_vars.insert("font".to_string(), Value::String(f.to_owned()));
        }
        Self {
            registry,
            renderer,
            defaults,
            base_vars,
        }
    }

    /// Expand every scene of `spec` in order.
    ///
    /// Fails on the first configuration error; no partial list is returned.
    pub fn expand_spec(&self, spec: &Specification) -> WeaveResult<Vec<ExpandedScene>> {
        let scenes_path = KeyPath::root().field("scenes");
        let mut out = Vec::new();
        let mut seen: BTreeMap<String, KeyPath> = BTreeMap::new();

        for (i, raw) in spec.scenes.iter().enumerate() {
            let path = scenes_path.index(i);
            let produced = match raw {
                RawScene::Scene { id, body } => vec![ExpandedScene {
                    id: id.clone(),
                    origin: None,
                    body: merge(self.defaults, body),
                    base_dir: spec.base_dir.clone(),
                    path,
                    transition_inherited: !body.contains_key("transition"),
                }],
                RawScene::Template(inv) => self.expand(inv, &path)?,
            };

            for scene in produced {
                if let Some(first) = seen.get(&scene.id) {
                    return Err(WeaveError::scene_config(
                        &scene.id,
                        scene.path.clone(),
                        format!("duplicate scene id '{}' (first defined at {first})", scene.id),
                    ));
                }
                seen.insert(scene.id.clone(), scene.path.clone());
                out.push(scene);
            }
        }
        Ok(out)
    }

    /// Expand a single top-level invocation into merged scenes.
    pub fn expand(
        &self,
        inv: &TemplateInvocation,
        path: &KeyPath,
    ) -> WeaveResult<Vec<ExpandedScene>> {
        let mut stack = Vec::new();
        let pieces = self.expand_invocation(inv, &mut stack, path)?;
        if pieces.is_empty() {
            tracing::warn!(template = %inv.name, at = %path, "template produced no scenes");
        }

        let origin = Origin {
            invocation: inv.id.clone().unwrap_or_else(|| inv.name.clone()),
            template: inv.name.clone(),
        };
        Ok(pieces
            .into_iter()
            .map(|p| {
                let mut body = merge_layers(std::iter::once(self.defaults).chain(p.layers.iter()));
                body.insert("id".to_string(), Value::String(p.id.clone()));
                ExpandedScene {
                    id: p.id,
                    origin: Some(origin.clone()),
                    body,
                    base_dir: p.base_dir,
                    path: p.path,
                    transition_inherited: !p.layers.iter().any(|l| l.contains_key("transition")),
                }
            })
            .collect())
    }

    fn expand_invocation(
        &self,
        inv: &TemplateInvocation,
        stack: &mut Vec<String>,
        path: &KeyPath,
    ) -> WeaveResult<Vec<Piece>> {
        if stack.iter().any(|n| n == &inv.name) {
            let mut chain = stack.clone();
            chain.push(inv.name.clone());
            return Err(WeaveError::TemplateRecursion { chain });
        }
        if stack.len() >= MAX_TEMPLATE_DEPTH {
            return Err(WeaveError::config(
                path.clone(),
                format!(
                    "template nesting exceeds the maximum depth of {MAX_TEMPLATE_DEPTH} ({} -> {})",
                    stack.join(" -> "),
                    inv.name
                ),
            ));
        }

        let def = self
            .registry
            .lookup(&inv.name)
            .map_err(|e| e.at_path(&path.field("name")))?;

        let missing: Vec<String> = def
            .params
            .iter()
            .filter(|(name, p)| p.required && inv.with.get(*name).is_none_or(Value::is_null))
            .map(|(name, _)| name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(WeaveError::MissingTemplateParams {
                template: inv.name.clone(),
                missing,
            });
        }
        if !def.params.is_empty() {
            for key in inv.with.keys().filter(|k| !def.params.contains_key(*k)) {
                tracing::warn!(template = %inv.name, param = %key, "unknown template parameter");
            }
        }

        let mut vars = self.base_vars.clone();
        for (name, p) in &def.params {
            if let Some(d) = &p.default {
                vars.insert(name.clone(), d.clone());
            }
        }
        for (k, v) in &inv.with {
            vars.insert(k.clone(), v.clone());
        }

        stack.push(inv.name.clone());
        let prefix = inv.id.clone().unwrap_or_else(|| inv.name.clone());
        let mut pieces = Vec::new();
        for (i, scene) in def.scenes.iter().enumerate() {
            let spath = path.field("scenes").index(i);
            let body = substitute(&Value::Object(scene.clone()), &vars, self.renderer, &spath)?;
            let body = expect_map(&body, &spath)?.clone();

            if body.get("type").and_then(Value::as_str) == Some("template") {
                let nested = TemplateInvocation::from_body(&body, &spath)?;
                pieces.extend(self.expand_invocation(&nested, stack, &spath)?);
            } else {
                let inner = body
                    .get("id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned);
                pieces.push(Piece {
                    id: inner.unwrap_or_else(|| i.to_string()),
                    layers: vec![body],
                    base_dir: def.base_dir.clone(),
                    path: spath,
                });
            }
        }
        stack.pop();

        // Scene ids: the invocation id names the first scene, the rest are namespaced under it.
        let overrides: Map<String, Value> = inv
            .overrides
            .iter()
            .filter(|(k, _)| k.as_str() != "id")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (i, piece) in pieces.iter_mut().enumerate() {
            if i == 0 {
                piece.layers.push(overrides.clone());
                piece.id = match &inv.id {
                    Some(id) => id.clone(),
                    None => format!("{prefix}.{}", piece.id),
                };
            } else {
                piece.id = format!("{prefix}.{}", piece.id);
            }
        }
        tracing::debug!(template = %inv.name, scenes = pieces.len(), "expanded template");
        Ok(pieces)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/resolve/template.rs"]
mod tests;
