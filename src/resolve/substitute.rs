//! Variable substitution for template bodies.

use crate::foundation::error::{KeyPath, WeaveError, WeaveResult};
use serde_json::{Map, Value};

/// Pure text renderer: identical inputs always produce identical output.
pub trait TextRenderer: Send + Sync {
    fn render_text(&self, template: &str, vars: &Map<String, Value>) -> WeaveResult<String>;

    /// Render a string field into a value. The default keeps the result a string.
    fn render_value(&self, template: &str, vars: &Map<String, Value>) -> WeaveResult<Value> {
        self.render_text(template, vars).map(Value::String)
    }
}

/// `{{ name }}` renderer with dotted lookups and a `default('x')` filter.
///
/// A field that consists of exactly one placeholder takes the variable's value as-is, so numbers,
/// lists and mappings survive substitution with their type.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl TextRenderer for PlaceholderRenderer {
    fn render_text(&self, template: &str, vars: &Map<String, Value>) -> WeaveResult<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find("{{") {
            out.push_str(&rest[..open]);
            let after = &rest[open + 2..];
            let close = after.find("}}").ok_or_else(|| {
                WeaveError::config(
                    KeyPath::root(),
                    format!("unterminated placeholder in '{template}'"),
                )
            })?;
            let v = eval(&after[..close], vars)?;
            out.push_str(&display(&v));
            rest = &after[close + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn render_value(&self, template: &str, vars: &Map<String, Value>) -> WeaveResult<Value> {
        let t = template.trim();
        if let Some(inner) = t.strip_prefix("{{").and_then(|s| s.strip_suffix("}}"))
            && !inner.contains("{{")
            && !inner.contains("}}")
        {
            return eval(inner, vars);
        }
        self.render_text(template, vars).map(Value::String)
    }
}

fn eval(expr: &str, vars: &Map<String, Value>) -> WeaveResult<Value> {
    let (name, filter) = match expr.split_once('|') {
        Some((n, f)) => (n.trim(), Some(f.trim())),
        None => (expr.trim(), None),
    };
    if name.is_empty() {
        return Err(WeaveError::config(KeyPath::root(), "empty placeholder"));
    }

    let fallback = filter.map(parse_default).transpose()?;
    let found = lookup(name, vars).filter(|v| !v.is_null());
    match (found, fallback) {
        (Some(v), _) => Ok(v.clone()),
        (None, Some(d)) => Ok(d),
        (None, None) => match lookup(name, vars) {
            Some(Value::Null) => Ok(Value::Null),
            _ => Err(WeaveError::config(
                KeyPath::root(),
                format!("undefined template variable '{name}'"),
            )),
        },
    }
}

fn lookup<'a>(name: &str, vars: &'a Map<String, Value>) -> Option<&'a Value> {
    let mut parts = name.split('.');
    let mut cur = vars.get(parts.next()?.trim())?;
    for part in parts {
        cur = cur.as_object()?.get(part.trim())?;
    }
    Some(cur)
}

fn parse_default(filter: &str) -> WeaveResult<Value> {
    let bad = || {
        WeaveError::config(
            KeyPath::root(),
            format!("unsupported placeholder filter '{filter}'"),
        )
    };
    let arg = filter
        .strip_prefix("default")
        .map(str::trim_start)
        .and_then(|s| s.strip_prefix('('))
        .and_then(|s| s.strip_suffix(')'))
        .map(str::trim)
        .ok_or_else(bad)?;

    for q in ['\'', '"'] {
        if let Some(s) = arg.strip_prefix(q).and_then(|s| s.strip_suffix(q)) {
            return Ok(Value::String(s.to_owned()));
        }
    }
    // Unquoted literals: numbers, booleans, null.
    serde_json::from_str::<Value>(arg).map_err(|_| bad())
}

fn display(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute every string inside `value`. Mapping keys are left untouched.
pub fn substitute(
    value: &Value,
    vars: &Map<String, Value>,
    renderer: &dyn TextRenderer,
    path: &KeyPath,
) -> WeaveResult<Value> {
    match value {
        Value::String(s) if s.contains("{{") => {
            renderer.render_value(s, vars).map_err(|e| e.at_path(path))
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| substitute(v, vars, renderer, &path.index(i)))
            .collect::<WeaveResult<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), substitute(v, vars, renderer, &path.field(k))?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/resolve/substitute.rs"]
mod tests;
