//! Deep merge of scene mappings with explicit-null suppression.

use serde_json::{Map, Value};

/// State of one key in a scene mapping.
///
/// `Absent` inherits whatever a lower layer provides; `Null` is an explicit value that suppresses
/// it. The two are never collapsed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot<'a> {
    Absent,
    Null,
    Value(&'a Value),
}

impl<'a> Slot<'a> {
    pub fn of(map: &'a Map<String, Value>, key: &str) -> Self {
        match map.get(key) {
            None => Self::Absent,
            Some(Value::Null) => Self::Null,
            Some(v) => Self::Value(v),
        }
    }

    pub fn value(self) -> Option<&'a Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Absent | Self::Null => None,
        }
    }
}

/// Merge `overlay` onto `base`, returning a new mapping.
///
/// Scalars and lists in `overlay` replace the base value; mappings merge key-by-key at every
/// nesting level; an explicit `null` in `overlay` replaces the base value with `null`.
pub fn merge(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut out = base.clone();
    for (key, top) in overlay {
        let merged = match (Slot::of(base, key), top) {
            (Slot::Value(Value::Object(b)), Value::Object(o)) => Value::Object(merge(b, o)),
            _ => top.clone(),
        };
        out.insert(key.clone(), merged);
    }
    out
}

/// Fold `layers` lowest-precedence first.
pub fn merge_layers<'a, I>(layers: I) -> Map<String, Value>
where
    I: IntoIterator<Item = &'a Map<String, Value>>,
{
    layers
        .into_iter()
        .fold(Map::new(), |acc, layer| merge(&acc, layer))
}

#[cfg(test)]
#[path = "../../tests/unit/resolve/defaults.rs"]
mod tests;
