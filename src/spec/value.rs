use crate::foundation::error::{KeyPath, WeaveError, WeaveResult};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Parse YAML (or JSON, which is a YAML subset) into the crate-wide value model.
///
/// Mapping keys must be strings; the resulting maps are ordered by key, which keeps every later
/// stage independent of authoring order.
pub fn parse_yaml(text: &str) -> WeaveResult<Value> {
    serde_yaml::from_str::<Value>(text).map_err(|e| {
        let at = e
            .location()
            .map(|l| format!(" (line {}, column {})", l.line(), l.column()))
            .unwrap_or_default();
        WeaveError::config(KeyPath::root(), format!("invalid YAML{at}: {e}"))
    })
}

/// Decode a typed record from a value, mapping serde failures onto a configuration error at `path`.
pub fn decode<T>(value: &Value, path: &KeyPath) -> WeaveResult<T>
where
    T: serde::de::DeserializeOwned,
{
    T::deserialize(value).map_err(|e| WeaveError::config(path.clone(), e.to_string()))
}

/// Short name of a value's JSON type, for error messages.
pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

/// Require `v` to be a mapping.
pub fn expect_map<'a>(v: &'a Value, path: &KeyPath) -> WeaveResult<&'a Map<String, Value>> {
    v.as_object().ok_or_else(|| {
        WeaveError::config(
            path.clone(),
            format!("expected a mapping, found {}", type_name(v)),
        )
    })
}

/// Treat an explicit `null` the same as an absent field for collection-typed fields.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
