//! Values composer
//!
//! Merges layered configuration values into one map plus a content checksum.
//! Precedence, lowest first: empty map, each `valuesFrom` reference in
//! declared order, the inline `values` document.

mod source;

pub use source::KubeValuesSource;

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{ChartReleaseSpec, ValuesReference, ValuesSourceKind};

/// Values object store (ConfigMaps and Secrets)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ValuesSource: Send + Sync {
    /// String data of the named object, `None` if it does not exist
    async fn fetch(
        &self,
        kind: ValuesSourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;
}

/// Output of a composition
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedValues {
    pub values: Map<String, Value>,
    /// `sha256:<hex>` over the canonical JSON encoding of `values`
    pub checksum: String,
}

/// Merge every values layer of a descriptor living in `namespace`
pub async fn compose(
    source: &dyn ValuesSource,
    namespace: &str,
    spec: &ChartReleaseSpec,
) -> Result<ComposedValues> {
    let mut values = Map::new();

    for reference in &spec.values_from {
        let Some(raw) = lookup(source, namespace, reference).await? else {
            continue;
        };
        let origin = format!("{} {}/{}", reference.kind, namespace, reference.name);
        if reference.target_path.is_empty() {
            let layer = parse_document(&raw, &origin)?;
            merge(&mut values, layer);
        } else {
            set_path(&mut values, &reference.target_path, &raw)
                .map_err(|message| Error::InvalidValues { origin, message })?;
        }
    }

    if let Some(inline) = spec.values.as_deref() {
        let layer = parse_document(inline, "inline values")?;
        merge(&mut values, layer);
    }

    let checksum = checksum(&values);
    debug!(namespace = %namespace, checksum = %checksum, "Composed values");
    Ok(ComposedValues { values, checksum })
}

async fn lookup(
    source: &dyn ValuesSource,
    namespace: &str,
    reference: &ValuesReference,
) -> Result<Option<String>> {
    let data = source
        .fetch(reference.kind, namespace, &reference.name)
        .await?;

    let value = data.and_then(|mut d| d.remove(&reference.key));
    match value {
        Some(v) => Ok(Some(v)),
        None if reference.optional => {
            debug!(
                kind = %reference.kind,
                name = %reference.name,
                key = %reference.key,
                "Skipping missing optional values source"
            );
            Ok(None)
        }
        None => Err(Error::ValuesSourceNotFound {
            kind: reference.kind.to_string(),
            namespace: namespace.to_string(),
            name: format!("{} (key {})", reference.name, reference.key),
        }),
    }
}

/// Parse a YAML (or JSON) values document into a map.
///
/// An empty document is an empty map.
pub fn parse_document(raw: &str, origin: &str) -> Result<Map<String, Value>> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    let parsed: Value = serde_yaml::from_str(raw).map_err(|e| Error::InvalidValues {
        origin: origin.to_string(),
        message: e.to_string(),
    })?;
    match parsed {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(Error::InvalidValues {
            origin: origin.to_string(),
            message: format!("expected a mapping at the top level, found {}", kind_of(&other)),
        }),
    }
}

/// Deep merge `overlay` into `base`.
///
/// Maps merge key by key; any other value (including a map replacing a
/// scalar or a scalar replacing a map) overwrites.
pub fn merge(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => merge(existing, incoming),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Set a scalar at a dotted path, creating intermediate maps.
///
/// `\.` escapes a literal dot inside a key.
pub fn set_path(
    values: &mut Map<String, Value>,
    path: &str,
    raw: &str,
) -> std::result::Result<(), String> {
    let segments = split_path(path);
    if segments.iter().any(String::is_empty) {
        return Err(format!("invalid target path {path:?}"));
    }

    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| format!("invalid target path {path:?}"))?;

    let mut cursor = values;
    for segment in parents {
        let slot = cursor
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return Err(format!("cannot descend into {segment:?} in {path:?}"));
        };
        cursor = next;
    }
    cursor.insert(last.clone(), scalar(raw));
    Ok(())
}

fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'.') => {
                current.push('.');
                chars.next();
            }
            '.' => segments.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    segments.push(current);
    segments
}

fn scalar(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => trimmed
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

/// Content checksum of a values map, independent of key order
pub fn checksum(values: &Map<String, Value>) -> String {
    let canonical = canonicalize(&Value::Object(values.clone()));
    let digest = Sha256::digest(canonical.to_string().as_bytes());
    format!("sha256:{}", hex::encode(digest))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(yaml: &str) -> ChartReleaseSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    fn data(key: &str, value: &str) -> BTreeMap<String, String> {
        [(key.to_string(), value.to_string())].into_iter().collect()
    }

    #[test]
    fn test_merge_later_wins_at_equal_depth() {
        let mut base = object(json!({"a": {"b": 1, "c": 2}, "flat": "x", "m": {"k": 1}}));
        merge(
            &mut base,
            object(json!({"a": {"b": 10}, "flat": {"now": "map"}, "m": "scalar"})),
        );
        assert_eq!(
            Value::Object(base),
            json!({"a": {"b": 10, "c": 2}, "flat": {"now": "map"}, "m": "scalar"})
        );
    }

    #[test]
    fn test_set_path_escapes_and_types() {
        let mut values = Map::new();
        set_path(&mut values, "ingress.annotations.kubernetes\\.io/class", "nginx").unwrap();
        set_path(&mut values, "replicas", "3").unwrap();
        set_path(&mut values, "debug", "true").unwrap();
        set_path(&mut values, "extra", "null").unwrap();
        assert_eq!(
            Value::Object(values),
            json!({
                "ingress": {"annotations": {"kubernetes.io/class": "nginx"}},
                "replicas": 3,
                "debug": true,
                "extra": null
            })
        );

        let mut values = Map::new();
        assert!(set_path(&mut values, "a..b", "x").is_err());
    }

    #[test]
    fn test_checksum_ignores_key_order() {
        let a = object(json!({"b": {"y": 1, "x": [1, 2]}, "a": "v"}));
        let mut b = Map::new();
        b.insert("a".into(), json!("v"));
        b.insert("b".into(), json!({"x": [1, 2], "y": 1}));
        assert_eq!(checksum(&a), checksum(&b));
        assert!(checksum(&a).starts_with("sha256:"));

        let c = object(json!({"a": "v", "b": {"x": [2, 1], "y": 1}}));
        assert_ne!(checksum(&a), checksum(&c));
    }

    #[tokio::test]
    async fn test_compose_precedence() {
        let mut source = MockValuesSource::new();
        source
            .expect_fetch()
            .returning(|kind, _, name| match (kind, name) {
                (ValuesSourceKind::ConfigMap, "defaults") => Ok(Some(data(
                    "values.yaml",
                    "replicas: 1\nimage:\n  tag: v1\n",
                ))),
                (ValuesSourceKind::Secret, "creds") => Ok(Some(data("password", "hunter2"))),
                _ => Ok(None),
            });

        let spec = spec(
            r#"
chart: {repository: "https://example.com", name: app}
valuesFrom:
  - kind: ConfigMap
    name: defaults
  - kind: Secret
    name: creds
    key: password
    targetPath: auth.password
  - kind: ConfigMap
    name: absent
    optional: true
values: |
  replicas: 2
"#,
        );

        let composed = compose(&source, "apps", &spec).await.unwrap();
        assert_eq!(
            Value::Object(composed.values.clone()),
            json!({"replicas": 2, "image": {"tag": "v1"}, "auth": {"password": "hunter2"}})
        );
        assert_eq!(composed.checksum, checksum(&composed.values));
    }

    #[tokio::test]
    async fn test_compose_required_source_missing() {
        let mut source = MockValuesSource::new();
        source.expect_fetch().returning(|_, _, _| Ok(None));

        let spec = spec(
            r#"
chart: {repository: "https://example.com", name: app}
valuesFrom:
  - kind: ConfigMap
    name: defaults
"#,
        );
        let err = compose(&source, "apps", &spec).await.unwrap_err();
        assert!(matches!(err, Error::ValuesSourceNotFound { .. }));
        assert_eq!(err.reason(), "ValuesResolutionFailed");
    }

    #[test]
    fn test_parse_document_rejects_non_mapping() {
        assert!(parse_document("", "inline").unwrap().is_empty());
        assert!(parse_document("- a\n- b\n", "inline").is_err());
    }
}
