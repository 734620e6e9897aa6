//! Values composition tests
//!
//! Exercises layering order, scalar injection at target paths and the
//! checksum the drift detector compares across passes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chartwarden::Error;
use chartwarden::models::{ChartReleaseSpec, ValuesSourceKind};
use chartwarden::values::{ValuesSource, checksum, compose, merge, parse_document};
use serde_json::{Map, Value, json};

/// In-memory ConfigMap/Secret store keyed by (kind, namespace, name)
#[derive(Default)]
struct Store {
    objects: BTreeMap<(String, String, String), BTreeMap<String, String>>,
}

impl Store {
    fn with(mut self, kind: ValuesSourceKind, name: &str, key: &str, value: &str) -> Self {
        self.objects
            .entry((kind.to_string(), "fleet".to_string(), name.to_string()))
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl ValuesSource for Store {
    async fn fetch(
        &self,
        kind: ValuesSourceKind,
        namespace: &str,
        name: &str,
    ) -> chartwarden::Result<Option<BTreeMap<String, String>>> {
        Ok(self
            .objects
            .get(&(kind.to_string(), namespace.to_string(), name.to_string()))
            .cloned())
    }
}

fn spec(extra: Value) -> ChartReleaseSpec {
    let mut base = json!({"chart": {"repository": "https://charts.example.com", "name": "app"}});
    if let (Some(b), Some(e)) = (base.as_object_mut(), extra.as_object()) {
        b.extend(e.clone());
    }
    serde_json::from_value(base).unwrap()
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

#[test]
fn test_checksum_ignores_key_order() {
    let a = parse_document("a: 1\nb:\n  x: true\n  y: [1, 2]\n", "a").unwrap();
    let b = parse_document("b:\n  y: [1, 2]\n  x: true\na: 1\n", "b").unwrap();
    assert_eq!(checksum(&a), checksum(&b));
    assert!(checksum(&a).starts_with("sha256:"));
    assert_eq!(checksum(&a).len(), "sha256:".len() + 64);
}

#[test]
fn test_checksum_tracks_content() {
    let a = object(json!({"replicas": 1}));
    let b = object(json!({"replicas": 2}));
    let c = object(json!({"replicas": [1]}));
    assert_ne!(checksum(&a), checksum(&b));
    assert_ne!(checksum(&a), checksum(&c));
    assert_eq!(checksum(&Map::new()), checksum(&parse_document("", "empty").unwrap()));
}

#[test]
fn test_merge_is_deep_for_maps_only() {
    let mut base = object(json!({"image": {"repo": "nginx", "tag": "1.0"}, "ports": [80]}));
    merge(
        &mut base,
        object(json!({"image": {"tag": "1.1"}, "ports": [443]})),
    );
    assert_eq!(
        Value::Object(base),
        json!({"image": {"repo": "nginx", "tag": "1.1"}, "ports": [443]})
    );
}

#[tokio::test]
async fn test_layers_apply_in_order() {
    let store = Store::default()
        .with(ValuesSourceKind::ConfigMap, "defaults", "values.yaml", "replicas: 1\nimage:\n  tag: '1.0'\n")
        .with(ValuesSourceKind::Secret, "overrides", "values.yaml", "replicas: 3\n")
        .with(ValuesSourceKind::ConfigMap, "pins", "tag", "1.2")
        .with(ValuesSourceKind::ConfigMap, "flags", "debug", "true");

    let spec = spec(json!({
        "valuesFrom": [
            {"kind": "ConfigMap", "name": "defaults"},
            {"kind": "Secret", "name": "overrides"},
            {"kind": "ConfigMap", "name": "pins", "key": "tag", "targetPath": "image.tag"},
            {"kind": "ConfigMap", "name": "flags", "key": "debug", "targetPath": "log\\.debug"}
        ],
        "values": "replicas: 5\n"
    }));

    let composed = compose(&store, "fleet", &spec).await.unwrap();
    assert_eq!(
        Value::Object(composed.values.clone()),
        json!({"replicas": 5, "image": {"tag": "1.2"}, "log.debug": true})
    );
    assert_eq!(composed.checksum, checksum(&composed.values));

    // identical inputs give an identical checksum
    let again = compose(&store, "fleet", &spec).await.unwrap();
    assert_eq!(again.checksum, composed.checksum);
}

#[tokio::test]
async fn test_optional_missing_source_is_skipped() {
    let spec = spec(json!({
        "valuesFrom": [{"name": "absent", "optional": true}],
        "values": "a: 1"
    }));
    let composed = compose(&Store::default(), "fleet", &spec).await.unwrap();
    assert_eq!(Value::Object(composed.values), json!({"a": 1}));
}

#[tokio::test]
async fn test_required_missing_key_fails() {
    let store = Store::default().with(ValuesSourceKind::ConfigMap, "defaults", "other.yaml", "a: 1");
    let spec = spec(json!({"valuesFrom": [{"name": "defaults"}]}));

    let err = compose(&store, "fleet", &spec).await.unwrap_err();
    assert!(matches!(err, Error::ValuesSourceNotFound { .. }));
    assert_eq!(err.reason(), "ValuesResolutionFailed");
}

#[tokio::test]
async fn test_non_mapping_document_is_invalid() {
    let spec = spec(json!({"values": "- just\n- a list\n"}));
    let err = compose(&Store::default(), "fleet", &spec).await.unwrap_err();
    assert!(matches!(err, Error::InvalidValues { .. }));
}
