//! Repository index tests
//!
//! Parses a realistic `index.yaml` and checks version ordering, lookup,
//! URL handling and digest verification.

use chartwarden::repository::{
    ChartEntry, RepoIndex, auto_upgrade_target, parse_repository_url, resolve_chart_url,
    verify_digest,
};
use sha2::{Digest, Sha256};

const INDEX: &str = r#"
apiVersion: v1
generated: "2024-05-01T10:00:00Z"
entries:
  podinfo:
    - name: podinfo
      version: 6.5.0
      appVersion: 6.5.0
      urls: [podinfo-6.5.0.tgz]
      digest: aa
    - name: podinfo
      version: 6.10.1
      urls: [https://cdn.example.com/podinfo-6.10.1.tgz]
    - name: podinfo
      version: 6.6.0-rc.1
      urls: [podinfo-6.6.0-rc.1.tgz]
    - name: podinfo
      version: latest
      urls: [podinfo-latest.tgz]
    - name: podinfo
      version: 6.9.0
      urls: [podinfo-6.9.0.tgz]
  redis:
    - name: redis
      version: v18.1.0
      urls: [redis-18.1.0.tgz]
"#;

fn versions(index: &RepoIndex, name: &str) -> Vec<String> {
    index
        .versions(name)
        .iter()
        .map(|e| e.version.clone())
        .collect()
}

#[test]
fn test_versions_sorted_newest_first() {
    let index = RepoIndex::from_yaml(INDEX).unwrap();
    assert_eq!(
        versions(&index, "podinfo"),
        vec!["6.10.1", "6.9.0", "6.6.0-rc.1", "6.5.0"]
    );
    assert_eq!(index.latest("podinfo").unwrap().version, "6.10.1");
    assert!(index.latest("nginx").is_none());
}

#[test]
fn test_lookup() {
    let index = RepoIndex::from_yaml(INDEX).unwrap();
    assert_eq!(index.get("podinfo", "").unwrap().version, "6.10.1");
    assert_eq!(
        index.get("podinfo", "6.5.0").unwrap().app_version.as_deref(),
        Some("6.5.0")
    );
    assert_eq!(index.get("redis", "18.1.0").unwrap().version, "v18.1.0");
    assert!(index.get("podinfo", "7.0.0").is_none());
}

#[test]
fn test_malformed_index_is_index_failure() {
    let err = RepoIndex::from_yaml("entries: [not, a, map]").unwrap_err();
    assert_eq!(err.reason(), "IndexDownloadFailed");
}

#[test]
fn test_repository_url_normalisation() {
    assert_eq!(
        parse_repository_url("https://charts.example.com/stable")
            .unwrap()
            .as_str(),
        "https://charts.example.com/stable/"
    );
    assert_eq!(
        parse_repository_url("oci://registry.example.com/charts")
            .unwrap_err()
            .reason(),
        "RepositoryURLInvalid"
    );
    assert_eq!(
        parse_repository_url("charts/stable").unwrap_err().reason(),
        "RepositoryURLInvalid"
    );
}

#[test]
fn test_chart_urls_resolve_against_repository() {
    let repo = parse_repository_url("https://charts.example.com/stable").unwrap();
    assert_eq!(
        resolve_chart_url(&repo, "podinfo-6.5.0.tgz").unwrap().as_str(),
        "https://charts.example.com/stable/podinfo-6.5.0.tgz"
    );
    assert_eq!(
        resolve_chart_url(&repo, "https://cdn.example.com/podinfo-6.10.1.tgz")
            .unwrap()
            .as_str(),
        "https://cdn.example.com/podinfo-6.10.1.tgz"
    );
}

#[test]
fn test_digest_verification() {
    let bytes = b"chart archive";
    let entry = ChartEntry {
        name: "podinfo".into(),
        version: "6.5.0".into(),
        digest: Some(hex::encode(Sha256::digest(bytes))),
        ..Default::default()
    };
    assert!(verify_digest(&entry, bytes).is_ok());

    let err = verify_digest(&entry, b"tampered").unwrap_err();
    assert_eq!(err.reason(), "ChartPullFailed");

    let unsigned = ChartEntry {
        digest: None,
        ..entry
    };
    assert!(verify_digest(&unsigned, b"anything").is_ok());
}

#[test]
fn test_auto_upgrade_stays_within_major() {
    assert_eq!(
        auto_upgrade_target("6.5.0", "6.10.1"),
        Some("6.10.1".to_string())
    );
    assert_eq!(auto_upgrade_target("6.10.1", "6.10.1"), None);
    assert_eq!(auto_upgrade_target("6.10.1", "6.9.0"), None);
    assert_eq!(auto_upgrade_target("6.10.1", "7.0.0"), None);
    assert_eq!(auto_upgrade_target("not-semver", "7.0.0"), None);
}
