//! Chart repository client
//!
//! Resolves a repository `index.yaml`, picks the requested (or latest) chart
//! version and downloads the package archive.

mod http;

pub use http::HttpChartRepository;

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{ChartFailure, Error, Result};

/// One chart version listed in a repository index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEntry {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub urls: Vec<String>,
    /// sha256 of the package archive, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Downloaded chart archive plus its index metadata
#[derive(Clone, PartialEq, Eq)]
pub struct ChartPackage {
    pub entry: ChartEntry,
    /// Gzipped tar archive
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ChartPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartPackage")
            .field("name", &self.entry.name)
            .field("version", &self.entry.version)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct RawIndex {
    #[serde(default)]
    entries: BTreeMap<String, Vec<ChartEntry>>,
}

/// Parsed repository index.
///
/// Entries for each chart are sorted by semantic version, newest first.
/// Versions that are not valid semver are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoIndex {
    entries: BTreeMap<String, Vec<ChartEntry>>,
}

impl RepoIndex {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let index: RawIndex = serde_yaml::from_str(raw)
            .map_err(|e| Error::chart(ChartFailure::IndexDownloadFailed, e.to_string()))?;
        Ok(Self::from_entries(index.entries))
    }

    pub fn from_entries(entries: BTreeMap<String, Vec<ChartEntry>>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(name, versions)| {
                let mut parsed: Vec<(Version, ChartEntry)> = versions
                    .into_iter()
                    .filter_map(|e| parse_version(&e.version).map(|v| (v, e)))
                    .collect();
                parsed.sort_by(|a, b| b.0.cmp(&a.0));
                (name, parsed.into_iter().map(|(_, e)| e).collect())
            })
            .collect();
        Self { entries }
    }

    /// All versions of a chart, newest first
    pub fn versions(&self, name: &str) -> &[ChartEntry] {
        self.entries.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Newest version of a chart
    pub fn latest(&self, name: &str) -> Option<&ChartEntry> {
        self.versions(name).first()
    }

    /// Look up a chart version; an empty version means the latest
    pub fn get(&self, name: &str, version: &str) -> Option<&ChartEntry> {
        if version.is_empty() {
            return self.latest(name);
        }
        let wanted = parse_version(version);
        self.versions(name).iter().find(|e| {
            e.version == version || (wanted.is_some() && parse_version(&e.version) == wanted)
        })
    }
}

/// Repository access
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChartRepository: Send + Sync {
    /// Fetch and parse `<repository>/index.yaml`
    async fn download_index(&self, repository: &Url) -> Result<RepoIndex>;
    /// Fetch the package archive for an index entry
    async fn download_package(&self, repository: &Url, entry: &ChartEntry)
    -> Result<ChartPackage>;
}

/// Parse and normalise a repository URL
pub fn parse_repository_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let mut url = Url::parse(trimmed)
        .map_err(|e| Error::chart(ChartFailure::UrlInvalid, format!("{trimmed}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::chart(
            ChartFailure::UrlInvalid,
            format!("{trimmed}: unsupported scheme {}", url.scheme()),
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Resolve a chart URL from the index against the repository URL
pub fn resolve_chart_url(repository: &Url, chart_url: &str) -> Result<Url> {
    match Url::parse(chart_url) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => repository
            .join(chart_url)
            .map_err(|e| Error::chart(ChartFailure::ChartPullFailed, e.to_string())),
        Err(e) => Err(Error::chart(
            ChartFailure::ChartPullFailed,
            format!("{chart_url}: {e}"),
        )),
    }
}

/// Check a package against the digest recorded in the index
pub fn verify_digest(entry: &ChartEntry, bytes: &[u8]) -> Result<()> {
    let Some(expected) = entry.digest.as_deref().filter(|d| !d.is_empty()) else {
        return Ok(());
    };
    let actual = hex::encode(Sha256::digest(bytes));
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(Error::chart(
            ChartFailure::ChartPullFailed,
            format!(
                "{} {}: digest mismatch (expected {}, got {})",
                entry.name, entry.version, expected, actual
            ),
        ))
    }
}

/// Newer version to adopt under auto-upgrade.
///
/// Only minor/patch moves are adopted; a different major version requires an
/// explicit edit of the descriptor.
pub fn auto_upgrade_target(current: &str, latest: &str) -> Option<String> {
    let current_v = parse_version(current)?;
    let latest_v = parse_version(latest)?;
    (latest_v.major == current_v.major && latest_v > current_v).then(|| latest.to_string())
}

fn parse_version(raw: &str) -> Option<Version> {
    Version::parse(raw.strip_prefix('v').unwrap_or(raw)).ok()
}
