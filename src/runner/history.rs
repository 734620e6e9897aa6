//! Release history stored as Helm storage Secrets
//!
//! Each revision is a Secret named `sh.helm.release.v1.<release>.v<N>`
//! labelled `owner=helm,name=<release>,version=<N>,status=<state>`. The
//! `release` key holds base64 of an (optionally gzipped) JSON record.

use std::collections::BTreeMap;
use std::io::Read;

use async_trait::async_trait;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{DeleteParams, ListParams};
use kube::{Api, Client, ResourceExt};
use serde::Deserialize;
use tracing::debug;

use super::{ObservedRelease, ReleaseHistoryStore, ReleaseState};
use crate::constants::RELEASE_SECRET_PREFIX;
use crate::error::{Error, Result, is_not_found};

#[derive(Debug, Deserialize)]
struct ReleaseRecord {
    name: String,
    #[serde(default)]
    namespace: String,
    version: u32,
    #[serde(default)]
    info: ReleaseInfo,
    #[serde(default)]
    chart: Option<ChartRecord>,
}

#[derive(Debug, Default, Deserialize)]
struct ReleaseInfo {
    #[serde(default)]
    status: String,
    #[serde(default)]
    deleted: String,
}

#[derive(Debug, Deserialize)]
struct ChartRecord {
    metadata: ChartMetadata,
}

#[derive(Debug, Deserialize)]
struct ChartMetadata {
    #[serde(default)]
    version: String,
}

/// Decode the `release` payload of a storage Secret
pub fn decode_release_record(payload: &[u8]) -> Result<ObservedRelease> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| Error::serialization(format!("failed to decode release data: {e}")))?;

    // gzip magic bytes
    let is_gzipped = decoded.len() >= 3 && decoded[..3] == [0x1f, 0x8b, 0x08];
    let json = if is_gzipped {
        let mut decoder = flate2::read::GzDecoder::new(&decoded[..]);
        let mut buf = Vec::new();
        decoder
            .read_to_end(&mut buf)
            .map_err(|e| Error::serialization(format!("failed to decompress release data: {e}")))?;
        buf
    } else {
        decoded
    };

    parse_release_json(&json)
}

/// Parse a JSON release record (storage payload or `helm status -o json`)
pub fn parse_release_json(json: &[u8]) -> Result<ObservedRelease> {
    let record: ReleaseRecord = serde_json::from_slice(json)?;
    Ok(ObservedRelease {
        name: record.name,
        namespace: record.namespace,
        revision: record.version,
        chart_version: record.chart.map(|c| c.metadata.version).unwrap_or_default(),
        state: ReleaseState::parse(&record.info.status),
        deleted: !record.info.deleted.is_empty(),
    })
}

/// History store reading Helm storage Secrets in one namespace
#[derive(Clone)]
pub struct SecretHistoryStore {
    api: Api<Secret>,
    namespace: String,
}

impl SecretHistoryStore {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }

    async fn records(&self, params: &ListParams) -> Result<Vec<ObservedRelease>> {
        let secrets = self.api.list(params).await?;
        let mut records = Vec::new();
        for secret in secrets.items {
            let Some(payload) = secret.data.as_ref().and_then(|d| d.get("release")) else {
                continue;
            };
            match decode_release_record(&payload.0) {
                Ok(record) => records.push(record),
                Err(e) => debug!(
                    secret = %secret.name_any(),
                    namespace = %self.namespace,
                    error = %e,
                    "Skipping undecodable release record"
                ),
            }
        }
        Ok(records)
    }
}

/// Highest revision per release name
fn latest_per_release(records: Vec<ObservedRelease>) -> Vec<ObservedRelease> {
    let mut latest: BTreeMap<String, ObservedRelease> = BTreeMap::new();
    for record in records {
        match latest.get(&record.name) {
            Some(existing) if existing.revision >= record.revision => {}
            _ => {
                latest.insert(record.name.clone(), record);
            }
        }
    }
    latest.into_values().collect()
}

#[async_trait]
impl ReleaseHistoryStore for SecretHistoryStore {
    async fn observe_last(&self, release_name: &str) -> Result<Option<ObservedRelease>> {
        let params = ListParams::default().labels(&format!("owner=helm,name={release_name}"));
        let records = self.records(&params).await?;
        Ok(records.into_iter().max_by_key(|r| r.revision))
    }

    async fn list(&self) -> Result<Vec<ObservedRelease>> {
        let params = ListParams::default().labels("owner=helm");
        Ok(latest_per_release(self.records(&params).await?))
    }

    async fn delete_matching(&self, fragment: &str) -> Result<usize> {
        let secrets = self
            .api
            .list(&ListParams::default().labels("owner=helm"))
            .await?;
        let mut removed = 0;
        for secret in secrets.items {
            let name = secret.name_any();
            if !name.starts_with(RELEASE_SECRET_PREFIX) || !name.contains(fragment) {
                continue;
            }
            match self.api.delete(&name, &DeleteParams::default()).await {
                Ok(_) => removed += 1,
                Err(e) if is_not_found(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    async fn delete_revision(&self, release_name: &str, revision: u32) -> Result<()> {
        let name = format!("{RELEASE_SECRET_PREFIX}{release_name}.v{revision}");
        match self.api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
