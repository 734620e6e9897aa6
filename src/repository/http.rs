//! HTTP chart repository backed by reqwest

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::{
    ChartEntry, ChartPackage, ChartRepository, RepoIndex, resolve_chart_url, verify_digest,
};
use crate::error::{ChartFailure, Error, Result};

const USER_AGENT: &str = concat!("chartwarden/", env!("CARGO_PKG_VERSION"));

/// Classic Helm HTTP repository
#[derive(Clone)]
pub struct HttpChartRepository {
    client: Client,
}

impl HttpChartRepository {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::engine(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn fetch(&self, url: Url, failure: ChartFailure) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::chart(failure, format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::chart(failure, format!("GET {url}: HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::chart(failure, format!("GET {url}: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ChartRepository for HttpChartRepository {
    async fn download_index(&self, repository: &Url) -> Result<RepoIndex> {
        let url = repository
            .join("index.yaml")
            .map_err(|e| Error::chart(ChartFailure::UrlInvalid, e.to_string()))?;
        debug!(url = %url, "Downloading repository index");

        let body = self.fetch(url, ChartFailure::IndexDownloadFailed).await?;
        let raw = String::from_utf8(body)
            .map_err(|e| Error::chart(ChartFailure::IndexDownloadFailed, e.to_string()))?;
        RepoIndex::from_yaml(&raw)
    }

    async fn download_package(
        &self,
        repository: &Url,
        entry: &ChartEntry,
    ) -> Result<ChartPackage> {
        let first = entry.urls.first().ok_or_else(|| {
            Error::chart(
                ChartFailure::ChartPullFailed,
                format!("{} {} has no download URL", entry.name, entry.version),
            )
        })?;
        let url = resolve_chart_url(repository, first)?;
        debug!(url = %url, chart = %entry.name, version = %entry.version, "Downloading chart");

        let bytes = self.fetch(url, ChartFailure::ChartPullFailed).await?;
        verify_digest(entry, &bytes)?;
        Ok(ChartPackage {
            entry: entry.clone(),
            bytes,
        })
    }
}
