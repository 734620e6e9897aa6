use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{Api, Client};

use super::ValuesSource;
use crate::error::{Error, Result, is_not_found};
use crate::models::ValuesSourceKind;

/// Reads values from ConfigMaps and Secrets in the management cluster
#[derive(Clone)]
pub struct KubeValuesSource {
    client: Client,
}

impl KubeValuesSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ValuesSource for KubeValuesSource {
    async fn fetch(
        &self,
        kind: ValuesSourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        match kind {
            ValuesSourceKind::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                match api.get(name).await {
                    Ok(cm) => Ok(Some(cm.data.unwrap_or_default())),
                    Err(e) if is_not_found(&e) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            ValuesSourceKind::Secret => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                let secret = match api.get(name).await {
                    Ok(secret) => secret,
                    Err(e) if is_not_found(&e) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };
                let mut data = BTreeMap::new();
                for (key, bytes) in secret.data.unwrap_or_default() {
                    let value = String::from_utf8(bytes.0).map_err(|_| Error::InvalidValues {
                        origin: format!("Secret {namespace}/{name}"),
                        message: format!("key {key} is not valid UTF-8"),
                    })?;
                    data.insert(key, value);
                }
                Ok(Some(data))
            }
        }
    }
}
