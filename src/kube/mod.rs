//! Kubernetes client construction
//!
//! Every client the controller builds (management cluster and remote
//! workload clusters) goes through `client_from_config`, which applies the
//! read timeout and drops a configured proxy for internal API servers.

use anyhow::Result;
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use tracing::debug;

use crate::constants::CLIENT_READ_TIMEOUT;

/// Build the management cluster client.
///
/// Without a context, uses the default loading strategy:
/// 1. In-cluster config (if running in a pod)
/// 2. KUBECONFIG environment variable
/// 3. ~/.kube/config
pub async fn create_client(context: Option<&str>) -> Result<Client> {
    let config = match context {
        Some(context) => {
            Config::from_kubeconfig(&KubeConfigOptions {
                context: Some(context.to_string()),
                ..Default::default()
            })
            .await?
        }
        None => Config::infer().await?,
    };
    Ok(client_from_config(config)?)
}

/// Finalize a client config and build the client
pub fn client_from_config(mut config: Config) -> kube::Result<Client> {
    config.read_timeout = Some(CLIENT_READ_TIMEOUT);

    if config.proxy_url.is_some() {
        if let Some(host) = config.cluster_url.host() {
            if is_internal_host(host) {
                debug!(host = %host, "Bypassing proxy for internal API server");
                config.proxy_url = None;
            }
        }
    }

    Client::try_from(config)
}

/// Check if a host looks like an internal/private address
///
/// - Private and loopback IP addresses
/// - Internal TLDs (.local, .internal, .cluster.local)
/// - Internal domain labels (*.corp.*, *.internal.*, *.int.*)
fn is_internal_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        return match ip {
            std::net::IpAddr::V4(v4) => v4.is_private() || v4.is_loopback(),
            std::net::IpAddr::V6(v6) => v6.is_loopback(),
        };
    }

    if host == "localhost"
        || host.ends_with(".local")
        || host.ends_with(".internal")
        || host.ends_with(".cluster.local")
    {
        return true;
    }

    let parts: Vec<&str> = host.split('.').collect();
    parts.len() >= 2 && matches!(parts[parts.len() - 2], "corp" | "internal" | "int" | "local")
}
