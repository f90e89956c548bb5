//! Thin wrapper over a per-tenant Kubernetes client.
//!
//! Construction only parses the kubeconfig and builds the client; nothing is
//! sent to the API server until a listing call, so cold-loading a registry of
//! unreachable clusters stays cheap.

use crate::errors::{Error, Result};
use k8s_openapi::api::core::v1::{Node, PersistentVolume, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Clone)]
pub struct KubeApi {
    client: Client,
}

/// Subset of the metrics.k8s.io pod metrics object the console displays.
#[derive(Debug, Clone, Deserialize)]
pub struct PodMetrics {
    pub metadata: ObjectMeta,
    pub containers: Vec<ContainerMetrics>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerMetrics {
    pub name: String,
    pub usage: BTreeMap<String, Quantity>,
}

#[derive(Debug, Clone, Deserialize)]
struct PodMetricsList {
    items: Vec<PodMetrics>,
}

impl KubeApi {
    pub async fn from_kubeconfig(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::validation("kubeconfig is not valid UTF-8"))?;
        let kubeconfig = Kubeconfig::from_yaml(text).map_err(Error::provider)?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(Error::provider)?;
        let client = Client::try_from(config).map_err(Error::provider)?;
        Ok(Self { client })
    }

    /// Empty namespace means all namespaces.
    pub async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        };
        let list = api.list(&ListParams::default()).await.map_err(Error::provider)?;
        Ok(list.items)
    }

    pub async fn list_persistent_volumes(&self) -> Result<Vec<PersistentVolume>> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.map_err(Error::provider)?;
        Ok(list.items)
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.map_err(Error::provider)?;
        Ok(list.items)
    }

    /// metrics.k8s.io has no typed client; go through the raw request path.
    pub async fn get_pod_metrics(&self) -> Result<Vec<PodMetrics>> {
        let request = http::Request::builder()
            .uri("/apis/metrics.k8s.io/v1beta1/pods")
            .body(Vec::new())
            .map_err(Error::provider)?;
        let list: PodMetricsList = self.client.request(request).await.map_err(Error::provider)?;
        Ok(list.items)
    }

    /// Liveness probe: a version call is the cheapest authenticated request.
    pub async fn ping(&self) -> Result<String> {
        let info = self.client.apiserver_version().await.map_err(Error::provider)?;
        Ok(info.git_version)
    }
}

/// Converts a Kubernetes resource quantity into whole bytes. Unparsable input
/// maps to zero; the mirror stores sizes best-effort.
pub fn quantity_bytes(quantity: &Quantity) -> i64 {
    let raw = quantity.0.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit() && c != '-' && c != '.')
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    let Ok(value) = number.parse::<f64>() else {
        return 0;
    };
    let scale: f64 = match suffix {
        "" => 1.0,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => 1024.0 * 1024.0 * 1024.0,
        "Ti" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        "Pi" => 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return 0,
    };
    (value * scale) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_parsing() {
        assert_eq!(quantity_bytes(&Quantity("10Gi".to_string())), 10 * 1024 * 1024 * 1024);
        assert_eq!(quantity_bytes(&Quantity("500M".to_string())), 500_000_000);
        assert_eq!(quantity_bytes(&Quantity("42".to_string())), 42);
        assert_eq!(quantity_bytes(&Quantity("bogus".to_string())), 0);
    }

    #[tokio::test]
    async fn client_builds_without_contacting_the_server() {
        let kubeconfig = br#"
apiVersion: v1
kind: Config
clusters:
  - name: test
    cluster:
      server: https://127.0.0.1:6443
users:
  - name: test
    user:
      token: not-a-real-token
contexts:
  - name: test
    context:
      cluster: test
      user: test
current-context: test
"#;
        KubeApi::from_kubeconfig(kubeconfig).await.unwrap();
    }

    #[tokio::test]
    async fn garbage_kubeconfig_is_rejected() {
        assert!(KubeApi::from_kubeconfig(b"not: [valid").await.is_err());
    }
}
