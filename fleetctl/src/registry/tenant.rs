//! An authenticated handle on one managed cluster.

use crate::db::models::registry::{ClusterRecord, ClusterUpsert};
use crate::errors::{Error, Result};
use crate::kube_api::KubeApi;
use crate::provider::{CloudCluster, ProviderAdapter};
use crate::types::{ProviderKind, PROVISIONED};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use std::fmt;

/// Handles are re-authenticated a week after they were minted.
pub const TENANT_TTL_SECS: i64 = 7 * 24 * 60 * 60;

pub struct Tenant {
    name: String,
    aliases: Vec<String>,
    kind: ProviderKind,
    metadata: String,
    kubeconfig: Vec<u8>,
    expires_at: i64,
    kube: KubeApi,
}

impl Tenant {
    pub async fn new(
        name: String,
        aliases: Vec<String>,
        kind: ProviderKind,
        metadata: String,
        kubeconfig: Vec<u8>,
        expires_at: i64,
    ) -> Result<Self> {
        let kube = KubeApi::from_kubeconfig(&kubeconfig).await?;
        Ok(Self {
            name,
            aliases,
            kind,
            metadata,
            kubeconfig,
            expires_at,
            kube,
        })
    }

    /// Builds a fresh handle from a live provider session. Fails unless the
    /// backing cluster has finished provisioning; a half-built cluster must
    /// not enter the registry.
    pub async fn from_provider(
        provider: &dyn ProviderAdapter,
        cluster: &CloudCluster,
        metadata: String,
    ) -> Result<Self> {
        if cluster.status != PROVISIONED {
            return Err(Error::validation(format!(
                "cluster '{}' is not joinable: status is {}",
                cluster.name, cluster.status
            )));
        }
        let kubeconfig = provider.get_kubeconfig(&cluster.id).await?;
        Self::new(
            cluster.name.clone(),
            cluster.tags.clone(),
            provider.kind(),
            metadata,
            kubeconfig,
            Utc::now().timestamp() + TENANT_TTL_SECS,
        )
        .await
    }

    /// Rebuilds a handle from its mirror row without contacting the provider.
    pub async fn from_record(record: &ClusterRecord, aliases: Vec<String>) -> Result<Self> {
        let kind: ProviderKind = record
            .provider
            .parse()
            .map_err(|e: crate::types::UnknownProvider| Error::validation(e.to_string()))?;
        let kubeconfig = BASE64
            .decode(&record.kubeconfig)
            .map_err(|_| Error::validation(format!("cluster '{}': kubeconfig is not valid base64", record.name)))?;
        Self::new(
            record.name.clone(),
            aliases,
            kind,
            record.metadata.clone(),
            kubeconfig,
            record.expire,
        )
        .await
    }

    pub fn to_upsert(&self) -> ClusterUpsert {
        ClusterUpsert {
            name: self.name.clone(),
            provider: self.kind.to_string(),
            metadata: self.metadata.clone(),
            kubeconfig: BASE64.encode(&self.kubeconfig),
            expire: self.expires_at,
            aliases: self.aliases.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    pub fn kubeconfig(&self) -> &[u8] {
        &self.kubeconfig
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn kube(&self) -> &KubeApi {
        &self.kube
    }

    /// Zero expiry predates expiry tracking and counts as live.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at > 0 && self.expires_at < now
    }
}

// Kubeconfig and metadata carry credentials; keep them out of Debug output.
impl fmt::Debug for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tenant")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("kind", &self.kind)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}
