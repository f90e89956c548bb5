//! Cloud control-plane adapters.
//!
//! The console talks to providers exclusively through [`ProviderAdapter`], an
//! authenticated session scoped to one account, and [`ProviderFactory`], which
//! knows how to mint sessions and rebuild tenant handles from persisted
//! metadata. Everything above this module is provider-neutral.

pub mod nimbus;

use crate::db::errors::DbError;
use crate::db::handlers::accounts::Accounts;
use crate::db::models::accounts::AccountRecord;
use crate::errors::{Error, Result};
use crate::registry::tenant::Tenant;
use crate::types::ProviderKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudCluster {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub worker_pools: Vec<WorkerPool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPool {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub autoscale_group: String,
    #[serde(default)]
    pub autoscaling_enabled: bool,
    #[serde(default)]
    pub min_size: i64,
    #[serde(default)]
    pub max_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerNode {
    pub id: String,
    pub name: String,
    /// Server id backing this node; empty while the node is still coming up.
    #[serde(default)]
    pub physical_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudServer {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub attached_volumes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudVolume {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub volume_type: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudFirewallRule {
    pub id: String,
    #[serde(default)]
    pub cidr: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudFirewall {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub inbound: Vec<CloudFirewallRule>,
    #[serde(default)]
    pub outbound: Vec<CloudFirewallRule>,
}

/// Authenticated session against one provider account.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;
    /// Stable composite id scoping every mirrored row to this account.
    fn account_id(&self) -> &str;
    fn email(&self) -> &str;
    fn project_id(&self) -> &str;

    /// Opaque metadata blob the registry persists per tenant; must round-trip
    /// through [`ProviderFactory::tenant_from_metadata`].
    fn tenant_metadata(&self, cluster: &str) -> String;

    async fn list_clusters(&self) -> Result<Vec<CloudCluster>>;
    async fn get_cluster(&self, id: &str) -> Result<CloudCluster>;
    async fn get_kubeconfig(&self, cluster: &str) -> Result<Vec<u8>>;
    async fn list_pools(&self, cluster: &str) -> Result<Vec<WorkerPool>>;
    async fn list_pool_nodes(&self, cluster: &str, pool: &str) -> Result<Vec<WorkerNode>>;
    async fn list_servers(&self) -> Result<Vec<CloudServer>>;
    async fn get_server(&self, id: &str) -> Result<CloudServer>;
    async fn list_volumes(&self) -> Result<Vec<CloudVolume>>;
    async fn list_firewalls(&self) -> Result<Vec<CloudFirewall>>;
}

/// Mints adapter sessions and rebuilds tenant handles from the opaque
/// metadata blob the registry mirror stores per cluster.
#[async_trait]
pub trait ProviderFactory: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Session from an already-stored account.
    async fn connect(
        &self,
        account: &AccountRecord,
        timeout: Duration,
    ) -> Result<Arc<dyn ProviderAdapter>>;

    /// First login with fresh credentials; bootstraps the account row.
    async fn login_account(
        &self,
        pool: &PgPool,
        email: &str,
        password: &str,
        project: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn ProviderAdapter>>;

    /// Re-authenticates and rebuilds a live tenant from persisted metadata.
    /// This is the expiry-refresh path.
    async fn tenant_from_metadata(
        &self,
        pool: &PgPool,
        metadata: &str,
        timeout: Duration,
    ) -> Result<Tenant>;
}

/// Factory lookup by provider tag. Populated once at boot.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<ProviderKind, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    pub fn get(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderFactory>> {
        self.factories
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::validation(format!("no factory registered for provider '{kind}'")))
    }

    pub fn factories(&self) -> impl Iterator<Item = &Arc<dyn ProviderFactory>> {
        self.factories.values()
    }
}

/// Live adapter sessions keyed by account email. An email can map to several
/// sessions when the same login exists under multiple projects.
#[derive(Default)]
pub struct ProviderAccounts {
    inner: DashMap<String, Vec<Arc<dyn ProviderAdapter>>>,
}

impl ProviderAccounts {
    pub fn insert(&self, adapter: Arc<dyn ProviderAdapter>) {
        self.inner
            .entry(adapter.email().to_string())
            .or_default()
            .push(adapter);
    }

    pub fn get(&self, email: &str) -> Vec<Arc<dyn ProviderAdapter>> {
        self.inner
            .get(email)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<Arc<dyn ProviderAdapter>> {
        self.inner
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Boot path: logs in every stored account with every registered factory.
/// Fails whole; the caller decides whether an empty session set is fatal.
#[instrument(skip(pool, providers), err)]
pub async fn connect_all(
    pool: &PgPool,
    providers: &ProviderRegistry,
    timeout: Duration,
) -> Result<ProviderAccounts> {
    let mut conn = pool.acquire().await.map_err(DbError::from)?;
    let records = Accounts::new(&mut conn).list().await?;
    drop(conn);

    let accounts = ProviderAccounts::default();
    for record in &records {
        for factory in providers.factories() {
            let adapter = factory.connect(record, timeout).await?;
            accounts.insert(adapter);
        }
    }
    Ok(accounts)
}
