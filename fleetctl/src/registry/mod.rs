//! Tenant registry: the in-process cache of authenticated cluster handles,
//! mirrored to Postgres so handles survive restarts.
//!
//! Lookups go cache-first, fall back to a full mirror load, then to alias
//! resolution (one hop, never chained). Expiry is checked on every cache hit
//! and refreshed synchronously through the owning provider; concurrent picks
//! of the same stale name may both refresh, last write wins.

pub mod tenant;

pub use tenant::Tenant;

use crate::db::errors::DbError;
use crate::db::handlers::registry::Clusters;
use crate::errors::{Error, Result};
use crate::provider::ProviderRegistry;
use chrono::Utc;
use dashmap::DashMap;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Listing row for `cluster list`.
#[derive(Debug, Clone)]
pub struct TenantEntry {
    pub name: String,
    pub provider: String,
    pub aliases: Vec<String>,
    pub expire: i64,
}

pub struct TenantRegistry {
    pool: PgPool,
    providers: Arc<ProviderRegistry>,
    refresh_timeout: Duration,
    cache: DashMap<String, Arc<Tenant>>,
}

impl TenantRegistry {
    pub fn new(pool: PgPool, providers: Arc<ProviderRegistry>, refresh_timeout: Duration) -> Self {
        Self {
            pool,
            providers,
            refresh_timeout,
            cache: DashMap::new(),
        }
    }

    /// Persists the handle and only then installs it in the cache, so a cache
    /// entry always has a mirror row behind it.
    #[instrument(skip(self, tenant), fields(cluster = tenant.name()), err)]
    pub async fn join(&self, tenant: Tenant) -> Result<Arc<Tenant>> {
        let request = tenant.to_upsert();
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Clusters::new(&mut conn).upsert(&request).await?;
        drop(conn);

        let tenant = Arc::new(tenant);
        self.cache.insert(tenant.name().to_string(), tenant.clone());
        Ok(tenant)
    }

    /// Idempotent: detaching a cluster that was never joined is a no-op.
    #[instrument(skip(self), err)]
    pub async fn detach(&self, name: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Clusters::new(&mut conn).delete(name).await?;
        drop(conn);

        self.cache.remove(name);
        Ok(())
    }

    /// Resolves a name or alias to a live handle.
    #[instrument(skip(self), err)]
    pub async fn pick(&self, name: &str) -> Result<Arc<Tenant>> {
        if let Some(tenant) = self.lookup(name).await? {
            return Ok(tenant);
        }
        self.load_all().await?;
        if let Some(tenant) = self.lookup(name).await? {
            return Ok(tenant);
        }

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let target = Clusters::new(&mut conn).resolve_alias(name).await?;
        drop(conn);

        if let Some(target) = target {
            // One hop only; an alias pointing at another alias stays dead.
            if target != name {
                if let Some(tenant) = self.lookup(&target).await? {
                    return Ok(tenant);
                }
            }
        }
        Err(Error::not_found("cluster", name))
    }

    /// Cache hit with the expiry check applied. A stale entry is refreshed
    /// synchronously; the caller never receives an expired handle.
    async fn lookup(&self, name: &str) -> Result<Option<Arc<Tenant>>> {
        let cached = self.cache.get(name).map(|entry| entry.value().clone());
        let Some(tenant) = cached else {
            return Ok(None);
        };
        if !tenant.is_expired(Utc::now().timestamp()) {
            return Ok(Some(tenant));
        }
        debug!(cluster = name, "handle expired, re-authenticating");
        let refreshed = self.refresh(&tenant).await?;
        Ok(Some(refreshed))
    }

    async fn refresh(&self, stale: &Tenant) -> Result<Arc<Tenant>> {
        let factory = self.providers.get(stale.kind())?;
        let fresh = factory
            .tenant_from_metadata(&self.pool, stale.metadata(), self.refresh_timeout)
            .await?;
        self.join(fresh).await
    }

    /// Cold start: pulls every mirror row into the cache. Expired rows are
    /// re-authenticated through their provider; rows that cannot be rebuilt
    /// are skipped with a warning rather than failing the whole load.
    #[instrument(skip(self), err)]
    pub async fn load_all(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let mut repo = Clusters::new(&mut conn);
        let records = repo.list().await?;
        let aliases = repo.aliases().await?;
        drop(conn);

        let mut alias_map: HashMap<String, Vec<String>> = HashMap::new();
        for alias in aliases {
            alias_map.entry(alias.cluster).or_default().push(alias.alias);
        }

        let now = Utc::now().timestamp();
        for record in records {
            let live_in_cache = self
                .cache
                .get(&record.name)
                .map(|entry| !entry.value().is_expired(now))
                .unwrap_or(false);
            if live_in_cache {
                continue;
            }

            if record.expire > 0 && record.expire < now {
                let result = async {
                    let kind = record
                        .provider
                        .parse()
                        .map_err(|e: crate::types::UnknownProvider| Error::validation(e.to_string()))?;
                    let factory = self.providers.get(kind)?;
                    let fresh = factory
                        .tenant_from_metadata(&self.pool, &record.metadata, self.refresh_timeout)
                        .await?;
                    self.join(fresh).await
                }
                .await;
                if let Err(e) = result {
                    warn!(cluster = %record.name, error = %e, "could not re-authenticate expired handle");
                }
                continue;
            }

            let record_aliases = alias_map.remove(&record.name).unwrap_or_default();
            match Tenant::from_record(&record, record_aliases).await {
                Ok(tenant) => {
                    self.cache.insert(record.name.clone(), Arc::new(tenant));
                }
                Err(e) => {
                    warn!(cluster = %record.name, error = %e, "skipping unloadable registry row");
                }
            }
        }
        Ok(())
    }

    /// Listing straight from the mirror, so it also shows handles that never
    /// made it into the cache.
    pub async fn list(&self) -> Result<Vec<TenantEntry>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let mut repo = Clusters::new(&mut conn);
        let records = repo.list().await?;
        let aliases = repo.aliases().await?;
        drop(conn);

        let mut alias_map: HashMap<String, Vec<String>> = HashMap::new();
        for alias in aliases {
            alias_map.entry(alias.cluster).or_default().push(alias.alias);
        }

        Ok(records
            .into_iter()
            .map(|record| TenantEntry {
                aliases: alias_map.remove(&record.name).unwrap_or_default(),
                name: record.name,
                provider: record.provider,
                expire: record.expire,
            })
            .collect())
    }
}
