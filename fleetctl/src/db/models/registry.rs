//! Rows backing the tenant registry mirror.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Persisted form of a tenant handle. `kubeconfig` is base64; `metadata` is a
/// provider-specific JSON blob the registry treats as opaque.
#[derive(Debug, Clone, FromRow)]
pub struct ClusterRecord {
    pub name: String,
    pub provider: String,
    pub metadata: String,
    pub kubeconfig: String,
    /// Unix seconds after which the handle must be re-authenticated.
    /// Zero means the row predates expiry tracking and is treated as live.
    pub expire: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AliasRecord {
    pub alias: String,
    pub cluster: String,
}

/// Write request for joining (or refreshing) a tenant.
#[derive(Debug, Clone)]
pub struct ClusterUpsert {
    pub name: String,
    pub provider: String,
    pub metadata: String,
    pub kubeconfig: String,
    pub expire: i64,
    pub aliases: Vec<String>,
}
