//! Rows for the mirrored cloud resource graph.
//!
//! These are write-mostly: the sync engine upserts them in chunks and the
//! console reads them back for listings. Foreign keys are plain text ids;
//! the provider is the source of truth, the mirror never enforces shape.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CloudClusterRow {
    pub id: String,
    pub account: String,
    pub name: String,
    pub status: String,
    /// Comma-joined provider tags; doubles as the alias source on join.
    pub tags: String,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PoolRow {
    pub id: String,
    pub account: String,
    pub cluster: String,
    pub name: String,
    pub zone: String,
    pub status: String,
    pub autoscale_group: String,
    pub autoscaling_enabled: bool,
    pub min_size: i64,
    pub max_size: i64,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PoolNodeRow {
    pub id: String,
    pub account: String,
    pub cluster: String,
    pub pool: String,
    /// Physical server backing this node, when the provider reports one.
    pub server: String,
    pub name: String,
    pub status: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ServerRow {
    pub id: String,
    pub account: String,
    pub cluster: String,
    pub status: String,
    pub zone: String,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct VolumeRow {
    pub id: String,
    pub account: String,
    pub zone: String,
    pub volume_type: String,
    pub status: String,
    pub description: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct VolumeAttachmentRow {
    pub volume: String,
    pub account: String,
    pub server: String,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct VolumeLinkRow {
    pub pod: String,
    pub cluster: String,
    pub account: String,
    pub volume: String,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct FirewallRow {
    pub id: String,
    pub account: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct FirewallRuleRow {
    pub id: String,
    pub account: String,
    pub firewall: String,
    pub direction: String,
    pub cidr: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
