//! Synchronization engine: mirrors a provider account's resource graph into
//! Postgres with idempotent chunked upserts.
//!
//! Syncs never prune: a resource that disappears upstream keeps its mirror
//! row until `clean` or `detach_cluster` removes it.

use crate::db::errors::DbError;
use crate::db::handlers::cloud_clusters::CloudClusters;
use crate::db::handlers::firewalls::{FirewallRules, Firewalls};
use crate::db::handlers::pools::{PoolNodes, Pools};
use crate::db::handlers::servers::{Servers, VolumeAttachments};
use crate::db::handlers::volumes::{VolumeLinks, Volumes};
use crate::db::models::resources::{
    CloudClusterRow, FirewallRow, FirewallRuleRow, PoolNodeRow, PoolRow, ServerRow,
    VolumeAttachmentRow, VolumeLinkRow, VolumeRow,
};
use crate::errors::Result;
use crate::kube_api::quantity_bytes;
use crate::provider::{CloudServer, ProviderAdapter};
use crate::registry::Tenant;
use k8s_openapi::api::core::v1::{PersistentVolume, Pod};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{instrument, warn};

pub struct SyncEngine {
    pool: PgPool,
    batch_size: usize,
}

impl SyncEngine {
    pub fn new(pool: PgPool, batch_size: usize) -> Self {
        Self { pool, batch_size }
    }

    /// Mirrors the account's managed-cluster listing. Returns the row count.
    #[instrument(skip(self, provider), fields(account = provider.account_id()), err)]
    pub async fn sync_clusters(&self, provider: &dyn ProviderAdapter) -> Result<usize> {
        let clusters = provider.list_clusters().await?;
        let rows: Vec<CloudClusterRow> = clusters
            .iter()
            .map(|c| CloudClusterRow {
                id: c.id.clone(),
                account: provider.account_id().to_string(),
                name: c.name.clone(),
                status: c.status.clone(),
                tags: c.tags.join(","),
                locked: true,
            })
            .collect();

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        CloudClusters::new(&mut conn)
            .upsert_batch(&rows, self.batch_size)
            .await?;
        Ok(rows.len())
    }

    /// Mirrors the server listing and harvests volume attachments from it.
    /// Attachment failures are logged, not fatal; the server rows already
    /// landed and the next sync retries.
    #[instrument(skip(self, provider), fields(account = provider.account_id()), err)]
    pub async fn sync_servers(&self, provider: &dyn ProviderAdapter) -> Result<usize> {
        let servers = provider.list_servers().await?;
        let account = provider.account_id();

        let rows: Vec<ServerRow> = servers.iter().map(|s| server_row(account, s)).collect();
        let attachments: Vec<VolumeAttachmentRow> = servers
            .iter()
            .flat_map(|s| {
                s.attached_volumes.iter().map(|volume| VolumeAttachmentRow {
                    volume: volume.clone(),
                    account: account.to_string(),
                    server: s.id.clone(),
                })
            })
            .collect();

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Servers::new(&mut conn).upsert_batch(&rows, self.batch_size).await?;
        if let Err(e) = VolumeAttachments::new(&mut conn)
            .upsert_batch(&attachments, self.batch_size)
            .await
        {
            warn!(account, error = %e, "volume attachment sync failed");
        }
        Ok(rows.len())
    }

    /// Re-reads one server and refreshes its attachment rows.
    #[instrument(skip(self, provider), fields(account = provider.account_id()), err)]
    pub async fn sync_server_attachments(
        &self,
        provider: &dyn ProviderAdapter,
        server: &str,
    ) -> Result<usize> {
        let server = provider.get_server(server).await?;
        let rows: Vec<VolumeAttachmentRow> = server
            .attached_volumes
            .iter()
            .map(|volume| VolumeAttachmentRow {
                volume: volume.clone(),
                account: provider.account_id().to_string(),
                server: server.id.clone(),
            })
            .collect();

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        VolumeAttachments::new(&mut conn)
            .upsert_batch(&rows, self.batch_size)
            .await?;
        Ok(rows.len())
    }

    #[instrument(skip(self, provider), fields(account = provider.account_id()), err)]
    pub async fn sync_volumes(&self, provider: &dyn ProviderAdapter) -> Result<usize> {
        let volumes = provider.list_volumes().await?;
        let rows: Vec<VolumeRow> = volumes
            .iter()
            .map(|v| VolumeRow {
                id: v.id.clone(),
                account: provider.account_id().to_string(),
                zone: v.zone.clone(),
                volume_type: v.volume_type.clone(),
                status: v.status.clone(),
                description: v.description.clone(),
                size: v.size,
                created_at: v.created_at,
                updated_at: v.updated_at,
            })
            .collect();

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Volumes::new(&mut conn).upsert_batch(&rows, self.batch_size).await?;
        Ok(rows.len())
    }

    /// Firewalls flatten into a firewall row plus one rule row per direction.
    #[instrument(skip(self, provider), fields(account = provider.account_id()), err)]
    pub async fn sync_firewalls(&self, provider: &dyn ProviderAdapter) -> Result<usize> {
        let firewalls = provider.list_firewalls().await?;
        let account = provider.account_id();

        let mut fw_rows = Vec::with_capacity(firewalls.len());
        let mut rule_rows = Vec::new();
        for fw in &firewalls {
            fw_rows.push(FirewallRow {
                id: fw.id.clone(),
                account: account.to_string(),
                created_at: fw.created_at,
                updated_at: fw.updated_at,
            });
            for (direction, rules) in [("ingress", &fw.inbound), ("egress", &fw.outbound)] {
                for rule in rules {
                    rule_rows.push(FirewallRuleRow {
                        id: rule.id.clone(),
                        account: account.to_string(),
                        firewall: fw.id.clone(),
                        direction: direction.to_string(),
                        cidr: rule.cidr.clone(),
                        created_at: rule.created_at,
                        updated_at: rule.updated_at,
                    });
                }
            }
        }

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Firewalls::new(&mut conn).upsert_batch(&fw_rows, self.batch_size).await?;
        FirewallRules::new(&mut conn)
            .upsert_batch(&rule_rows, self.batch_size)
            .await?;
        Ok(fw_rows.len())
    }

    #[instrument(skip(self, provider), fields(account = provider.account_id()), err)]
    pub async fn sync_pools(&self, provider: &dyn ProviderAdapter, cluster: &str) -> Result<usize> {
        let pools = provider.list_pools(cluster).await?;
        let rows: Vec<PoolRow> = pools
            .iter()
            .map(|p| PoolRow {
                id: p.id.clone(),
                account: provider.account_id().to_string(),
                cluster: cluster.to_string(),
                name: p.name.clone(),
                zone: p.zone.clone(),
                status: p.status.clone(),
                autoscale_group: p.autoscale_group.clone(),
                autoscaling_enabled: p.autoscaling_enabled,
                min_size: p.min_size,
                max_size: p.max_size,
            })
            .collect();

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Pools::new(&mut conn).upsert_batch(&rows, self.batch_size).await?;
        Ok(rows.len())
    }

    /// Mirrors one pool's nodes and back-fills `servers.cluster` for every
    /// node that reports its backing server, tying the physical inventory to
    /// the cluster that runs on it.
    #[instrument(skip(self, provider), fields(account = provider.account_id()), err)]
    pub async fn sync_pool_nodes(
        &self,
        provider: &dyn ProviderAdapter,
        cluster: &str,
        pool: &str,
    ) -> Result<usize> {
        let nodes = provider.list_pool_nodes(cluster, pool).await?;
        let account = provider.account_id();

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let mut rows = Vec::with_capacity(nodes.len());
        for node in &nodes {
            if !node.physical_id.is_empty() {
                Servers::new(&mut conn)
                    .set_cluster(&node.physical_id, cluster)
                    .await?;
            }
            rows.push(PoolNodeRow {
                id: node.id.clone(),
                account: account.to_string(),
                cluster: cluster.to_string(),
                pool: pool.to_string(),
                server: node.physical_id.clone(),
                name: node.name.clone(),
                status: node.status.clone(),
                reason: node.status_reason.clone(),
            });
        }
        PoolNodes::new(&mut conn).upsert_batch(&rows, self.batch_size).await?;
        Ok(rows.len())
    }

    /// Walks a tenant's pods and persistent volumes, linking each pod to the
    /// cloud volume behind its claim.
    #[instrument(skip(self, tenant), fields(cluster = tenant.name()), err)]
    pub async fn link_tenant_volumes(&self, account: &str, tenant: &Tenant) -> Result<usize> {
        let pods = tenant.kube().list_pods("").await?;
        let pvs = tenant.kube().list_persistent_volumes().await?;
        let rows = collect_volume_links(account, tenant.name(), &pods, &pvs);

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        VolumeLinks::new(&mut conn).upsert_batch(&rows, self.batch_size).await?;
        Ok(rows.len())
    }

    pub async fn mirrored_clusters(&self, account: &str) -> Result<Vec<CloudClusterRow>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Ok(CloudClusters::new(&mut conn).list_by_account(account).await?)
    }

    pub async fn mirrored_pools(&self, cluster: &str) -> Result<Vec<PoolRow>> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        Ok(Pools::new(&mut conn).list_by_cluster(cluster).await?)
    }

    /// Drops every mirrored row for the account. Children go first so a
    /// failure part-way leaves no orphans pointing at deleted parents.
    #[instrument(skip(self), err)]
    pub async fn clean(&self, account: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        VolumeLinks::new(&mut conn).delete_by_account(account).await?;
        VolumeAttachments::new(&mut conn).delete_by_account(account).await?;
        PoolNodes::new(&mut conn).delete_by_account(account).await?;
        Pools::new(&mut conn).delete_by_account(account).await?;
        Servers::new(&mut conn).delete_by_account(account).await?;
        Volumes::new(&mut conn).delete_by_account(account).await?;
        FirewallRules::new(&mut conn).delete_by_account(account).await?;
        Firewalls::new(&mut conn).delete_by_account(account).await?;
        CloudClusters::new(&mut conn).delete_by_account(account).await?;
        Ok(())
    }

    /// Removes one cluster's mirrored footprint: volume links, pool nodes,
    /// servers, then the cluster row itself. Pool and volume listings are
    /// account-wide and stay.
    #[instrument(skip(self), err)]
    pub async fn detach_cluster(
        &self,
        account: &str,
        cluster_id: &str,
        cluster_name: &str,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        VolumeLinks::new(&mut conn)
            .delete_by_cluster(account, cluster_name)
            .await?;
        PoolNodes::new(&mut conn)
            .delete_by_cluster(account, cluster_id)
            .await?;
        Servers::new(&mut conn)
            .delete_by_cluster(account, cluster_id)
            .await?;
        CloudClusters::new(&mut conn).delete(account, cluster_id).await?;
        Ok(())
    }
}

fn server_row(account: &str, server: &CloudServer) -> ServerRow {
    ServerRow {
        id: server.id.clone(),
        account: account.to_string(),
        cluster: String::new(),
        status: server.status.clone(),
        zone: server.zone.clone(),
        locked: server.locked,
        created_at: server.created_at,
        updated_at: server.updated_at,
    }
}

/// Pure pod-to-volume walk: claim name -> persistent volume -> CSI handle.
/// Deduped on (pod, cluster) since that is the link table's key; a pod with
/// several claims keeps the last one seen.
fn collect_volume_links(
    account: &str,
    cluster: &str,
    pods: &[Pod],
    pvs: &[PersistentVolume],
) -> Vec<VolumeLinkRow> {
    let mut by_claim: HashMap<String, (String, i64)> = HashMap::new();
    for pv in pvs {
        let Some(spec) = &pv.spec else { continue };
        let Some(claim) = spec.claim_ref.as_ref().and_then(|c| c.name.clone()) else {
            continue;
        };
        let Some(handle) = spec.csi.as_ref().map(|c| c.volume_handle.clone()) else {
            continue;
        };
        let size = spec
            .capacity
            .as_ref()
            .and_then(|c| c.get("storage"))
            .map(quantity_bytes)
            .unwrap_or(0);
        by_claim.insert(claim, (handle, size));
    }

    let mut links: HashMap<String, VolumeLinkRow> = HashMap::new();
    for pod in pods {
        let Some(pod_name) = pod.metadata.name.clone() else { continue };
        let Some(spec) = &pod.spec else { continue };
        let Some(volumes) = &spec.volumes else { continue };
        for volume in volumes {
            let Some(pvc) = &volume.persistent_volume_claim else { continue };
            if let Some((handle, size)) = by_claim.get(&pvc.claim_name) {
                links.insert(
                    pod_name.clone(),
                    VolumeLinkRow {
                        pod: pod_name.clone(),
                        cluster: cluster.to_string(),
                        account: account.to_string(),
                        volume: handle.clone(),
                        size: *size,
                    },
                );
            }
        }
    }
    links.into_values().collect()
}
