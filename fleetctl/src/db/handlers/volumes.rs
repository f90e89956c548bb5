//! Cloud volumes and the pod-to-volume links harvested from tenants.

use crate::db::errors::Result;
use crate::db::models::resources::{VolumeLinkRow, VolumeRow};
use sqlx::PgConnection;
use tracing::instrument;

pub struct Volumes<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Volumes<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Same conflict policy as servers: only status and updated_at move.
    #[instrument(skip(self, rows), fields(count = rows.len()), err)]
    pub async fn upsert_batch(&mut self, rows: &[VolumeRow], batch_size: usize) -> Result<()> {
        for chunk in rows.chunks(batch_size.max(1)) {
            let mut ids = Vec::with_capacity(chunk.len());
            let mut accounts = Vec::with_capacity(chunk.len());
            let mut zones = Vec::with_capacity(chunk.len());
            let mut types = Vec::with_capacity(chunk.len());
            let mut statuses = Vec::with_capacity(chunk.len());
            let mut descriptions = Vec::with_capacity(chunk.len());
            let mut sizes = Vec::with_capacity(chunk.len());
            let mut created = Vec::with_capacity(chunk.len());
            let mut updated = Vec::with_capacity(chunk.len());
            for row in chunk {
                ids.push(row.id.clone());
                accounts.push(row.account.clone());
                zones.push(row.zone.clone());
                types.push(row.volume_type.clone());
                statuses.push(row.status.clone());
                descriptions.push(row.description.clone());
                sizes.push(row.size);
                created.push(row.created_at);
                updated.push(row.updated_at);
            }
            sqlx::query(
                "INSERT INTO volumes (id, account, zone, volume_type, status, description,
                                      size, created_at, updated_at)
                 SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::text[],
                                      $6::text[], $7::bigint[], $8::timestamptz[], $9::timestamptz[])
                 ON CONFLICT (id) DO UPDATE SET
                     status = EXCLUDED.status,
                     updated_at = EXCLUDED.updated_at",
            )
            .bind(&ids)
            .bind(&accounts)
            .bind(&zones)
            .bind(&types)
            .bind(&statuses)
            .bind(&descriptions)
            .bind(&sizes)
            .bind(&created)
            .bind(&updated)
            .execute(&mut *self.db)
            .await?;
        }
        Ok(())
    }

    pub async fn list_by_account(&mut self, account: &str) -> Result<Vec<VolumeRow>> {
        let rows = sqlx::query_as::<_, VolumeRow>(
            "SELECT id, account, zone, volume_type, status, description, size, created_at, updated_at
             FROM volumes WHERE account = $1 ORDER BY id",
        )
        .bind(account)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    pub async fn delete_by_account(&mut self, account: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM volumes WHERE account = $1")
            .bind(account)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct VolumeLinks<'c> {
    db: &'c mut PgConnection,
}

impl<'c> VolumeLinks<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, rows), fields(count = rows.len()), err)]
    pub async fn upsert_batch(&mut self, rows: &[VolumeLinkRow], batch_size: usize) -> Result<()> {
        for chunk in rows.chunks(batch_size.max(1)) {
            let mut pods = Vec::with_capacity(chunk.len());
            let mut clusters = Vec::with_capacity(chunk.len());
            let mut accounts = Vec::with_capacity(chunk.len());
            let mut volumes = Vec::with_capacity(chunk.len());
            let mut sizes = Vec::with_capacity(chunk.len());
            for row in chunk {
                pods.push(row.pod.clone());
                clusters.push(row.cluster.clone());
                accounts.push(row.account.clone());
                volumes.push(row.volume.clone());
                sizes.push(row.size);
            }
            sqlx::query(
                "INSERT INTO volume_cluster_links (pod, cluster, account, volume, size)
                 SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::bigint[])
                 ON CONFLICT (pod, cluster) DO UPDATE SET
                     account = EXCLUDED.account,
                     volume = EXCLUDED.volume,
                     size = EXCLUDED.size,
                     updated_at = NOW()",
            )
            .bind(&pods)
            .bind(&clusters)
            .bind(&accounts)
            .bind(&volumes)
            .bind(&sizes)
            .execute(&mut *self.db)
            .await?;
        }
        Ok(())
    }

    pub async fn list_by_cluster(&mut self, cluster: &str) -> Result<Vec<VolumeLinkRow>> {
        let rows = sqlx::query_as::<_, VolumeLinkRow>(
            "SELECT pod, cluster, account, volume, size
             FROM volume_cluster_links WHERE cluster = $1 ORDER BY pod",
        )
        .bind(cluster)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    pub async fn delete_by_account(&mut self, account: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM volume_cluster_links WHERE account = $1")
            .bind(account)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_by_cluster(&mut self, account: &str, cluster: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM volume_cluster_links WHERE account = $1 AND cluster = $2",
        )
        .bind(account)
        .bind(cluster)
        .execute(&mut *self.db)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sqlx::PgPool;

    fn volume(id: &str, status: &str) -> VolumeRow {
        VolumeRow {
            id: id.to_string(),
            account: "acc-1".to_string(),
            zone: "zone-a".to_string(),
            volume_type: "ssd".to_string(),
            status: status.to_string(),
            description: String::new(),
            size: 20,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_volume_conflict_keeps_size(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Volumes::new(&mut conn);

        repo.upsert_batch(&[volume("v1", "available")], 100).await.unwrap();
        let mut resynced = volume("v1", "in-use");
        resynced.size = 40;
        repo.upsert_batch(&[resynced], 100).await.unwrap();

        let rows = repo.list_by_account("acc-1").await.unwrap();
        assert_eq!(rows[0].status, "in-use");
        assert_eq!(rows[0].size, 20);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_link_key_is_pod_and_cluster(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = VolumeLinks::new(&mut conn);

        let link = |cluster: &str| VolumeLinkRow {
            pod: "db-0".to_string(),
            cluster: cluster.to_string(),
            account: "acc-1".to_string(),
            volume: "v1".to_string(),
            size: 10,
        };
        // Same pod name in two clusters must produce two rows.
        repo.upsert_batch(&[link("c1"), link("c2")], 100).await.unwrap();
        repo.upsert_batch(&[link("c1")], 100).await.unwrap();

        assert_eq!(repo.list_by_cluster("c1").await.unwrap().len(), 1);
        assert_eq!(repo.list_by_cluster("c2").await.unwrap().len(), 1);
        assert_eq!(repo.delete_by_cluster("acc-1", "c1").await.unwrap(), 1);
    }
}
