//! Physical servers and volume attachments.
//!
//! Server rows keep provider timestamps. On conflict only `status` and
//! `updated_at` move; `cluster` is owned by the pool-node sync, which
//! back-fills it point-wise, so a listing sync must not blank it out.

use crate::db::errors::Result;
use crate::db::models::resources::{ServerRow, VolumeAttachmentRow};
use sqlx::PgConnection;
use tracing::instrument;

pub struct Servers<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Servers<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, rows), fields(count = rows.len()), err)]
    pub async fn upsert_batch(&mut self, rows: &[ServerRow], batch_size: usize) -> Result<()> {
        for chunk in rows.chunks(batch_size.max(1)) {
            let mut ids = Vec::with_capacity(chunk.len());
            let mut accounts = Vec::with_capacity(chunk.len());
            let mut clusters = Vec::with_capacity(chunk.len());
            let mut statuses = Vec::with_capacity(chunk.len());
            let mut zones = Vec::with_capacity(chunk.len());
            let mut locked = Vec::with_capacity(chunk.len());
            let mut created = Vec::with_capacity(chunk.len());
            let mut updated = Vec::with_capacity(chunk.len());
            for row in chunk {
                ids.push(row.id.clone());
                accounts.push(row.account.clone());
                clusters.push(row.cluster.clone());
                statuses.push(row.status.clone());
                zones.push(row.zone.clone());
                locked.push(row.locked);
                created.push(row.created_at);
                updated.push(row.updated_at);
            }
            sqlx::query(
                "INSERT INTO servers (id, account, cluster, status, zone, locked, created_at, updated_at)
                 SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[],
                                      $5::text[], $6::bool[], $7::timestamptz[], $8::timestamptz[])
                 ON CONFLICT (id) DO UPDATE SET
                     status = EXCLUDED.status,
                     updated_at = EXCLUDED.updated_at",
            )
            .bind(&ids)
            .bind(&accounts)
            .bind(&clusters)
            .bind(&statuses)
            .bind(&zones)
            .bind(&locked)
            .bind(&created)
            .bind(&updated)
            .execute(&mut *self.db)
            .await?;
        }
        Ok(())
    }

    /// Point update used by the pool-node sync to tie a server to the cluster
    /// whose node runs on it.
    #[instrument(skip(self), err)]
    pub async fn set_cluster(&mut self, server: &str, cluster: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE servers SET cluster = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(server)
        .bind(cluster)
        .execute(&mut *self.db)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_by_account(&mut self, account: &str) -> Result<Vec<ServerRow>> {
        let rows = sqlx::query_as::<_, ServerRow>(
            "SELECT id, account, cluster, status, zone, locked, created_at, updated_at
             FROM servers WHERE account = $1 ORDER BY id",
        )
        .bind(account)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    pub async fn delete_by_account(&mut self, account: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM servers WHERE account = $1")
            .bind(account)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_by_cluster(&mut self, account: &str, cluster: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM servers WHERE account = $1 AND cluster = $2")
            .bind(account)
            .bind(cluster)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct VolumeAttachments<'c> {
    db: &'c mut PgConnection,
}

impl<'c> VolumeAttachments<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, rows), fields(count = rows.len()), err)]
    pub async fn upsert_batch(&mut self, rows: &[VolumeAttachmentRow], batch_size: usize) -> Result<()> {
        for chunk in rows.chunks(batch_size.max(1)) {
            let mut volumes = Vec::with_capacity(chunk.len());
            let mut accounts = Vec::with_capacity(chunk.len());
            let mut servers = Vec::with_capacity(chunk.len());
            for row in chunk {
                volumes.push(row.volume.clone());
                accounts.push(row.account.clone());
                servers.push(row.server.clone());
            }
            sqlx::query(
                "INSERT INTO volume_attachments (volume, account, server)
                 SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[])
                 ON CONFLICT (volume, server) DO UPDATE SET
                     account = EXCLUDED.account,
                     updated_at = NOW()",
            )
            .bind(&volumes)
            .bind(&accounts)
            .bind(&servers)
            .execute(&mut *self.db)
            .await?;
        }
        Ok(())
    }

    pub async fn list_by_server(&mut self, server: &str) -> Result<Vec<VolumeAttachmentRow>> {
        let rows = sqlx::query_as::<_, VolumeAttachmentRow>(
            "SELECT volume, account, server
             FROM volume_attachments WHERE server = $1 ORDER BY volume",
        )
        .bind(server)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    pub async fn delete_by_account(&mut self, account: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM volume_attachments WHERE account = $1")
            .bind(account)
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

    fn server(id: &str, status: &str) -> ServerRow {
        ServerRow {
            id: id.to_string(),
            account: "acc-1".to_string(),
            cluster: String::new(),
            status: status.to_string(),
            zone: "zone-a".to_string(),
            locked: false,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_conflict_updates_status_only(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Servers::new(&mut conn);

        repo.upsert_batch(&[server("s1", "ACTIVE")], 100).await.unwrap();
        repo.set_cluster("s1", "c1").await.unwrap();

        // Re-sync from the listing: status moves, cluster assignment survives.
        let mut resynced = server("s1", "REBOOTING");
        resynced.zone = "zone-b".to_string();
        repo.upsert_batch(&[resynced], 100).await.unwrap();

        let rows = repo.list_by_account("acc-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "REBOOTING");
        assert_eq!(rows[0].cluster, "c1");
        assert_eq!(rows[0].zone, "zone-a");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_set_cluster_on_missing_server(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Servers::new(&mut conn);
        assert_eq!(repo.set_cluster("ghost", "c1").await.unwrap(), 0);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_attachment_upsert(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = VolumeAttachments::new(&mut conn);

        let row = VolumeAttachmentRow {
            volume: "v1".to_string(),
            account: "acc-1".to_string(),
            server: "s1".to_string(),
        };
        repo.upsert_batch(&[row.clone()], 100).await.unwrap();
        repo.upsert_batch(&[row], 100).await.unwrap();

        assert_eq!(repo.list_by_server("s1").await.unwrap().len(), 1);
    }
}
