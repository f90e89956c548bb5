//! Mirror of the provider's managed-cluster listing.

use crate::db::errors::Result;
use crate::db::models::resources::CloudClusterRow;
use sqlx::PgConnection;
use tracing::instrument;

pub struct CloudClusters<'c> {
    db: &'c mut PgConnection,
}

impl<'c> CloudClusters<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Chunked multi-row upsert; a conflicting id gets all columns replaced.
    #[instrument(skip(self, rows), fields(count = rows.len()), err)]
    pub async fn upsert_batch(&mut self, rows: &[CloudClusterRow], batch_size: usize) -> Result<()> {
        for chunk in rows.chunks(batch_size.max(1)) {
            let mut ids = Vec::with_capacity(chunk.len());
            let mut accounts = Vec::with_capacity(chunk.len());
            let mut names = Vec::with_capacity(chunk.len());
            let mut statuses = Vec::with_capacity(chunk.len());
            let mut tags = Vec::with_capacity(chunk.len());
            let mut locked = Vec::with_capacity(chunk.len());
            for row in chunk {
                ids.push(row.id.clone());
                accounts.push(row.account.clone());
                names.push(row.name.clone());
                statuses.push(row.status.clone());
                tags.push(row.tags.clone());
                locked.push(row.locked);
            }
            sqlx::query(
                "INSERT INTO cloud_clusters (id, account, name, status, tags, locked)
                 SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::text[], $6::bool[])
                 ON CONFLICT (id) DO UPDATE SET
                     account = EXCLUDED.account,
                     name = EXCLUDED.name,
                     status = EXCLUDED.status,
                     tags = EXCLUDED.tags,
                     locked = EXCLUDED.locked,
                     updated_at = NOW()",
            )
            .bind(&ids)
            .bind(&accounts)
            .bind(&names)
            .bind(&statuses)
            .bind(&tags)
            .bind(&locked)
            .execute(&mut *self.db)
            .await?;
        }
        Ok(())
    }

    pub async fn list_by_account(&mut self, account: &str) -> Result<Vec<CloudClusterRow>> {
        let rows = sqlx::query_as::<_, CloudClusterRow>(
            "SELECT id, account, name, status, tags, locked
             FROM cloud_clusters WHERE account = $1 ORDER BY id",
        )
        .bind(account)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    pub async fn delete_by_account(&mut self, account: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cloud_clusters WHERE account = $1")
            .bind(account)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete(&mut self, account: &str, id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cloud_clusters WHERE account = $1 AND id = $2")
            .bind(account)
            .bind(id)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    fn row(id: &str, status: &str) -> CloudClusterRow {
        CloudClusterRow {
            id: id.to_string(),
            account: "acc-1".to_string(),
            name: format!("cluster-{id}"),
            status: status.to_string(),
            tags: "edge,eu".to_string(),
            locked: true,
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_upsert_batch_replaces_on_conflict(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = CloudClusters::new(&mut conn);

        repo.upsert_batch(&[row("c1", "PROVISIONING"), row("c2", "PROVISIONED")], 1)
            .await
            .unwrap();
        repo.upsert_batch(&[row("c1", "PROVISIONED")], 100).await.unwrap();

        let rows = repo.list_by_account("acc-1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, "PROVISIONED");
        assert_eq!(rows[1].status, "PROVISIONED");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_delete_scopes_to_account(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = CloudClusters::new(&mut conn);

        let mut other = row("c9", "PROVISIONED");
        other.account = "acc-2".to_string();
        repo.upsert_batch(&[row("c1", "PROVISIONED"), other], 100).await.unwrap();

        assert_eq!(repo.delete_by_account("acc-1").await.unwrap(), 1);
        assert_eq!(repo.list_by_account("acc-2").await.unwrap().len(), 1);
    }
}
