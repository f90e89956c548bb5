//! Worker pools and their nodes.

use crate::db::errors::Result;
use crate::db::models::resources::{PoolNodeRow, PoolRow};
use sqlx::PgConnection;
use tracing::instrument;

pub struct Pools<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Pools<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, rows), fields(count = rows.len()), err)]
    pub async fn upsert_batch(&mut self, rows: &[PoolRow], batch_size: usize) -> Result<()> {
        for chunk in rows.chunks(batch_size.max(1)) {
            let mut ids = Vec::with_capacity(chunk.len());
            let mut accounts = Vec::with_capacity(chunk.len());
            let mut clusters = Vec::with_capacity(chunk.len());
            let mut names = Vec::with_capacity(chunk.len());
            let mut zones = Vec::with_capacity(chunk.len());
            let mut statuses = Vec::with_capacity(chunk.len());
            let mut groups = Vec::with_capacity(chunk.len());
            let mut autoscaling = Vec::with_capacity(chunk.len());
            let mut min_sizes = Vec::with_capacity(chunk.len());
            let mut max_sizes = Vec::with_capacity(chunk.len());
            for row in chunk {
                ids.push(row.id.clone());
                accounts.push(row.account.clone());
                clusters.push(row.cluster.clone());
                names.push(row.name.clone());
                zones.push(row.zone.clone());
                statuses.push(row.status.clone());
                groups.push(row.autoscale_group.clone());
                autoscaling.push(row.autoscaling_enabled);
                min_sizes.push(row.min_size);
                max_sizes.push(row.max_size);
            }
            sqlx::query(
                "INSERT INTO pools (id, account, cluster, name, zone, status,
                                    autoscale_group, autoscaling_enabled, min_size, max_size)
                 SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::text[],
                                      $6::text[], $7::text[], $8::bool[], $9::bigint[], $10::bigint[])
                 ON CONFLICT (id) DO UPDATE SET
                     account = EXCLUDED.account,
                     cluster = EXCLUDED.cluster,
                     name = EXCLUDED.name,
                     zone = EXCLUDED.zone,
                     status = EXCLUDED.status,
                     autoscale_group = EXCLUDED.autoscale_group,
                     autoscaling_enabled = EXCLUDED.autoscaling_enabled,
                     min_size = EXCLUDED.min_size,
                     max_size = EXCLUDED.max_size,
                     updated_at = NOW()",
            )
            .bind(&ids)
            .bind(&accounts)
            .bind(&clusters)
            .bind(&names)
            .bind(&zones)
            .bind(&statuses)
            .bind(&groups)
            .bind(&autoscaling)
            .bind(&min_sizes)
            .bind(&max_sizes)
            .execute(&mut *self.db)
            .await?;
        }
        Ok(())
    }

    pub async fn list_by_cluster(&mut self, cluster: &str) -> Result<Vec<PoolRow>> {
        let rows = sqlx::query_as::<_, PoolRow>(
            "SELECT id, account, cluster, name, zone, status,
                    autoscale_group, autoscaling_enabled, min_size, max_size
             FROM pools WHERE cluster = $1 ORDER BY id",
        )
        .bind(cluster)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    pub async fn delete_by_account(&mut self, account: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM pools WHERE account = $1")
            .bind(account)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

pub struct PoolNodes<'c> {
    db: &'c mut PgConnection,
}

impl<'c> PoolNodes<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    #[instrument(skip(self, rows), fields(count = rows.len()), err)]
    pub async fn upsert_batch(&mut self, rows: &[PoolNodeRow], batch_size: usize) -> Result<()> {
        for chunk in rows.chunks(batch_size.max(1)) {
            let mut ids = Vec::with_capacity(chunk.len());
            let mut accounts = Vec::with_capacity(chunk.len());
            let mut clusters = Vec::with_capacity(chunk.len());
            let mut pools = Vec::with_capacity(chunk.len());
            let mut servers = Vec::with_capacity(chunk.len());
            let mut names = Vec::with_capacity(chunk.len());
            let mut statuses = Vec::with_capacity(chunk.len());
            let mut reasons = Vec::with_capacity(chunk.len());
            for row in chunk {
                ids.push(row.id.clone());
                accounts.push(row.account.clone());
                clusters.push(row.cluster.clone());
                pools.push(row.pool.clone());
                servers.push(row.server.clone());
                names.push(row.name.clone());
                statuses.push(row.status.clone());
                reasons.push(row.reason.clone());
            }
            sqlx::query(
                "INSERT INTO pool_nodes (id, account, cluster, pool, server, name, status, reason)
                 SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[],
                                      $5::text[], $6::text[], $7::text[], $8::text[])
                 ON CONFLICT (id) DO UPDATE SET
                     account = EXCLUDED.account,
                     cluster = EXCLUDED.cluster,
                     pool = EXCLUDED.pool,
                     server = EXCLUDED.server,
                     name = EXCLUDED.name,
                     status = EXCLUDED.status,
                     reason = EXCLUDED.reason,
                     updated_at = NOW()",
            )
            .bind(&ids)
            .bind(&accounts)
            .bind(&clusters)
            .bind(&pools)
            .bind(&servers)
            .bind(&names)
            .bind(&statuses)
            .bind(&reasons)
            .execute(&mut *self.db)
            .await?;
        }
        Ok(())
    }

    pub async fn list_by_pool(&mut self, pool: &str) -> Result<Vec<PoolNodeRow>> {
        let rows = sqlx::query_as::<_, PoolNodeRow>(
            "SELECT id, account, cluster, pool, server, name, status, reason
             FROM pool_nodes WHERE pool = $1 ORDER BY id",
        )
        .bind(pool)
        .fetch_all(&mut *self.db)
        .await?;
        Ok(rows)
    }

    pub async fn delete_by_account(&mut self, account: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM pool_nodes WHERE account = $1")
            .bind(account)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_by_cluster(&mut self, account: &str, cluster: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM pool_nodes WHERE account = $1 AND cluster = $2")
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
    use sqlx::PgPool;

    fn pool_row(id: &str) -> PoolRow {
        PoolRow {
            id: id.to_string(),
            account: "acc-1".to_string(),
            cluster: "c1".to_string(),
            name: format!("pool-{id}"),
            zone: "zone-a".to_string(),
            status: "ACTIVE".to_string(),
            autoscale_group: String::new(),
            autoscaling_enabled: false,
            min_size: 1,
            max_size: 5,
        }
    }

    fn node_row(id: &str, server: &str) -> PoolNodeRow {
        PoolNodeRow {
            id: id.to_string(),
            account: "acc-1".to_string(),
            cluster: "c1".to_string(),
            pool: "p1".to_string(),
            server: server.to_string(),
            name: format!("node-{id}"),
            status: "Ready".to_string(),
            reason: String::new(),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_pool_upsert_batch(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Pools::new(&mut conn);

        repo.upsert_batch(&[pool_row("p1"), pool_row("p2")], 100).await.unwrap();
        let mut updated = pool_row("p2");
        updated.status = "SCALING".to_string();
        repo.upsert_batch(&[updated], 100).await.unwrap();

        let rows = repo.list_by_cluster("c1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].status, "SCALING");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_node_delete_by_cluster(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = PoolNodes::new(&mut conn);

        let mut elsewhere = node_row("n3", "s3");
        elsewhere.cluster = "c2".to_string();
        repo.upsert_batch(&[node_row("n1", "s1"), node_row("n2", ""), elsewhere], 2)
            .await
            .unwrap();

        assert_eq!(repo.delete_by_cluster("acc-1", "c1").await.unwrap(), 2);
        assert_eq!(repo.list_by_pool("p1").await.unwrap().len(), 1);
    }
}
