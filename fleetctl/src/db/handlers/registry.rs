//! Registry mirror access: cluster handles and the aliases pointing at them.

use crate::db::errors::Result;
use crate::db::models::registry::{AliasRecord, ClusterRecord, ClusterUpsert};
use sqlx::PgConnection;
use tracing::instrument;

pub struct Clusters<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Clusters<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Persists a tenant handle: aliases first, then the cluster row. Running
    /// the same request twice leaves the mirror unchanged apart from
    /// `updated_at`.
    #[instrument(skip(self, request), fields(cluster = %request.name), err)]
    pub async fn upsert(&mut self, request: &ClusterUpsert) -> Result<()> {
        for alias in &request.aliases {
            sqlx::query(
                "INSERT INTO aliases (alias, cluster) VALUES ($1, $2)
                 ON CONFLICT (alias) DO UPDATE SET cluster = EXCLUDED.cluster",
            )
            .bind(alias)
            .bind(&request.name)
            .execute(&mut *self.db)
            .await?;
        }

        sqlx::query(
            "INSERT INTO clusters (name, provider, metadata, kubeconfig, expire)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (name) DO UPDATE SET
                 provider = EXCLUDED.provider,
                 metadata = EXCLUDED.metadata,
                 kubeconfig = EXCLUDED.kubeconfig,
                 expire = EXCLUDED.expire,
                 updated_at = NOW()",
        )
        .bind(&request.name)
        .bind(&request.provider)
        .bind(&request.metadata)
        .bind(&request.kubeconfig)
        .bind(request.expire)
        .execute(&mut *self.db)
        .await?;

        Ok(())
    }

    pub async fn get(&mut self, name: &str) -> Result<Option<ClusterRecord>> {
        let record = sqlx::query_as::<_, ClusterRecord>(
            "SELECT name, provider, metadata, kubeconfig, expire, created_at, updated_at
             FROM clusters WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(record)
    }

    pub async fn list(&mut self) -> Result<Vec<ClusterRecord>> {
        let records = sqlx::query_as::<_, ClusterRecord>(
            "SELECT name, provider, metadata, kubeconfig, expire, created_at, updated_at
             FROM clusters ORDER BY name",
        )
        .fetch_all(&mut *self.db)
        .await?;
        Ok(records)
    }

    pub async fn aliases(&mut self) -> Result<Vec<AliasRecord>> {
        let records = sqlx::query_as::<_, AliasRecord>(
            "SELECT alias, cluster FROM aliases ORDER BY alias",
        )
        .fetch_all(&mut *self.db)
        .await?;
        Ok(records)
    }

    pub async fn resolve_alias(&mut self, alias: &str) -> Result<Option<String>> {
        let cluster = sqlx::query_scalar::<_, String>(
            "SELECT cluster FROM aliases WHERE alias = $1",
        )
        .bind(alias)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(cluster)
    }

    /// Removes the cluster row and every alias pointing at it. Returns whether
    /// a cluster row actually existed.
    #[instrument(skip(self), err)]
    pub async fn delete(&mut self, name: &str) -> Result<bool> {
        sqlx::query("DELETE FROM aliases WHERE cluster = $1")
            .bind(name)
            .execute(&mut *self.db)
            .await?;
        let result = sqlx::query("DELETE FROM clusters WHERE name = $1")
            .bind(name)
            .execute(&mut *self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    fn sample(name: &str, aliases: &[&str]) -> ClusterUpsert {
        ClusterUpsert {
            name: name.to_string(),
            provider: "nimbus".to_string(),
            metadata: r#"{"account":"a1"}"#.to_string(),
            kubeconfig: "a2ZrZQ==".to_string(),
            expire: 1_999_999_999,
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_upsert_and_get_cluster(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Clusters::new(&mut conn);

        repo.upsert(&sample("prod-1", &["p1", "prod"])).await.unwrap();

        let record = repo.get("prod-1").await.unwrap().unwrap();
        assert_eq!(record.provider, "nimbus");
        assert_eq!(record.expire, 1_999_999_999);
        assert_eq!(repo.resolve_alias("p1").await.unwrap().as_deref(), Some("prod-1"));
        assert_eq!(repo.resolve_alias("prod").await.unwrap().as_deref(), Some("prod-1"));
        assert_eq!(repo.resolve_alias("nope").await.unwrap(), None);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_upsert_is_idempotent(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Clusters::new(&mut conn);

        repo.upsert(&sample("prod-1", &["p1"])).await.unwrap();
        repo.upsert(&sample("prod-1", &["p1"])).await.unwrap();

        assert_eq!(repo.list().await.unwrap().len(), 1);
        assert_eq!(repo.aliases().await.unwrap().len(), 1);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_alias_can_be_repointed(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Clusters::new(&mut conn);

        repo.upsert(&sample("prod-1", &["p"])).await.unwrap();
        repo.upsert(&sample("prod-2", &["p"])).await.unwrap();

        assert_eq!(repo.resolve_alias("p").await.unwrap().as_deref(), Some("prod-2"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_delete_removes_cluster_and_aliases(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Clusters::new(&mut conn);

        repo.upsert(&sample("prod-1", &["p1", "prod"])).await.unwrap();
        assert!(repo.delete("prod-1").await.unwrap());

        assert!(repo.get("prod-1").await.unwrap().is_none());
        assert!(repo.aliases().await.unwrap().is_empty());
        assert!(!repo.delete("prod-1").await.unwrap());
    }
}
