use crate::db::errors::Result;
use crate::db::models::accounts::{AccountRecord, AccountUpsert};
use sqlx::PgConnection;
use tracing::instrument;

pub struct Accounts<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Accounts<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// First-login bootstrap: inserts the account if it is new, leaves an
    /// existing row untouched.
    #[instrument(skip(self, request), fields(account = %request.id), err)]
    pub async fn ensure(&mut self, request: &AccountUpsert) -> Result<()> {
        sqlx::query(
            "INSERT INTO accounts (id, email, password, project_id)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(&request.id)
        .bind(&request.email)
        .bind(&request.password)
        .bind(&request.project_id)
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }

    pub async fn get(&mut self, id: &str) -> Result<Option<AccountRecord>> {
        let record = sqlx::query_as::<_, AccountRecord>(
            "SELECT id, email, password, project_id, created_at, updated_at
             FROM accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(record)
    }

    pub async fn list(&mut self) -> Result<Vec<AccountRecord>> {
        let records = sqlx::query_as::<_, AccountRecord>(
            "SELECT id, email, password, project_id, created_at, updated_at
             FROM accounts ORDER BY id",
        )
        .fetch_all(&mut *self.db)
        .await?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_ensure_keeps_first_write(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Accounts::new(&mut conn);

        repo.ensure(&AccountUpsert {
            id: "42-default".to_string(),
            email: "ops@example.com".to_string(),
            password: "hunter2".to_string(),
            project_id: "default".to_string(),
        })
        .await
        .unwrap();

        // A later login with a rotated password must not clobber the stored row.
        repo.ensure(&AccountUpsert {
            id: "42-default".to_string(),
            email: "ops@example.com".to_string(),
            password: "rotated".to_string(),
            project_id: "default".to_string(),
        })
        .await
        .unwrap();

        let record = repo.get("42-default").await.unwrap().unwrap();
        assert_eq!(record.password, "hunter2");
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }
}
