use crate::db::errors::Result;
use crate::db::models::settings::SettingRecord;
use sqlx::PgConnection;

pub struct Settings<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Settings<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    pub async fn get(&mut self, name: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>(
            "SELECT value FROM settings WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&mut *self.db)
        .await?;
        Ok(value)
    }

    pub async fn set(&mut self, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO settings (name, value) VALUES ($1, $2)
             ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(name)
        .bind(value)
        .execute(&mut *self.db)
        .await?;
        Ok(())
    }

    pub async fn list(&mut self) -> Result<Vec<SettingRecord>> {
        let records = sqlx::query_as::<_, SettingRecord>(
            "SELECT name, value FROM settings ORDER BY name",
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
    async fn test_set_overwrites(pool: PgPool) {
        let mut conn = pool.acquire().await.unwrap();
        let mut repo = Settings::new(&mut conn);

        assert_eq!(repo.get("timeout").await.unwrap(), None);
        repo.set("timeout", "30s").await.unwrap();
        repo.set("timeout", "2m").await.unwrap();
        assert_eq!(repo.get("timeout").await.unwrap().as_deref(), Some("2m"));
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }
}
