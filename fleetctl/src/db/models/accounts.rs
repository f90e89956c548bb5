use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Provider account credentials used to mint API sessions.
#[derive(Debug, Clone, FromRow)]
pub struct AccountRecord {
    pub id: String,
    pub email: String,
    pub password: String,
    pub project_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AccountUpsert {
    pub id: String,
    pub email: String,
    pub password: String,
    pub project_id: String,
}
