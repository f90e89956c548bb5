use sqlx::FromRow;

/// Console setting persisted across restarts. Values are free-form strings;
/// callers parse what they expect.
#[derive(Debug, Clone, FromRow)]
pub struct SettingRecord {
    pub name: String,
    pub value: String,
}
