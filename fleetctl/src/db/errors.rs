//! Database error categorization.
//!
//! Collapses `sqlx::Error` into the handful of cases callers actually branch
//! on. Everything else is carried through as `Other` with context intact.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("record not found")]
    NotFound,

    #[error("unique constraint violation on {constraint}: {message}")]
    UniqueViolation { constraint: String, message: String },

    #[error("foreign key violation on {constraint}: {message}")]
    ForeignKeyViolation { constraint: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::Database(db_err) => {
                let constraint = db_err.constraint().unwrap_or("<unknown>").to_string();
                let message = db_err.message().to_string();
                if db_err.is_unique_violation() {
                    DbError::UniqueViolation { constraint, message }
                } else if db_err.is_foreign_key_violation() {
                    DbError::ForeignKeyViolation { constraint, message }
                } else {
                    DbError::Other(err.into())
                }
            }
            _ => DbError::Other(err.into()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::Other(err.into())
    }
}
