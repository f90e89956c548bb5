//! Operator-facing error taxonomy.
//!
//! Handlers bubble these up to the dispatcher, which turns them into output
//! lines via [`Error::user_message`]. Only `Timeout` escapes the dispatcher
//! itself.

use crate::db::errors::DbError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Input that can never succeed: bad arguments, a cluster that is not in
    /// a joinable state, malformed metadata.
    #[error("{0}")]
    Validation(String),

    #[error("{resource} '{name}' not found")]
    NotFound { resource: &'static str, name: String },

    #[error(transparent)]
    Persistence(#[from] DbError),

    /// Upstream control-plane or Kubernetes API failure.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("command did not finish within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn not_found(resource: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            resource,
            name: name.into(),
        }
    }

    pub fn provider(err: impl std::fmt::Display) -> Self {
        Error::Provider(err.to_string())
    }

    /// Message shown to the operator. Internal failures are flattened to a
    /// generic line; details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation(msg) => msg.clone(),
            Error::NotFound { resource, name } => format!("{resource} '{name}' not found"),
            Error::Persistence(DbError::NotFound) => "record not found".to_string(),
            Error::Persistence(_) => "storage error, see logs".to_string(),
            Error::Provider(msg) => format!("provider error: {msg}"),
            Error::Timeout { timeout } => {
                format!("command did not finish within {timeout:?}")
            }
            Error::Other(_) => "internal error, see logs".to_string(),
        }
    }
}
