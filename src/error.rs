//! Error types for the rewards reconciliation core
//!
//! Everything here is per-request; no failure is fatal to the process.
//! Only the batch submission entry point aggregates per-row errors into
//! [`Error::PartialFailure`]; every other path returns the first error.

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A referenced period, submission, or application does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// A ranking row references an application id the directory cannot resolve.
    #[error("unknown application: {app_id}")]
    UnknownApplication { app_id: i64 },

    /// Uniqueness violation racing with a concurrent writer.
    #[error("conflicting write: {0}")]
    Conflict(String),

    /// A required payment field is missing or malformed.
    #[error("invalid payment: {0}")]
    InvalidPayment(&'static str),

    /// Some rows of a batch submission failed. Rows that succeeded are kept.
    #[error("{} ranking row(s) failed ({} saved)", .failures.len(), .succeeded)]
    PartialFailure {
        succeeded: usize,
        failures: Vec<RowFailure>,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl Error {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// One rejected row of a batch submission.
#[derive(Debug, Clone, Serialize)]
pub struct RowFailure {
    pub app_id: i64,
    pub reason: String,
}
