//! Error taxonomy shared by every storage service.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// No record, chunk or catalog entry exists for the given key.
    #[error("{0} not found")]
    NotFound(String),
    /// The record exists but its chunk data is incomplete or does not match.
    #[error("file `{file_id}` in bucket `{bucket}` is corrupted: {reason}")]
    Corrupted {
        bucket: String,
        file_id: String,
        reason: String,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("backing store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),
    /// The caller-provided byte source failed mid-read.
    #[error("reading source failed: {0}")]
    Source(#[source] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn corrupted(bucket: &str, file_id: impl ToString, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            bucket: bucket.to_string(),
            file_id: file_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Return true if the SQLx error is a primary-key or unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
