//! Error taxonomy for the pipeline.
//!
//! Job processors return a [`JobError`] carrying an [`ErrorKind`]; the
//! worker layer decides retry/skip/fail from the kind alone.

use thiserror::Error;

use crate::infra::error::InfraError;

/// How the worker layer should treat a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Required configuration is absent. Fatal at startup.
    ConfigMissing,
    /// Worth retrying with backoff.
    Transient,
    /// Log and surface to the operator; retrying will not help.
    Permanent,
    /// Domain-specific absence; usually non-fatal.
    NotFound,
    /// Another holder owns the serializing lock. The job counts as a
    /// skipped success.
    Conflict,
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn config_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigMissing, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(JobError::transient("upstream timed out").is_retryable());
        for err in [
            JobError::config_missing("object_store.bucket is unset"),
            JobError::permanent("feed rejected every entry"),
            JobError::not_found("ingestion source vanished"),
            JobError::conflict("another holder owns the build lock"),
        ] {
            assert!(!err.is_retryable(), "{:?} must not retry", err.kind);
        }
    }
}
