//! Prune error taxonomy

use darc_core::RepositoryError;
use thiserror::Error;

/// Rejected retention options; raised before the repository is touched
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("--keep-last and --keep-secondly select the same rule; supply only one")]
    LastAndSecondly,

    #[error(
        "at least one of --keep-within, --keep-last, --keep-secondly, --keep-minutely, \
         --keep-hourly, --keep-daily, --keep-weekly, --keep-monthly or --keep-yearly is required"
    )]
    NoRetention,

    #[error("invalid --keep-within value '{value}': {reason}")]
    InvalidWithin { value: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PruneError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot lock repository: {0}")]
    LockUnavailable(String),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl PruneError {
    /// Map a lock acquisition failure, keeping lock contention distinct
    pub(crate) fn from_lock(err: RepositoryError) -> Self {
        match err {
            RepositoryError::LockUnavailable(msg) => Self::LockUnavailable(msg),
            other => Self::Repository(other),
        }
    }
}
