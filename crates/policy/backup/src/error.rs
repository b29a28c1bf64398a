use thiserror::Error;

/// Result type for backup operations.
pub type BackupResult<T> = Result<T, BackupError>;

/// Backup-engine errors.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("storage error: {0}")]
    Storage(#[from] policy_storage::StorageError),

    #[error("malformed diff: {0}")]
    MalformedDiff(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
