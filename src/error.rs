//! Fatal run errors
//!
//! Per-file copy failures are not errors at this level; they are counted in
//! the run report. Everything here aborts the run.

use crate::config::ConfigError;
use crate::copier::DirectoryListError;
use crate::storage::StorageError;
use crate::webhook::NotifyError;

/// Error type for a backup run
#[derive(Debug)]
pub enum BackupError {
    /// Configuration is incomplete or invalid
    Config(ConfigError),
    /// The storage session could not be established
    Auth(StorageError),
    /// The run's bucket could not be created
    BucketCreate { bucket: String, source: StorageError },
    /// The source directory could not be listed
    DirectoryList(DirectoryListError),
    /// The summary could not be delivered
    Notification(NotifyError),
}

impl std::fmt::Display for BackupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupError::Config(e) => write!(f, "Configuration error: {}", e),
            BackupError::Auth(e) => write!(f, "Failed to create storage client: {}", e),
            BackupError::BucketCreate { bucket, source } => {
                write!(f, "Failed to create bucket {}: {}", bucket, source)
            }
            BackupError::DirectoryList(e) => write!(f, "{}", e),
            BackupError::Notification(e) => write!(f, "Failed to send notification: {}", e),
        }
    }
}

impl std::error::Error for BackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackupError::Config(e) => Some(e),
            BackupError::Auth(e) => Some(e),
            BackupError::BucketCreate { source, .. } => Some(source),
            BackupError::DirectoryList(e) => Some(e),
            BackupError::Notification(e) => Some(e),
        }
    }
}

impl From<ConfigError> for BackupError {
    fn from(e: ConfigError) -> Self {
        BackupError::Config(e)
    }
}

impl From<DirectoryListError> for BackupError {
    fn from(e: DirectoryListError) -> Self {
        BackupError::DirectoryList(e)
    }
}

impl From<NotifyError> for BackupError {
    fn from(e: NotifyError) -> Self {
        BackupError::Notification(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_bucket_error_names_bucket() {
        let err = BackupError::BucketCreate {
            bucket: "bk-2024-3-5".to_string(),
            source: StorageError::AlreadyExists("bk-2024-3-5".to_string()),
        };
        assert!(err.to_string().contains("bk-2024-3-5"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_from_config_error() {
        let err: BackupError = ConfigError::Missing(vec!["LOCAL_PATH"]).into();
        assert!(matches!(err, BackupError::Config(_)));
        assert!(err.to_string().contains("LOCAL_PATH"));
    }
}
