//! Error types for scp-ingest
//!
//! Preconditions a caller can act on (file already parsing, incomplete
//! bundle) are reported through `DispatchResult` status codes and are not
//! errors. `IngestError` covers invalid requests and infrastructure failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Request or parameter object failed validation
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Batch service rejected or failed a call
    #[error("Batch service error: {0}")]
    Batch(String),

    /// Job queue is no longer accepting work
    #[error("Submission queue closed: {0}")]
    QueueClosed(String),

    /// scp-common error
    #[error("Common error: {0}")]
    Common(#[from] scp_common::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IngestError {
    pub fn validation(message: impl Into<String>) -> Self {
        IngestError::Validation(vec![message.into()])
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, IngestError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_joins_errors() {
        let err = IngestError::Validation(vec![
            "cluster_file can't be blank".to_string(),
            "name can't be blank".to_string(),
        ]);
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "Validation failed: cluster_file can't be blank; name can't be blank"
        );
    }
}
