//! Error types for the voice-clone job
//!
//! Every stage of the job maps its failures onto [`JobError`]. Nothing is
//! swallowed: a stage either completes or the whole job fails with one of
//! these variants.

use thiserror::Error;

/// Errors produced by the storage boundary
#[derive(Debug, Error)]
pub enum StorageError {
    /// Object does not exist at the requested location
    #[error("object not found: {0}")]
    NotFound(String),

    /// Location string could not be interpreted
    #[error("invalid storage location: {0}")]
    InvalidLocation(String),

    /// Credentials could not be obtained or were rejected
    #[error("storage authentication failed: {0}")]
    Auth(String),

    /// Transport or non-success HTTP status from a remote store
    #[error("storage request failed: {0}")]
    Http(String),

    /// Local filesystem failure
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Failures worth another attempt at the same request
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Http(_) | StorageError::Io(_))
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Http(err.to_string())
    }
}

/// Errors of the batch job
#[derive(Debug, Error)]
pub enum JobError {
    /// Malformed request: missing field, empty text, unsupported language
    #[error("invalid input: {0}")]
    Input(String),

    /// Reference audio could not be decoded
    #[error("failed to decode reference audio: {0}")]
    Decode(String),

    /// Model weights missing or incompatible, or the backend failed to start
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Inference-time failure
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// Process exit code reported to the orchestrator
    pub fn exit_code(&self) -> u8 {
        match self {
            JobError::Input(_) => 2,
            JobError::Decode(_) => 3,
            JobError::ModelLoad(_) => 4,
            JobError::Synthesis(_) => 5,
            JobError::Storage(_) => 6,
            JobError::Config(_) => 7,
            JobError::Io(_) => 1,
        }
    }

    /// Whether resubmitting the whole job may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Synthesis(_) | JobError::Io(_) => true,
            JobError::Storage(StorageError::Http(_)) | JobError::Storage(StorageError::Io(_)) => true,
            _ => false,
        }
    }

    /// True for the not-found class of storage failures
    pub fn is_not_found(&self) -> bool {
        matches!(self, JobError::Storage(StorageError::NotFound(_)))
    }
}

impl From<hound::Error> for JobError {
    fn from(err: hound::Error) -> Self {
        JobError::Decode(err.to_string())
    }
}

/// Result type for the crate
pub type Result<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_and_non_zero() {
        let errors = [
            JobError::Input("x".into()),
            JobError::Decode("x".into()),
            JobError::ModelLoad("x".into()),
            JobError::Synthesis("x".into()),
            JobError::Storage(StorageError::NotFound("x".into())),
            JobError::Config("x".into()),
        ];
        let mut codes: Vec<u8> = errors.iter().map(JobError::exit_code).collect();
        assert!(codes.iter().all(|&c| c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn not_found_is_not_retryable() {
        let err = JobError::from(StorageError::NotFound("gs://b/missing.wav".into()));
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert!(JobError::Synthesis("cuda oom".into()).is_retryable());
    }
}
