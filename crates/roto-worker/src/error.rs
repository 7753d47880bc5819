//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Invalid job payload: {0}")]
    InvalidJob(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Media error: {0}")]
    Media(#[from] roto_media::MediaError),

    #[error("Effect error: {0}")]
    Effect(#[from] roto_effect::EffectError),

    #[error("Storage error: {0}")]
    Storage(#[from] roto_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] roto_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Failures that redelivery cannot fix.
    ///
    /// A payload that fails semantic validation will fail it on every
    /// delivery, and a source object that does not exist will not
    /// appear by waiting. Both go straight to the dead-letter stream.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            WorkerError::InvalidJob(_)
                | WorkerError::Storage(roto_storage::StorageError::NotFound(_))
                | WorkerError::Media(roto_media::MediaError::InvalidVideo(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permanent_failures() {
        assert!(WorkerError::invalid_job("bad effect").is_permanent());
        assert!(
            WorkerError::Storage(roto_storage::StorageError::not_found("in/a.mp4")).is_permanent()
        );
        assert!(
            WorkerError::Media(roto_media::MediaError::invalid_video("no video stream"))
                .is_permanent()
        );
    }

    #[test]
    fn test_transient_failures() {
        assert!(!WorkerError::job_failed("flaky").is_permanent());
        assert!(!WorkerError::Storage(roto_storage::StorageError::upload_failed("503"))
            .is_permanent());
    }
}
