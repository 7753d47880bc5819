//! Structured job logging.
//!
//! Every lifecycle event carries the job ID and effect tag so a
//! single job can be followed through mixed worker output.

use roto_models::{JobId, JobState};
use tracing::{error, info, warn, Span};

/// Per-job logger with consistent structured fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    effect: String,
}

impl JobLogger {
    /// Create a logger for a job running the given effect.
    pub fn new(job_id: &JobId, effect: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            effect: effect.to_string(),
        }
    }

    /// Log a lifecycle state transition.
    pub fn log_state(&self, state: JobState) {
        info!(
            job_id = %self.job_id,
            effect = %self.effect,
            state = state.as_str(),
            "Job state changed"
        );
    }

    /// Log a progress update during processing.
    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            effect = %self.effect,
            "Job progress: {}", message
        );
    }

    /// Log a warning during processing.
    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            effect = %self.effect,
            "Job warning: {}", message
        );
    }

    /// Log a job failure.
    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            effect = %self.effect,
            "Job error: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Create a tracing span covering the whole job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            effect = %self.effect
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_fields() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "scanner_darkly");
        assert_eq!(logger.job_id(), job_id.to_string());
    }

    #[test]
    fn test_span_is_enterable() {
        let logger = JobLogger::new(&JobId::new(), "scanner_darkly");
        logger.create_span().in_scope(|| ());
    }
}
