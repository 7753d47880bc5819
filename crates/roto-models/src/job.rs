//! Job identifiers and queue message payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use crate::{EffectParams, EffectType, OutputQuality};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job state as observed by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Message delivered, payload validated
    #[default]
    Received,
    /// Source object fetched to local scratch space
    Downloaded,
    /// Effect applied, output file written
    Processed,
    /// Output object written to storage
    Uploaded,
    /// Source object deleted (the commit point)
    SourceDeleted,
    /// Message acknowledged and removed from the queue
    Acknowledged,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Received => "received",
            JobState::Downloaded => "downloaded",
            JobState::Processed => "processed",
            JobState::Uploaded => "uploaded",
            JobState::SourceDeleted => "source_deleted",
            JobState::Acknowledged => "acknowledged",
        }
    }
}

/// A video-processing job as carried on the queue.
///
/// The message is the whole contract: the worker owns nothing beyond it.
/// Output placement is fixed by `output_key`, so a redelivered message
/// overwrites its own previous partial output rather than duplicating it.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JobMessage {
    /// Unique job ID
    #[serde(default)]
    pub id: JobId,

    /// Bucket holding both source and destination objects
    #[validate(length(min = 1))]
    pub bucket: String,

    /// Source object key
    #[validate(length(min = 1))]
    pub input_key: String,

    /// Destination object key
    #[validate(length(min = 1))]
    pub output_key: String,

    /// Which compiled-in effect to apply
    pub effect_type: EffectType,

    /// Output encoding quality tier
    #[serde(default)]
    pub quality: OutputQuality,

    /// Effect parameter overrides; defaults apply when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub params: Option<EffectParams>,

    /// Submitting user, carried through to upload metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Original upload filename, carried through to upload metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,

    /// Submission timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl JobMessage {
    /// Create a new message with default quality and parameters.
    pub fn new(
        bucket: impl Into<String>,
        input_key: impl Into<String>,
        output_key: impl Into<String>,
        effect_type: EffectType,
    ) -> Self {
        Self {
            id: JobId::new(),
            bucket: bucket.into(),
            input_key: input_key.into(),
            output_key: output_key.into(),
            effect_type,
            quality: OutputQuality::default(),
            params: None,
            user_id: None,
            original_filename: None,
            created_at: Utc::now(),
        }
    }

    /// Effective parameters: overrides merged over the effect defaults.
    pub fn effective_params(&self) -> EffectParams {
        self.params.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_roundtrip() {
        let id = JobId::from_string("abc-123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc-123\"");
        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_message_defaults() {
        let msg = JobMessage::new("videos", "in/a.mp4", "out/a.mp4", EffectType::ScannerDarkly);
        assert!(msg.params.is_none());
        assert_eq!(msg.quality, OutputQuality::Medium);
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_message_rejects_empty_keys() {
        let mut msg = JobMessage::new("videos", "in/a.mp4", "out/a.mp4", EffectType::ScannerDarkly);
        msg.input_key.clear();
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_message_parses_minimal_json() {
        let json = r#"{
            "bucket": "videos",
            "input_key": "in/a.mp4",
            "output_key": "out/a.mp4",
            "effect_type": "scanner_darkly"
        }"#;
        let msg: JobMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.effect_type, EffectType::ScannerDarkly);
        assert!(!msg.id.as_str().is_empty());
    }
}
