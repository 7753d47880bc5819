//! Error types for effect processing.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for effect operations.
pub type EffectResult<T> = Result<T, EffectError>;

/// Errors that can occur while applying the effect.
#[derive(Debug, Error)]
pub enum EffectError {
    #[error("Model not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EffectError {
    /// Create a model-load failure error.
    pub fn model_load_failed(message: impl Into<String>) -> Self {
        Self::ModelLoadFailed(message.into())
    }

    /// Create an inference failure error.
    pub fn inference_failed(message: impl Into<String>) -> Self {
        Self::InferenceFailed(message.into())
    }

    /// Create an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }
}
