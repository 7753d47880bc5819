//! Shared data models for the rotoscope worker.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers and queue messages
//! - Effect parameters with defaults and range validation
//! - Output quality presets
//! - The static effect registry

pub mod effect;
pub mod job;
pub mod params;
pub mod quality;

// Re-export common types
pub use effect::EffectType;
pub use job::{JobId, JobMessage, JobState};
pub use params::{ColorMethod, EffectParams};
pub use quality::OutputQuality;
