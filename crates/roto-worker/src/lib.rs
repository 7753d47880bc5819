//! Video effect processing worker.
//!
//! This crate provides:
//! - The queue-driven job consumer with retry and DLQ handling
//! - The per-job effect pipeline (probe, strategy, batched processing)
//! - Structured per-job logging
//! - Graceful shutdown

pub mod config;
pub mod consumer;
pub mod error;
pub mod logging;
pub mod pipeline;

pub use config::WorkerConfig;
pub use consumer::JobConsumer;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use pipeline::{PipelineReport, ProcessingPipeline, VideoProcessor};
