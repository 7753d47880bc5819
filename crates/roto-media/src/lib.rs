//! FFmpeg CLI wrapper for video processing.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Video probing via FFprobe
//! - Frame extraction and reassembly over both the in-memory raw pipe
//!   path and the disk-spill PNG sequence path
//! - The memory-vs-disk strategy decision

pub mod assemble;
pub mod command;
pub mod error;
pub mod estimator;
pub mod extract;
pub mod frame;
pub mod probe;
pub mod progress;

pub use assemble::FrameSink;
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use estimator::{decide_strategy, ProcessingStrategy, ResourceBudget};
pub use extract::FrameSource;
pub use frame::{Frame, FrameBatch};
pub use probe::{probe_video, VideoDescriptor};
pub use progress::{FfmpegProgress, ProgressCallback};
