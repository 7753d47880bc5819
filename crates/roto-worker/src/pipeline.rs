//! The per-job processing pipeline.
//!
//! Probe, pick a memory-vs-disk strategy, then stream batches from the
//! frame source through the effect engine into the frame sink. One
//! engine and one temporal state serve the whole job, so batch
//! boundaries are invisible in the output.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, info};
use validator::Validate;

use roto_effect::{build_engine, EffectState};
use roto_media::{
    check_ffmpeg, check_ffprobe, decide_strategy, probe_video, Frame, FrameBatch, FrameSink,
    FrameSource, ProcessingStrategy, ResourceBudget,
};
use roto_models::{EffectParams, EffectType, JobMessage, OutputQuality};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

/// What a finished pipeline run looked like.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub strategy: ProcessingStrategy,
    /// True when the job ran on the Sobel fallback instead of HED
    pub degraded: bool,
}

/// The processing step of a job, seen from the consumer.
///
/// Separated from the queue/storage plumbing so the consumer can be
/// exercised without FFmpeg on the test machine.
#[async_trait]
pub trait VideoProcessor: Send + Sync {
    async fn process_video(
        &self,
        input: &Path,
        output: &Path,
        message: &JobMessage,
        logger: &JobLogger,
    ) -> WorkerResult<PipelineReport>;
}

/// Full effect pipeline backed by FFmpeg and the effect engine.
pub struct ProcessingPipeline {
    work_dir: PathBuf,
    memory_budget_bytes: u64,
    model_path: Option<PathBuf>,
}

impl ProcessingPipeline {
    /// Create a pipeline, verifying the FFmpeg tooling is present.
    pub fn new(config: &WorkerConfig) -> WorkerResult<Self> {
        check_ffmpeg()?;
        check_ffprobe()?;
        std::fs::create_dir_all(&config.work_dir)?;

        Ok(Self {
            work_dir: PathBuf::from(&config.work_dir),
            memory_budget_bytes: config.memory_budget_bytes,
            model_path: config.model_path.clone(),
        })
    }

    /// Process one video file into another.
    pub async fn process_file(
        &self,
        input: &Path,
        output: &Path,
        effect: EffectType,
        quality: OutputQuality,
        params: EffectParams,
        logger: &JobLogger,
    ) -> WorkerResult<PipelineReport> {
        params
            .validate()
            .map_err(|e| WorkerError::invalid_job(format!("effect params: {e}")))?;

        let probed = probe_video(input).await?;
        let descriptor = probed.scaled(params.resize_factor);

        let budget = ResourceBudget {
            memory_bytes: self.memory_budget_bytes,
            batch_size: params.batch_size,
        };
        let strategy = decide_strategy(&descriptor, &budget);

        info!(
            width = descriptor.width,
            height = descriptor.height,
            frames = descriptor.frame_count,
            fps = format!("{:.2}", descriptor.fps),
            strategy = ?strategy,
            "Starting effect pipeline"
        );

        // Scratch space lives exactly as long as the job
        let scratch = TempDir::new_in(&self.work_dir)?;

        let mut source = FrameSource::open(
            input,
            &descriptor,
            strategy,
            params.batch_size,
            scratch.path(),
        )
        .await?;
        let mut sink =
            FrameSink::create(output, &descriptor, quality, strategy, scratch.path()).await?;

        let mut engine = build_engine(effect, params, self.model_path.as_deref());
        let degraded = engine.is_degraded();
        if degraded {
            logger.log_warning("Edge model unavailable, using gradient fallback");
        }

        let total = source.total_frames();
        let mut state = EffectState::new();
        let mut done: u64 = 0;

        while let Some(batch) = source.next_batch().await? {
            let start_index = batch.start_index;

            // The engine is CPU-bound; keep it off the async runtime.
            // Ownership of engine and state threads through the task.
            let (eng, st, processed) = tokio::task::spawn_blocking(move || {
                let mut st = state;
                let frames: Vec<Frame> = batch
                    .frames
                    .iter()
                    .map(|f| engine.process_frame(f, &mut st))
                    .collect();
                (engine, st, frames)
            })
            .await
            .map_err(|e| WorkerError::job_failed(format!("effect task: {e}")))?;
            engine = eng;
            state = st;

            done += processed.len() as u64;
            sink.write_batch(&FrameBatch::new(start_index, processed)).await?;

            let effective_total = total.saturating_sub(source.skipped_frames());
            logger.log_progress(&format!("{done}/{effective_total} frames"));
        }

        if done == 0 {
            return Err(WorkerError::Media(roto_media::MediaError::invalid_video(
                "Video yielded no frames",
            )));
        }

        sink.finish().await?;

        let report = PipelineReport {
            frames_processed: done,
            frames_skipped: source.skipped_frames(),
            strategy,
            degraded,
        };
        debug!(?report, "Pipeline finished");
        Ok(report)
    }
}

#[async_trait]
impl VideoProcessor for ProcessingPipeline {
    async fn process_video(
        &self,
        input: &Path,
        output: &Path,
        message: &JobMessage,
        logger: &JobLogger,
    ) -> WorkerResult<PipelineReport> {
        self.process_file(
            input,
            output,
            message.effect_type,
            message.quality,
            message.effective_params(),
            logger,
        )
        .await
    }
}
