//! The job consumer.
//!
//! Pulls one message at a time from the queue and drives it through
//! the job state machine: download, process, upload, delete source,
//! acknowledge. The source delete is the commit point; every step
//! before it can be safely repeated on redelivery because the output
//! key is fixed by the message.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;
use validator::Validate;

use roto_models::{JobMessage, JobState};
use roto_queue::{DeliveredJob, QueueClient};
use roto_storage::ObjectStore;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::pipeline::VideoProcessor;

/// Content type stamped on every uploaded output.
const OUTPUT_CONTENT_TYPE: &str = "video/mp4";

/// Sequential job consumer over injected collaborators.
pub struct JobConsumer {
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn QueueClient>,
    processor: Arc<dyn VideoProcessor>,
    config: WorkerConfig,
    consumer_name: String,
}

impl JobConsumer {
    /// Create a consumer with a unique consumer-group member name.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn QueueClient>,
        processor: Arc<dyn VideoProcessor>,
        config: WorkerConfig,
    ) -> WorkerResult<Self> {
        std::fs::create_dir_all(&config.work_dir)?;
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Ok(Self {
            store,
            queue,
            processor,
            config,
            consumer_name,
        })
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Consume jobs until the shutdown signal flips.
    ///
    /// One job at a time: a video job saturates the machine on its
    /// own, and sequential consumption keeps lease renewal honest.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> WorkerResult<()> {
        info!("Consumer '{}' starting", self.consumer_name);

        let mut claim_timer = tokio::time::interval(self.config.claim_interval);
        let mut backoff = false;

        loop {
            if backoff {
                backoff = false;
                // Shutdown must not wait out the error backoff
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Shutdown signal received, stopping consumer");
                            break;
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                }
                continue;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping consumer");
                        break;
                    }
                }
                _ = claim_timer.tick() => {
                    // Recover jobs from workers that died mid-flight
                    let min_idle = self.config.claim_min_idle.as_millis() as u64;
                    match self.queue.claim_pending(&self.consumer_name, min_idle, 1).await {
                        Ok(jobs) => {
                            for job in jobs {
                                self.handle_job(job).await;
                            }
                        }
                        Err(e) => warn!("Failed to claim pending jobs: {}", e),
                    }
                }
                result = self.queue.consume(&self.consumer_name, self.config.block_ms, 1) => {
                    match result {
                        Ok(jobs) => {
                            for job in jobs {
                                self.handle_job(job).await;
                            }
                        }
                        Err(e) => {
                            error!("Error consuming jobs: {}", e);
                            backoff = true;
                        }
                    }
                }
            }
        }

        info!("Consumer '{}' stopped", self.consumer_name);
        Ok(())
    }

    /// Run one delivered job through processing, retry, and DLQ handling.
    async fn handle_job(&self, delivered: DeliveredJob) {
        let message_id = delivered.message_id;
        let message = delivered.message;
        let logger = JobLogger::new(&message.id, message.effect_type.as_str());

        // Keep the message claimed while processing runs long
        let heartbeat = {
            let queue = Arc::clone(&self.queue);
            let consumer = self.consumer_name.clone();
            let message_id = message_id.clone();
            let period = self.config.job_heartbeat_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await; // the first tick is immediate
                loop {
                    interval.tick().await;
                    if let Err(e) = queue.extend_lease(&consumer, &message_id).await {
                        warn!("Lease renewal failed for {}: {}", message_id, e);
                    }
                }
            })
        };

        let result = tokio::time::timeout(
            self.config.job_timeout,
            self.process_job(&message, &logger)
                .instrument(logger.create_span()),
        )
        .await
        .unwrap_or_else(|_| {
            Err(WorkerError::job_failed(format!(
                "Timed out after {}s",
                self.config.job_timeout.as_secs()
            )))
        });

        heartbeat.abort();

        match result {
            Ok(()) => {
                if let Err(e) = self.queue.ack(&message_id).await {
                    // Redelivery will find the source gone; the delete
                    // makes the repeat a cheap no-op ending in an ack
                    error!("Failed to ack completed job {}: {}", message.id, e);
                } else {
                    logger.log_state(JobState::Acknowledged);
                }
            }
            Err(e) => {
                logger.log_error(&e.to_string());
                self.handle_failure(&message_id, &message, &logger, e).await;
            }
        }
    }

    /// Decide between retry and dead-letter for a failed job.
    async fn handle_failure(
        &self,
        message_id: &str,
        message: &JobMessage,
        logger: &JobLogger,
        err: WorkerError,
    ) {
        if err.is_permanent() {
            logger.log_warning("Permanent failure, moving to DLQ");
            if let Err(dlq_err) = self
                .queue
                .dead_letter(message_id, message, &err.to_string())
                .await
            {
                error!("Failed to dead-letter job {}: {}", message.id, dlq_err);
            }
            return;
        }

        let retries = match self.queue.increment_retry(message_id).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to count retry for {}: {}", message.id, e);
                self.queue.max_retries()
            }
        };

        if retries >= self.queue.max_retries() {
            logger.log_warning(&format!("Retries exhausted ({retries}), moving to DLQ"));
            if let Err(dlq_err) = self
                .queue
                .dead_letter(message_id, message, &err.to_string())
                .await
            {
                error!("Failed to dead-letter job {}: {}", message.id, dlq_err);
            }
        } else {
            // Leave the message pending; it is redelivered once the
            // visibility timeout expires
            info!(
                "Job {} will be retried (attempt {}/{})",
                message.id,
                retries,
                self.queue.max_retries()
            );
        }
    }

    /// The job state machine up to (and including) the commit point.
    async fn process_job(&self, message: &JobMessage, logger: &JobLogger) -> WorkerResult<()> {
        message
            .validate()
            .map_err(|e| WorkerError::invalid_job(e.to_string()))?;
        logger.log_state(JobState::Received);

        let scratch = TempDir::new_in(&self.config.work_dir)?;
        let input = scratch.path().join("input.mp4");
        let output = scratch.path().join("output.mp4");

        self.store.download_file(&message.input_key, &input).await?;
        logger.log_state(JobState::Downloaded);

        let report = self
            .processor
            .process_video(&input, &output, message, logger)
            .await?;
        logger.log_state(JobState::Processed);
        logger.log_progress(&format!(
            "{} frames via {:?} path{}",
            report.frames_processed,
            report.strategy,
            if report.degraded { " (degraded)" } else { "" }
        ));

        let mut metadata = vec![("effect".to_string(), message.effect_type.as_str().to_string())];
        if let Some(user_id) = &message.user_id {
            metadata.push(("user-id".to_string(), user_id.clone()));
        }
        if let Some(name) = &message.original_filename {
            metadata.push(("original-filename".to_string(), name.clone()));
        }

        self.store
            .upload_file(&output, &message.output_key, OUTPUT_CONTENT_TYPE, metadata)
            .await?;
        logger.log_state(JobState::Uploaded);

        // The commit point: only after the output is durable may the
        // source go away
        self.store.delete_object(&message.input_key).await?;
        logger.log_state(JobState::SourceDeleted);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use roto_media::ProcessingStrategy;
    use roto_models::EffectType;
    use roto_queue::{QueueError, QueueResult};
    use roto_storage::{StorageError, StorageResult};
    use std::path::Path;
    use std::sync::Mutex;

    use crate::pipeline::PipelineReport;

    /// Shared ordered record of every side effect the fakes perform.
    #[derive(Default)]
    struct OpLog(Mutex<Vec<String>>);

    impl OpLog {
        fn push(&self, op: impl Into<String>) {
            self.0.lock().unwrap().push(op.into());
        }
        fn ops(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
        fn contains(&self, prefix: &str) -> bool {
            self.ops().iter().any(|op| op.starts_with(prefix))
        }
    }

    struct FakeStore {
        log: Arc<OpLog>,
        fail_upload: bool,
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn download_file(&self, key: &str, path: &Path) -> StorageResult<()> {
            self.log.push(format!("download {key}"));
            tokio::fs::write(path, b"source").await?;
            Ok(())
        }

        async fn upload_file(
            &self,
            _path: &Path,
            key: &str,
            content_type: &str,
            _metadata: Vec<(String, String)>,
        ) -> StorageResult<()> {
            if self.fail_upload {
                return Err(StorageError::upload_failed("synthetic outage"));
            }
            self.log.push(format!("upload {key} {content_type}"));
            Ok(())
        }

        async fn delete_object(&self, key: &str) -> StorageResult<()> {
            self.log.push(format!("delete {key}"));
            Ok(())
        }

        async fn exists(&self, _key: &str) -> StorageResult<bool> {
            Ok(true)
        }
    }

    struct FakeQueue {
        log: Arc<OpLog>,
        retries: Mutex<u32>,
        max_retries: u32,
    }

    #[async_trait]
    impl QueueClient for FakeQueue {
        async fn consume(
            &self,
            _consumer_name: &str,
            _block_ms: u64,
            _count: usize,
        ) -> QueueResult<Vec<DeliveredJob>> {
            Ok(Vec::new())
        }

        async fn claim_pending(
            &self,
            _consumer_name: &str,
            _min_idle_ms: u64,
            _count: usize,
        ) -> QueueResult<Vec<DeliveredJob>> {
            Ok(Vec::new())
        }

        async fn ack(&self, message_id: &str) -> QueueResult<()> {
            self.log.push(format!("ack {message_id}"));
            Ok(())
        }

        async fn dead_letter(
            &self,
            message_id: &str,
            _message: &JobMessage,
            _error: &str,
        ) -> QueueResult<()> {
            self.log.push(format!("dlq {message_id}"));
            Ok(())
        }

        async fn extend_lease(&self, _consumer_name: &str, _message_id: &str) -> QueueResult<()> {
            Ok(())
        }

        async fn increment_retry(&self, _message_id: &str) -> QueueResult<u32> {
            let mut retries = self.retries.lock().unwrap();
            *retries += 1;
            self.log.push(format!("retry {}", *retries));
            Ok(*retries)
        }

        fn max_retries(&self) -> u32 {
            self.max_retries
        }
    }

    /// A queue whose consume path is down; everything else is a no-op.
    struct ErroringQueue;

    #[async_trait]
    impl QueueClient for ErroringQueue {
        async fn consume(
            &self,
            _consumer_name: &str,
            _block_ms: u64,
            _count: usize,
        ) -> QueueResult<Vec<DeliveredJob>> {
            Err(QueueError::connection_failed("stream unavailable"))
        }

        async fn claim_pending(
            &self,
            _consumer_name: &str,
            _min_idle_ms: u64,
            _count: usize,
        ) -> QueueResult<Vec<DeliveredJob>> {
            Ok(Vec::new())
        }

        async fn ack(&self, _message_id: &str) -> QueueResult<()> {
            Ok(())
        }

        async fn dead_letter(
            &self,
            _message_id: &str,
            _message: &JobMessage,
            _error: &str,
        ) -> QueueResult<()> {
            Ok(())
        }

        async fn extend_lease(&self, _consumer_name: &str, _message_id: &str) -> QueueResult<()> {
            Ok(())
        }

        async fn increment_retry(&self, _message_id: &str) -> QueueResult<u32> {
            Ok(0)
        }

        fn max_retries(&self) -> u32 {
            3
        }
    }

    struct FakeProcessor {
        log: Arc<OpLog>,
    }

    #[async_trait]
    impl VideoProcessor for FakeProcessor {
        async fn process_video(
            &self,
            _input: &Path,
            output: &Path,
            _message: &JobMessage,
            _logger: &JobLogger,
        ) -> WorkerResult<PipelineReport> {
            self.log.push("process");
            tokio::fs::write(output, b"output").await?;
            Ok(PipelineReport {
                frames_processed: 3,
                frames_skipped: 0,
                strategy: ProcessingStrategy::Memory,
                degraded: false,
            })
        }
    }

    struct Harness {
        consumer: JobConsumer,
        log: Arc<OpLog>,
        _work_dir: TempDir,
    }

    fn harness(fail_upload: bool, retries_so_far: u32) -> Harness {
        let log = Arc::new(OpLog::default());
        let work_dir = TempDir::new().unwrap();

        let store = Arc::new(FakeStore {
            log: Arc::clone(&log),
            fail_upload,
        });
        let queue = Arc::new(FakeQueue {
            log: Arc::clone(&log),
            retries: Mutex::new(retries_so_far),
            max_retries: 3,
        });
        let processor = Arc::new(FakeProcessor {
            log: Arc::clone(&log),
        });
        let config = WorkerConfig {
            work_dir: work_dir.path().to_string_lossy().to_string(),
            ..WorkerConfig::default()
        };

        let consumer = JobConsumer::new(store, queue, processor, config).unwrap();
        Harness {
            consumer,
            log,
            _work_dir: work_dir,
        }
    }

    fn delivered() -> DeliveredJob {
        DeliveredJob {
            message_id: "1-1".to_string(),
            message: JobMessage::new("videos", "in/a.mp4", "out/a.mp4", EffectType::ScannerDarkly),
        }
    }

    #[tokio::test]
    async fn test_successful_job_commits_in_order() {
        let h = harness(false, 0);
        h.consumer.handle_job(delivered()).await;

        assert_eq!(
            h.log.ops(),
            vec![
                "download in/a.mp4",
                "process",
                "upload out/a.mp4 video/mp4",
                "delete in/a.mp4",
                "ack 1-1",
            ]
        );
    }

    #[tokio::test]
    async fn test_upload_failure_preserves_source_and_message() {
        let h = harness(true, 0);
        h.consumer.handle_job(delivered()).await;

        let ops = h.log.ops();
        assert!(!h.log.contains("delete"), "source must survive: {ops:?}");
        assert!(!h.log.contains("ack"), "message must stay pending: {ops:?}");
        assert!(!h.log.contains("dlq"), "first failure is retried: {ops:?}");
        assert!(h.log.contains("retry 1"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let h = harness(true, 2);
        h.consumer.handle_job(delivered()).await;

        assert!(h.log.contains("retry 3"));
        assert!(h.log.contains("dlq 1-1"));
        assert!(!h.log.contains("ack"));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_consume_error_backoff() {
        let log = Arc::new(OpLog::default());
        let work_dir = TempDir::new().unwrap();
        let consumer = JobConsumer::new(
            Arc::new(FakeStore {
                log: Arc::clone(&log),
                fail_upload: false,
            }),
            Arc::new(ErroringQueue),
            Arc::new(FakeProcessor { log }),
            WorkerConfig {
                work_dir: work_dir.path().to_string_lossy().to_string(),
                ..WorkerConfig::default()
            },
        )
        .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let run = tokio::spawn(async move { consumer.run(shutdown_rx).await });

        // Let the consumer hit the consume error and enter its backoff,
        // then signal shutdown well inside the 5s backoff window
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("shutdown must not wait out the backoff")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_message_dead_lettered_without_retry() {
        let h = harness(false, 0);
        let mut job = delivered();
        job.message.input_key.clear();
        h.consumer.handle_job(job).await;

        assert!(h.log.contains("dlq 1-1"));
        assert!(!h.log.contains("retry"), "validation failures never retry");
        assert!(!h.log.contains("download"), "invalid jobs touch nothing");
    }
}
