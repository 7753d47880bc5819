//! Job queue using Redis Streams.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use roto_models::JobMessage;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Max retries before DLQ
    pub max_retries: u32,
    /// How long a silent worker keeps its claim on a message
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "roto:jobs".to_string(),
            consumer_group: "roto:workers".to_string(),
            dlq_stream_name: "roto:dlq".to_string(),
            max_retries: 3,
            visibility_timeout: Duration::from_secs(600), // 10 minutes
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or_else(|_| "roto:jobs".to_string()),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or_else(|_| "roto:workers".to_string()),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM")
                .unwrap_or_else(|_| "roto:dlq".to_string()),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            visibility_timeout: Duration::from_secs(
                std::env::var("QUEUE_VISIBILITY_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
        }
    }
}

/// A delivered message: stream ID plus parsed payload.
#[derive(Debug, Clone)]
pub struct DeliveredJob {
    pub message_id: String,
    pub message: JobMessage,
}

/// Queue operations the worker depends on.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Read newly delivered messages for this consumer.
    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<DeliveredJob>>;

    /// Take over messages whose owner has been idle too long.
    async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<DeliveredJob>>;

    /// Acknowledge and remove a completed message.
    async fn ack(&self, message_id: &str) -> QueueResult<()>;

    /// Move a message to the dead-letter stream and remove it.
    async fn dead_letter(
        &self,
        message_id: &str,
        message: &JobMessage,
        error: &str,
    ) -> QueueResult<()>;

    /// Reset the idle clock on a message this consumer owns.
    async fn extend_lease(&self, consumer_name: &str, message_id: &str) -> QueueResult<()>;

    /// Bump and return the delivery retry counter.
    async fn increment_retry(&self, message_id: &str) -> QueueResult<u32>;

    /// Retries allowed before dead-lettering.
    fn max_retries(&self) -> u32;
}

/// Redis Streams queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // Create consumer group (ignore error if already exists)
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(
                    "Consumer group already exists: {}",
                    self.config.consumer_group
                );
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Visibility timeout from config.
    pub fn visibility_timeout(&self) -> Duration {
        self.config.visibility_timeout
    }

    /// Enqueue a job message.
    pub async fn enqueue(&self, message: &JobMessage) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let payload = serde_json::to_string(message)?;

        // Output placement doubles as the idempotency key
        let dedup_key = format!("roto:dedup:{}:{}", message.bucket, message.output_key);
        let exists: bool = conn.exists(&dedup_key).await?;
        if exists {
            warn!("Duplicate job rejected: {}", message.output_key);
            return Err(QueueError::enqueue_failed("Duplicate job"));
        }

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        // Set dedup key with TTL (1 hour)
        conn.set_ex::<_, _, ()>(&dedup_key, "1", 3600).await?;

        info!(
            "Enqueued job {} with message ID {}",
            message.id, message_id
        );

        Ok(message_id)
    }

    /// Queue length.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(len)
    }

    /// DLQ length.
    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    /// Dead-letter a raw payload that could not be parsed.
    async fn dead_letter_raw(
        &self,
        message_id: &str,
        payload: &str,
        error: &str,
    ) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack_inner(message_id).await?;

        warn!("Moved message {} to DLQ: {}", message_id, error);
        Ok(())
    }

    async fn ack_inner(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        // Delete the message from the stream
        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }

    /// Parse entries, dead-lettering unparseable payloads on the spot.
    async fn collect_jobs(
        &self,
        entries: Vec<(String, Option<Vec<u8>>)>,
    ) -> QueueResult<Vec<DeliveredJob>> {
        let mut jobs = Vec::new();

        for (message_id, payload) in entries {
            let Some(payload) = payload else {
                self.dead_letter_raw(&message_id, "", "missing job field")
                    .await
                    .ok();
                continue;
            };
            let payload_str = String::from_utf8_lossy(&payload).to_string();
            match serde_json::from_str::<JobMessage>(&payload_str) {
                Ok(message) => {
                    debug!("Consumed job {} from stream", message.id);
                    jobs.push(DeliveredJob {
                        message_id,
                        message,
                    });
                }
                Err(e) => {
                    // Never retried: a payload that does not parse now
                    // will not parse later either
                    self.dead_letter_raw(&message_id, &payload_str, &e.to_string())
                        .await
                        .ok();
                }
            }
        }

        Ok(jobs)
    }
}

#[async_trait]
impl QueueClient for JobQueue {
    async fn consume(
        &self,
        consumer_name: &str,
        block_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<DeliveredJob>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">") // Only new messages
            .query_async(&mut conn)
            .await?;

        let mut entries = Vec::new();
        for stream_key in result.keys {
            for entry in stream_key.ids {
                let payload = match entry.map.get("job") {
                    Some(redis::Value::BulkString(bytes)) => Some(bytes.clone()),
                    _ => None,
                };
                entries.push((entry.id.clone(), payload));
            }
        }

        self.collect_jobs(entries).await
    }

    async fn claim_pending(
        &self,
        consumer_name: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> QueueResult<Vec<DeliveredJob>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let pending: redis::streams::StreamPendingReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .query_async(&mut conn)
            .await?;

        if pending.count() == 0 {
            return Ok(Vec::new());
        }

        let result: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(min_idle_ms)
            .arg("0-0") // Claim from the beginning of the PEL
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut entries = Vec::new();
        for entry in result.ids {
            let payload = match entry.map.get("job") {
                Some(redis::Value::BulkString(bytes)) => Some(bytes.clone()),
                _ => None,
            };
            entries.push((entry.id.clone(), payload));
        }

        let jobs = self.collect_jobs(entries).await?;
        for job in &jobs {
            info!("Claimed pending job {} from stream", job.message.id);
        }
        Ok(jobs)
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        self.ack_inner(message_id).await
    }

    async fn dead_letter(
        &self,
        message_id: &str,
        message: &JobMessage,
        error: &str,
    ) -> QueueResult<()> {
        let payload = serde_json::to_string(message)?;
        self.dead_letter_raw(message_id, &payload, error).await
    }

    async fn extend_lease(&self, consumer_name: &str, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // Claiming a message we already own resets its idle time,
        // which is what keeps the reaper away during long jobs
        redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(0)
            .arg(message_id)
            .arg("JUSTID")
            .query_async::<redis::Value>(&mut conn)
            .await
            .map_err(|e| QueueError::lease_failed(e.to_string()))?;

        debug!("Extended lease on {}", message_id);
        Ok(())
    }

    async fn increment_retry(&self, message_id: &str) -> QueueResult<u32> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let key = format!("roto:retry:{}", message_id);
        let count: u32 = conn.incr(&key, 1).await?;
        // Set TTL to 24 hours
        conn.expire::<_, ()>(&key, 86400).await?;
        Ok(count)
    }

    fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.stream_name, "roto:jobs");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.visibility_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_queue_construction() {
        let queue = JobQueue::new(QueueConfig::default()).unwrap();
        assert_eq!(queue.max_retries(), 3);
        assert_eq!(queue.visibility_timeout(), Duration::from_secs(600));
    }
}
