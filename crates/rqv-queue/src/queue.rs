//! Render queue using Redis Streams.
//!
//! High-priority jobs go to a separate stream that consumers drain first.
//! Each submitted sample holds a dedup key (`SET NX EX`) until its job is
//! completed, so resubmitting the same sample is a no-op.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use rqv_models::{RequeueItem, RequeuePriority, SampleId};
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::job::RenderJob;

/// Result of a submit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Job added to the stream with this message ID
    Enqueued(String),
    /// A job for the same sample is already pending
    Duplicate,
}

impl SubmitOutcome {
    pub fn is_enqueued(&self) -> bool {
        matches!(self, SubmitOutcome::Enqueued(_))
    }
}

/// Queue the orchestrator submits requeue items to and render workers consume.
#[async_trait]
pub trait RenderQueue: Send + Sync {
    /// Submit a requeue item. Idempotent per sample while the job is pending.
    async fn submit(&self, item: &RequeueItem) -> QueueResult<SubmitOutcome>;

    /// Read up to `count` jobs, high priority first.
    async fn consume(&self, consumer: &str, block_ms: u64, count: usize) -> QueueResult<Vec<(String, RenderJob)>>;

    /// Acknowledge a finished job and release its sample's dedup key.
    async fn complete(&self, message_id: &str, job: &RenderJob) -> QueueResult<()>;

    /// Move a job that cannot be processed to the dead letter stream.
    async fn dead_letter(&self, message_id: &str, job: &RenderJob, error: &str) -> QueueResult<()>;

    /// Whether a job for this sample is pending.
    async fn is_pending(&self, sample_id: &SampleId) -> QueueResult<bool>;
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for normal-priority jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Dedup key lifetime; bounds how long a lost job blocks its sample
    pub dedup_ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "rqv:render".to_string(),
            consumer_group: "rqv:renderers".to_string(),
            dlq_stream_name: "rqv:render:dlq".to_string(),
            dedup_ttl: Duration::from_secs(86400),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            dedup_ttl: std::env::var("QUEUE_DEDUP_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.dedup_ttl),
        }
    }

    /// Stream name for high-priority jobs.
    pub fn high_priority_stream(&self) -> String {
        format!("{}:high", self.stream_name)
    }

    fn stream_for(&self, priority: RequeuePriority) -> String {
        match priority {
            RequeuePriority::High => self.high_priority_stream(),
            RequeuePriority::Normal => self.stream_name.clone(),
        }
    }

    pub(crate) fn dedup_key(sample_id: &SampleId) -> String {
        format!("rqv:dedup:{}", sample_id)
    }
}

/// Redis Streams render queue.
pub struct RedisRenderQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl RedisRenderQueue {
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Create consumer groups on both streams if they do not exist.
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.connection().await?;

        for stream in [self.config.high_priority_stream(), self.config.stream_name.clone()] {
            let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&stream)
                .arg(&self.config.consumer_group)
                .arg("$")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;

            match result {
                Ok(_) => info!(stream = %stream, "Created consumer group: {}", self.config.consumer_group),
                Err(e) if e.to_string().contains("BUSYGROUP") => {
                    debug!(stream = %stream, "Consumer group already exists: {}", self.config.consumer_group);
                }
                Err(e) => return Err(QueueError::Redis(e)),
            }
        }

        Ok(())
    }

    /// Total pending length across both streams.
    pub async fn len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let high: u64 = conn.xlen(self.config.high_priority_stream()).await?;
        let normal: u64 = conn.xlen(&self.config.stream_name).await?;
        Ok(high + normal)
    }

    pub async fn dlq_len(&self) -> QueueResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    async fn read_stream(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        stream: &str,
        consumer: &str,
        block_ms: Option<u64>,
        count: usize,
    ) -> QueueResult<Vec<(String, RenderJob)>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count);
        if let Some(ms) = block_ms {
            cmd.arg("BLOCK").arg(ms);
        }
        cmd.arg("STREAMS").arg(stream).arg(">");

        let reply: Option<redis::streams::StreamReadReply> = cmd.query_async(&mut *conn).await?;
        let mut jobs = Vec::new();

        for stream_key in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream_key.ids {
                let message_id = entry.id.clone();
                let Some(redis::Value::BulkString(payload)) = entry.map.get("job") else {
                    continue;
                };
                match serde_json::from_slice::<RenderJob>(payload) {
                    Ok(job) => {
                        debug!(sample_id = %job.sample_id(), "Consumed render job from {}", stream);
                        jobs.push((message_id, job));
                    }
                    Err(e) => {
                        warn!("Failed to parse render job payload: {}", e);
                        // Ack malformed messages so they are not redelivered
                        self.ack(conn, stream, &message_id).await.ok();
                    }
                }
            }
        }

        Ok(jobs)
    }

    async fn ack(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        stream: &str,
        message_id: &str,
    ) -> QueueResult<()> {
        redis::cmd("XACK")
            .arg(stream)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut *conn)
            .await?;
        redis::cmd("XDEL")
            .arg(stream)
            .arg(message_id)
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RenderQueue for RedisRenderQueue {
    async fn submit(&self, item: &RequeueItem) -> QueueResult<SubmitOutcome> {
        let mut conn = self.connection().await?;
        let job = RenderJob::new(item.clone());
        let payload = serde_json::to_string(&job)?;
        let dedup_key = QueueConfig::dedup_key(&item.sample_id);

        // SET NX claims the sample atomically; nil means already pending
        let claimed: Option<String> = redis::cmd("SET")
            .arg(&dedup_key)
            .arg(&job.job_id)
            .arg("NX")
            .arg("EX")
            .arg(self.config.dedup_ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        if claimed.is_none() {
            debug!(sample_id = %item.sample_id, "Duplicate render job rejected");
            return Ok(SubmitOutcome::Duplicate);
        }

        let stream = self.config.stream_for(item.priority);
        let added: Result<String, redis::RedisError> = redis::cmd("XADD")
            .arg(&stream)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("key")
            .arg(job.idempotency_key())
            .query_async(&mut conn)
            .await;

        match added {
            Ok(message_id) => {
                info!(
                    sample_id = %item.sample_id,
                    priority = item.priority.as_str(),
                    "Enqueued render job {} with message ID {}",
                    job.job_id,
                    message_id
                );
                Ok(SubmitOutcome::Enqueued(message_id))
            }
            Err(e) => {
                // Release the claim so the next cycle can retry this sample
                conn.del::<_, ()>(&dedup_key).await.ok();
                Err(QueueError::Redis(e))
            }
        }
    }

    async fn consume(&self, consumer: &str, block_ms: u64, count: usize) -> QueueResult<Vec<(String, RenderJob)>> {
        let mut conn = self.connection().await?;

        let high_stream = self.config.high_priority_stream();
        let mut jobs = self.read_stream(&mut conn, &high_stream, consumer, None, count).await?;
        if jobs.len() < count {
            let remaining = count - jobs.len();
            let block = if jobs.is_empty() { Some(block_ms) } else { None };
            let normal = self
                .read_stream(&mut conn, &self.config.stream_name, consumer, block, remaining)
                .await?;
            jobs.extend(normal);
        }
        Ok(jobs)
    }

    async fn complete(&self, message_id: &str, job: &RenderJob) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let stream = self.config.stream_for(job.priority());
        self.ack(&mut conn, &stream, message_id).await?;
        conn.del::<_, ()>(QueueConfig::dedup_key(job.sample_id())).await?;
        debug!(sample_id = %job.sample_id(), "Completed render job: {}", message_id);
        Ok(())
    }

    async fn dead_letter(&self, message_id: &str, job: &RenderJob, error: &str) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.complete(message_id, job).await?;
        warn!(sample_id = %job.sample_id(), "Moved render job {} to DLQ: {}", job.job_id, error);
        Ok(())
    }

    async fn is_pending(&self, sample_id: &SampleId) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let exists: bool = conn.exists(QueueConfig::dedup_key(sample_id)).await?;
        Ok(exists)
    }
}
