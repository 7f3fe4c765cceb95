//! Re-render executor.
//!
//! Consumes requeued jobs from the render queue and runs each one through the
//! validation pipeline with the job's retry recipe.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use rqv_queue::{RenderJob, RenderQueue};
use rqv_store::{with_retry, RetryConfig as StoreRetryConfig, StoreError};

use crate::error::{WorkerError, WorkerResult};
use crate::pipeline::{RenderTask, ValidationPipeline};
use crate::retry::FailureTracker;
use crate::sampler::SceneDescriptor;

/// Jobs pulled per consume call.
const CONSUME_BATCH: usize = 5;
/// Block time for one consume call.
const CONSUME_BLOCK_MS: u64 = 1000;

pub struct RenderExecutor {
    pipeline: Arc<ValidationPipeline>,
    queue: Arc<dyn RenderQueue>,
    job_semaphore: Arc<Semaphore>,
    max_concurrent_jobs: usize,
    shutdown_timeout: Duration,
    shutdown: tokio::sync::watch::Sender<bool>,
    consumer_name: String,
}

impl RenderExecutor {
    pub fn new(pipeline: Arc<ValidationPipeline>, queue: Arc<dyn RenderQueue>, max_concurrent_jobs: usize) -> Self {
        let max_concurrent_jobs = max_concurrent_jobs.max(1);
        let (shutdown, _) = tokio::sync::watch::channel(false);
        Self {
            pipeline,
            queue,
            job_semaphore: Arc::new(Semaphore::new(max_concurrent_jobs)),
            max_concurrent_jobs,
            shutdown_timeout: Duration::from_secs(60),
            shutdown,
            consumer_name: format!("rqv-worker-{}", Uuid::new_v4()),
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Consume until `shutdown` is called, then wait for in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting render executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.max_concurrent_jobs
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut failures = FailureTracker::new(5);

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping executor");
                        break;
                    }
                }
                result = self.consume_jobs() => {
                    match result {
                        Ok(()) => failures.record_success(),
                        Err(e) => {
                            if failures.record_failure() {
                                error!("Error consuming jobs: {}", e);
                            }
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.shutdown_timeout, self.wait_for_jobs()).await.is_err() {
            warn!("Shutdown timeout elapsed with jobs still running");
        }
        info!("Render executor stopped");
        Ok(())
    }

    /// Process every job currently queued, one at a time. Returns the number
    /// of jobs handled.
    pub async fn drain(&self) -> WorkerResult<usize> {
        let mut handled = 0;
        loop {
            let jobs = self.queue.consume(&self.consumer_name, 0, CONSUME_BATCH).await?;
            if jobs.is_empty() {
                return Ok(handled);
            }
            for (message_id, job) in jobs {
                Self::execute_job(Arc::clone(&self.pipeline), Arc::clone(&self.queue), message_id, job).await;
                handled += 1;
            }
        }
    }

    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        let jobs = self
            .queue
            .consume(&self.consumer_name, CONSUME_BLOCK_MS, available.min(CONSUME_BATCH))
            .await?;
        if jobs.is_empty() {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }
        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let pipeline = Arc::clone(&self.pipeline);
            let queue = Arc::clone(&self.queue);
            let permit = Arc::clone(&self.job_semaphore)
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::render_failed("Semaphore closed"))?;

            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(pipeline, queue, message_id, job).await;
            });
        }
        Ok(())
    }

    async fn execute_job(
        pipeline: Arc<ValidationPipeline>,
        queue: Arc<dyn RenderQueue>,
        message_id: String,
        job: RenderJob,
    ) {
        let sample_id = job.sample_id().clone();
        info!(sample_id = %sample_id, job_id = %job.job_id, "Executing re-render");

        match Self::process_job(&pipeline, &job).await {
            Ok(()) => {
                if let Err(e) = queue.complete(&message_id, &job).await {
                    error!(sample_id = %sample_id, "Failed to ack job {}: {}", message_id, e);
                }
            }
            Err(e) => {
                error!(sample_id = %sample_id, "Re-render failed, moving to DLQ: {}", e);
                if let Err(dlq_err) = queue.dead_letter(&message_id, &job, &e.to_string()).await {
                    error!(sample_id = %sample_id, "Failed to move job {} to DLQ: {}", message_id, dlq_err);
                }
            }
        }

        // Release the item either way so a later cycle can requeue the sample
        let store = pipeline.store();
        let retry = StoreRetryConfig::default();
        if let Err(e) = with_retry(&retry, "mark_requeue_consumed", || {
            store.mark_requeue_consumed(&job.item.item_id)
        })
        .await
        {
            warn!(sample_id = %sample_id, "Failed to mark requeue item consumed: {}", e);
        }
    }

    async fn process_job(pipeline: &ValidationPipeline, job: &RenderJob) -> WorkerResult<()> {
        let store = pipeline.store();
        let retry = StoreRetryConfig::default();
        let previous = with_retry(&retry, "get_sample", || store.get_sample(job.sample_id()))
            .await?
            .ok_or_else(|| StoreError::not_found(format!("sample record {}", job.sample_id())))?;

        let scene = SceneDescriptor {
            name: previous.descriptor,
            color: previous.color,
            largest_extent_mm: None,
        };
        let task = RenderTask::new(job.sample_id().clone(), scene).with_recipe(job.item.recipe.clone());
        let record = pipeline.process(&task).await?;
        info!(
            sample_id = %record.sample_id,
            qa_flag = %record.qa_flag(),
            "Re-render evaluated"
        );
        Ok(())
    }

    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationConfig;
    use crate::recipe::resolve_retry_recipe;
    use crate::sampler::AdaptiveSampler;
    use crate::test_support::{flat_image, FakeRenderer};
    use rqv_models::{ComplexityClass, QualityMetrics, RequeueItem, SampleId, SampleRecord};
    use rqv_queue::MemoryRenderQueue;
    use rqv_store::{MemoryStore, MetadataStore};

    fn setup(renderer: Arc<FakeRenderer>) -> (Arc<MemoryStore>, Arc<MemoryRenderQueue>, RenderExecutor) {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryRenderQueue::new());
        let sampler = Arc::new(AdaptiveSampler::new(Default::default()).unwrap());
        let pipeline = ValidationPipeline::new(
            Arc::new(ValidationConfig::default()),
            sampler,
            renderer,
            store.clone(),
        )
        .with_work_dir(std::env::temp_dir().join("rqv-executor-tests"));
        let executor = RenderExecutor::new(Arc::new(pipeline), queue.clone(), 2);
        (store, queue, executor)
    }

    async fn requeue(store: &MemoryStore, queue: &MemoryRenderQueue, id: &str) -> RequeueItem {
        let reason = "SSIM 0.400 < 0.960";
        let record = SampleRecord::new(
            SampleId::from(id),
            "3001 brick 2x4",
            Some("Red".into()),
            ComplexityClass::Simple,
            256,
            QualityMetrics::render_failure(reason),
        );
        store.upsert_sample(&record).await.unwrap();
        let item = RequeueItem::new(SampleId::from(id), reason, resolve_retry_recipe(reason));
        queue.submit(&item).await.unwrap();
        store.insert_requeue_item(&item).await.unwrap();
        item
    }

    #[tokio::test]
    async fn test_drain_rerenders_with_recipe() {
        let renderer = Arc::new(FakeRenderer::rendering(flat_image));
        let (store, queue, executor) = setup(Arc::clone(&renderer));
        requeue(&store, &queue, "s-1").await;

        assert_eq!(executor.drain().await.unwrap(), 1);

        let request = renderer.last_request().unwrap();
        assert_eq!(request.recipe.samples, 512);
        assert_eq!(request.recipe.lighting, "studio");
        assert_eq!(request.target.color.as_deref(), Some("Red"));

        let record = store.get_sample(&SampleId::from("s-1")).await.unwrap().unwrap();
        assert_eq!(record.sample_budget, 512);
        assert!(store.pending_requeue_item(&SampleId::from("s-1")).await.unwrap().is_none());
        assert!(!queue.is_pending(&SampleId::from("s-1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_sample_goes_to_dlq() {
        let renderer = Arc::new(FakeRenderer::rendering(flat_image));
        let (store, queue, executor) = setup(Arc::clone(&renderer));
        let item = RequeueItem::new(SampleId::from("ghost"), "SSIM 0.400 < 0.960", resolve_retry_recipe("SSIM"));
        queue.submit(&item).await.unwrap();
        store.insert_requeue_item(&item).await.unwrap();

        executor.drain().await.unwrap();

        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert!(dead[0].2.contains("sample record ghost"));
        assert_eq!(renderer.calls(), 0);
        assert!(store.pending_requeue_item(&SampleId::from("ghost")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let renderer = Arc::new(FakeRenderer::timing_out());
        let (store, queue, executor) = setup(renderer);
        requeue(&store, &queue, "s-2").await;
        let executor = Arc::new(executor.with_shutdown_timeout(Duration::from_secs(5)));

        let runner = Arc::clone(&executor);
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(300)).await;
        executor.shutdown();

        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let record = store.get_sample(&SampleId::from("s-2")).await.unwrap().unwrap();
        assert_eq!(record.reason(), rqv_models::RENDER_TIMEOUT_REASON);
    }
}
