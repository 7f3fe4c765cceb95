//! Auto-requeue orchestrator.
//!
//! One cycle:
//! 1. Load samples evaluated inside the lookback window.
//! 2. Requeue each FAIL sample with a recipe resolved from its reason,
//!    skipping samples that already have a pending item.
//! 3. Fold new samples into the retrain trigger state and, when a condition
//!    holds, ask the evaluator and hand off to training.
//!
//! Per-sample failures are recorded in the summary and never abort the cycle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rqv_models::{
    FailureEntry, FailureStatistics, QaFlag, RequeueItem, RequeuePriority, RequeueSummary, RetrainDecision,
    RetrainTriggerState, SampleRecord,
};
use rqv_queue::{RenderQueue, SubmitOutcome};
use rqv_store::{with_retry, MetadataStore, RetryConfig as StoreRetryConfig};
use tracing::{debug, error, info, warn};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::SampleLogger;
use crate::metrics;
use crate::notify::{Notification, Notifier, Severity};
use crate::recipe::{categorize, ensure_valid, resolve_retry_recipe};
use crate::retrain::{
    conditions_met, quality_degradation, RetrainEvaluator, RetrainRequest, TrainingHandoff, TriggerThresholds,
};
use crate::retry::{retry_async, RetryConfig};

/// Reasons reported to the evaluator.
const TOP_REASONS: usize = 5;

pub struct RequeueOrchestrator {
    store: Arc<dyn MetadataStore>,
    queue: Arc<dyn RenderQueue>,
    evaluator: Arc<dyn RetrainEvaluator>,
    notifier: Arc<dyn Notifier>,
    handoff: Arc<dyn TrainingHandoff>,
    thresholds: TriggerThresholds,
    store_retry: StoreRetryConfig,
    collaborator_retry: RetryConfig,
}

impl RequeueOrchestrator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        queue: Arc<dyn RenderQueue>,
        evaluator: Arc<dyn RetrainEvaluator>,
        notifier: Arc<dyn Notifier>,
        handoff: Arc<dyn TrainingHandoff>,
        thresholds: TriggerThresholds,
    ) -> Self {
        Self {
            store,
            queue,
            evaluator,
            notifier,
            handoff,
            thresholds,
            store_retry: StoreRetryConfig::default(),
            collaborator_retry: RetryConfig::default(),
        }
    }

    pub fn with_store_retry(mut self, retry: StoreRetryConfig) -> Self {
        self.store_retry = retry;
        self
    }

    pub fn with_collaborator_retry(mut self, retry: RetryConfig) -> Self {
        self.collaborator_retry = retry;
        self
    }

    /// Run one requeue cycle over samples evaluated in the last `lookback`.
    ///
    /// Fails only when the sample window itself cannot be loaded.
    pub async fn run_requeue_cycle(&self, lookback: Duration) -> WorkerResult<RequeueSummary> {
        let started = Instant::now();
        let window = chrono::Duration::from_std(lookback)
            .map_err(|e| WorkerError::config_error(format!("lookback window: {}", e)))?;
        let since = Utc::now() - window;

        let samples = with_retry(&self.store_retry, "query_samples", || {
            self.store.query_samples(since, None)
        })
        .await?;
        info!(since = %since, samples = samples.len(), "Starting requeue cycle");

        let mut summary = RequeueSummary {
            processed: samples.len() as u32,
            ..Default::default()
        };

        let mut seen = HashSet::new();
        for record in &samples {
            if !record.is_failed() {
                summary.passed += 1;
                continue;
            }
            summary.failed += 1;
            summary.failures.push(FailureEntry {
                sample_id: record.sample_id.clone(),
                reason: record.reason().to_string(),
            });

            // A sample re-evaluated inside the window appears more than once
            if !seen.insert(record.sample_id.clone()) {
                summary.skipped_duplicates += 1;
                metrics::record_requeue_skipped();
                continue;
            }
            self.requeue_sample(record, &mut summary).await;
        }

        self.update_retrain_trigger(&samples, lookback, &mut summary).await;

        for err in &summary.errors {
            warn!(sample_id = ?err.sample_id, stage = %err.stage, "Cycle error: {}", err.message);
        }
        metrics::record_cycle(started.elapsed().as_secs_f64());
        info!("Requeue cycle complete: {}", summary.summary());
        Ok(summary)
    }

    async fn requeue_sample(&self, record: &SampleRecord, summary: &mut RequeueSummary) {
        let sample_id = &record.sample_id;
        let logger = SampleLogger::new(sample_id, "requeue");

        match with_retry(&self.store_retry, "pending_requeue_item", || {
            self.store.pending_requeue_item(sample_id)
        })
        .await
        {
            Ok(Some(existing)) => {
                debug!(sample_id = %sample_id, item_id = %existing.item_id, "Requeue already pending");
                summary.skipped_duplicates += 1;
                metrics::record_requeue_skipped();
                return;
            }
            Ok(None) => {}
            Err(e) => {
                metrics::record_cycle_error("pending_lookup");
                summary.record_error(Some(sample_id), "pending_lookup", e.to_string());
                return;
            }
        }

        let reason = record.reason();
        let recipe = resolve_retry_recipe(reason);
        if let Err(e) = ensure_valid(&recipe) {
            metrics::record_cycle_error("resolve_recipe");
            summary.record_error(Some(sample_id), "resolve_recipe", e.to_string());
            return;
        }

        let category = categorize(reason);
        let item = RequeueItem::new(sample_id.clone(), reason, recipe).with_priority(RequeuePriority::High);

        // Submit before recording the item: a lost store write is healed by the
        // queue's own dedup on the next cycle
        let submitted = retry_async(&self.collaborator_retry, |e: &WorkerError| e.is_retryable(), || async {
            self.queue.submit(&item).await.map_err(WorkerError::from)
        })
        .await
        .into_result();

        match submitted {
            Ok(SubmitOutcome::Enqueued(message_id)) => {
                logger.log_progress(&format!("requeued as {} ({})", message_id, category));
                summary.requeued += 1;
                metrics::record_requeue(category);
            }
            Ok(SubmitOutcome::Duplicate) => {
                debug!(sample_id = %sample_id, "Render queue already holds this sample");
                summary.skipped_duplicates += 1;
                metrics::record_requeue_skipped();
                return;
            }
            Err(e) => {
                metrics::record_cycle_error("queue_submit");
                summary.record_error(Some(sample_id), "queue_submit", e.to_string());
                return;
            }
        }

        match with_retry(&self.store_retry, "insert_requeue_item", || self.store.insert_requeue_item(&item)).await {
            Ok(true) => {}
            Ok(false) => debug!(sample_id = %sample_id, "Requeue item already recorded"),
            Err(e) => {
                metrics::record_cycle_error("record_requeue");
                summary.record_error(Some(sample_id), "record_requeue", e.to_string());
            }
        }
    }

    async fn update_retrain_trigger(&self, samples: &[SampleRecord], lookback: Duration, summary: &mut RequeueSummary) {
        let mut state = match with_retry(&self.store_retry, "load_trigger_state", || self.store.load_trigger_state()).await
        {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                metrics::record_cycle_error("load_trigger_state");
                summary.record_error(None, "load_trigger_state", e.to_string());
                return;
            }
        };

        fold_samples(&mut state, samples);
        let fresh: Vec<&SampleRecord> = samples
            .iter()
            .filter(|r| state.is_after_retrain(r.evaluated_at))
            .collect();
        let mean_ssim = mean_ssim(&fresh);
        state.quality_degradation = quality_degradation(mean_ssim, self.thresholds.baseline_ssim);
        state.failure_volume = fresh.iter().filter(|r| r.is_failed()).count() as u32;
        state.updated_at = Utc::now();

        let conditions = conditions_met(&state, &self.thresholds);
        if !conditions.is_empty() {
            let stats = FailureStatistics {
                consecutive_failures: state.consecutive_failures,
                failure_volume: state.failure_volume,
                quality_degradation: state.quality_degradation,
                mean_ssim,
                baseline_ssim: self.thresholds.baseline_ssim,
                samples_in_window: fresh.len() as u32,
                window_secs: lookback.as_secs(),
                top_reasons: top_reasons(&fresh, TOP_REASONS),
                conditions,
            };
            if self.trigger_retrain(stats, summary).await {
                state.reset();
            }
        }

        if let Err(e) = with_retry(&self.store_retry, "save_trigger_state", || self.store.save_trigger_state(&state)).await
        {
            metrics::record_cycle_error("save_trigger_state");
            summary.record_error(None, "save_trigger_state", e.to_string());
        }
    }

    /// Returns true when retraining was handed off.
    async fn trigger_retrain(&self, stats: FailureStatistics, summary: &mut RequeueSummary) -> bool {
        let decision = retry_async(&self.collaborator_retry, |e: &WorkerError| e.is_retryable(), || {
            self.evaluator.evaluate(&stats)
        })
        .await
        .into_result();

        let decision = match decision {
            Ok(decision) => decision,
            Err(e) => {
                metrics::record_cycle_error("retrain_evaluate");
                summary.record_error(None, "retrain_evaluate", e.to_string());
                RetrainDecision::no()
            }
        };
        if !decision.should_retrain {
            debug!("Retrain evaluator declined");
            return false;
        }

        let request = RetrainRequest::new(&decision, stats);
        let notification = Notification::new("Retrain triggered", decision.reasons.join("; "), Severity::Critical);
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!("Failed to send retrain notification: {}", e);
        }

        let handed_off = retry_async(&self.collaborator_retry, |e: &WorkerError| e.is_retryable(), || {
            self.handoff.hand_off(&request)
        })
        .await;

        match handed_off.into_result() {
            Ok(()) => {
                info!(request_id = %request.request_id, reasons = ?request.reasons, "Retrain triggered");
                metrics::record_retrain_trigger();
                summary.retrain_triggered = true;
                true
            }
            Err(e) => {
                error!(request_id = %request.request_id, "Training hand-off failed: {}", e);
                metrics::record_cycle_error("training_handoff");
                summary.record_error(None, "training_handoff", e.to_string());
                false
            }
        }
    }
}

/// Extend the FAIL streak with samples newer than the state's watermark.
/// `samples` is oldest first.
pub fn fold_samples(state: &mut RetrainTriggerState, samples: &[SampleRecord]) {
    for record in samples {
        if state.last_evaluated_at.is_some_and(|w| record.evaluated_at <= w) {
            continue;
        }
        if record.qa_flag() == QaFlag::Fail {
            state.consecutive_failures += 1;
        } else {
            state.consecutive_failures = 0;
        }
        state.last_evaluated_at = Some(record.evaluated_at);
    }
}

/// Mean SSIM over samples that produced an image.
fn mean_ssim(samples: &[&SampleRecord]) -> Option<f64> {
    let values: Vec<f64> = samples.iter().filter_map(|r| r.metrics.measured_ssim()).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Most frequent FAIL reasons, ties broken alphabetically.
fn top_reasons(samples: &[&SampleRecord], limit: usize) -> Vec<(String, u32)> {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    for record in samples.iter().filter(|r| r.is_failed()) {
        *counts.entry(record.reason()).or_default() += 1;
    }
    let mut ranked: Vec<(String, u32)> = counts.into_iter().map(|(r, c)| (r.to_string(), c)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrain::ThresholdRetrainEvaluator;
    use crate::notify::LogNotifier;
    use async_trait::async_trait;
    use chrono::DateTime;
    use rqv_models::{ComplexityClass, FailureCategory, QualityMetrics, SampleId};
    use rqv_queue::{MemoryRenderQueue, QueueError, QueueResult, RenderJob};
    use rqv_store::MemoryStore;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandoff {
        requests: Mutex<Vec<RetrainRequest>>,
    }

    #[async_trait]
    impl TrainingHandoff for RecordingHandoff {
        async fn hand_off(&self, request: &RetrainRequest) -> WorkerResult<()> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    /// Rejects one sample, delegates the rest.
    struct FlakyQueue {
        inner: MemoryRenderQueue,
        reject: SampleId,
    }

    #[async_trait]
    impl RenderQueue for FlakyQueue {
        async fn submit(&self, item: &RequeueItem) -> QueueResult<SubmitOutcome> {
            if item.sample_id == self.reject {
                return Err(QueueError::enqueue_failed("stream full"));
            }
            self.inner.submit(item).await
        }
        async fn consume(&self, consumer: &str, block_ms: u64, count: usize) -> QueueResult<Vec<(String, RenderJob)>> {
            self.inner.consume(consumer, block_ms, count).await
        }
        async fn complete(&self, message_id: &str, job: &RenderJob) -> QueueResult<()> {
            self.inner.complete(message_id, job).await
        }
        async fn dead_letter(&self, message_id: &str, job: &RenderJob, error: &str) -> QueueResult<()> {
            self.inner.dead_letter(message_id, job, error).await
        }
        async fn is_pending(&self, sample_id: &SampleId) -> QueueResult<bool> {
            self.inner.is_pending(sample_id).await
        }
    }

    fn pass() -> QualityMetrics {
        QualityMetrics {
            ssim: 0.98,
            snr: 35.0,
            sharpness: 0.8,
            reprojection_rms: 0.5,
            depth_score: 0.95,
            noise: None,
            contrast: None,
            qa_flag: QaFlag::Pass,
            reason: None,
            violations: Vec::new(),
            pnp_insufficient_correspondences: false,
            depth_unreadable: false,
            render_failed: false,
        }
    }

    fn failing(reason: &str, ssim: f64) -> QualityMetrics {
        QualityMetrics {
            ssim,
            qa_flag: QaFlag::Fail,
            reason: Some(reason.to_string()),
            ..pass()
        }
    }

    fn ssim_fail() -> QualityMetrics {
        failing("SSIM 0.400 < 0.960", 0.40)
    }

    /// Geometric failure with healthy SSIM, so only the streak condition moves.
    fn pnp_fail() -> QualityMetrics {
        failing("PnP RMS 5.250px > 2.000px", 0.98)
    }

    fn record(id: &str, metrics: QualityMetrics, at: DateTime<Utc>) -> SampleRecord {
        SampleRecord::new(SampleId::from(id), "3001 brick 2x4", None, ComplexityClass::Simple, 256, metrics)
            .with_evaluated_at(at)
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig::new("test").with_max_retries(1).with_base_delay(Duration::from_millis(1))
    }

    fn orchestrator(
        store: Arc<MemoryStore>,
        queue: Arc<dyn RenderQueue>,
        handoff: Arc<RecordingHandoff>,
    ) -> RequeueOrchestrator {
        RequeueOrchestrator::new(
            store,
            queue,
            Arc::new(ThresholdRetrainEvaluator),
            Arc::new(LogNotifier),
            handoff,
            TriggerThresholds::default(),
        )
        .with_collaborator_retry(fast_retry())
    }

    #[tokio::test]
    async fn test_low_ssim_is_requeued_with_studio_recipe() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryRenderQueue::new());
        let now = Utc::now();
        store.upsert_sample(&record("bad", ssim_fail(), now)).await.unwrap();
        store.upsert_sample(&record("good", pass(), now)).await.unwrap();

        let o = orchestrator(Arc::clone(&store), queue.clone(), Arc::default());
        let summary = o.run_requeue_cycle(Duration::from_secs(3600)).await.unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.requeued, 1);
        assert!(summary.errors.is_empty());
        assert_eq!(summary.failures[0].reason, "SSIM 0.400 < 0.960");

        let items = store.requeue_items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].recipe.category, FailureCategory::Ssim);
        assert_eq!(items[0].recipe.lighting, "studio");
        assert_eq!(items[0].recipe.samples, 512);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_second_cycle_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryRenderQueue::new());
        store.upsert_sample(&record("bad", ssim_fail(), Utc::now())).await.unwrap();

        let o = orchestrator(Arc::clone(&store), queue.clone(), Arc::default());
        o.run_requeue_cycle(Duration::from_secs(3600)).await.unwrap();
        let second = o.run_requeue_cycle(Duration::from_secs(3600)).await.unwrap();

        assert_eq!(second.requeued, 0);
        assert_eq!(second.skipped_duplicates, 1);
        assert_eq!(queue.len().await, 1);
        assert_eq!(store.requeue_items().await.len(), 1);
    }

    #[tokio::test]
    async fn test_consecutive_failures_trigger_retrain() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryRenderQueue::new());
        let handoff = Arc::new(RecordingHandoff::default());
        let base = Utc::now() - chrono::Duration::minutes(30);
        store.upsert_sample(&record("ok", pass(), base)).await.unwrap();
        for i in 0..12 {
            let at = base + chrono::Duration::seconds(i + 1);
            store.upsert_sample(&record(&format!("f{}", i), ssim_fail(), at)).await.unwrap();
        }

        let o = orchestrator(Arc::clone(&store), queue, Arc::clone(&handoff));
        let summary = o.run_requeue_cycle(Duration::from_secs(3600)).await.unwrap();

        assert!(summary.retrain_triggered);
        let requests = handoff.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].statistics.consecutive_failures, 12);
        assert_eq!(requests[0].statistics.top_reasons[0], ("SSIM 0.400 < 0.960".to_string(), 12));

        // Counters reset, watermark kept: the same samples do not re-trigger
        let state = store.load_trigger_state().await.unwrap().unwrap();
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_evaluated_at.is_some());
    }

    #[tokio::test]
    async fn test_streak_survives_across_cycles() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryRenderQueue::new());
        let handoff = Arc::new(RecordingHandoff::default());
        let o = orchestrator(Arc::clone(&store), queue, Arc::clone(&handoff));
        let base = Utc::now() - chrono::Duration::minutes(30);

        for i in 0..6 {
            let at = base + chrono::Duration::seconds(i);
            store.upsert_sample(&record(&format!("a{}", i), pnp_fail(), at)).await.unwrap();
        }
        assert!(!o.run_requeue_cycle(Duration::from_secs(3600)).await.unwrap().retrain_triggered);

        for i in 0..4 {
            let at = base + chrono::Duration::seconds(100 + i);
            store.upsert_sample(&record(&format!("b{}", i), pnp_fail(), at)).await.unwrap();
        }
        assert!(o.run_requeue_cycle(Duration::from_secs(3600)).await.unwrap().retrain_triggered);
        assert_eq!(handoff.requests.lock().unwrap()[0].statistics.consecutive_failures, 10);
    }

    #[tokio::test]
    async fn test_failure_volume_triggers_once_per_window() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryRenderQueue::new());
        let handoff = Arc::new(RecordingHandoff::default());
        let base = Utc::now() - chrono::Duration::minutes(30);
        // Interleaved passes keep the streak at 1; only the volume condition holds
        for i in 0..100 {
            let at = base + chrono::Duration::seconds(2 * i);
            store.upsert_sample(&record(&format!("f{}", i), pnp_fail(), at)).await.unwrap();
            let at = at + chrono::Duration::seconds(1);
            store.upsert_sample(&record(&format!("p{}", i), pass(), at)).await.unwrap();
        }

        let o = orchestrator(Arc::clone(&store), queue, Arc::clone(&handoff));
        let first = o.run_requeue_cycle(Duration::from_secs(3600)).await.unwrap();
        assert!(first.retrain_triggered);

        for _ in 0..2 {
            let again = o.run_requeue_cycle(Duration::from_secs(3600)).await.unwrap();
            assert!(!again.retrain_triggered);
            assert_eq!(again.failed, 100);
        }

        let requests = handoff.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].statistics.failure_volume, 100);
        let state = store.load_trigger_state().await.unwrap().unwrap();
        assert_eq!(state.failure_volume, 0);
        assert!(state.retrained_through.is_some());
    }

    #[tokio::test]
    async fn test_render_timeouts_do_not_degrade_quality() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryRenderQueue::new());
        let handoff = Arc::new(RecordingHandoff::default());
        let base = Utc::now() - chrono::Duration::minutes(30);
        for i in 0..18 {
            let at = base + chrono::Duration::seconds(i);
            store.upsert_sample(&record(&format!("p{}", i), pass(), at)).await.unwrap();
        }
        for i in 0..2 {
            let at = base + chrono::Duration::seconds(100 + i);
            let metrics = QualityMetrics::render_timeout();
            store.upsert_sample(&record(&format!("t{}", i), metrics, at)).await.unwrap();
        }

        let o = orchestrator(Arc::clone(&store), queue, Arc::clone(&handoff));
        let summary = o.run_requeue_cycle(Duration::from_secs(3600)).await.unwrap();

        assert_eq!(summary.failed, 2);
        assert!(!summary.retrain_triggered);
        assert!(handoff.requests.lock().unwrap().is_empty());
        let state = store.load_trigger_state().await.unwrap().unwrap();
        assert_eq!(state.quality_degradation, 0.0);
    }

    #[test]
    fn test_mean_ssim_skips_renders_without_output() {
        let now = Utc::now();
        let samples = [
            record("a", pass(), now),
            record("b", QualityMetrics::render_failure("exit 1"), now),
        ];
        let refs: Vec<&SampleRecord> = samples.iter().collect();
        assert_eq!(mean_ssim(&refs), Some(0.98));
        assert_eq!(mean_ssim(&refs[1..]), None);
    }

    #[tokio::test]
    async fn test_submit_error_is_isolated() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(FlakyQueue {
            inner: MemoryRenderQueue::new(),
            reject: SampleId::from("stuck"),
        });
        let now = Utc::now();
        store.upsert_sample(&record("stuck", ssim_fail(), now)).await.unwrap();
        store.upsert_sample(&record("fine", ssim_fail(), now)).await.unwrap();

        let o = orchestrator(Arc::clone(&store), queue, Arc::default());
        let summary = o.run_requeue_cycle(Duration::from_secs(3600)).await.unwrap();

        assert_eq!(summary.requeued, 1);
        assert_eq!(summary.errors.len(), 1);
        assert_eq!(summary.errors[0].stage, "queue_submit");
        assert_eq!(summary.errors[0].sample_id, Some(SampleId::from("stuck")));
        // Nothing recorded for the failed submit, so the next cycle retries it
        assert!(store.pending_requeue_item(&SampleId::from("stuck")).await.unwrap().is_none());
    }

    #[test]
    fn test_fold_respects_watermark() {
        let now = Utc::now();
        let samples = vec![
            record("a", ssim_fail(), now - chrono::Duration::seconds(3)),
            record("b", pass(), now - chrono::Duration::seconds(2)),
            record("c", ssim_fail(), now - chrono::Duration::seconds(1)),
        ];
        let mut state = RetrainTriggerState::default();
        fold_samples(&mut state, &samples);
        assert_eq!(state.consecutive_failures, 1);

        fold_samples(&mut state, &samples);
        assert_eq!(state.consecutive_failures, 1);
    }

    #[test]
    fn test_top_reasons_ranked() {
        let now = Utc::now();
        let samples = vec![
            record("a", ssim_fail(), now),
            record("b", pnp_fail(), now),
            record("c", ssim_fail(), now),
            record("d", pass(), now),
        ];
        let top = top_reasons(&samples.iter().collect::<Vec<_>>(), 5);
        assert_eq!(top[0], ("SSIM 0.400 < 0.960".to_string(), 2));
        assert_eq!(top[1].1, 1);
    }
}
