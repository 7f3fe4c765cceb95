//! In-process render queue.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use rqv_models::{RequeueItem, RequeuePriority, SampleId};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{QueueError, QueueResult};
use crate::job::RenderJob;
use crate::queue::{RenderQueue, SubmitOutcome};

#[derive(Default)]
struct State {
    next_id: u64,
    high: VecDeque<(String, RenderJob)>,
    normal: VecDeque<(String, RenderJob)>,
    in_flight: Vec<(String, RenderJob)>,
    pending_samples: HashSet<SampleId>,
    dead_letters: Vec<(String, RenderJob, String)>,
}

/// `RenderQueue` backed by process memory. `block_ms` is ignored.
#[derive(Default)]
pub struct MemoryRenderQueue {
    state: Mutex<State>,
}

impl MemoryRenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs waiting to be consumed.
    pub async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.high.len() + state.normal.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn dead_letters(&self) -> Vec<(String, RenderJob, String)> {
        self.state.lock().await.dead_letters.clone()
    }
}

#[async_trait]
impl RenderQueue for MemoryRenderQueue {
    async fn submit(&self, item: &RequeueItem) -> QueueResult<SubmitOutcome> {
        let mut state = self.state.lock().await;
        if !state.pending_samples.insert(item.sample_id.clone()) {
            return Ok(SubmitOutcome::Duplicate);
        }

        state.next_id += 1;
        let message_id = format!("{}-0", state.next_id);
        let job = RenderJob::new(item.clone());
        match item.priority {
            RequeuePriority::High => state.high.push_back((message_id.clone(), job)),
            RequeuePriority::Normal => state.normal.push_back((message_id.clone(), job)),
        }
        debug!(sample_id = %item.sample_id, "Enqueued render job {}", message_id);
        Ok(SubmitOutcome::Enqueued(message_id))
    }

    async fn consume(&self, _consumer: &str, _block_ms: u64, count: usize) -> QueueResult<Vec<(String, RenderJob)>> {
        let mut state = self.state.lock().await;
        let mut jobs = Vec::with_capacity(count);
        while jobs.len() < count {
            let next = match state.high.pop_front() {
                Some(job) => Some(job),
                None => state.normal.pop_front(),
            };
            match next {
                Some(job) => jobs.push(job),
                None => break,
            }
        }
        state.in_flight.extend(jobs.iter().cloned());
        Ok(jobs)
    }

    async fn complete(&self, message_id: &str, job: &RenderJob) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let before = state.in_flight.len();
        state.in_flight.retain(|(id, _)| id != message_id);
        if state.in_flight.len() == before {
            return Err(QueueError::JobNotFound(message_id.to_string()));
        }
        state.pending_samples.remove(job.sample_id());
        Ok(())
    }

    async fn dead_letter(&self, message_id: &str, job: &RenderJob, error: &str) -> QueueResult<()> {
        self.complete(message_id, job).await?;
        self.state
            .lock()
            .await
            .dead_letters
            .push((message_id.to_string(), job.clone(), error.to_string()));
        Ok(())
    }

    async fn is_pending(&self, sample_id: &SampleId) -> QueueResult<bool> {
        Ok(self.state.lock().await.pending_samples.contains(sample_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rqv_models::{FailureCategory, RetryRecipe};

    fn item(sample: &str, priority: RequeuePriority) -> RequeueItem {
        let recipe = RetryRecipe {
            category: FailureCategory::Ssim,
            samples: 512,
            lighting: "studio".into(),
            background: "neutral".into(),
            camera_distance: 1.5,
            focus_depth: 0.5,
            camera_variation: 0.1,
            pose_variation: 0.2,
            color_management: "standard".into(),
            resolution: (1024, 1024),
            target_fill: 0.85,
            extra: Default::default(),
        };
        RequeueItem::new(SampleId::from(sample), "SSIM 0.400 < 0.960", recipe).with_priority(priority)
    }

    #[tokio::test]
    async fn test_submit_is_idempotent_per_sample() {
        let queue = MemoryRenderQueue::new();
        assert!(queue.submit(&item("a", RequeuePriority::High)).await.unwrap().is_enqueued());
        assert_eq!(
            queue.submit(&item("a", RequeuePriority::High)).await.unwrap(),
            SubmitOutcome::Duplicate
        );
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn test_high_priority_first() {
        let queue = MemoryRenderQueue::new();
        queue.submit(&item("normal", RequeuePriority::Normal)).await.unwrap();
        queue.submit(&item("high", RequeuePriority::High)).await.unwrap();

        let jobs = queue.consume("c", 0, 10).await.unwrap();
        let order: Vec<_> = jobs.iter().map(|(_, j)| j.sample_id().as_str()).collect();
        assert_eq!(order, vec!["high", "normal"]);
    }

    #[tokio::test]
    async fn test_complete_releases_sample() {
        let queue = MemoryRenderQueue::new();
        queue.submit(&item("a", RequeuePriority::High)).await.unwrap();
        let (id, job) = queue.consume("c", 0, 1).await.unwrap().remove(0);

        assert!(queue.is_pending(&SampleId::from("a")).await.unwrap());
        queue.complete(&id, &job).await.unwrap();
        assert!(!queue.is_pending(&SampleId::from("a")).await.unwrap());
        assert!(queue.submit(&item("a", RequeuePriority::High)).await.unwrap().is_enqueued());

        assert!(matches!(
            queue.complete(&id, &job).await,
            Err(QueueError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_dead_letter() {
        let queue = MemoryRenderQueue::new();
        queue.submit(&item("a", RequeuePriority::High)).await.unwrap();
        let (id, job) = queue.consume("c", 0, 1).await.unwrap().remove(0);

        queue.dead_letter(&id, &job, "renderer crashed").await.unwrap();
        let dlq = queue.dead_letters().await;
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].2, "renderer crashed");
    }
}
