//! Render job carried on the queue.

use chrono::{DateTime, Utc};
use rqv_models::{RequeueItem, RequeuePriority, SampleId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A requeued sample waiting to be re-rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderJob {
    /// Unique job ID
    pub job_id: String,
    /// Requeue item with the resolved recipe
    pub item: RequeueItem,
    pub enqueued_at: DateTime<Utc>,
}

impl RenderJob {
    pub fn new(item: RequeueItem) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            item,
            enqueued_at: Utc::now(),
        }
    }

    pub fn sample_id(&self) -> &SampleId {
        &self.item.sample_id
    }

    pub fn priority(&self) -> RequeuePriority {
        self.item.priority
    }

    /// Generate idempotency key for deduplication.
    pub fn idempotency_key(&self) -> String {
        self.item.idempotency_key()
    }
}
