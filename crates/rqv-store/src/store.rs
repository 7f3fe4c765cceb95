//! The metadata store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rqv_models::{QaFlag, RequeueItem, RetrainTriggerState, SampleId, SampleRecord};

use crate::error::StoreResult;

/// Persistence for sample records, requeue items and retrain trigger state.
///
/// Writes are idempotent per sample: re-inserting a sample record replaces it,
/// and inserting a requeue item while an unconsumed one exists for the same
/// sample is a no-op that returns `false`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or replace a sample record.
    async fn upsert_sample(&self, record: &SampleRecord) -> StoreResult<()>;

    async fn get_sample(&self, sample_id: &SampleId) -> StoreResult<Option<SampleRecord>>;

    /// Samples evaluated at or after `since`, oldest first, optionally filtered by flag.
    async fn query_samples(
        &self,
        since: DateTime<Utc>,
        flag: Option<QaFlag>,
    ) -> StoreResult<Vec<SampleRecord>>;

    /// Record a requeue item. Returns `false` when an unconsumed item already
    /// exists for the sample.
    async fn insert_requeue_item(&self, item: &RequeueItem) -> StoreResult<bool>;

    /// The unconsumed requeue item for a sample, if any.
    async fn pending_requeue_item(&self, sample_id: &SampleId) -> StoreResult<Option<RequeueItem>>;

    async fn mark_requeue_consumed(&self, item_id: &str) -> StoreResult<()>;

    async fn load_trigger_state(&self) -> StoreResult<Option<RetrainTriggerState>>;

    async fn save_trigger_state(&self, state: &RetrainTriggerState) -> StoreResult<()>;
}
