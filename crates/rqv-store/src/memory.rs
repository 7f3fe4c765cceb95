//! In-process metadata store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rqv_models::{QaFlag, RequeueItem, RetrainTriggerState, SampleId, SampleRecord};
use tokio::sync::RwLock;

use crate::error::{StoreError, StoreResult};
use crate::store::MetadataStore;

#[derive(Default)]
struct Tables {
    samples: HashMap<SampleId, SampleRecord>,
    requeue_items: Vec<RequeueItem>,
    trigger_state: Option<RetrainTriggerState>,
}

/// `MetadataStore` backed by process memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All requeue items, consumed or not, in insertion order.
    pub async fn requeue_items(&self) -> Vec<RequeueItem> {
        self.tables.read().await.requeue_items.clone()
    }

    pub async fn sample_count(&self) -> usize {
        self.tables.read().await.samples.len()
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn upsert_sample(&self, record: &SampleRecord) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .samples
            .insert(record.sample_id.clone(), record.clone());
        Ok(())
    }

    async fn get_sample(&self, sample_id: &SampleId) -> StoreResult<Option<SampleRecord>> {
        Ok(self.tables.read().await.samples.get(sample_id).cloned())
    }

    async fn query_samples(
        &self,
        since: DateTime<Utc>,
        flag: Option<QaFlag>,
    ) -> StoreResult<Vec<SampleRecord>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<SampleRecord> = tables
            .samples
            .values()
            .filter(|r| r.evaluated_at >= since)
            .filter(|r| flag.map_or(true, |f| r.qa_flag() == f))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.evaluated_at
                .cmp(&b.evaluated_at)
                .then_with(|| a.sample_id.cmp(&b.sample_id))
        });
        Ok(rows)
    }

    async fn insert_requeue_item(&self, item: &RequeueItem) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if tables
            .requeue_items
            .iter()
            .any(|i| i.sample_id == item.sample_id && !i.consumed)
        {
            return Ok(false);
        }
        tables.requeue_items.push(item.clone());
        Ok(true)
    }

    async fn pending_requeue_item(&self, sample_id: &SampleId) -> StoreResult<Option<RequeueItem>> {
        Ok(self
            .tables
            .read()
            .await
            .requeue_items
            .iter()
            .find(|i| &i.sample_id == sample_id && !i.consumed)
            .cloned())
    }

    async fn mark_requeue_consumed(&self, item_id: &str) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let item = tables
            .requeue_items
            .iter_mut()
            .find(|i| i.item_id == item_id)
            .ok_or_else(|| StoreError::not_found(format!("requeue item {}", item_id)))?;
        item.consumed = true;
        Ok(())
    }

    async fn load_trigger_state(&self) -> StoreResult<Option<RetrainTriggerState>> {
        Ok(self.tables.read().await.trigger_state.clone())
    }

    async fn save_trigger_state(&self, state: &RetrainTriggerState) -> StoreResult<()> {
        self.tables.write().await.trigger_state = Some(state.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rqv_models::{ComplexityClass, FailureCategory, QualityMetrics, RetryRecipe};

    fn record(id: &str, flag_fail: bool, age_secs: i64) -> SampleRecord {
        let metrics = if flag_fail {
            QualityMetrics::render_failure("SSIM 0.400 < 0.960")
        } else {
            let mut m = QualityMetrics::render_failure("");
            m.qa_flag = QaFlag::Pass;
            m.reason = None;
            m
        };
        SampleRecord::new(
            SampleId::from(id),
            "brick 2x4",
            None,
            ComplexityClass::Simple,
            256,
            metrics,
        )
        .with_evaluated_at(Utc::now() - Duration::seconds(age_secs))
    }

    fn recipe() -> RetryRecipe {
        RetryRecipe {
            category: FailureCategory::Default,
            samples: 384,
            lighting: "balanced".into(),
            background: "random".into(),
            camera_distance: 1.5,
            focus_depth: 0.5,
            camera_variation: 0.1,
            pose_variation: 0.2,
            color_management: "standard".into(),
            resolution: (1024, 1024),
            target_fill: 0.75,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        let store = MemoryStore::new();
        store.upsert_sample(&record("a", true, 30)).await.unwrap();
        store.upsert_sample(&record("b", false, 20)).await.unwrap();
        store.upsert_sample(&record("c", true, 10)).await.unwrap();
        store.upsert_sample(&record("old", true, 7200)).await.unwrap();

        let since = Utc::now() - Duration::seconds(3600);
        let failed = store.query_samples(since, Some(QaFlag::Fail)).await.unwrap();
        let ids: Vec<_> = failed.iter().map(|r| r.sample_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        let all = store.query_samples(since, None).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_requeue_item_is_idempotent_per_sample() {
        let store = MemoryStore::new();
        let first = RequeueItem::new(SampleId::from("s"), "SSIM", recipe());
        let second = RequeueItem::new(SampleId::from("s"), "SSIM", recipe());

        assert!(store.insert_requeue_item(&first).await.unwrap());
        assert!(!store.insert_requeue_item(&second).await.unwrap());
        assert_eq!(store.requeue_items().await.len(), 1);

        store.mark_requeue_consumed(&first.item_id).await.unwrap();
        assert!(store.pending_requeue_item(&SampleId::from("s")).await.unwrap().is_none());

        // Once consumed, the sample may be requeued again
        assert!(store.insert_requeue_item(&second).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_unknown_item() {
        let store = MemoryStore::new();
        let err = store.mark_requeue_consumed("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_trigger_state_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.load_trigger_state().await.unwrap().is_none());

        let state = RetrainTriggerState {
            consecutive_failures: 3,
            ..Default::default()
        };
        store.save_trigger_state(&state).await.unwrap();
        assert_eq!(store.load_trigger_state().await.unwrap(), Some(state));
    }
}
