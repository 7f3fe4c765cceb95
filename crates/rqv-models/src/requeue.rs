//! Requeue items created for failed samples.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{RetryRecipe, SampleId};

/// Queue priority of a requeue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequeuePriority {
    #[default]
    Normal,
    High,
}

impl RequeuePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequeuePriority::Normal => "normal",
            RequeuePriority::High => "high",
        }
    }
}

/// A failed sample resubmitted with a corrective recipe.
///
/// Created on FAIL, consumed when the re-render completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RequeueItem {
    /// Unique item ID
    pub item_id: String,
    /// Sample being re-rendered
    pub sample_id: SampleId,
    /// Failure reason that selected the recipe
    pub failure_reason: String,
    /// Resolved recipe
    pub recipe: RetryRecipe,
    pub priority: RequeuePriority,
    pub created_at: DateTime<Utc>,
    /// Set once the re-render has completed
    #[serde(default)]
    pub consumed: bool,
}

impl RequeueItem {
    /// Create a high-priority requeue item.
    pub fn new(sample_id: SampleId, failure_reason: impl Into<String>, recipe: RetryRecipe) -> Self {
        Self {
            item_id: Uuid::new_v4().to_string(),
            sample_id,
            failure_reason: failure_reason.into(),
            recipe,
            priority: RequeuePriority::High,
            created_at: Utc::now(),
            consumed: false,
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: RequeuePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Idempotency key used by the render queue and the metadata store.
    pub fn idempotency_key(&self) -> String {
        format!("requeue:{}", self.sample_id)
    }
}
