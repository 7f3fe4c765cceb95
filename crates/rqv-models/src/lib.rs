//! Shared data models for the render quality validation loop.
//!
//! This crate provides Serde-serializable types for:
//! - Camera snapshots captured at render time
//! - Per-sample quality metrics and QA flags
//! - Complexity tiers and their sample budgets
//! - Retry recipes, requeue items and retrain trigger state
//! - Requeue cycle summaries

pub mod camera;
pub mod complexity;
pub mod quality;
pub mod recipe;
pub mod requeue;
pub mod sample;
pub mod summary;
pub mod trigger;

// Re-export common types
pub use camera::{CameraSnapshot, Intrinsics};
pub use complexity::{ComplexityClass, ComplexityClassParseError};
pub use quality::{
    MetricKind, MetricViolation, QaFlag, QualityMetrics, PNP_FAILURE_RMS, RENDER_FAILURE_PREFIX,
    RENDER_TIMEOUT_REASON,
};
pub use recipe::{FailureCategory, RetryRecipe};
pub use requeue::{RequeueItem, RequeuePriority};
pub use sample::{SampleId, SampleRecord};
pub use summary::{CycleError, FailureEntry, RequeueSummary};
pub use trigger::{FailureStatistics, RetrainDecision, RetrainTriggerState, TriggerCondition};
