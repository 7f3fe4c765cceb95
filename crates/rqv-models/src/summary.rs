//! Requeue cycle summary reported to operators.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::SampleId;

/// A failed sample and its resolved reason string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FailureEntry {
    pub sample_id: SampleId,
    pub reason: String,
}

/// A per-sample error isolated during the cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CycleError {
    pub sample_id: Option<SampleId>,
    /// Stage that failed (e.g. "resolve_recipe", "queue_submit")
    pub stage: String,
    pub message: String,
}

/// Outcome of one requeue cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RequeueSummary {
    /// Samples evaluated inside the lookback window
    pub processed: u32,
    pub passed: u32,
    pub failed: u32,
    /// New requeue items submitted this cycle
    pub requeued: u32,
    /// FAIL samples skipped because they were already queued
    pub skipped_duplicates: u32,
    pub retrain_triggered: bool,
    pub failures: Vec<FailureEntry>,
    pub errors: Vec<CycleError>,
}

impl RequeueSummary {
    pub fn summary(&self) -> String {
        format!(
            "Processed: {}, Passed: {}, Failed: {}, Requeued: {}, Skipped: {}, Errors: {}, Retrain: {}",
            self.processed,
            self.passed,
            self.failed,
            self.requeued,
            self.skipped_duplicates,
            self.errors.len(),
            if self.retrain_triggered { "yes" } else { "no" }
        )
    }

    pub fn record_error(
        &mut self,
        sample_id: Option<&SampleId>,
        stage: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.errors.push(CycleError {
            sample_id: sample_id.cloned(),
            stage: stage.into(),
            message: message.into(),
        });
    }
}
