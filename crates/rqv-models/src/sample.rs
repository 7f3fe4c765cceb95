//! Sample identity and persisted sample records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::{ComplexityClass, QaFlag, QualityMetrics};

/// Unique identifier for a rendered sample.
///
/// This is the idempotency key for every write to the render queue and the
/// metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SampleId(pub String);

impl SampleId {
    /// Generate a new random sample ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SampleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SampleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SampleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Per-sample metadata row written once the sample has a terminal QA verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SampleRecord {
    /// Sample reference
    pub sample_id: SampleId,
    /// Part/shape descriptor the scene was built from
    pub descriptor: String,
    /// Material color identifier, if any
    #[serde(default)]
    pub color: Option<String>,
    /// Complexity tier chosen for this render
    pub complexity: ComplexityClass,
    /// Sample budget actually used (including any noise bump)
    pub sample_budget: u32,
    /// Quality metrics and verdict
    pub metrics: QualityMetrics,
    /// When the verdict was produced
    pub evaluated_at: DateTime<Utc>,
}

impl SampleRecord {
    /// Create a record stamped with the current time.
    pub fn new(
        sample_id: SampleId,
        descriptor: impl Into<String>,
        color: Option<String>,
        complexity: ComplexityClass,
        sample_budget: u32,
        metrics: QualityMetrics,
    ) -> Self {
        Self {
            sample_id,
            descriptor: descriptor.into(),
            color,
            complexity,
            sample_budget,
            metrics,
            evaluated_at: Utc::now(),
        }
    }

    /// Override the evaluation timestamp.
    pub fn with_evaluated_at(mut self, evaluated_at: DateTime<Utc>) -> Self {
        self.evaluated_at = evaluated_at;
        self
    }

    pub fn qa_flag(&self) -> QaFlag {
        self.metrics.qa_flag
    }

    pub fn is_failed(&self) -> bool {
        self.metrics.qa_flag == QaFlag::Fail
    }

    /// Failure reason, empty for passing samples.
    pub fn reason(&self) -> &str {
        self.metrics.reason.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_id_roundtrip() {
        let id = SampleId::from_string("sample-001");
        assert_eq!(id.as_str(), "sample-001");
        assert_eq!(id.to_string(), "sample-001");

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sample-001\"");
    }

    #[test]
    fn test_sample_id_unique() {
        assert_ne!(SampleId::new(), SampleId::new());
    }
}
