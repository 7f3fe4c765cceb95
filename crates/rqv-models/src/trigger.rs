//! Retrain trigger state and statistics.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Retrain trigger state persisted across requeue cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RetrainTriggerState {
    /// Current streak of FAIL samples in evaluation order
    pub consecutive_failures: u32,
    /// Relative SSIM degradation vs. baseline at the last cycle
    pub quality_degradation: f64,
    /// FAIL samples inside the last lookback window
    pub failure_volume: u32,
    /// Evaluation time of the newest sample already folded into the streak
    #[serde(default)]
    pub last_evaluated_at: Option<DateTime<Utc>>,
    /// Newest sample already covered by a retrain hand-off; volume and
    /// degradation only count samples evaluated after it
    #[serde(default)]
    pub retrained_through: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Default for RetrainTriggerState {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            quality_degradation: 0.0,
            failure_volume: 0,
            last_evaluated_at: None,
            retrained_through: None,
            updated_at: Utc::now(),
        }
    }
}

impl RetrainTriggerState {
    /// Whether a sample evaluated at `evaluated_at` is newer than the last
    /// retrain hand-off.
    pub fn is_after_retrain(&self, evaluated_at: DateTime<Utc>) -> bool {
        self.retrained_through.map_or(true, |w| evaluated_at > w)
    }

    /// Reset counters after a positive retrain trigger.
    ///
    /// `last_evaluated_at` is kept so already-counted samples are not
    /// folded into the next streak, and becomes `retrained_through` so they
    /// do not count toward volume or degradation either.
    pub fn reset(&mut self) {
        self.retrained_through = self.last_evaluated_at;
        self.consecutive_failures = 0;
        self.quality_degradation = 0.0;
        self.failure_volume = 0;
        self.updated_at = Utc::now();
    }
}

/// A retrain condition that held during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerCondition {
    ConsecutiveFailures { count: u32, threshold: u32 },
    QualityDegradation { degradation: f64, threshold: f64 },
    FailureVolume { count: u32, threshold: u32 },
}

impl TriggerCondition {
    pub fn describe(&self) -> String {
        match self {
            TriggerCondition::ConsecutiveFailures { count, threshold } => {
                format!("{} consecutive failures (threshold {})", count, threshold)
            }
            TriggerCondition::QualityDegradation {
                degradation,
                threshold,
            } => format!(
                "quality degraded {:.1}% vs baseline (threshold {:.1}%)",
                degradation * 100.0,
                threshold * 100.0
            ),
            TriggerCondition::FailureVolume { count, threshold } => {
                format!("{} failures in window (threshold {})", count, threshold)
            }
        }
    }
}

/// Accumulated failure statistics sent to the retrain evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FailureStatistics {
    pub consecutive_failures: u32,
    pub failure_volume: u32,
    pub quality_degradation: f64,
    /// Mean SSIM over the window, if any samples were evaluated
    pub mean_ssim: Option<f64>,
    pub baseline_ssim: f64,
    pub samples_in_window: u32,
    pub window_secs: u64,
    /// Most frequent failure reasons with counts, most frequent first
    pub top_reasons: Vec<(String, u32)>,
    /// Conditions that held this cycle
    pub conditions: Vec<TriggerCondition>,
}

impl FailureStatistics {
    pub fn any_condition(&self) -> bool {
        !self.conditions.is_empty()
    }
}

/// Answer from the retrain trigger evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RetrainDecision {
    pub should_retrain: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
}

impl RetrainDecision {
    pub fn no() -> Self {
        Self {
            should_retrain: false,
            reasons: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_keeps_watermark() {
        let watermark = Utc::now();
        let mut state = RetrainTriggerState {
            consecutive_failures: 12,
            quality_degradation: 0.07,
            failure_volume: 140,
            last_evaluated_at: Some(watermark),
            retrained_through: None,
            updated_at: watermark,
        };
        assert!(state.is_after_retrain(watermark));

        state.reset();
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.failure_volume, 0);
        assert_eq!(state.quality_degradation, 0.0);
        assert_eq!(state.last_evaluated_at, Some(watermark));
        assert_eq!(state.retrained_through, Some(watermark));
        assert!(!state.is_after_retrain(watermark));
        assert!(state.is_after_retrain(watermark + chrono::Duration::seconds(1)));
    }

    #[test]
    fn test_condition_describe() {
        let c = TriggerCondition::QualityDegradation {
            degradation: 0.062,
            threshold: 0.05,
        };
        assert_eq!(c.describe(), "quality degraded 6.2% vs baseline (threshold 5.0%)");
    }
}
