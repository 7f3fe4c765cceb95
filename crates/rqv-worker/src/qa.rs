//! QA decision engine.
//!
//! `decide` is a pure function of the measured metrics and the thresholds.
//! FAIL if any threshold is crossed, WARN if nothing is crossed but a metric
//! sits inside the advisory margin, PASS otherwise. The failure reason lists
//! every violation in `MetricKind::PRIORITY` order, joined with `"; "`; the
//! retry recipe resolver keys on that string.

use rqv_models::{MetricKind, MetricViolation, QaFlag, PNP_FAILURE_RMS};
use serde::{Deserialize, Serialize};

/// Separator between violation descriptions in a reason string.
pub const REASON_SEPARATOR: &str = "; ";

/// Pass/fail thresholds, loaded from the validation config document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaThresholds {
    pub min_ssim: f64,
    /// dB
    pub min_snr: f64,
    pub min_sharpness: f64,
    /// Pixels
    pub max_reprojection_rms: f64,
    pub min_depth_score: f64,
    /// Noise is only gated when set
    pub max_noise: Option<f64>,
    /// Contrast is only gated when set
    pub min_contrast: Option<f64>,
    /// Relative distance to a threshold that still produces WARN
    pub warn_margin: f64,
}

impl Default for QaThresholds {
    fn default() -> Self {
        Self {
            min_ssim: 0.96,
            min_snr: 25.0,
            min_sharpness: 0.5,
            max_reprojection_rms: 2.0,
            min_depth_score: 0.7,
            max_noise: None,
            min_contrast: None,
            warn_margin: 0.02,
        }
    }
}

impl QaThresholds {
    fn threshold_for(&self, metric: MetricKind) -> Option<f64> {
        match metric {
            MetricKind::Ssim => Some(self.min_ssim),
            MetricKind::Sharpness => Some(self.min_sharpness),
            MetricKind::Reprojection => Some(self.max_reprojection_rms),
            MetricKind::Snr => Some(self.min_snr),
            MetricKind::Depth => Some(self.min_depth_score),
            MetricKind::Noise => self.max_noise,
            MetricKind::Contrast => self.min_contrast,
        }
    }
}

/// Measured values fed to the decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricInputs {
    pub ssim: f64,
    pub snr: f64,
    pub sharpness: f64,
    pub reprojection_rms: f64,
    pub depth_score: f64,
    pub noise: Option<f64>,
    pub contrast: Option<f64>,
    /// Depth buffer was missing or undecodable; always a Depth violation
    #[serde(default)]
    pub depth_unreadable: bool,
}

impl MetricInputs {
    fn value_of(&self, metric: MetricKind) -> Option<f64> {
        match metric {
            MetricKind::Ssim => Some(self.ssim),
            MetricKind::Sharpness => Some(self.sharpness),
            MetricKind::Reprojection => Some(self.reprojection_rms),
            MetricKind::Snr => Some(self.snr),
            MetricKind::Depth => Some(self.depth_score),
            MetricKind::Noise => self.noise,
            MetricKind::Contrast => self.contrast,
        }
    }
}

/// Outcome of a QA decision.
#[derive(Debug, Clone, PartialEq)]
pub struct QaDecision {
    pub flag: QaFlag,
    /// `None` iff `flag == Pass`
    pub reason: Option<String>,
    /// Crossed thresholds, in priority order
    pub violations: Vec<MetricViolation>,
    /// Metrics inside the warn margin, in priority order
    pub near_misses: Vec<MetricViolation>,
}

fn crosses(metric: MetricKind, measured: f64, threshold: f64) -> bool {
    if !measured.is_finite() {
        return true;
    }
    if metric == MetricKind::Reprojection && measured >= PNP_FAILURE_RMS {
        return true;
    }
    if metric.higher_is_better() {
        measured < threshold
    } else {
        measured > threshold
    }
}

fn within_margin(metric: MetricKind, measured: f64, threshold: f64, margin: f64) -> bool {
    let band = threshold.abs() * margin;
    if metric.higher_is_better() {
        measured < threshold + band
    } else {
        measured > threshold - band
    }
}

fn describe_near_miss(v: &MetricViolation) -> String {
    let rel = if v.threshold != 0.0 {
        ((v.measured - v.threshold) / v.threshold).abs() * 100.0
    } else {
        0.0
    };
    format!(
        "{} {:.3} within {:.1}% of {:.3}",
        v.metric.label(),
        v.measured,
        rel,
        v.threshold
    )
}

/// Classify a sample.
pub fn decide(inputs: &MetricInputs, thresholds: &QaThresholds) -> QaDecision {
    let mut violations = Vec::new();
    let mut near_misses = Vec::new();

    for &metric in MetricKind::PRIORITY {
        let (Some(measured), Some(threshold)) = (inputs.value_of(metric), thresholds.threshold_for(metric)) else {
            continue;
        };
        let unreadable = metric == MetricKind::Depth && inputs.depth_unreadable;
        if unreadable || crosses(metric, measured, threshold) {
            violations.push(MetricViolation::new(metric, measured, threshold));
        } else if within_margin(metric, measured, threshold, thresholds.warn_margin) {
            near_misses.push(MetricViolation::new(metric, measured, threshold));
        }
    }

    let (flag, reason) = if !violations.is_empty() {
        let reason = violations
            .iter()
            .map(MetricViolation::describe)
            .collect::<Vec<_>>()
            .join(REASON_SEPARATOR);
        (QaFlag::Fail, Some(reason))
    } else if !near_misses.is_empty() {
        let reason = near_misses
            .iter()
            .map(describe_near_miss)
            .collect::<Vec<_>>()
            .join(REASON_SEPARATOR);
        (QaFlag::Warn, Some(reason))
    } else {
        (QaFlag::Pass, None)
    };

    QaDecision {
        flag,
        reason,
        violations,
        near_misses,
    }
}
