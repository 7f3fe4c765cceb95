//! Per-sample quality metrics and QA verdicts.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorical verdict attached to a rendered sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum QaFlag {
    Pass,
    /// Advisory only, never gates a retry
    Warn,
    Fail,
}

impl QaFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            QaFlag::Pass => "PASS",
            QaFlag::Warn => "WARN",
            QaFlag::Fail => "FAIL",
        }
    }
}

impl fmt::Display for QaFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metrics the QA engine knows about, in reason priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Ssim,
    Sharpness,
    Reprojection,
    Snr,
    Depth,
    Noise,
    Contrast,
}

impl MetricKind {
    /// All metrics in reason priority order.
    pub const PRIORITY: &'static [MetricKind] = &[
        MetricKind::Ssim,
        MetricKind::Sharpness,
        MetricKind::Reprojection,
        MetricKind::Snr,
        MetricKind::Depth,
        MetricKind::Noise,
        MetricKind::Contrast,
    ];

    /// Label used in failure reasons. The retry resolver keys on these tokens.
    pub fn label(&self) -> &'static str {
        match self {
            MetricKind::Ssim => "SSIM",
            MetricKind::Sharpness => "Sharpness",
            MetricKind::Reprojection => "PnP RMS",
            MetricKind::Snr => "SNR",
            MetricKind::Depth => "Depth score",
            MetricKind::Noise => "Noise",
            MetricKind::Contrast => "Contrast",
        }
    }

    /// Whether larger measurements are better (threshold is a minimum).
    pub fn higher_is_better(&self) -> bool {
        !matches!(self, MetricKind::Reprojection | MetricKind::Noise)
    }

    fn unit(&self) -> &'static str {
        match self {
            MetricKind::Reprojection => "px",
            MetricKind::Snr => "dB",
            _ => "",
        }
    }
}

/// One metric that crossed its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetricViolation {
    pub metric: MetricKind,
    pub measured: f64,
    pub threshold: f64,
}

impl MetricViolation {
    pub fn new(metric: MetricKind, measured: f64, threshold: f64) -> Self {
        Self {
            metric,
            measured,
            threshold,
        }
    }

    /// Human-readable description, e.g. `SSIM 0.400 < 0.960`.
    pub fn describe(&self) -> String {
        let op = if self.metric.higher_is_better() { "<" } else { ">" };
        let unit = self.metric.unit();
        match self.metric {
            MetricKind::Snr => format!(
                "{} {:.1}{} {} {:.1}{}",
                self.metric.label(),
                self.measured,
                unit,
                op,
                self.threshold,
                unit
            ),
            _ => format!(
                "{} {:.3}{} {} {:.3}{}",
                self.metric.label(),
                self.measured,
                unit,
                op,
                self.threshold,
                unit
            ),
        }
    }
}

/// Quality metrics computed exactly once per rendered sample.
///
/// `reason` is non-empty iff `qa_flag != Pass`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QualityMetrics {
    pub ssim: f64,
    /// Signal-to-noise ratio in dB
    pub snr: f64,
    /// Normalized sharpness in [0, 1]
    pub sharpness: f64,
    /// Reprojection RMS in pixels
    pub reprojection_rms: f64,
    pub depth_score: f64,
    #[serde(default)]
    pub noise: Option<f64>,
    #[serde(default)]
    pub contrast: Option<f64>,
    pub qa_flag: QaFlag,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub violations: Vec<MetricViolation>,
    /// PnP had fewer than four usable correspondences
    #[serde(default)]
    pub pnp_insufficient_correspondences: bool,
    /// Depth buffer was missing or undecodable
    #[serde(default)]
    pub depth_unreadable: bool,
    /// No render output was produced; the image metrics are placeholders
    #[serde(default)]
    pub render_failed: bool,
}

/// Reason recorded for renders that exceeded their wall-clock budget.
pub const RENDER_TIMEOUT_REASON: &str = "render timeout";

/// Leading token of every reason recorded for a render without output.
pub const RENDER_FAILURE_PREFIX: &str = "render failed";

/// Reprojection RMS reported when no pose could be estimated.
pub const PNP_FAILURE_RMS: f64 = 999.0;

impl QualityMetrics {
    /// Terminal FAIL metrics for a render that never produced output. The
    /// reason always starts with `RENDER_FAILURE_PREFIX`.
    pub fn render_failure(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = if reason.is_empty() {
            RENDER_FAILURE_PREFIX.to_string()
        } else if reason.to_lowercase().starts_with(RENDER_FAILURE_PREFIX) {
            reason
        } else {
            format!("{}: {}", RENDER_FAILURE_PREFIX, reason)
        };
        Self::without_output(reason)
    }

    /// Terminal FAIL metrics for a timed-out render.
    pub fn render_timeout() -> Self {
        Self::without_output(RENDER_TIMEOUT_REASON.to_string())
    }

    fn without_output(reason: String) -> Self {
        Self {
            ssim: 0.0,
            snr: 0.0,
            sharpness: 0.0,
            reprojection_rms: PNP_FAILURE_RMS,
            depth_score: 0.0,
            noise: None,
            contrast: None,
            qa_flag: QaFlag::Fail,
            reason: Some(reason),
            violations: Vec::new(),
            pnp_insufficient_correspondences: true,
            depth_unreadable: true,
            render_failed: true,
        }
    }

    /// SSIM of an actual render, `None` when no image was produced.
    pub fn measured_ssim(&self) -> Option<f64> {
        if self.render_failed || !self.ssim.is_finite() {
            None
        } else {
            Some(self.ssim)
        }
    }

    pub fn is_failed(&self) -> bool {
        self.qa_flag == QaFlag::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_describe() {
        let v = MetricViolation::new(MetricKind::Ssim, 0.40, 0.96);
        assert_eq!(v.describe(), "SSIM 0.400 < 0.960");

        let v = MetricViolation::new(MetricKind::Reprojection, 5.25, 2.0);
        assert_eq!(v.describe(), "PnP RMS 5.250px > 2.000px");

        let v = MetricViolation::new(MetricKind::Snr, 18.04, 25.0);
        assert_eq!(v.describe(), "SNR 18.0dB < 25.0dB");
    }

    #[test]
    fn test_flag_serde() {
        assert_eq!(serde_json::to_string(&QaFlag::Fail).unwrap(), "\"FAIL\"");
        let flag: QaFlag = serde_json::from_str("\"WARN\"").unwrap();
        assert_eq!(flag, QaFlag::Warn);
    }

    #[test]
    fn test_render_timeout_is_terminal_fail() {
        let m = QualityMetrics::render_timeout();
        assert!(m.is_failed());
        assert!(m.render_failed);
        assert_eq!(m.reason.as_deref(), Some(RENDER_TIMEOUT_REASON));
        assert_eq!(m.measured_ssim(), None);
    }

    #[test]
    fn test_render_failure_reason_is_prefixed() {
        let m = QualityMetrics::render_failure("exit 1: depth pass crashed");
        assert_eq!(m.reason.as_deref(), Some("render failed: exit 1: depth pass crashed"));

        let m = QualityMetrics::render_failure("Render failed: exit code 139");
        assert_eq!(m.reason.as_deref(), Some("Render failed: exit code 139"));

        let m = QualityMetrics::render_failure("");
        assert_eq!(m.reason.as_deref(), Some(RENDER_FAILURE_PREFIX));
    }
}
