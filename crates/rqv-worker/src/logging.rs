//! Structured per-sample logging.
//!
//! Every log line for a sample carries the same `sample_id` and `stage`
//! fields so a sample's path through render, QA and requeue can be filtered
//! out of the worker's JSON logs.

use rqv_models::{QualityMetrics, SampleId};
use tracing::{error, info, warn, Span};

/// Logger bound to one sample and one pipeline stage.
#[derive(Debug, Clone)]
pub struct SampleLogger {
    sample_id: String,
    stage: String,
}

impl SampleLogger {
    /// Create a logger for a sample.
    ///
    /// # Arguments
    /// * `sample_id` - The sample being processed
    /// * `stage` - Pipeline stage (e.g. "render", "requeue", "rerender")
    pub fn new(sample_id: &SampleId, stage: &str) -> Self {
        Self {
            sample_id: sample_id.to_string(),
            stage: stage.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            sample_id = %self.sample_id,
            stage = %self.stage,
            "Sample started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            sample_id = %self.sample_id,
            stage = %self.stage,
            "Sample progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            sample_id = %self.sample_id,
            stage = %self.stage,
            "Sample warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            sample_id = %self.sample_id,
            stage = %self.stage,
            "Sample error: {}", message
        );
    }

    /// Log the terminal QA verdict with every measured value.
    pub fn log_verdict(&self, metrics: &QualityMetrics) {
        info!(
            sample_id = %self.sample_id,
            stage = %self.stage,
            qa_flag = %metrics.qa_flag,
            ssim = metrics.ssim,
            snr = metrics.snr,
            sharpness = metrics.sharpness,
            reprojection_rms = metrics.reprojection_rms,
            depth_score = metrics.depth_score,
            reason = metrics.reason.as_deref().unwrap_or(""),
            "Sample evaluated"
        );
    }

    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Span carrying the sample context, for instrumenting futures.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "sample",
            sample_id = %self.sample_id,
            stage = %self.stage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_logger_creation() {
        let sample_id = SampleId::from("sample-42");
        let logger = SampleLogger::new(&sample_id, "render");

        assert_eq!(logger.sample_id(), "sample-42");
        assert_eq!(logger.stage(), "render");
    }
}
