//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use rqv_models::{FailureCategory, QaFlag};

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder with an HTTP scrape listener on `port`.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("Failed to install Prometheus exporter: {}", e)))
}

/// Metric names as constants for consistency.
pub mod names {
    // Validation
    pub const SAMPLES_EVALUATED_TOTAL: &str = "rqv_samples_evaluated_total";
    pub const RENDER_DURATION_SECONDS: &str = "rqv_render_duration_seconds";
    pub const RENDERS_TOTAL: &str = "rqv_renders_total";
    pub const NOISE_BUMPS_TOTAL: &str = "rqv_noise_bumps_total";

    // Scene cache
    pub const CACHE_LOOKUPS_TOTAL: &str = "rqv_cache_lookups_total";

    // Requeue loop
    pub const REQUEUES_TOTAL: &str = "rqv_requeues_total";
    pub const REQUEUE_SKIPPED_TOTAL: &str = "rqv_requeue_skipped_total";
    pub const CYCLE_ERRORS_TOTAL: &str = "rqv_cycle_errors_total";
    pub const CYCLE_DURATION_SECONDS: &str = "rqv_cycle_duration_seconds";
    pub const RETRAIN_TRIGGERS_TOTAL: &str = "rqv_retrain_triggers_total";
}

pub fn record_sample_evaluated(flag: QaFlag) {
    counter!(names::SAMPLES_EVALUATED_TOTAL, "flag" => flag.as_str()).increment(1);
}

/// Record a render attempt; `outcome` is "ok", "timeout" or "error".
pub fn record_render(outcome: &'static str, duration_secs: f64) {
    counter!(names::RENDERS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::RENDER_DURATION_SECONDS).record(duration_secs);
}

pub fn record_noise_bump(bump: u32) {
    counter!(names::NOISE_BUMPS_TOTAL, "bump" => bump.to_string()).increment(1);
}

/// Record a scene cache lookup; `source` is "memory", "disk" or "built".
pub fn record_cache_lookup(source: &'static str) {
    counter!(names::CACHE_LOOKUPS_TOTAL, "source" => source).increment(1);
}

pub fn record_requeue(category: FailureCategory) {
    counter!(names::REQUEUES_TOTAL, "category" => category.as_str()).increment(1);
}

pub fn record_requeue_skipped() {
    counter!(names::REQUEUE_SKIPPED_TOTAL).increment(1);
}

pub fn record_cycle_error(stage: &'static str) {
    counter!(names::CYCLE_ERRORS_TOTAL, "stage" => stage).increment(1);
}

pub fn record_cycle(duration_secs: f64) {
    histogram!(names::CYCLE_DURATION_SECONDS).record(duration_secs);
}

pub fn record_retrain_trigger() {
    counter!(names::RETRAIN_TRIGGERS_TOTAL).increment(1);
}
