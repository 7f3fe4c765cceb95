//! Retrain trigger evaluation and hand-off to the training pipeline.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rqv_models::{FailureStatistics, RetrainDecision, RetrainTriggerState, TriggerCondition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{WorkerError, WorkerResult};

/// Systemic-failure thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerThresholds {
    pub consecutive_failures: u32,
    /// Relative SSIM drop vs `baseline_ssim`
    pub quality_degradation: f64,
    /// FAIL samples inside one lookback window
    pub failure_volume: u32,
    pub baseline_ssim: f64,
}

impl Default for TriggerThresholds {
    fn default() -> Self {
        Self {
            consecutive_failures: 10,
            quality_degradation: 0.05,
            failure_volume: 100,
            baseline_ssim: 0.97,
        }
    }
}

/// Relative degradation of `mean_ssim` below `baseline`. Never negative.
pub fn quality_degradation(mean_ssim: Option<f64>, baseline: f64) -> f64 {
    match mean_ssim {
        Some(mean) if baseline > 0.0 && mean.is_finite() => ((baseline - mean) / baseline).max(0.0),
        _ => 0.0,
    }
}

/// Conditions that hold for `state`.
pub fn conditions_met(state: &RetrainTriggerState, thresholds: &TriggerThresholds) -> Vec<TriggerCondition> {
    let mut conditions = Vec::new();
    if state.consecutive_failures >= thresholds.consecutive_failures {
        conditions.push(TriggerCondition::ConsecutiveFailures {
            count: state.consecutive_failures,
            threshold: thresholds.consecutive_failures,
        });
    }
    if state.quality_degradation >= thresholds.quality_degradation {
        conditions.push(TriggerCondition::QualityDegradation {
            degradation: state.quality_degradation,
            threshold: thresholds.quality_degradation,
        });
    }
    if state.failure_volume >= thresholds.failure_volume {
        conditions.push(TriggerCondition::FailureVolume {
            count: state.failure_volume,
            threshold: thresholds.failure_volume,
        });
    }
    conditions
}

/// Decides whether accumulated failures warrant retraining.
#[async_trait]
pub trait RetrainEvaluator: Send + Sync {
    async fn evaluate(&self, stats: &FailureStatistics) -> WorkerResult<RetrainDecision>;
}

/// Retrains whenever any trigger condition holds.
#[derive(Debug, Default, Clone)]
pub struct ThresholdRetrainEvaluator;

#[async_trait]
impl RetrainEvaluator for ThresholdRetrainEvaluator {
    async fn evaluate(&self, stats: &FailureStatistics) -> WorkerResult<RetrainDecision> {
        Ok(RetrainDecision {
            should_retrain: stats.any_condition(),
            reasons: stats.conditions.iter().map(TriggerCondition::describe).collect(),
        })
    }
}

/// Asks a remote evaluator service; `POST {url}` with the statistics as JSON.
pub struct HttpRetrainEvaluator {
    client: Client,
    url: String,
}

impl HttpRetrainEvaluator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> WorkerResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RetrainEvaluator for HttpRetrainEvaluator {
    async fn evaluate(&self, stats: &FailureStatistics) -> WorkerResult<RetrainDecision> {
        let response = self
            .client
            .post(&self.url)
            .json(stats)
            .send()
            .await
            .map_err(|e| WorkerError::collaborator_failed(format!("Retrain evaluator request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::from_http_status("Retrain evaluator", status, &body));
        }

        let decision: RetrainDecision = response.json().await.map_err(|e| {
            WorkerError::CollaboratorRejected(format!("Failed to parse retrain decision: {}", e))
        })?;
        debug!(should_retrain = decision.should_retrain, "Retrain evaluator answered");
        Ok(decision)
    }
}

/// Request handed to the training pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainRequest {
    /// Idempotency key for the downstream pipeline
    pub request_id: String,
    pub triggered_at: DateTime<Utc>,
    pub reasons: Vec<String>,
    pub statistics: FailureStatistics,
}

impl RetrainRequest {
    pub fn new(decision: &RetrainDecision, statistics: FailureStatistics) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            triggered_at: Utc::now(),
            reasons: decision.reasons.clone(),
            statistics,
        }
    }
}

/// Downstream training pipeline.
#[async_trait]
pub trait TrainingHandoff: Send + Sync {
    async fn hand_off(&self, request: &RetrainRequest) -> WorkerResult<()>;
}

/// Posts the retrain request to a webhook.
pub struct WebhookTrainingHandoff {
    client: Client,
    url: String,
}

impl WebhookTrainingHandoff {
    pub fn new(url: impl Into<String>, timeout: Duration) -> WorkerResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TrainingHandoff for WebhookTrainingHandoff {
    async fn hand_off(&self, request: &RetrainRequest) -> WorkerResult<()> {
        let response = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", &request.request_id)
            .json(request)
            .send()
            .await
            .map_err(|e| WorkerError::collaborator_failed(format!("Training hand-off failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(WorkerError::from_http_status("Training pipeline", status, &body));
        }

        info!(request_id = %request.request_id, "Retrain request handed off");
        Ok(())
    }
}

/// Records the hand-off in the logs only. For local runs without a pipeline.
#[derive(Debug, Default, Clone)]
pub struct LogTrainingHandoff;

#[async_trait]
impl TrainingHandoff for LogTrainingHandoff {
    async fn hand_off(&self, request: &RetrainRequest) -> WorkerResult<()> {
        info!(
            request_id = %request.request_id,
            reasons = ?request.reasons,
            "Retrain requested (no training pipeline configured)"
        );
        Ok(())
    }
}
