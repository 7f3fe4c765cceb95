//! Worker configuration.
//!
//! Process settings come from the environment (`WorkerConfig::from_env`).
//! QA, sampler and trigger thresholds come from a TOML document loaded with
//! `ValidationConfig::load`, with `RQV_`-prefixed environment overrides such
//! as `RQV_QA__MIN_SSIM=0.95`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rqv_vision::{DepthRange, PnpConfig};
use serde::{Deserialize, Serialize};

use crate::error::{WorkerError, WorkerResult};
use crate::qa::QaThresholds;
use crate::recipe::RendererSettings;
use crate::retrain::TriggerThresholds;
use crate::sampler::SamplerConfig;

/// What the binary does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Run the auto-requeue orchestrator cycle
    Requeue,
    /// Consume requeued jobs and re-render them
    Render,
}

impl FromStr for WorkerMode {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "requeue" => Ok(WorkerMode::Requeue),
            "render" => Ok(WorkerMode::Render),
            other => Err(WorkerError::config_error(format!("unknown RQV_MODE '{}'", other))),
        }
    }
}

/// Process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub mode: WorkerMode,
    /// Run one requeue cycle and exit
    pub run_once: bool,
    /// Time between requeue cycles
    pub requeue_interval: Duration,
    /// How far back each cycle looks for FAIL samples
    pub lookback_window: Duration,
    /// Maximum concurrent re-render jobs
    pub max_concurrent_jobs: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for render outputs
    pub work_dir: PathBuf,
    /// Root for scene cache snapshots; snapshots are off when unset
    pub snapshot_root: Option<PathBuf>,
    /// Snapshot namespace owned by this worker
    pub cache_namespace: String,
    pub renderer: RendererSettings,
    /// Threshold document
    pub validation_config_path: Option<PathBuf>,
    /// Prometheus scrape port; metrics export is off when unset
    pub metrics_port: Option<u16>,
    pub retrain_evaluator_url: Option<String>,
    pub notify_webhook_url: Option<String>,
    pub training_webhook_url: Option<String>,
    /// Timeout for evaluator/notifier/hand-off HTTP calls
    pub collaborator_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            mode: WorkerMode::Requeue,
            run_once: false,
            requeue_interval: Duration::from_secs(900),
            lookback_window: Duration::from_secs(86400),
            max_concurrent_jobs: 2,
            shutdown_timeout: Duration::from_secs(60),
            work_dir: PathBuf::from("/tmp/rqv"),
            snapshot_root: None,
            cache_namespace: "default".to_string(),
            renderer: RendererSettings::default(),
            validation_config_path: None,
            metrics_port: None,
            retrain_evaluator_url: None,
            notify_webhook_url: None,
            training_webhook_url: None,
            collaborator_timeout: Duration::from_secs(30),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let d = Self::default();
        let mode = match env_nonempty("RQV_MODE") {
            Some(m) => m.parse()?,
            None => d.mode,
        };

        Ok(Self {
            mode,
            run_once: env_parse("RQV_RUN_ONCE").unwrap_or(d.run_once),
            requeue_interval: env_parse("REQUEUE_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.requeue_interval),
            lookback_window: env_parse("REQUEUE_LOOKBACK_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.lookback_window),
            max_concurrent_jobs: env_parse("WORKER_MAX_JOBS").unwrap_or(d.max_concurrent_jobs),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(d.shutdown_timeout),
            work_dir: env_nonempty("RQV_WORK_DIR").map(PathBuf::from).unwrap_or(d.work_dir),
            snapshot_root: env_nonempty("RQV_SNAPSHOT_ROOT").map(PathBuf::from),
            cache_namespace: env_nonempty("RQV_CACHE_NAMESPACE").unwrap_or(d.cache_namespace),
            renderer: RendererSettings {
                program: env_nonempty("RENDERER_PROGRAM").unwrap_or(d.renderer.program),
                script: env_nonempty("RENDERER_SCRIPT").map(PathBuf::from),
                timeout: env_parse("RENDER_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(d.renderer.timeout),
            },
            validation_config_path: env_nonempty("RQV_VALIDATION_CONFIG").map(PathBuf::from),
            metrics_port: env_parse("METRICS_PORT"),
            retrain_evaluator_url: env_nonempty("RETRAIN_EVALUATOR_URL"),
            notify_webhook_url: env_nonempty("NOTIFY_WEBHOOK_URL"),
            training_webhook_url: env_nonempty("TRAINING_WEBHOOK_URL"),
            collaborator_timeout: env_parse("COLLABORATOR_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(d.collaborator_timeout),
        })
    }
}

/// Thresholds and numerical tuning, loaded once and passed to components.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub qa: QaThresholds,
    pub trigger: TriggerThresholds,
    pub sampler: SamplerConfig,
    pub pnp: PnpConfig,
    pub depth: DepthRange,
}

impl ValidationConfig {
    /// Load from a TOML file (optional when `path` is `None`) plus `RQV_`
    /// environment overrides. Missing keys keep their defaults.
    pub fn load(path: Option<&Path>) -> WorkerResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("RQV")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| WorkerError::config_error(format!("validation config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without environment overrides.
    pub fn from_toml_str(toml: &str) -> WorkerResult<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| WorkerError::config_error(format!("validation config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> WorkerResult<()> {
        let qa = &self.qa;
        let checks = [
            ("qa.min_ssim", qa.min_ssim),
            ("qa.min_snr", qa.min_snr),
            ("qa.min_sharpness", qa.min_sharpness),
            ("qa.max_reprojection_rms", qa.max_reprojection_rms),
            ("qa.min_depth_score", qa.min_depth_score),
            ("qa.warn_margin", qa.warn_margin),
            ("trigger.quality_degradation", self.trigger.quality_degradation),
            ("trigger.baseline_ssim", self.trigger.baseline_ssim),
        ];
        for (key, value) in checks {
            if !value.is_finite() || value < 0.0 {
                return Err(WorkerError::config_error(format!("{} must be a non-negative number, got {}", key, value)));
            }
        }
        if self.depth.near >= self.depth.far {
            return Err(WorkerError::config_error("depth.near must be below depth.far"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = ValidationConfig::default();
        assert_eq!(config.qa.min_ssim, 0.96);
        assert_eq!(config.trigger.consecutive_failures, 10);
        assert_eq!(config.sampler.noise_thresholds.medium, 0.035);
        assert_eq!(config.pnp.max_iterations, 100);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = ValidationConfig::from_toml_str(
            r#"
            [qa]
            min_ssim = 0.9
            max_noise = 0.05

            [trigger]
            failure_volume = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.qa.min_ssim, 0.9);
        assert_eq!(config.qa.max_noise, Some(0.05));
        assert_eq!(config.qa.min_snr, 25.0);
        assert_eq!(config.trigger.failure_volume, 50);
        assert_eq!(config.trigger.consecutive_failures, 10);
    }

    #[test]
    fn test_rejects_negative_threshold() {
        let result = ValidationConfig::from_toml_str("[qa]\nmin_ssim = -1.0\n");
        assert!(matches!(result, Err(WorkerError::ConfigError(_))));
    }

    #[test]
    #[serial]
    fn test_load_file_with_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("validation.toml");
        std::fs::write(&path, "[qa]\nmin_ssim = 0.9\nmin_snr = 20.0\n").unwrap();

        std::env::set_var("RQV_QA__MIN_SNR", "30.5");
        let config = ValidationConfig::load(Some(&path));
        std::env::remove_var("RQV_QA__MIN_SNR");

        let config = config.unwrap();
        assert_eq!(config.qa.min_ssim, 0.9);
        assert_eq!(config.qa.min_snr, 30.5);
    }

    #[test]
    #[serial]
    fn test_worker_config_from_env() {
        std::env::set_var("RQV_MODE", "render");
        std::env::set_var("RENDER_TIMEOUT_SECS", "120");
        std::env::set_var("REQUEUE_LOOKBACK_SECS", "3600");
        let config = WorkerConfig::from_env();
        for key in ["RQV_MODE", "RENDER_TIMEOUT_SECS", "REQUEUE_LOOKBACK_SECS"] {
            std::env::remove_var(key);
        }

        let config = config.unwrap();
        assert_eq!(config.mode, WorkerMode::Render);
        assert_eq!(config.renderer.timeout, Duration::from_secs(120));
        assert_eq!(config.lookback_window, Duration::from_secs(3600));
        assert_eq!(config.renderer.program, "blender");
    }

    #[test]
    #[serial]
    fn test_unknown_mode_is_config_error() {
        std::env::set_var("RQV_MODE", "train");
        let result = WorkerConfig::from_env();
        std::env::remove_var("RQV_MODE");
        assert!(matches!(result, Err(WorkerError::ConfigError(_))));
    }
}
