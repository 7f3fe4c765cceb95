//! Render quality validation worker binary.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rqv_queue::{MemoryRenderQueue, RedisRenderQueue, RenderQueue};
use rqv_store::{MemoryStore, MetadataStore, RestMetadataStore, SnapshotStore};
use rqv_worker::notify::{LogNotifier, Notifier, WebhookNotifier};
use rqv_worker::retrain::{
    HttpRetrainEvaluator, LogTrainingHandoff, RetrainEvaluator, ThresholdRetrainEvaluator, TrainingHandoff,
    WebhookTrainingHandoff,
};
use rqv_worker::{
    metrics, AdaptiveSampler, CommandRenderer, RenderExecutor, RequeueOrchestrator, SceneCache, ValidationConfig,
    ValidationPipeline, WorkerConfig, WorkerMode,
};

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("rqv=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }
    Ok(())
}

fn build_store() -> anyhow::Result<Arc<dyn MetadataStore>> {
    if std::env::var("METADATA_STORE_URL").is_ok() {
        let store = RestMetadataStore::from_env().context("metadata store")?;
        info!("Using REST metadata store");
        Ok(Arc::new(store))
    } else {
        warn!("METADATA_STORE_URL not set, using in-memory metadata store");
        Ok(Arc::new(MemoryStore::new()))
    }
}

async fn build_queue() -> anyhow::Result<Arc<dyn RenderQueue>> {
    if std::env::var("REDIS_URL").is_ok() {
        let queue = RedisRenderQueue::from_env().context("render queue")?;
        queue.init().await.context("render queue init")?;
        info!("Using Redis render queue");
        Ok(Arc::new(queue))
    } else {
        warn!("REDIS_URL not set, using in-memory render queue");
        Ok(Arc::new(MemoryRenderQueue::new()))
    }
}

fn build_orchestrator(
    config: &WorkerConfig,
    validation: &ValidationConfig,
    store: Arc<dyn MetadataStore>,
    queue: Arc<dyn RenderQueue>,
) -> anyhow::Result<RequeueOrchestrator> {
    let timeout = config.collaborator_timeout;
    let evaluator: Arc<dyn RetrainEvaluator> = match config.retrain_evaluator_url {
        Some(ref url) => Arc::new(HttpRetrainEvaluator::new(url.clone(), timeout)?),
        None => Arc::new(ThresholdRetrainEvaluator),
    };
    let notifier: Arc<dyn Notifier> = match config.notify_webhook_url {
        Some(ref url) => Arc::new(WebhookNotifier::new(url.clone(), timeout)?),
        None => Arc::new(LogNotifier),
    };
    let handoff: Arc<dyn TrainingHandoff> = match config.training_webhook_url {
        Some(ref url) => Arc::new(WebhookTrainingHandoff::new(url.clone(), timeout)?),
        None => Arc::new(LogTrainingHandoff),
    };

    Ok(RequeueOrchestrator::new(
        store,
        queue,
        evaluator,
        notifier,
        handoff,
        validation.trigger.clone(),
    ))
}

fn build_pipeline(
    config: &WorkerConfig,
    validation: ValidationConfig,
    store: Arc<dyn MetadataStore>,
) -> anyhow::Result<ValidationPipeline> {
    let sampler = AdaptiveSampler::new(validation.sampler.clone())?;
    let cache = match config.snapshot_root {
        Some(ref root) => SceneCache::with_snapshots(SnapshotStore::new(root, &config.cache_namespace)?),
        None => SceneCache::in_memory(),
    };
    let renderer = CommandRenderer::new(config.renderer.clone());

    Ok(ValidationPipeline::new(Arc::new(validation), Arc::new(sampler), Arc::new(renderer), store)
        .with_cache(Arc::new(cache))
        .with_work_dir(config.work_dir.clone()))
}

async fn run_requeue(config: &WorkerConfig, orchestrator: RequeueOrchestrator) {
    let mut interval = tokio::time::interval(config.requeue_interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = interval.tick() => {
                match orchestrator.run_requeue_cycle(config.lookback_window).await {
                    Ok(summary) => info!("{}", summary.summary()),
                    Err(e) => error!("Requeue cycle failed: {}", e),
                }
                if config.run_once {
                    break;
                }
            }
        }
    }
}

async fn run_render(config: &WorkerConfig, executor: RenderExecutor) -> anyhow::Result<()> {
    if config.run_once {
        let handled = executor.drain().await?;
        info!("Processed {} queued re-renders", handled);
        return Ok(());
    }

    let executor = Arc::new(executor.with_shutdown_timeout(config.shutdown_timeout));
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    executor.run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting rqv-worker");

    let config = WorkerConfig::from_env()?;
    info!("Worker config: {:?}", config);
    let validation = ValidationConfig::load(config.validation_config_path.as_deref())?;

    if let Some(port) = config.metrics_port {
        metrics::init_metrics(port)?;
        info!("Prometheus metrics listening on port {}", port);
    }

    let store = build_store()?;
    let queue = build_queue().await?;

    match config.mode {
        WorkerMode::Requeue => {
            let orchestrator = build_orchestrator(&config, &validation, store, queue)?;
            run_requeue(&config, orchestrator).await;
        }
        WorkerMode::Render => {
            tokio::fs::create_dir_all(&config.work_dir)
                .await
                .with_context(|| format!("creating work dir {}", config.work_dir.display()))?;
            let pipeline = build_pipeline(&config, validation, store)?;
            let executor = RenderExecutor::new(Arc::new(pipeline), queue, config.max_concurrent_jobs);
            run_render(&config, executor).await?;
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}
