//! Per-sample validation pipeline.
//!
//! classify -> scene cache -> render -> camera snapshot -> quality metrics ->
//! QA verdict -> metadata store. A render that fails or times out still
//! produces a terminal FAIL record; only store failures surface as errors.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use image::DynamicImage;
use rqv_models::{QualityMetrics, RetryRecipe, SampleId, SampleRecord};
use rqv_store::{with_retry, MetadataStore, RetryConfig as StoreRetryConfig};
use rqv_vision::extract_camera_snapshot;
use tracing::Instrument;

use crate::config::ValidationConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::SampleLogger;
use crate::metrics;
use crate::quality::evaluate_quality;
use crate::recipe::{default_recipe, RenderTarget};
use crate::renderer::{RenderOutput, RenderRequest, SceneRenderer};
use crate::sampler::{AdaptiveSampler, BudgetDecision, SceneDescriptor};
use crate::scene_cache::{MaterialSpec, SceneArtifact, SceneCache, SceneFingerprint, SceneKey};

/// Builds the scene artifact on a cache miss.
#[async_trait]
pub trait SceneBuilder: Send + Sync {
    async fn build(&self, key: &SceneKey, fingerprint: SceneFingerprint) -> WorkerResult<SceneArtifact>;
}

/// Derives material presets from the color name; geometry is left to the
/// renderer script.
#[derive(Debug, Default, Clone)]
pub struct PresetSceneBuilder;

impl PresetSceneBuilder {
    pub fn material_for(color: Option<&str>) -> MaterialSpec {
        let color_lc = color.map(str::to_lowercase).unwrap_or_default();
        let (name, roughness, metallic, transmission) = if color_lc.starts_with("trans") || color_lc.contains("glass") {
            ("transparent", 0.05, 0.0, 0.95)
        } else if ["chrome", "metallic", "mirror"].iter().any(|k| color_lc.contains(k)) {
            ("metal", 0.15, 1.0, 0.0)
        } else if ["pearl", "glitter"].iter().any(|k| color_lc.contains(k)) {
            ("pearlescent", 0.25, 0.6, 0.0)
        } else {
            ("abs", 0.4, 0.0, 0.0)
        };
        MaterialSpec {
            name: name.to_string(),
            base_color: None,
            roughness,
            metallic,
            transmission,
        }
    }
}

#[async_trait]
impl SceneBuilder for PresetSceneBuilder {
    async fn build(&self, key: &SceneKey, fingerprint: SceneFingerprint) -> WorkerResult<SceneArtifact> {
        if key.descriptor.trim().is_empty() {
            return Err(WorkerError::SceneBuildFailed("empty descriptor".into()));
        }
        Ok(SceneArtifact {
            fingerprint,
            descriptor: key.descriptor.clone(),
            mesh_path: None,
            vertex_count: 0,
            material: Self::material_for(key.color.as_deref()),
            built_at: Utc::now(),
        })
    }
}

/// One sample to render and validate.
#[derive(Debug, Clone)]
pub struct RenderTask {
    pub sample_id: SampleId,
    pub scene: SceneDescriptor,
    /// Retry recipe for a requeued sample; first renders use the default
    /// recipe at the classified budget
    pub recipe: Option<RetryRecipe>,
}

impl RenderTask {
    pub fn new(sample_id: SampleId, scene: SceneDescriptor) -> Self {
        Self {
            sample_id,
            scene,
            recipe: None,
        }
    }

    pub fn with_recipe(mut self, recipe: RetryRecipe) -> Self {
        self.recipe = Some(recipe);
        self
    }
}

struct Evaluation {
    metrics: QualityMetrics,
    /// Rendered image, absent when the render produced nothing usable
    image: Option<DynamicImage>,
}

pub struct ValidationPipeline {
    config: Arc<ValidationConfig>,
    sampler: Arc<AdaptiveSampler>,
    cache: Arc<SceneCache>,
    builder: Arc<dyn SceneBuilder>,
    renderer: Arc<dyn SceneRenderer>,
    store: Arc<dyn MetadataStore>,
    store_retry: StoreRetryConfig,
    work_dir: PathBuf,
}

impl ValidationPipeline {
    pub fn new(
        config: Arc<ValidationConfig>,
        sampler: Arc<AdaptiveSampler>,
        renderer: Arc<dyn SceneRenderer>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            config,
            sampler,
            cache: Arc::new(SceneCache::in_memory()),
            builder: Arc::new(PresetSceneBuilder),
            renderer,
            store,
            store_retry: StoreRetryConfig::default(),
            work_dir: std::env::temp_dir().join("rqv"),
        }
    }

    pub fn with_cache(mut self, cache: Arc<SceneCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_builder(mut self, builder: Arc<dyn SceneBuilder>) -> Self {
        self.builder = builder;
        self
    }

    pub fn with_store_retry(mut self, retry: StoreRetryConfig) -> Self {
        self.store_retry = retry;
        self
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Render and validate one sample, persisting its record.
    pub async fn process(&self, task: &RenderTask) -> WorkerResult<SampleRecord> {
        let stage = if task.recipe.is_some() { "rerender" } else { "render" };
        let logger = SampleLogger::new(&task.sample_id, stage);
        let span = logger.create_span();
        self.process_inner(task, &logger).instrument(span).await
    }

    async fn process_inner(&self, task: &RenderTask, logger: &SampleLogger) -> WorkerResult<SampleRecord> {
        let decision = self.sampler.classify(&task.scene);
        let mut recipe = self.initial_recipe(task, &decision);
        logger.log_start(&format!(
            "tier={} budget={} rule={}",
            decision.tier,
            recipe.samples,
            decision.matched_rule.unwrap_or("fallback")
        ));

        let mut evaluation = self.render_and_evaluate(task, &recipe, 0, logger).await?;

        if let Some(ref image) = evaluation.image {
            let bump = self.sampler.record_noise_feedback(&task.sample_id, decision.tier, image);
            if bump > 0 {
                metrics::record_noise_bump(bump);
                recipe.samples = recipe.samples.saturating_add(bump);
                logger.log_progress(&format!("noisy render, re-rendering at {} samples", recipe.samples));
                evaluation = self.render_and_evaluate(task, &recipe, 1, logger).await?;
            }
        }

        let record = SampleRecord::new(
            task.sample_id.clone(),
            task.scene.name.clone(),
            task.scene.color.clone(),
            decision.tier,
            recipe.samples,
            evaluation.metrics,
        );

        with_retry(&self.store_retry, "upsert_sample", || self.store.upsert_sample(&record)).await?;
        metrics::record_sample_evaluated(record.qa_flag());
        logger.log_verdict(&record.metrics);
        Ok(record)
    }

    fn initial_recipe(&self, task: &RenderTask, decision: &BudgetDecision) -> RetryRecipe {
        match task.recipe {
            Some(ref recipe) => recipe.clone(),
            None => RetryRecipe {
                samples: decision.budget,
                ..default_recipe()
            },
        }
    }

    async fn render_and_evaluate(
        &self,
        task: &RenderTask,
        recipe: &RetryRecipe,
        attempt: u32,
        logger: &SampleLogger,
    ) -> WorkerResult<Evaluation> {
        let key = SceneKey {
            descriptor: task.scene.name.clone(),
            color: task.scene.color.clone(),
            sample_budget: recipe.samples,
            resolution: recipe.resolution,
            background: recipe.background.clone(),
        };

        let artifact = match self.cache.get_or_create(&key, |fp| self.builder.build(&key, fp)).await {
            Ok((artifact, _)) => artifact,
            Err(e) if e.is_render_failure() => return Ok(self.failed(logger, e)),
            Err(e) => return Err(e),
        };

        let request = RenderRequest {
            target: RenderTarget {
                sample_id: task.sample_id.clone(),
                descriptor: task.scene.name.clone(),
                color: task.scene.color.clone(),
                output_dir: self
                    .work_dir
                    .join(task.sample_id.as_str())
                    .join(format!("attempt-{}", attempt)),
            },
            recipe: recipe.clone(),
            material: artifact.materialize(task.scene.color.as_deref()),
        };

        let started = Instant::now();
        match self.renderer.render(&request).await {
            Ok(output) => {
                metrics::record_render("ok", output.duration.as_secs_f64());
                self.evaluate(output, logger).await
            }
            Err(WorkerError::RenderTimeout(secs)) => {
                metrics::record_render("timeout", secs as f64);
                logger.log_warning(&format!("render timed out after {}s", secs));
                Ok(Evaluation {
                    metrics: QualityMetrics::render_timeout(),
                    image: None,
                })
            }
            Err(e) if e.is_render_failure() => {
                metrics::record_render("failed", started.elapsed().as_secs_f64());
                Ok(self.failed(logger, e))
            }
            Err(e) => Err(e),
        }
    }

    fn failed(&self, logger: &SampleLogger, error: WorkerError) -> Evaluation {
        logger.log_error(&error.to_string());
        Evaluation {
            metrics: QualityMetrics::render_failure(error.to_string()),
            image: None,
        }
    }

    /// Runs the CPU-bound metric work off the async runtime.
    async fn evaluate(&self, output: RenderOutput, logger: &SampleLogger) -> WorkerResult<Evaluation> {
        let config = Arc::clone(&self.config);
        let joined = tokio::task::spawn_blocking(move || {
            let snapshot = extract_camera_snapshot(&output.camera)?;
            let metrics = evaluate_quality(
                &output.image,
                output.reference_image.as_ref(),
                output.depth.as_ref(),
                &snapshot,
                &output.reference_points,
                &config,
            )?;
            Ok::<_, WorkerError>((metrics, output.image))
        })
        .await;

        match joined {
            Ok(Ok((metrics, image))) => Ok(Evaluation {
                metrics,
                image: Some(image),
            }),
            // Malformed render output is the sample's fault: FAIL it
            Ok(Err(e)) => Ok(self.failed(logger, WorkerError::invalid_output(e.to_string()))),
            Err(e) => Ok(self.failed(logger, WorkerError::invalid_output(format!("evaluation aborted: {}", e)))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{checkerboard, flat_image, FakeRenderer};
    use rqv_models::{ComplexityClass, QaFlag, RENDER_TIMEOUT_REASON};
    use rqv_store::MemoryStore;

    fn pipeline(renderer: Arc<FakeRenderer>, store: Arc<MemoryStore>) -> ValidationPipeline {
        let sampler = Arc::new(AdaptiveSampler::new(Default::default()).unwrap());
        ValidationPipeline::new(Arc::new(ValidationConfig::default()), sampler, renderer, store)
            .with_work_dir(std::env::temp_dir().join("rqv-pipeline-tests"))
    }

    #[tokio::test]
    async fn test_clean_render_is_stored_with_tier_budget() {
        let renderer = Arc::new(FakeRenderer::rendering(flat_image));
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(Arc::clone(&renderer), Arc::clone(&store));

        let task = RenderTask::new(SampleId::from("s-1"), SceneDescriptor::new("3001 brick 2x4"));
        let record = p.process(&task).await.unwrap();

        assert_eq!(record.complexity, ComplexityClass::Simple);
        assert_eq!(record.sample_budget, 256);
        assert_eq!(renderer.calls(), 1);
        let stored = store.get_sample(&SampleId::from("s-1")).await.unwrap().unwrap();
        assert_eq!(stored.sample_budget, record.sample_budget);
        assert_eq!(stored.qa_flag(), record.qa_flag());
    }

    #[tokio::test]
    async fn test_timeout_produces_fail_record() {
        let renderer = Arc::new(FakeRenderer::timing_out());
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(Arc::clone(&renderer), Arc::clone(&store));

        let task = RenderTask::new(SampleId::from("s-2"), SceneDescriptor::new("minifig torso"));
        let record = p.process(&task).await.unwrap();

        assert_eq!(record.qa_flag(), QaFlag::Fail);
        assert_eq!(record.reason(), RENDER_TIMEOUT_REASON);
        assert_eq!(store.sample_count().await, 1);
    }

    #[tokio::test]
    async fn test_noisy_render_is_bumped_once() {
        let renderer = Arc::new(FakeRenderer::rendering(checkerboard));
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(Arc::clone(&renderer), Arc::clone(&store));

        let task = RenderTask::new(SampleId::from("s-3"), SceneDescriptor::new("3001 brick 2x4"));
        let record = p.process(&task).await.unwrap();

        // Pixel checkerboard noise is far above the simple-tier threshold
        assert_eq!(renderer.calls(), 2);
        assert_eq!(record.sample_budget, 256 + 64);
        assert_eq!(renderer.budgets(), vec![256, 320]);
    }

    #[tokio::test]
    async fn test_requeued_recipe_overrides_budget() {
        let renderer = Arc::new(FakeRenderer::rendering(flat_image));
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(Arc::clone(&renderer), Arc::clone(&store));

        let recipe = crate::recipe::resolve_retry_recipe("SSIM 0.400 < 0.960");
        let task = RenderTask::new(SampleId::from("s-4"), SceneDescriptor::new("3001 brick 2x4")).with_recipe(recipe);
        let record = p.process(&task).await.unwrap();

        assert_eq!(record.sample_budget, 512);
        assert_eq!(renderer.last_request().unwrap().recipe.lighting, "studio");
    }

    #[tokio::test]
    async fn test_same_scene_hits_cache() {
        let renderer = Arc::new(FakeRenderer::rendering(flat_image));
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(SceneCache::in_memory());
        let p = pipeline(Arc::clone(&renderer), store).with_cache(Arc::clone(&cache));

        for id in ["a", "b", "c"] {
            let task = RenderTask::new(SampleId::from(id), SceneDescriptor::new("3001 brick 2x4").with_color("Red"));
            p.process(&task).await.unwrap();
        }
        assert_eq!(cache.len().await, 1);

        let material = renderer.last_request().unwrap().material;
        assert_eq!(material.base_color.as_deref(), Some("Red"));
    }

    #[tokio::test]
    async fn test_empty_descriptor_fails_the_sample() {
        let renderer = Arc::new(FakeRenderer::rendering(flat_image));
        let store = Arc::new(MemoryStore::new());
        let p = pipeline(Arc::clone(&renderer), store);

        let task = RenderTask::new(SampleId::from("s-5"), SceneDescriptor::new("  "));
        let record = p.process(&task).await.unwrap();

        assert!(record.is_failed());
        assert!(record.reason().contains("empty descriptor"));
        assert_eq!(renderer.calls(), 0);
    }

    #[test]
    fn test_material_presets() {
        assert_eq!(PresetSceneBuilder::material_for(Some("Trans-Clear")).transmission, 0.95);
        assert_eq!(PresetSceneBuilder::material_for(Some("Chrome Gold")).metallic, 1.0);
        assert_eq!(PresetSceneBuilder::material_for(None).name, "abs");
    }
}
