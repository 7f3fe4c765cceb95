//! Render quality validation worker.
//!
//! This crate provides:
//! - The per-sample validation pipeline (classify, cache, render, QA)
//! - Adaptive sample budgets with noise feedback
//! - Retry recipe synthesis for failed samples
//! - The auto-requeue orchestrator and retrain trigger
//! - The re-render executor consuming the render queue

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod pipeline;
pub mod qa;
pub mod quality;
pub mod recipe;
pub mod renderer;
pub mod retrain;
pub mod retry;
pub mod sampler;
pub mod scene_cache;

#[cfg(test)]
mod test_support;

pub use config::{ValidationConfig, WorkerConfig, WorkerMode};
pub use error::{WorkerError, WorkerResult};
pub use executor::RenderExecutor;
pub use logging::SampleLogger;
pub use orchestrator::RequeueOrchestrator;
pub use pipeline::{RenderTask, ValidationPipeline};
pub use qa::{decide, QaThresholds};
pub use quality::{evaluate_quality, ReferencePoints};
pub use recipe::resolve_retry_recipe;
pub use renderer::{CommandRenderer, SceneRenderer};
pub use sampler::{AdaptiveSampler, SceneDescriptor};
pub use scene_cache::SceneCache;
