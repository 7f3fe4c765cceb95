//! Render queue for requeued samples.
//!
//! This crate provides:
//! - The `RenderQueue` trait the orchestrator submits to
//! - `RedisRenderQueue` on Redis Streams, with a per-sample dedup key
//! - `MemoryRenderQueue` for single-process runs and tests

pub mod error;
pub mod job;
pub mod memory;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::RenderJob;
pub use memory::MemoryRenderQueue;
pub use queue::{QueueConfig, RedisRenderQueue, RenderQueue, SubmitOutcome};
