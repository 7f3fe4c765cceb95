//! Metadata store boundary.
//!
//! This crate provides:
//! - The `MetadataStore` trait used by the pipeline and the requeue orchestrator
//! - `MemoryStore` for single-process runs and tests
//! - `RestMetadataStore`, a PostgREST-style HTTP adapter
//! - Retry with exponential backoff and jitter
//! - Gzip JSON snapshots on local disk

pub mod error;
pub mod memory;
pub mod metrics;
pub mod rest;
pub mod retry;
pub mod snapshot;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use rest::{RestMetadataStore, RestStoreConfig};
pub use retry::{with_retry, RetryConfig};
pub use snapshot::SnapshotStore;
pub use store::MetadataStore;
