//! Scene/material cache.
//!
//! Get-or-create keyed by a SHA-256 fingerprint of everything that changes
//! the built scene. Entries live for the life of the cache (no eviction);
//! each cache instance owns one snapshot namespace on disk.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rqv_store::SnapshotStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::WorkerResult;
use crate::metrics;

/// Everything that determines a built scene.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SceneKey {
    pub descriptor: String,
    pub color: Option<String>,
    pub sample_budget: u32,
    pub resolution: (u32, u32),
    pub background: String,
}

/// Hex SHA-256 over the length-prefixed `SceneKey` fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneFingerprint(String);

impl SceneFingerprint {
    pub fn compute(key: &SceneKey) -> Self {
        let mut hasher = Sha256::new();
        let mut field = |name: &str, value: &str| {
            hasher.update(name.as_bytes());
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        };

        field("descriptor", &key.descriptor);
        match &key.color {
            Some(c) => field("color", c),
            None => field("color-none", ""),
        }
        field("samples", &key.sample_budget.to_string());
        field("resolution", &format!("{}x{}", key.resolution.0, key.resolution.1));
        field("background", &key.background);

        let digest = hasher.finalize();
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SceneFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Material parameters applied to a part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialSpec {
    pub name: String,
    #[serde(default)]
    pub base_color: Option<String>,
    pub roughness: f64,
    pub metallic: f64,
    pub transmission: f64,
}

/// Expensive-to-build scene setup shared between renders of the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneArtifact {
    pub fingerprint: SceneFingerprint,
    pub descriptor: String,
    /// Prepared mesh on local disk
    #[serde(default)]
    pub mesh_path: Option<PathBuf>,
    pub vertex_count: u64,
    pub material: MaterialSpec,
    pub built_at: DateTime<Utc>,
}

impl SceneArtifact {
    /// Owned material for one render, so callers never mutate the cached copy.
    pub fn materialize(&self, color: Option<&str>) -> MaterialSpec {
        let mut material = self.material.clone();
        if let Some(color) = color {
            material.name = format!("{}:{}", material.name, color);
            material.base_color = Some(color.to_string());
        }
        material
    }
}

/// Where a lookup was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Memory,
    Disk,
    Built,
}

impl CacheSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheSource::Memory => "memory",
            CacheSource::Disk => "disk",
            CacheSource::Built => "built",
        }
    }
}

/// Fingerprint-keyed artifact cache with optional gzip snapshots.
pub struct SceneCache {
    entries: RwLock<HashMap<SceneFingerprint, Arc<SceneArtifact>>>,
    snapshots: Option<SnapshotStore>,
}

impl SceneCache {
    /// Memory-only cache.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            snapshots: None,
        }
    }

    /// Cache that also persists snapshots under `store`'s namespace.
    pub fn with_snapshots(store: SnapshotStore) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            snapshots: Some(store),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Return the cached artifact for `key`, building it with `build` on a miss.
    pub async fn get_or_create<F, Fut>(
        &self,
        key: &SceneKey,
        build: F,
    ) -> WorkerResult<(Arc<SceneArtifact>, CacheSource)>
    where
        F: FnOnce(SceneFingerprint) -> Fut,
        Fut: Future<Output = WorkerResult<SceneArtifact>>,
    {
        let fingerprint = SceneFingerprint::compute(key);

        if let Some(artifact) = self.entries.read().await.get(&fingerprint) {
            debug!(fingerprint = %fingerprint, "Scene cache hit");
            metrics::record_cache_lookup(CacheSource::Memory.as_str());
            return Ok((Arc::clone(artifact), CacheSource::Memory));
        }

        if let Some(ref store) = self.snapshots {
            if let Some(artifact) = store.read::<SceneArtifact>(fingerprint.as_str()).await {
                if artifact.fingerprint == fingerprint {
                    debug!(fingerprint = %fingerprint, "Scene restored from snapshot");
                    let artifact = self.insert(fingerprint, artifact).await;
                    metrics::record_cache_lookup(CacheSource::Disk.as_str());
                    return Ok((artifact, CacheSource::Disk));
                }
                warn!(fingerprint = %fingerprint, "Snapshot fingerprint mismatch, rebuilding");
            }
        }

        let artifact = build(fingerprint.clone()).await?;
        if let Some(ref store) = self.snapshots {
            if let Err(e) = store.write(fingerprint.as_str(), &artifact).await {
                warn!(fingerprint = %fingerprint, "Failed to write scene snapshot: {}", e);
            }
        }

        info!(fingerprint = %fingerprint, descriptor = %key.descriptor, "Built scene");
        let artifact = self.insert(fingerprint, artifact).await;
        metrics::record_cache_lookup(CacheSource::Built.as_str());
        Ok((artifact, CacheSource::Built))
    }

    async fn insert(&self, fingerprint: SceneFingerprint, artifact: SceneArtifact) -> Arc<SceneArtifact> {
        // A concurrent miss may have inserted first; keep that one
        let mut entries = self.entries.write().await;
        Arc::clone(entries.entry(fingerprint).or_insert_with(|| Arc::new(artifact)))
    }

    /// Drop every entry and this namespace's snapshots. Returns the number of
    /// snapshots removed.
    pub async fn clear(&self) -> WorkerResult<usize> {
        self.entries.write().await.clear();
        match self.snapshots {
            Some(ref store) => Ok(store.clear().await?),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn key() -> SceneKey {
        SceneKey {
            descriptor: "3001 brick 2x4".into(),
            color: Some("red".into()),
            sample_budget: 256,
            resolution: (1024, 1024),
            background: "neutral".into(),
        }
    }

    fn artifact(fingerprint: SceneFingerprint) -> SceneArtifact {
        SceneArtifact {
            fingerprint,
            descriptor: "3001 brick 2x4".into(),
            mesh_path: None,
            vertex_count: 1200,
            material: MaterialSpec {
                name: "abs_plastic".into(),
                base_color: None,
                roughness: 0.35,
                metallic: 0.0,
                transmission: 0.0,
            },
            built_at: Utc::now(),
        }
    }

    #[test]
    fn test_fingerprint_identical_inputs_match() {
        assert_eq!(SceneFingerprint::compute(&key()), SceneFingerprint::compute(&key()));
        assert_eq!(SceneFingerprint::compute(&key()).as_str().len(), 64);
    }

    #[test]
    fn test_fingerprint_any_field_change_misses() {
        let base = SceneFingerprint::compute(&key());
        let variants = [
            SceneKey { descriptor: "3001 brick 2x3".into(), ..key() },
            SceneKey { color: Some("blue".into()), ..key() },
            SceneKey { color: None, ..key() },
            SceneKey { sample_budget: 272, ..key() },
            SceneKey { resolution: (1024, 768), ..key() },
            SceneKey { background: "studio".into(), ..key() },
        ];
        for variant in variants {
            assert_ne!(SceneFingerprint::compute(&variant), base, "{:?}", variant);
        }
    }

    #[test]
    fn test_fingerprint_fields_do_not_bleed() {
        let a = SceneKey { descriptor: "ab".into(), background: "c".into(), ..key() };
        let b = SceneKey { descriptor: "a".into(), background: "bc".into(), ..key() };
        assert_ne!(SceneFingerprint::compute(&a), SceneFingerprint::compute(&b));
    }

    #[test]
    fn test_materialize_is_copy_on_use() {
        let art = artifact(SceneFingerprint::compute(&key()));
        let m = art.materialize(Some("blue"));
        assert_eq!(m.base_color.as_deref(), Some("blue"));
        assert!(art.material.base_color.is_none());
    }

    #[tokio::test]
    async fn test_hit_reuses_artifact() {
        let cache = SceneCache::in_memory();
        let builds = AtomicU32::new(0);

        let (first, source) = cache
            .get_or_create(&key(), |fp| {
                builds.fetch_add(1, Ordering::SeqCst);
                async move { Ok(artifact(fp)) }
            })
            .await
            .unwrap();
        assert_eq!(source, CacheSource::Built);

        let (second, source) = cache
            .get_or_create(&key(), |fp| {
                builds.fetch_add(1, Ordering::SeqCst);
                async move { Ok(artifact(fp)) }
            })
            .await
            .unwrap();
        assert_eq!(source, CacheSource::Memory);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        let other = SceneKey { sample_budget: 320, ..key() };
        let (_, source) = cache
            .get_or_create(&other, |fp| async move { Ok(artifact(fp)) })
            .await
            .unwrap();
        assert_eq!(source, CacheSource::Built);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_snapshot_restore_and_clear() {
        let root = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(root.path(), "worker-a").unwrap();

        let cache = SceneCache::with_snapshots(store.clone());
        cache
            .get_or_create(&key(), |fp| async move { Ok(artifact(fp)) })
            .await
            .unwrap();

        // Fresh process, same namespace
        let restored = SceneCache::with_snapshots(store);
        let (art, source) = restored
            .get_or_create(&key(), |_| async {
                Err(crate::error::WorkerError::SceneBuildFailed("should restore from disk".into()))
            })
            .await
            .unwrap();
        assert_eq!(source, CacheSource::Disk);
        assert_eq!(art.vertex_count, 1200);

        assert_eq!(restored.clear().await.unwrap(), 1);
        assert!(restored.is_empty().await);
    }

    #[tokio::test]
    async fn test_build_error_is_not_cached() {
        let cache = SceneCache::in_memory();
        let result = cache
            .get_or_create(&key(), |_| async {
                Err(crate::error::WorkerError::SceneBuildFailed("mesh missing".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(cache.is_empty().await);
    }
}
