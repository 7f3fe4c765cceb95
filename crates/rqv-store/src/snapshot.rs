//! Gzip JSON snapshots on local disk.
//!
//! Layout: `{root}/{namespace}/{key}.json.gz`. One namespace per worker;
//! there is no cross-process locking.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

const SNAPSHOT_SUFFIX: &str = ".json.gz";

/// Compress a value to gzip-encoded JSON bytes.
pub fn compress_json<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| StoreError::Snapshot(format!("Failed to gzip snapshot: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| StoreError::Snapshot(format!("Failed to finish gzip encoding: {}", e)))
}

/// Decompress gzip JSON bytes.
///
/// Returns `None` if the data is corrupt (treated as a miss).
pub fn decompress_json<T: DeserializeOwned>(data: &[u8]) -> Option<T> {
    let mut decoder = GzDecoder::new(data);
    let mut json = Vec::new();
    if let Err(e) = decoder.read_to_end(&mut json) {
        warn!(error = %e, "Failed to decompress snapshot");
        return None;
    }
    match serde_json::from_slice(&json) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Failed to decode snapshot JSON");
            None
        }
    }
}

/// Namespaced snapshot directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl AsRef<Path>, namespace: &str) -> StoreResult<Self> {
        if namespace.is_empty() || namespace.contains(['/', '\\']) || namespace == ".." {
            return Err(StoreError::config(format!(
                "invalid snapshot namespace '{}'",
                namespace
            )));
        }
        Ok(Self {
            dir: root.as_ref().join(namespace),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path for a snapshot key.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{}", key, SNAPSHOT_SUFFIX))
    }

    pub async fn write<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<PathBuf> {
        let data = compress_json(value)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(key);
        // Write then rename so readers never see a partial file
        let tmp = self.dir.join(format!(".{}.tmp", key));
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), size = data.len(), "Wrote snapshot");
        Ok(path)
    }

    /// Read a snapshot. Missing or corrupt files are a miss.
    pub async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read snapshot");
                return None;
            }
        };
        decompress_json(&data)
    }

    /// Delete every snapshot in this namespace. Returns the number removed.
    pub async fn clear(&self) -> StoreResult<usize> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(SNAPSHOT_SUFFIX) {
                tokio::fs::remove_file(entry.path()).await?;
                removed += 1;
            }
        }
        debug!(dir = %self.dir.display(), removed, "Cleared snapshots");
        Ok(removed)
    }
}
