use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::Snapshot;

/// Durable home of the last observed snapshot for one source.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Previous snapshot, or `None` when nothing usable is stored.
    async fn load(&self) -> Result<Option<Snapshot>, StoreError>;

    /// Replace the stored snapshot. Last writer wins.
    async fn persist(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    pub path: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        match serde_json::from_slice::<Snapshot>(&bytes) {
            Ok(s) => Ok(Some(s)),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "stored snapshot unreadable; treating as first run");
                Ok(None)
            }
        }
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.path, &bytes).await.map_err(|e| self.io_err(e))
    }
}

/// Write to a temporary sibling, then rename over `path`. Readers see either
/// the old contents or the new ones, never a torn file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = unique_sibling(path, "tmp");
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

static SIBLINGS: AtomicU64 = AtomicU64::new(0);

/// `<dir>/<file name>.<tag>-<pid>-<n>`, unique across processes and calls.
pub(crate) fn unique_sibling(path: &Path, tag: &str) -> PathBuf {
    let n = SIBLINGS.fetch_add(1, Ordering::Relaxed);
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{tag}-{}-{n}", std::process::id()));
    path.with_file_name(name)
}
