use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::SignalError;
use crate::model::RestartSignal;
use crate::store::unique_sibling;

/// Single-slot channel carrying at most one pending [`RestartSignal`].
///
/// Producers never overwrite a pending record. Consumers race through
/// [`SignalMailbox::take_and_delete`], and exactly one of them receives it.
#[async_trait]
pub trait SignalMailbox: Send + Sync {
    /// Store `signal` unless one is already pending. Returns whether it was written.
    async fn put_if_absent(&self, signal: &RestartSignal) -> Result<bool, SignalError>;

    /// Pending signal without consuming it.
    async fn peek(&self) -> Result<Option<RestartSignal>, SignalError>;

    /// Consume the pending signal. Concurrent callers observe it at most once in total.
    async fn take_and_delete(&self) -> Result<Option<RestartSignal>, SignalError>;
}

/// Mailbox backed by one JSON file shared between processes.
#[derive(Debug, Clone)]
pub struct FsSignalMailbox {
    pub path: PathBuf,
}

impl FsSignalMailbox {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Put a claimed record back after a failed read, unless a new one has
    /// been written in the meantime.
    async fn unclaim(&self, claimed: &Path) {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(true) {
            tracing::error!(claimed = %claimed.display(), "restart signal unreadable and slot taken again; leaving claimed copy");
            return;
        }
        if let Err(e) = tokio::fs::rename(claimed, &self.path).await {
            tracing::error!(claimed = %claimed.display(), error = %e, "could not return unreadable restart signal");
        }
    }

    fn decode(&self, bytes: &[u8]) -> RestartSignal {
        match serde_json::from_slice(bytes) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "restart signal unreadable; honouring it anyway");
                RestartSignal::unreadable()
            }
        }
    }
}

#[async_trait]
impl SignalMailbox for FsSignalMailbox {
    async fn put_if_absent(&self, signal: &RestartSignal) -> Result<bool, SignalError> {
        let write_err = |source| SignalError::Write {
            path: self.path.clone(),
            source,
        };
        let bytes = serde_json::to_vec_pretty(signal)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        // Fully write a private file, then link it into place. The link fails
        // if the target exists, so a pending record is never replaced.
        let tmp = unique_sibling(&self.path, "put");
        tokio::fs::write(&tmp, &bytes).await.map_err(write_err)?;
        let linked = tokio::fs::hard_link(&tmp, &self.path).await;
        let _ = tokio::fs::remove_file(&tmp).await;

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(write_err(e)),
        }
    }

    async fn peek(&self) -> Result<Option<RestartSignal>, SignalError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(self.decode(&bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SignalError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn take_and_delete(&self) -> Result<Option<RestartSignal>, SignalError> {
        // Renaming is the claim: only one process can move the record away.
        let claimed = unique_sibling(&self.path, "claimed");
        match tokio::fs::rename(&self.path, &claimed).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SignalError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        }

        match tokio::fs::read(&claimed).await {
            Ok(b) => {
                let _ = tokio::fs::remove_file(&claimed).await;
                Ok(Some(self.decode(&b)))
            }
            Err(source) => {
                self.unclaim(&claimed).await;
                Err(SignalError::Read {
                    path: claimed,
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn signal(reason: &str) -> RestartSignal {
        RestartSignal {
            created_at: Utc::now(),
            reason: reason.to_string(),
            upstream_ref: "origin/main".into(),
            ahead_count: 0,
            behind_count: 2,
            deps_changed: false,
        }
    }

    #[tokio::test]
    async fn put_if_absent_never_overwrites() {
        let dir = tempdir().unwrap();
        let mb = FsSignalMailbox::new(dir.path().join("restart-pending.json"));

        assert!(mb.put_if_absent(&signal("first")).await.unwrap());
        assert!(!mb.put_if_absent(&signal("second")).await.unwrap());
        assert_eq!(mb.peek().await.unwrap().unwrap().reason, "first");
    }

    #[tokio::test]
    async fn take_consumes_once() {
        let dir = tempdir().unwrap();
        let mb = FsSignalMailbox::new(dir.path().join("restart-pending.json"));
        mb.put_if_absent(&signal("go")).await.unwrap();

        assert_eq!(mb.take_and_delete().await.unwrap().unwrap().reason, "go");
        assert!(mb.take_and_delete().await.unwrap().is_none());
        assert!(mb.peek().await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn garbage_record_still_counts_as_signal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restart-pending.json");
        std::fs::write(&path, b"\x00\x01 not a record").unwrap();
        let mb = FsSignalMailbox::new(&path);

        let seen = mb.peek().await.unwrap().unwrap();
        assert_eq!(seen.reason, "update detected");
        assert!(mb.take_and_delete().await.unwrap().is_some());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn legacy_field_names_decode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restart-pending.json");
        std::fs::write(
            &path,
            br#"{"createdAt":"2024-05-01T10:00:00Z","reason":"new version available: fix parser",
                "upstream":"origin/main","ahead":0,"behind":3}"#,
        )
        .unwrap();

        let s = FsSignalMailbox::new(&path).peek().await.unwrap().unwrap();
        assert_eq!(s.upstream_ref, "origin/main");
        assert_eq!(s.behind_count, 3);
        assert!(!s.deps_changed);
    }

    #[tokio::test]
    async fn failed_read_after_claim_keeps_the_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("restart-pending.json");
        // A directory can be renamed but not read as a file.
        std::fs::create_dir(&path).unwrap();
        let mb = FsSignalMailbox::new(&path);

        assert!(matches!(mb.take_and_delete().await, Err(SignalError::Read { .. })));
        assert!(path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
