use std::path::PathBuf;

use thiserror::Error;

/// Failures of a detection cycle. None of them are fatal to the process.
#[derive(Debug, Error)]
pub enum DetectError {
    /// Transport failure, timeout or non-success status.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Normalization yielded zero items. Never a legitimate steady state, so
    /// it usually means the page structure changed.
    #[error("source yielded no items; the extraction rule may no longer match the page")]
    EmptySource,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DetectError {
    /// The source is reachable but no longer parses. Deserves louder logging
    /// than a transient fetch failure.
    pub fn is_structural(&self) -> bool {
        matches!(self, DetectError::EmptySource)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("read restart signal at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write restart signal at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encode restart signal: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("send to {recipient} failed: {reason}")]
    Send { recipient: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum VcsError {
    /// The current branch has no tracking relationship configured.
    #[error("branch has no upstream configured")]
    NoUpstream,

    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected output: {0}")]
    Parse(String),
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Signal(#[from] SignalError),
}
