use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{ProcessError, UpdaterError, VcsError};
use crate::hashing::file_fingerprint;
use crate::mailbox::SignalMailbox;
use crate::model::RestartSignal;
use crate::window::UpdateWindow;

/// Working copy tracking a remote branch.
#[async_trait]
pub trait SourceControl: Send + Sync {
    async fn fetch_remote(&self) -> Result<(), VcsError>;

    /// Upstream of the current branch, e.g. `origin/main`.
    async fn upstream_ref(&self) -> Result<String, VcsError>;

    /// `(ahead, behind)` of the local head relative to `upstream`.
    async fn ahead_behind(&self, upstream: &str) -> Result<(u32, u32), VcsError>;

    async fn last_commit_subject(&self, rev: &str) -> Result<String, VcsError>;

    async fn fast_forward_pull(&self) -> Result<(), VcsError>;
}

/// External supervisor of the watcher processes.
#[async_trait]
pub trait ProcessManager: Send + Sync {
    async fn restart_managed(&self, group: &str) -> Result<(), ProcessError>;
}

#[derive(Debug, Clone)]
pub struct UpdatePolicy {
    pub window: UpdateWindow,
    /// Dependency manifest compared before and after pulling.
    pub manifest_path: PathBuf,
    /// Time given to watchers to announce before the forced restart.
    pub grace: Duration,
    pub process_group: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    OutsideWindow,
    UpToDate,
    /// Behind upstream, but a previous signal has not been consumed yet.
    SignalPending,
    Signaled(RestartSignal),
}

pub struct Updater {
    vcs: Arc<dyn SourceControl>,
    mailbox: Arc<dyn SignalMailbox>,
    processes: Arc<dyn ProcessManager>,
    policy: UpdatePolicy,
    /// Signal for code already pulled whose write failed. Retried first on
    /// the next check, since the working copy no longer looks behind.
    unsent: Mutex<Option<RestartSignal>>,
}

impl Updater {
    pub fn new(
        vcs: Arc<dyn SourceControl>,
        mailbox: Arc<dyn SignalMailbox>,
        processes: Arc<dyn ProcessManager>,
        policy: UpdatePolicy,
    ) -> Self {
        Self {
            vcs,
            mailbox,
            processes,
            policy,
            unsent: Mutex::new(None),
        }
    }

    /// Check the remote and, when behind, pull and write a restart signal.
    /// Does not wait or restart anything.
    pub async fn check_once(&self, now: DateTime<Utc>) -> Result<UpdateOutcome, UpdaterError> {
        if !self.policy.window.allows(now) {
            tracing::info!("outside update window; deferring check");
            return Ok(UpdateOutcome::OutsideWindow);
        }

        let mut unsent = self.unsent.lock().await;
        if let Some(signal) = unsent.take() {
            tracing::info!(reason = %signal.reason, "retrying restart signal write for code already pulled");
            match self.mailbox.put_if_absent(&signal).await {
                Ok(true) => {
                    tracing::info!(reason = %signal.reason, "restart signal written");
                    return Ok(UpdateOutcome::Signaled(signal));
                }
                Ok(false) => {
                    tracing::info!("a restart signal is already pending; dropping the retried one");
                    return Ok(UpdateOutcome::SignalPending);
                }
                Err(e) => {
                    *unsent = Some(signal);
                    return Err(e.into());
                }
            }
        }

        tracing::info!("checking remote for updates");
        self.vcs.fetch_remote().await?;
        let upstream = self.vcs.upstream_ref().await?;
        let (ahead, behind) = self.vcs.ahead_behind(&upstream).await?;

        if behind == 0 {
            tracing::info!(%upstream, ahead, "up to date");
            return Ok(UpdateOutcome::UpToDate);
        }
        if self.mailbox.peek().await?.is_some() {
            tracing::info!(%upstream, behind, "restart already pending; waiting for watchers");
            return Ok(UpdateOutcome::SignalPending);
        }

        tracing::info!(%upstream, behind, "update available; pulling");
        let manifest_before = file_fingerprint(&self.policy.manifest_path).await;
        let subject = self.vcs.last_commit_subject(&upstream).await?;
        self.vcs.fast_forward_pull().await?;
        let manifest_after = file_fingerprint(&self.policy.manifest_path).await;

        let signal = RestartSignal {
            created_at: now,
            reason: format!("new version available: {subject}"),
            upstream_ref: upstream,
            ahead_count: ahead,
            behind_count: behind,
            deps_changed: manifest_before != manifest_after,
        };

        let written = match self.mailbox.put_if_absent(&signal).await {
            Ok(w) => w,
            Err(e) => {
                tracing::error!(error = %e, "restart signal write failed after pulling; will retry next check");
                *unsent = Some(signal);
                return Err(e.into());
            }
        };
        if !written {
            tracing::info!("another restart signal appeared meanwhile; leaving it in place");
            return Ok(UpdateOutcome::SignalPending);
        }
        tracing::info!(reason = %signal.reason, "restart signal written");
        Ok(UpdateOutcome::Signaled(signal))
    }

    /// Full cycle: check, then on a new signal wait the grace period and
    /// force-restart the managed group. A failed restart is logged only; the
    /// watchers still exit on their own when they see the signal.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<UpdateOutcome, UpdaterError> {
        let outcome = self.check_once(now).await?;
        if let UpdateOutcome::Signaled(signal) = &outcome {
            if signal.deps_changed {
                tracing::warn!(
                    manifest = %self.policy.manifest_path.display(),
                    "dependency manifest changed; reinstall or rebuild dependencies"
                );
            }
            self.force_restart().await;
        }
        Ok(outcome)
    }

    async fn force_restart(&self) {
        tracing::info!(grace_secs = self.policy.grace.as_secs(), "waiting for watchers to announce");
        tokio::time::sleep(self.policy.grace).await;

        match self.processes.restart_managed(&self.policy.process_group).await {
            Ok(()) => tracing::info!(group = %self.policy.process_group, "managed processes restarted"),
            Err(e) => tracing::warn!(error = %e, "forced restart failed; watchers will exit via the signal"),
        }
    }
}
