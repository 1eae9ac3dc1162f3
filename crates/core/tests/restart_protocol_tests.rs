//! Integration tests for the updater/watcher restart handshake.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sitewatch_core::mailbox::{FsSignalMailbox, SignalMailbox};
use sitewatch_core::memory::{InMemoryMailbox, RecordingTransport};
use sitewatch_core::restart::{PollOutcome, RestartWatch};
use sitewatch_core::updater::{ProcessManager, SourceControl, UpdateOutcome, UpdatePolicy, Updater};
use sitewatch_core::window::{offset_from_hours, UpdateWindow};
use sitewatch_core::{ProcessError, RestartSignal, SignalError, UpdaterError, VcsError};

#[derive(Default)]
struct FakeVcs {
    upstream: Option<String>,
    ahead: u32,
    behind: AtomicU32,
    /// Pulling brings the working copy level with upstream.
    pull_catches_up: bool,
    pulls: AtomicUsize,
    /// Written into the manifest when pulling, if set.
    manifest_update: Mutex<Option<(std::path::PathBuf, String)>>,
}

impl FakeVcs {
    fn behind(n: u32) -> Self {
        Self {
            upstream: Some("origin/main".into()),
            behind: AtomicU32::new(n),
            ..Self::default()
        }
    }
}

#[async_trait]
impl SourceControl for FakeVcs {
    async fn fetch_remote(&self) -> Result<(), VcsError> {
        Ok(())
    }

    async fn upstream_ref(&self) -> Result<String, VcsError> {
        self.upstream.clone().ok_or(VcsError::NoUpstream)
    }

    async fn ahead_behind(&self, _upstream: &str) -> Result<(u32, u32), VcsError> {
        Ok((self.ahead, self.behind.load(Ordering::SeqCst)))
    }

    async fn last_commit_subject(&self, _rev: &str) -> Result<String, VcsError> {
        Ok("fix list parsing".into())
    }

    async fn fast_forward_pull(&self) -> Result<(), VcsError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if self.pull_catches_up {
            self.behind.store(0, Ordering::SeqCst);
        }
        if let Some((path, contents)) = self.manifest_update.lock().unwrap().take() {
            std::fs::write(path, contents).unwrap();
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeProcesses {
    restarts: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl ProcessManager for FakeProcesses {
    async fn restart_managed(&self, group: &str) -> Result<(), ProcessError> {
        self.restarts.lock().unwrap().push(group.to_string());
        if self.fail {
            return Err(ProcessError::Failed {
                command: "pm2 restart".into(),
                code: Some(1),
                stderr: "daemon not running".into(),
            });
        }
        Ok(())
    }
}

/// In-memory mailbox whose first `failures` writes fail.
struct FlakyMailbox {
    inner: InMemoryMailbox,
    failures: AtomicUsize,
}

impl FlakyMailbox {
    fn failing_first(n: usize) -> Self {
        Self {
            inner: InMemoryMailbox::new(),
            failures: AtomicUsize::new(n),
        }
    }
}

#[async_trait]
impl SignalMailbox for FlakyMailbox {
    async fn put_if_absent(&self, signal: &RestartSignal) -> Result<bool, SignalError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(SignalError::Write {
                path: "data/restart-pending.json".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.put_if_absent(signal).await
    }

    async fn peek(&self) -> Result<Option<RestartSignal>, SignalError> {
        self.inner.peek().await
    }

    async fn take_and_delete(&self) -> Result<Option<RestartSignal>, SignalError> {
        self.inner.take_and_delete().await
    }
}

fn policy(manifest: std::path::PathBuf) -> UpdatePolicy {
    UpdatePolicy {
        window: UpdateWindow::new(7, 24, offset_from_hours(-3)),
        manifest_path: manifest,
        grace: Duration::ZERO,
        process_group: "ecosystem.config.cjs".into(),
    }
}

/// Noon local time at UTC-3.
fn daytime() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 15, 0, 0).unwrap()
}

#[tokio::test]
async fn up_to_date_writes_nothing_and_restarts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = Arc::new(FakeVcs::behind(0));
    let mailbox = Arc::new(InMemoryMailbox::new());
    let processes = Arc::new(FakeProcesses::default());
    let updater = Updater::new(vcs.clone(), mailbox.clone(), processes.clone(), policy(dir.path().join("Cargo.lock")));

    assert_eq!(updater.run_cycle(daytime()).await.unwrap(), UpdateOutcome::UpToDate);
    assert!(mailbox.peek().await.unwrap().is_none());
    assert!(processes.restarts.lock().unwrap().is_empty());
    assert_eq!(vcs.pulls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn behind_upstream_pulls_signals_and_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = dir.path().join("Cargo.lock");
    std::fs::write(&manifest, "v1").unwrap();
    let vcs = Arc::new(FakeVcs::behind(2));
    *vcs.manifest_update.lock().unwrap() = Some((manifest.clone(), "v2".into()));
    let mailbox = Arc::new(InMemoryMailbox::new());
    let processes = Arc::new(FakeProcesses::default());
    let updater = Updater::new(vcs.clone(), mailbox.clone(), processes.clone(), policy(manifest));

    let UpdateOutcome::Signaled(signal) = updater.run_cycle(daytime()).await.unwrap() else {
        panic!("expected a signal");
    };
    assert_eq!(signal.reason, "new version available: fix list parsing");
    assert_eq!(signal.upstream_ref, "origin/main");
    assert_eq!(signal.behind_count, 2);
    assert!(signal.deps_changed);
    assert_eq!(mailbox.peek().await.unwrap(), Some(signal));
    assert_eq!(vcs.pulls.load(Ordering::SeqCst), 1);
    assert_eq!(*processes.restarts.lock().unwrap(), vec!["ecosystem.config.cjs".to_string()]);
}

#[tokio::test]
async fn unchanged_manifest_means_no_dependency_change() {
    let dir = tempfile::tempdir().unwrap();
    let updater = Updater::new(
        Arc::new(FakeVcs::behind(1)),
        Arc::new(InMemoryMailbox::new()),
        Arc::new(FakeProcesses::default()),
        policy(dir.path().join("missing.lock")),
    );

    let UpdateOutcome::Signaled(signal) = updater.check_once(daytime()).await.unwrap() else {
        panic!("expected a signal");
    };
    assert!(!signal.deps_changed);
}

#[tokio::test]
async fn pending_signal_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = Arc::new(FakeVcs::behind(1));
    let mailbox = Arc::new(InMemoryMailbox::new());
    let processes = Arc::new(FakeProcesses::default());
    let updater = Updater::new(vcs.clone(), mailbox.clone(), processes.clone(), policy(dir.path().join("Cargo.lock")));

    let UpdateOutcome::Signaled(first) = updater.run_cycle(daytime()).await.unwrap() else {
        panic!("expected a signal");
    };
    assert_eq!(updater.run_cycle(daytime()).await.unwrap(), UpdateOutcome::SignalPending);
    assert_eq!(mailbox.peek().await.unwrap(), Some(first));
    assert_eq!(vcs.pulls.load(Ordering::SeqCst), 1);
    assert_eq!(processes.restarts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn signal_write_failure_after_pull_is_retried_next_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = Arc::new(FakeVcs {
        pull_catches_up: true,
        ..FakeVcs::behind(1)
    });
    let mailbox = Arc::new(FlakyMailbox::failing_first(1));
    let processes = Arc::new(FakeProcesses::default());
    let updater = Updater::new(vcs.clone(), mailbox.clone(), processes.clone(), policy(dir.path().join("Cargo.lock")));

    let err = updater.run_cycle(daytime()).await.unwrap_err();
    assert!(matches!(err, UpdaterError::Signal(SignalError::Write { .. })));
    assert!(mailbox.peek().await.unwrap().is_none());
    assert!(processes.restarts.lock().unwrap().is_empty());

    // The pull already happened, so the remote no longer looks newer.
    let UpdateOutcome::Signaled(signal) = updater.run_cycle(daytime()).await.unwrap() else {
        panic!("expected the retried signal");
    };
    assert_eq!(signal.reason, "new version available: fix list parsing");
    assert_eq!(signal.behind_count, 1);
    assert_eq!(mailbox.peek().await.unwrap(), Some(signal));
    assert_eq!(vcs.pulls.load(Ordering::SeqCst), 1);
    assert_eq!(processes.restarts.lock().unwrap().len(), 1);

    assert_eq!(updater.run_cycle(daytime()).await.unwrap(), UpdateOutcome::UpToDate);
    assert_eq!(processes.restarts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn outside_window_defers_without_touching_git() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = Arc::new(FakeVcs::behind(3));
    let mailbox = Arc::new(InMemoryMailbox::new());
    let updater = Updater::new(vcs.clone(), mailbox.clone(), Arc::new(FakeProcesses::default()), policy(dir.path().join("Cargo.lock")));

    // 05:00 UTC is 02:00 at UTC-3.
    let night = Utc.with_ymd_and_hms(2024, 5, 1, 5, 0, 0).unwrap();
    assert_eq!(updater.run_cycle(night).await.unwrap(), UpdateOutcome::OutsideWindow);
    assert_eq!(vcs.pulls.load(Ordering::SeqCst), 0);
    assert!(mailbox.peek().await.unwrap().is_none());

    // Deferred, not cancelled.
    assert!(matches!(updater.run_cycle(daytime()).await.unwrap(), UpdateOutcome::Signaled(_)));
}

#[tokio::test]
async fn missing_upstream_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let updater = Updater::new(
        Arc::new(FakeVcs::default()),
        Arc::new(InMemoryMailbox::new()),
        Arc::new(FakeProcesses::default()),
        policy(dir.path().join("Cargo.lock")),
    );

    let err = updater.run_cycle(daytime()).await.unwrap_err();
    assert!(matches!(err, UpdaterError::Vcs(VcsError::NoUpstream)));
}

#[tokio::test]
async fn failed_forced_restart_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let processes = Arc::new(FakeProcesses {
        fail: true,
        ..FakeProcesses::default()
    });
    let mailbox = Arc::new(InMemoryMailbox::new());
    let updater = Updater::new(Arc::new(FakeVcs::behind(1)), mailbox.clone(), processes.clone(), policy(dir.path().join("Cargo.lock")));

    assert!(matches!(updater.run_cycle(daytime()).await.unwrap(), UpdateOutcome::Signaled(_)));
    assert_eq!(processes.restarts.lock().unwrap().len(), 1);
    // The signal stays for the watchers' own exit path.
    assert!(mailbox.peek().await.unwrap().is_some());
}

#[tokio::test]
async fn watcher_announces_once_and_consumes_signal() {
    let dir = tempfile::tempdir().unwrap();
    let mailbox = Arc::new(FsSignalMailbox::new(dir.path().join("data/restart-pending.json")));
    let updater = Updater::new(
        Arc::new(FakeVcs::behind(1)),
        mailbox.clone(),
        Arc::new(FakeProcesses::default()),
        policy(dir.path().join("Cargo.lock")),
    );
    updater.check_once(daytime()).await.unwrap();

    let transport = RecordingTransport::with_members(&["m1"]);
    let mut watch = RestartWatch::new("group@g.us");

    let PollOutcome::Exit(signal) = watch.poll(mailbox.as_ref(), &transport).await.unwrap() else {
        panic!("expected exit");
    };
    assert_eq!(signal.reason, "new version available: fix list parsing");

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(to, _)| to == "group@g.us"));
    assert!(sent[0].1.contains("new version available: fix list parsing"));
    assert!(mailbox.peek().await.unwrap().is_none());

    // A fresh watcher (as after the supervisor restart) finds nothing.
    let mut restarted = RestartWatch::new("group@g.us");
    assert_eq!(restarted.poll(mailbox.as_ref(), &transport).await.unwrap(), PollOutcome::Idle);
    assert_eq!(transport.sent().len(), 2);
}

#[tokio::test]
async fn competing_watchers_consume_signal_at_most_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("restart-pending.json");
    let producer = FsSignalMailbox::new(&path);
    producer
        .put_if_absent(&sitewatch_core::RestartSignal::unreadable())
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let mailbox = FsSignalMailbox::new(&path);
        tasks.push(tokio::spawn(async move {
            let transport = RecordingTransport::with_members(&[]);
            let mut watch = RestartWatch::new(format!("chat-{i}"));
            let outcome = watch.poll(&mailbox, &transport).await.unwrap();
            (outcome, transport.sent().len())
        }));
    }

    let mut exits = 0;
    for t in tasks {
        let (outcome, sent) = t.await.unwrap();
        match outcome {
            PollOutcome::Exit(_) => {
                exits += 1;
                assert_eq!(sent, 2);
            }
            PollOutcome::Idle => assert_eq!(sent, 0),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(exits, 1);
    assert!(!path.exists());
}
