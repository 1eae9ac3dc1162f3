//! In-memory collaborators for tests and embedding. Not durable.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::dispatch::ChatTransport;
use crate::error::{DispatchError, SignalError, StoreError};
use crate::mailbox::SignalMailbox;
use crate::model::{InboundEvent, RestartSignal, Snapshot};
use crate::store::SnapshotStore;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct InMemorySnapshotStore {
    inner: Mutex<Option<Snapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Snapshot> {
        lock(&self.inner).clone()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        Ok(lock(&self.inner).clone())
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        *lock(&self.inner) = Some(snapshot.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryMailbox {
    slot: Mutex<Option<RestartSignal>>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SignalMailbox for InMemoryMailbox {
    async fn put_if_absent(&self, signal: &RestartSignal) -> Result<bool, SignalError> {
        let mut slot = lock(&self.slot);
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(signal.clone());
        Ok(true)
    }

    async fn peek(&self) -> Result<Option<RestartSignal>, SignalError> {
        Ok(lock(&self.slot).clone())
    }

    async fn take_and_delete(&self) -> Result<Option<RestartSignal>, SignalError> {
        Ok(lock(&self.slot).take())
    }
}

/// Transport that records every send and replays queued inbound events.
#[derive(Default)]
pub struct RecordingTransport {
    inner: Mutex<TransportState>,
}

#[derive(Default)]
struct TransportState {
    members: Vec<String>,
    failing: HashSet<String>,
    sent: Vec<(String, String)>,
    events: Vec<InboundEvent>,
    not_ready: bool,
}

impl RecordingTransport {
    pub fn with_members(members: &[&str]) -> Self {
        let t = Self::default();
        lock(&t.inner).members = members.iter().map(|m| m.to_string()).collect();
        t
    }

    /// Make every send to `recipient` fail.
    pub fn fail_for(&self, recipient: &str) {
        lock(&self.inner).failing.insert(recipient.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.inner).failing.clear();
    }

    pub fn set_ready(&self, ready: bool) {
        lock(&self.inner).not_ready = !ready;
    }

    pub fn push_event(&self, event: InboundEvent) {
        lock(&self.inner).events.push(event);
    }

    /// Successful sends as `(recipient, text)`, in order.
    pub fn sent(&self) -> Vec<(String, String)> {
        lock(&self.inner).sent.clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), DispatchError> {
        let mut s = lock(&self.inner);
        if s.failing.contains(recipient) {
            return Err(DispatchError::Send {
                recipient: recipient.to_string(),
                reason: "rejected".to_string(),
            });
        }
        s.sent.push((recipient.to_string(), text.to_string()));
        Ok(())
    }

    async fn group_members(&self, _group: &str) -> Result<Vec<String>, DispatchError> {
        Ok(lock(&self.inner).members.clone())
    }

    async fn poll_events(&self) -> Result<Vec<InboundEvent>, DispatchError> {
        Ok(std::mem::take(&mut lock(&self.inner).events))
    }

    async fn is_ready(&self) -> bool {
        !lock(&self.inner).not_ready
    }
}
