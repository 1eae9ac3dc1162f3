use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};

use crate::error::DispatchError;
use crate::hashing::diff_fingerprint;
use crate::model::{Diff, InboundEvent, Item, Snapshot};
use crate::render::{render_diff, render_status};
use crate::time::EpochMs;

/// Chat session owned by some external service.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, recipient: &str, text: &str) -> Result<(), DispatchError>;

    async fn group_members(&self, group: &str) -> Result<Vec<String>, DispatchError>;

    /// Messages received since the previous call.
    async fn poll_events(&self) -> Result<Vec<InboundEvent>, DispatchError>;

    async fn is_ready(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Monitored chat: receives every notification and is the only chat
    /// whose messages are interpreted.
    pub primary_recipient: String,
    /// Human name of the source, used in message headers.
    pub label: String,
    pub cooldown_ms: EpochMs,
    pub status_keyword: String,
    pub display_offset: FixedOffset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Suppressed,
    Cooldown,
    Sent { delivered: usize, failed: usize },
}

/// Rendered notification cleared for sending. Built while holding the
/// dispatcher, sent without it, then handed back through
/// [`Dispatcher::complete`].
#[derive(Debug, Clone)]
pub struct PendingNotification {
    pub recipient: String,
    pub text: String,
    fingerprint: String,
    replies_seen: u64,
}

#[derive(Debug, Clone)]
pub enum Plan {
    Skip(DispatchOutcome),
    Send(PendingNotification),
}

/// Owner of all notification state for one watcher: dedup entries, the
/// suppression flag and the status board.
#[derive(Debug)]
pub struct Dispatcher {
    cfg: DispatcherConfig,
    sent: HashMap<String, EpochMs>,
    suppressed: bool,
    /// Bumped on every external reply.
    replies: u64,
    last_check: Option<DateTime<Utc>>,
    last_item: Option<Item>,
}

impl Dispatcher {
    pub fn new(cfg: DispatcherConfig) -> Self {
        Self {
            cfg,
            sent: HashMap::new(),
            suppressed: false,
            replies: 0,
            last_check: None,
            last_item: None,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.cfg
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    pub fn should_notify(&self, diff: &Diff, now: EpochMs) -> bool {
        self.gate(diff, now).is_none()
    }

    fn gate(&self, diff: &Diff, now: EpochMs) -> Option<DispatchOutcome> {
        if self.suppressed {
            return Some(DispatchOutcome::Suppressed);
        }
        match self.sent.get(&diff_fingerprint(diff)) {
            Some(at) if now - at < self.cfg.cooldown_ms => Some(DispatchOutcome::Cooldown),
            _ => None,
        }
    }

    fn pending(&self, diff: &Diff) -> PendingNotification {
        PendingNotification {
            recipient: self.cfg.primary_recipient.clone(),
            text: render_diff(&self.cfg.label, diff),
            fingerprint: diff_fingerprint(diff),
            replies_seen: self.replies,
        }
    }

    /// Decide whether `diff` goes out, rendering it if so.
    pub fn prepare(&self, diff: &Diff, now: EpochMs) -> Plan {
        match self.gate(diff, now) {
            None => Plan::Send(self.pending(diff)),
            Some(skip) => {
                match skip {
                    DispatchOutcome::Suppressed => {
                        tracing::info!("awaiting reply on monitored chat; notification held back")
                    }
                    _ => tracing::info!("identical notification sent recently; waiting for cooldown"),
                }
                Plan::Skip(skip)
            }
        }
    }

    /// Record a sent notification. A reply that arrived while it was being
    /// sent keeps notifications suppressed.
    pub fn complete(&mut self, pending: PendingNotification, now: EpochMs) {
        if pending.replies_seen != self.replies {
            tracing::info!("reply arrived during dispatch; notifications stay paused");
            return;
        }
        self.sent.retain(|_, at| now - *at < self.cfg.cooldown_ms);
        self.sent.insert(pending.fingerprint, now);
        self.suppressed = false;
    }

    /// Dispatch `diff` unless suppressed or already sent within the cooldown.
    pub async fn notify(
        &mut self,
        transport: &dyn ChatTransport,
        diff: &Diff,
        now: EpochMs,
    ) -> Result<DispatchOutcome, DispatchError> {
        match self.prepare(diff, now) {
            Plan::Skip(skipped) => Ok(skipped),
            Plan::Send(pending) => self.send_and_complete(transport, pending, now).await,
        }
    }

    /// Send `diff` regardless of suppression and cooldown. See [`send_notification`].
    pub async fn dispatch(
        &mut self,
        transport: &dyn ChatTransport,
        diff: &Diff,
        now: EpochMs,
    ) -> Result<DispatchOutcome, DispatchError> {
        let pending = self.pending(diff);
        self.send_and_complete(transport, pending, now).await
    }

    async fn send_and_complete(
        &mut self,
        transport: &dyn ChatTransport,
        pending: PendingNotification,
        now: EpochMs,
    ) -> Result<DispatchOutcome, DispatchError> {
        let (delivered, failed) = send_notification(transport, &pending).await?;
        self.complete(pending, now);
        Ok(DispatchOutcome::Sent { delivered, failed })
    }

    /// Update the status board from a successful fetch.
    pub fn record_check(&mut self, snapshot: &Snapshot) {
        self.last_check = Some(snapshot.captured_at);
        self.last_item = snapshot.last_item().cloned();
    }

    pub fn status_text(&self) -> String {
        render_status(self.last_check, self.last_item.as_ref(), self.cfg.display_offset)
    }

    /// A human replied on the monitored chat: hold further notifications and
    /// forget what was sent.
    pub fn on_external_reply(&mut self) {
        self.suppressed = true;
        self.replies += 1;
        self.sent.clear();
    }

    /// Status reply when `event` asks for one.
    pub fn on_status_query(&self, event: &InboundEvent) -> Option<String> {
        let keyword = self.cfg.status_keyword.to_lowercase();
        if keyword.is_empty() || !event.text.to_lowercase().contains(&keyword) {
            return None;
        }
        Some(self.status_text())
    }

    /// Interpret one inbound message. Returns the reply to send, if any.
    ///
    /// Only messages on the monitored chat not authored by this session count.
    /// Every such message suppresses notifications, status queries included.
    pub fn handle_inbound(&mut self, event: &InboundEvent) -> Option<String> {
        if event.from_self || event.chat_id != self.cfg.primary_recipient {
            return None;
        }
        let reply = self.on_status_query(event);
        tracing::info!(sender = %event.sender_id, text = %event.text, "reply received on monitored chat; pausing notifications");
        self.on_external_reply();
        reply
    }
}

/// Send to the primary recipient, then to each member of the primary group
/// individually. Returns `(delivered, failed)` member counts.
///
/// A failed primary send aborts with nothing sent to members. Member failures
/// are logged and counted.
pub async fn send_notification(
    transport: &dyn ChatTransport,
    pending: &PendingNotification,
) -> Result<(usize, usize), DispatchError> {
    let primary = pending.recipient.as_str();
    transport.send_text(primary, &pending.text).await?;
    tracing::info!(recipient = %primary, "notification sent to monitored chat");

    let members = match transport.group_members(primary).await {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "could not list group members; skipping private fanout");
            Vec::new()
        }
    };
    tracing::info!(members = members.len(), "sending private notifications");

    let (mut delivered, mut failed) = (0, 0);
    for member in &members {
        match transport.send_text(member, &pending.text).await {
            Ok(()) => delivered += 1,
            Err(e) => {
                failed += 1;
                tracing::warn!(member = %member, error = %e, "private notification failed");
            }
        }
    }
    Ok((delivered, failed))
}
