use std::future::Future;
use std::time::Duration;

use tokio::time::{interval, sleep, MissedTickBehavior};

use crate::dispatch::ChatTransport;
use crate::error::{DispatchError, SignalError};
use crate::mailbox::SignalMailbox;
use crate::model::RestartSignal;
use crate::render::{render_restart_announcement, render_restarting_now};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Running,
    AnnouncingExit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No signal pending.
    Idle,
    /// Transport not connected; the mailbox was not touched.
    NotReady,
    /// A previous poll already committed to exiting.
    AlreadyExiting,
    /// The announcement could not be sent. The signal is back in the mailbox
    /// for the next poll.
    AnnounceFailed,
    /// Signal consumed and announced. The caller should exit after its flush delay.
    Exit(RestartSignal),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    Restart(RestartSignal),
    Shutdown,
}

/// Watcher side of the restart handshake.
///
/// The signal is claimed before announcing, so when several watchers share a
/// mailbox only the one whose claim succeeds announces. The others see
/// nothing pending.
#[derive(Debug)]
pub struct RestartWatch {
    recipient: String,
    state: WatchState,
}

impl RestartWatch {
    pub fn new(recipient: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            state: WatchState::Running,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub async fn poll(
        &mut self,
        mailbox: &dyn SignalMailbox,
        transport: &dyn ChatTransport,
    ) -> Result<PollOutcome, SignalError> {
        if self.state == WatchState::AnnouncingExit {
            return Ok(PollOutcome::AlreadyExiting);
        }
        if !transport.is_ready().await {
            return Ok(PollOutcome::NotReady);
        }
        let Some(signal) = mailbox.take_and_delete().await? else {
            return Ok(PollOutcome::Idle);
        };

        self.state = WatchState::AnnouncingExit;
        tracing::info!(reason = %signal.reason, upstream = %signal.upstream_ref, "restart signal received; announcing");

        if let Err(e) = self.announce(transport, &signal.reason).await {
            tracing::error!(error = %e, "restart announcement failed; returning signal to mailbox");
            self.state = WatchState::Running;
            if let Err(restore) = mailbox.put_if_absent(&signal).await {
                tracing::error!(error = %restore, reason = %signal.reason, "could not return restart signal to mailbox; it is lost");
                return Err(restore);
            }
            return Ok(PollOutcome::AnnounceFailed);
        }

        tracing::info!("restart requested by updater; exiting");
        Ok(PollOutcome::Exit(signal))
    }

    /// Poll every `every` until a restart is announced or `shutdown`
    /// resolves. After an announcement waits `exit_delay` so the messages
    /// flush before the caller exits.
    pub async fn run<F>(
        &mut self,
        mailbox: &dyn SignalMailbox,
        transport: &dyn ChatTransport,
        every: Duration,
        exit_delay: Duration,
        shutdown: F,
    ) -> LoopExit
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut tick = interval(every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => match self.poll(mailbox, transport).await {
                    Ok(PollOutcome::Exit(signal)) => {
                        sleep(exit_delay).await;
                        tracing::info!("exiting for restart");
                        return LoopExit::Restart(signal);
                    }
                    Ok(PollOutcome::NotReady) => tracing::debug!("chat bridge not ready; signal poll skipped"),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "restart signal poll failed"),
                },
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    return LoopExit::Shutdown;
                }
            }
        }
    }

    async fn announce(
        &self,
        transport: &dyn ChatTransport,
        reason: &str,
    ) -> Result<(), DispatchError> {
        transport
            .send_text(&self.recipient, &render_restart_announcement(reason))
            .await?;
        transport
            .send_text(&self.recipient, &render_restarting_now())
            .await
    }
}
