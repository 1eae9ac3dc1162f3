use tokio::sync::Mutex;

use crate::detect::{log_diff, Change, DetectionEngine};
use crate::dispatch::{send_notification, ChatTransport, DispatchOutcome, Dispatcher, Plan};
use crate::error::{DetectError, DispatchError};
use crate::time::EpochMs;

/// How one watched cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    Baseline,
    Unchanged,
    Notified(DispatchOutcome),
    /// Changes were found but the primary send failed. The dispatcher
    /// recorded nothing.
    NotifyFailed(DispatchError),
}

/// Run one detection cycle and relay any change through `dispatcher`.
///
/// The dispatcher is locked only to update the status board and to decide
/// and record the notification. Sending happens without it, so status
/// queries are answered during a slow fanout.
pub async fn run_and_notify(
    engine: &DetectionEngine,
    dispatcher: &Mutex<Dispatcher>,
    transport: &dyn ChatTransport,
    now: EpochMs,
) -> Result<CycleOutcome, DetectError> {
    let report = engine.run_cycle().await?;

    let plan = {
        let mut d = dispatcher.lock().await;
        d.record_check(&report.snapshot);
        let diff = match &report.change {
            Change::Baseline => return Ok(CycleOutcome::Baseline),
            Change::Unchanged => return Ok(CycleOutcome::Unchanged),
            Change::Changed(diff) => diff,
        };
        log_diff(diff);
        d.prepare(diff, now)
    };

    let pending = match plan {
        Plan::Skip(skipped) => return Ok(CycleOutcome::Notified(skipped)),
        Plan::Send(pending) => pending,
    };
    match send_notification(transport, &pending).await {
        Ok((delivered, failed)) => {
            dispatcher.lock().await.complete(pending, now);
            tracing::info!(delivered, failed, "change notification dispatched");
            Ok(CycleOutcome::Notified(DispatchOutcome::Sent { delivered, failed }))
        }
        Err(e) => {
            tracing::warn!(error = %e, "change notification failed");
            Ok(CycleOutcome::NotifyFailed(e))
        }
    }
}
