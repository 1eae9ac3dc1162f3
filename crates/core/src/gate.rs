use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// In-flight guard for a periodic task: at most one cycle runs at a time.
///
/// A tick that finds the gate held is skipped rather than queued.
#[derive(Debug, Clone)]
pub struct CycleGate {
    permits: Arc<Semaphore>,
}

impl Default for CycleGate {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleGate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }

    /// Enter the gate. The returned permit releases it on drop.
    pub fn try_enter(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().try_acquire_owned().ok()
    }

    pub fn is_busy(&self) -> bool {
        self.permits.available_permits() == 0
    }
}
