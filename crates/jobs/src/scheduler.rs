use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds how many jobs do work at the same time.
///
/// Started jobs queue for a slot and only enter `Running` once they hold
/// one. Cloning shares the slots.
#[derive(Clone, Debug)]
pub struct Scheduler {
    slots: Arc<Semaphore>,
    capacity: usize,
}
impl Scheduler {
    /// At least one job always gets to run.
    pub fn new(max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not held by any job right now.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Stop handing out slots. Jobs still waiting fail; running ones finish.
    pub fn close(&self) {
        self.slots.close();
    }

    pub(crate) async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.slots).acquire_owned().await.or_raise(|| ErrorKind::Scheduler)
    }
}
impl Default for Scheduler {
    fn default() -> Self {
        Self::new(2)
    }
}
