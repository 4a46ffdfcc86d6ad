use std::sync::Arc;

use tokio::sync::{ OwnedSemaphorePermit, Semaphore };

use crate::error::GateError;

/// Counting admission gate in front of the confirmation trackers.
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

/// One admitted tracker. The unit goes back to the gate when this is dropped.
#[derive(Debug)]
pub struct GatePass {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        Self { permits: Arc::new(Semaphore::new(capacity)), capacity }
    }

    /// Waits for a free unit. Fails only once the gate has been closed.
    pub async fn acquire(&self) -> Result<GatePass, GateError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned().await
            .map_err(|_| GateError::Closed)?;
        Ok(GatePass { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Units currently held.
    pub fn in_use(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    pub fn close(&self) {
        self.permits.close();
    }
}
