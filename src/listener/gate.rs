//! Admission Gate
//!
//! Bounds the number of concurrently admitted connections. The accept loop
//! takes a permit before posting every accept; the close path gives it back.
//! Because acquire and release happen in different tasks, permits are
//! forgotten on acquire and re-added on release instead of being held as
//! RAII guards.

use tokio::sync::Semaphore;

/// Counting permit limiting concurrently active connections.
#[derive(Debug)]
pub struct AdmissionGate {
    permits: Semaphore,
}

impl AdmissionGate {
    pub fn new(max: usize) -> Self {
        Self {
            permits: Semaphore::new(max),
        }
    }

    /// Waits for a free permit and takes it.
    ///
    /// Cancel-safe: dropping the future before it completes takes nothing.
    /// Returns false only if the gate was closed.
    pub async fn acquire(&self) -> bool {
        match self.permits.acquire().await {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Returns one permit.
    ///
    /// Must be called exactly once per successful acquire.
    pub fn release(&self) {
        self.permits.add_permits(1);
    }

    /// Number of free permits.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
