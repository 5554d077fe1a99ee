//! Counting semaphore with cancellable acquisition.
//!
//! Bounds the listing fan-out and is reused by outer code for its own
//! concurrency limits. Permits are strictly bounded by the configured
//! capacity and release on drop; `acquire` blocks until a permit frees or
//! the caller's cancellation token fires. Fairness is not guaranteed, but
//! every release wakes a waiter, so no waiter starves under steady load.

use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::Mutex;
use snafu::Snafu;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Error produced by [`Semaphore::acquire`].
#[derive(Debug, Snafu)]
pub enum AcquireError {
    /// The caller's cancellation token fired before a permit freed.
    #[snafu(display("semaphore acquisition cancelled"))]
    Cancelled,
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    available: Mutex<usize>,
    freed: Notify,
}

/// Counting semaphore.
#[derive(Debug, Clone)]
pub struct Semaphore {
    shared: Arc<Shared>,
}

/// A held permit; releases its slot on drop.
#[derive(Debug)]
pub struct Permit {
    shared: Arc<Shared>,
}

impl Semaphore {
    /// Creates a semaphore with `capacity` permits.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: capacity.get(),
                available: Mutex::new(capacity.get()),
                freed: Notify::new(),
            }),
        }
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Acquires a permit, waiting until one frees.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Cancelled`] if `ctx` fires first; no permit
    /// is consumed in that case.
    pub async fn acquire(&self, ctx: &CancellationToken) -> Result<Permit, AcquireError> {
        loop {
            // Register for wakeups before checking, so a release between
            // the check and the await is not lost.
            let freed = self.shared.freed.notified();
            {
                let mut available = self.shared.available.lock();
                if *available > 0 {
                    *available -= 1;
                    return Ok(Permit { shared: Arc::clone(&self.shared) });
                }
            }
            tokio::select! {
                _ = freed => {},
                _ = ctx.cancelled() => {
                    // a release may have routed its wakeup to us already;
                    // pass it on so no other waiter starves
                    self.shared.freed.notify_one();
                    return Err(AcquireError::Cancelled);
                },
            }
        }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut available = self.shared.available.lock();
        *available += 1;
        debug_assert!(*available <= self.shared.capacity, "permit over-release");
        drop(available);
        self.shared.freed.notify_one();
    }
}
