//! Replication between the remote reader service and the local database.
//!
//! [`SyncEngine`] runs one cycle at a time: subscription list, then item
//! listings for every dirty subscription, one subscription after another.
//! [`SyncScheduler`] drives the engine on demand or from a recurring timer
//! and reports progress as [`SyncEvent`]s.

mod engine;
mod error;
#[cfg(test)]
mod fake;
mod pins;
mod scheduler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use engine::{Credentials, SyncEngine, SyncOptions, SyncReport};
pub use error::{ErrorKind, SyncError};
pub use pins::DrainReport;
pub use scheduler::{SyncEvent, SyncScheduler};

/// Shared cancellation signal for a running sync cycle.
///
/// Checked between subscriptions and during the settle window; a
/// subscription already in progress always finishes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `false` if the flag was raised.
    pub(crate) async fn sleep(&self, duration: Duration) -> bool {
        const TICK: Duration = Duration::from_millis(50);
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_cancelled() {
                return false;
            }
            let step = remaining.min(TICK);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
        !self.is_cancelled()
    }
}
