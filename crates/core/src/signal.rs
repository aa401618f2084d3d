//! Process-wide shutdown signal.
//!
//! The orchestrator owns the single [`ShutdownSignal`]; subsystems only ever get a
//! [`ShutdownObserver`], which can wait for and query the closed state but cannot close it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    closed: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self { Self::default() }

    /// Close the signal. Returns `true` only for the call that performed the transition.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_closed(&self) -> bool { self.token.is_cancelled() }

    pub fn observer(&self) -> ShutdownObserver {
        ShutdownObserver { token: self.token.clone() }
    }
}

/// Read-only view of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownObserver {
    token: CancellationToken,
}

impl ShutdownObserver {
    pub fn is_closed(&self) -> bool { self.token.is_cancelled() }

    /// Resolves once the signal is closed.
    pub async fn closed(&self) { self.token.cancelled().await }

    /// Owned variant of [`closed`](Self::closed) for handing to spawned tasks.
    pub fn closed_owned(&self) -> impl Future<Output = ()> + Send + 'static {
        self.token.clone().cancelled_owned()
    }
}
