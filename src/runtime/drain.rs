//! Connection accounting and the graceful drain used by the process-based host.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::time::{sleep, Instant};

/// How long to wait for open connections, and how often to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    pub grace: Duration,
    pub poll_interval: Duration,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(10_000),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Counts open connections. Each connection holds a [`ConnectionGuard`] for its lifetime.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    open: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    pub fn track(&self) -> ConnectionGuard {
        self.open.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            open: Arc::clone(&self.open),
        }
    }

    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ConnectionGuard {
    open: Arc<AtomicUsize>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every connection closed within the grace window.
    Drained,
    /// The grace window expired; `remaining` connections were force-closed.
    ForcedClose { remaining: usize },
}

/// Poll `tracker` until it reaches zero or `policy.grace` expires, then call `force_close` if
/// anything is still open.
pub async fn drain(
    tracker: &ConnectionTracker,
    policy: DrainPolicy,
    force_close: impl FnOnce(),
) -> DrainOutcome {
    let deadline = Instant::now() + policy.grace;

    while tracker.open() > 0 && Instant::now() < deadline {
        sleep(policy.poll_interval).await;
    }

    match tracker.open() {
        0 => DrainOutcome::Drained,
        remaining => {
            force_close();
            DrainOutcome::ForcedClose { remaining }
        }
    }
}
