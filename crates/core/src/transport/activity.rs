//! Inactivity detection for running commands
//!
//! Both the output reader and the stdin forwarder record activity; a watchdog
//! races the session and fires once no activity was seen for the configured
//! timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Shared last-activity timestamp
///
/// Timestamps are milliseconds since the monitor was created, on the tokio
/// clock so paused-time tests drive it.
#[derive(Debug, Clone)]
pub struct ActivityMonitor {
    started: Instant,
    last_activity_ms: Arc<AtomicU64>,
}

impl ActivityMonitor {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_activity_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record activity (reset the idle timer)
    pub fn record_activity(&self) {
        self.last_activity_ms.store(self.elapsed_ms(), Ordering::Relaxed);
    }

    /// Time since the last recorded activity
    pub fn idle(&self) -> Duration {
        let last = self.last_activity_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.elapsed_ms().saturating_sub(last))
    }

    /// Resolve once the monitor has been idle for `limit`
    pub async fn idle_for(&self, limit: Duration) {
        loop {
            let idle = self.idle();
            if idle >= limit {
                tracing::debug!("No activity for {}ms", idle.as_millis());
                return;
            }
            tokio::time::sleep(limit - idle).await;
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}
