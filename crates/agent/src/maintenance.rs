//! Background housekeeping: idle sessions, expired cache entries and the
//! cache snapshot.

use crate::coordinator::Coordinator;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default pause between maintenance passes.
pub const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Run [`Coordinator::run_maintenance`] every `interval` until aborted.
pub fn spawn_maintenance(coordinator: Arc<Coordinator>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing can be stale yet.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = coordinator.run_maintenance().await;
            debug!(
                sessions_evicted = report.sessions_evicted,
                cache_expired = report.cache_expired,
                "Maintenance tick"
            );
            if let Err(e) = coordinator.save_cache_snapshot() {
                warn!(error = %e, "Failed to save cache snapshot");
            }
        }
    })
}
