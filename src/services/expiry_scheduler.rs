//! Background task that sweeps expired objects on a fixed interval.

use crate::services::storage_service::StorageService;
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Default period between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to a running sweeper.
pub struct ExpiryScheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ExpiryScheduler {
    /// Spawn a sweeper that first fires one `interval` from now.
    pub fn spawn(storage: StorageService, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(storage, interval, cancel.clone()));
        Self { cancel, handle }
    }

    /// Stop the sweeper and wait for it to exit. A sweep already running is
    /// allowed to reach its transaction boundary first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.handle.await {
            error!(error = %err, "expiry scheduler task failed");
        }
    }
}

async fn run(storage: StorageService, interval: Duration, cancel: CancellationToken) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("expiry scheduler shutting down");
                break;
            }
            _ = ticker.tick() => {
                // Not raced against `cancel`: a sweep runs to completion.
                match storage.sweep().await {
                    Ok(0) => debug!("sweep found nothing to remove"),
                    Ok(_) => {}
                    Err(err) => error!(error = %err, "sweep failed; retrying next interval"),
                }
            }
        }
    }
}
