//! Periodic deletion of expired terminal jobs.
//!
//! Runs on a fixed interval using `tokio::time::interval`, independent
//! of request traffic. Sweep errors are logged per job inside the store
//! and never terminate the loop.

use std::sync::Arc;
use std::time::Duration;

use meshport_store::JobStore;
use tokio_util::sync::CancellationToken;

/// How often the retention sweep runs. The first sweep fires
/// immediately, which doubles as the startup cleanup pass.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Run the retention sweep loop until `cancel` is triggered.
pub async fn run(store: Arc<JobStore>, retention: chrono::Duration, cancel: CancellationToken) {
    tracing::info!(
        retention_days = retention.num_days(),
        interval_secs = SWEEP_INTERVAL.as_secs(),
        "Retention sweeper started",
    );

    let mut interval = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Retention sweeper stopping");
                break;
            }
            _ = interval.tick() => {
                let removed = store.delete_expired(retention);
                if removed > 0 {
                    tracing::info!(removed, "Retention sweep: purged expired jobs");
                } else {
                    tracing::debug!("Retention sweep: nothing to purge");
                }
            }
        }
    }
}
