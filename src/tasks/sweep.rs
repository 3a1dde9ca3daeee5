//! Expiry Sweep Task
//!
//! Background task that periodically purges expired records from both
//! storage backends.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::storage::SharedStorage;

/// Spawns a background task running an unconditional expiry sweep every
/// `interval`.
///
/// Writes also trigger a rate-limited sweep, so this task only matters for
/// namespaces that stay idle. The returned handle is aborted on shutdown.
///
/// # Example
/// ```ignore
/// let storage = StorageEngine::in_memory(StorageConfig::default()).into_shared();
/// let sweep_handle = spawn_sweep_task(storage.clone(), Duration::from_secs(300));
/// // Later, during shutdown:
/// sweep_handle.abort();
/// ```
pub fn spawn_sweep_task(storage: SharedStorage, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            "Starting expiry sweep task"
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = {
                let mut engine = storage.write().await;
                engine.sweep_expired()
            };

            if removed > 0 {
                info!(removed, "Expiry sweep removed expired records");
            } else {
                debug!("Expiry sweep: no expired records found");
            }
        }
    })
}
