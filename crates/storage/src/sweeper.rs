//! Background expiry sweep

use crate::engine::MemStore;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Start purging expired keys from `store` every `interval`.
///
/// The task holds only a weak reference and ends once the store is dropped
/// or closed.
pub(crate) fn start_sweeper(store: &Arc<MemStore>, interval: Duration) -> JoinHandle<()> {
    let store: Weak<MemStore> = Arc::downgrade(store);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Some(store) = store.upgrade() else {
                break;
            };
            match store.purge_expired() {
                Ok(_) => {}
                Err(e) if e.is_closed() => break,
                Err(e) => tracing::warn!("Expiry sweep error: {}", e),
            }
        }
        tracing::debug!("Expiry sweeper stopped");
    })
}
