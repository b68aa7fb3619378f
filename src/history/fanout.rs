//! Write-behind of freshly computed results
//!
//! Every meaningful result goes to the [`ResultCache`] and to the
//! [`ResultStore`] as two independent background tasks. Contract:
//!
//! - no acknowledgement: the caller's response never waits on either write;
//! - no cancellation: a failed or slow write never affects the other one,
//!   and neither is cancelled when the triggering request ends;
//! - no backpressure or retry: failures are logged and dropped.
//!
//! Tasks are tracked so graceful shutdown can drain them.

use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::cache::ResultCache;
use super::store::ResultStore;
use crate::model::PredictionRecord;

/// Fire-and-forget fan-out to the result cache and durable store
#[derive(Clone)]
pub struct PersistenceFanout {
    cache: Arc<ResultCache>,
    store: Arc<dyn ResultStore>,
    tracker: TaskTracker,
}

impl PersistenceFanout {
    /// Create a fan-out writing to `cache` and `store`.
    #[must_use]
    pub fn new(cache: Arc<ResultCache>, store: Arc<dyn ResultStore>) -> Self {
        Self {
            cache,
            store,
            tracker: TaskTracker::new(),
        }
    }

    /// Schedule both writes for `record` and return immediately.
    ///
    /// Zero outcomes are dropped here without spawning anything. Must be
    /// called from within a tokio runtime.
    pub fn record_result(&self, owner: Uuid, record: PredictionRecord) {
        if !record.is_meaningful() {
            trace!(%owner, "Not recording zero outcome");
            return;
        }
        if self.tracker.is_closed() {
            warn!(%owner, id = %record.id, "Fan-out is shut down, result not recorded");
            return;
        }

        let store = Arc::clone(&self.store);
        let durable = record.clone();
        self.tracker.spawn(async move {
            if let Err(e) = store.insert_result(&durable).await {
                warn!(%owner, id = %durable.id, error = %e, "Durable write failed");
            } else {
                trace!(%owner, id = %durable.id, "Durable write done");
            }
        });

        let cache = Arc::clone(&self.cache);
        self.tracker.spawn(async move {
            cache.save(owner, record);
        });
    }

    /// Writes still in flight
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting writes and wait for the in-flight ones to finish.
    pub async fn shutdown(&self) {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            debug!(pending, "Draining result writes");
        }
        self.tracker.wait().await;
    }
}
