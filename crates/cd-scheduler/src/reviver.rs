//! Stuck dispatch revival - finds dispatches left in `processing` past the
//! TTL and resets them to `pending`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::store::DispatchStore;
use crate::Result;

#[derive(Clone)]
pub struct Reviver {
    store: Arc<dyn DispatchStore>,
    ttl: Duration,
}

impl Reviver {
    pub fn new(store: Arc<dyn DispatchStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Revive stuck dispatches; failures are logged and reported as zero so
    /// the next tick retries.
    pub async fn revive(&self) -> u64 {
        match self.try_revive().await {
            Ok(count) => count,
            Err(e) => {
                error!(error = %e, "Failed to revive stuck dispatches");
                metrics::counter!("dispatch.revive_errors_total").increment(1);
                0
            }
        }
    }

    /// Revive stuck dispatches, propagating store errors
    pub async fn try_revive(&self) -> Result<u64> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::minutes(30));
        let cutoff = now - ttl;

        let count = self.store.revive_stuck(cutoff, now).await?;

        metrics::counter!("dispatch.revived_total").increment(count);

        if count > 0 {
            info!(count = count, ttl_ms = self.ttl.as_millis() as u64, "Revived stuck processing dispatches");
        } else {
            debug!("No stuck dispatches to revive");
        }

        Ok(count)
    }
}
