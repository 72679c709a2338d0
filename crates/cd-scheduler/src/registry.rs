//! Running-campaign registry.
//!
//! Tracks which campaigns currently have a loop, so at most one loop runs per
//! campaign in this process and the global concurrency ceiling holds. Slots
//! are held by a [`CampaignLease`] and released when it drops.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

pub struct CampaignRegistry {
    running: Mutex<HashSet<String>>,
    /// 0 = unlimited
    max_concurrent: usize,
}

/// Result of asking for a campaign slot
#[derive(Debug)]
pub enum AcquireOutcome {
    Acquired(CampaignLease),
    AlreadyRunning,
    AtCapacity,
}

impl CampaignRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            running: Mutex::new(HashSet::new()),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Reserve a slot for `campaign_id`. Membership check, capacity check and
    /// insert happen under one lock.
    pub fn try_acquire(self: &Arc<Self>, campaign_id: &str) -> AcquireOutcome {
        let mut running = self.running.lock();

        if running.contains(campaign_id) {
            return AcquireOutcome::AlreadyRunning;
        }
        if self.max_concurrent > 0 && running.len() >= self.max_concurrent {
            return AcquireOutcome::AtCapacity;
        }

        running.insert(campaign_id.to_string());
        metrics::gauge!("dispatch.campaigns.running").set(running.len() as f64);

        AcquireOutcome::Acquired(CampaignLease {
            campaign_id: campaign_id.to_string(),
            registry: Arc::clone(self),
        })
    }

    /// Free a slot. Returns false if the campaign was not registered.
    pub fn release(&self, campaign_id: &str) -> bool {
        let mut running = self.running.lock();
        let removed = running.remove(campaign_id);
        metrics::gauge!("dispatch.campaigns.running").set(running.len() as f64);
        removed
    }

    pub fn contains(&self, campaign_id: &str) -> bool {
        self.running.lock().contains(campaign_id)
    }

    pub fn len(&self) -> usize {
        self.running.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.lock().is_empty()
    }

    /// Sorted snapshot of running campaign ids
    pub fn running_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.running.lock().iter().cloned().collect();
        ids.sort();
        ids
    }
}

/// Exclusive slot for one campaign loop
#[derive(Debug)]
pub struct CampaignLease {
    campaign_id: String,
    registry: Arc<CampaignRegistry>,
}

impl CampaignLease {
    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }
}

impl Drop for CampaignLease {
    fn drop(&mut self) {
        self.registry.release(&self.campaign_id);
    }
}

impl std::fmt::Debug for CampaignRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignRegistry")
            .field("running", &self.running_ids())
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_campaign_only_once() {
        let registry = Arc::new(CampaignRegistry::new(0));

        let lease = match registry.try_acquire("c1") {
            AcquireOutcome::Acquired(lease) => lease,
            other => panic!("expected lease, got {:?}", other),
        };
        assert!(matches!(registry.try_acquire("c1"), AcquireOutcome::AlreadyRunning));
        assert_eq!(lease.campaign_id(), "c1");
        assert!(registry.contains("c1"));
    }

    #[test]
    fn test_capacity_ceiling() {
        let registry = Arc::new(CampaignRegistry::new(1));

        let _lease = registry.try_acquire("c1");
        assert!(matches!(registry.try_acquire("c2"), AcquireOutcome::AtCapacity));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_zero_means_unlimited() {
        let registry = Arc::new(CampaignRegistry::new(0));

        let leases: Vec<AcquireOutcome> = (0..50).map(|i| registry.try_acquire(&format!("c{}", i))).collect();

        assert!(leases.iter().all(|o| matches!(o, AcquireOutcome::Acquired(_))));
        assert_eq!(registry.len(), 50);
    }

    #[test]
    fn test_lease_drop_releases_slot() {
        let registry = Arc::new(CampaignRegistry::new(1));

        {
            let _lease = registry.try_acquire("c1");
            assert!(registry.contains("c1"));
        }

        assert!(registry.is_empty());
        assert!(matches!(registry.try_acquire("c2"), AcquireOutcome::Acquired(_)));
    }

    #[test]
    fn test_lease_released_when_task_panics() {
        let registry = Arc::new(CampaignRegistry::new(0));
        let lease = registry.try_acquire("c1");

        let result = std::thread::spawn(move || {
            let _lease = lease;
            panic!("loop blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(!registry.contains("c1"));
    }

    #[test]
    fn test_running_ids_sorted() {
        let registry = Arc::new(CampaignRegistry::new(0));
        let _b = registry.try_acquire("b");
        let _a = registry.try_acquire("a");

        assert_eq!(registry.running_ids(), vec!["a".to_string(), "b".to_string()]);
        assert!(!registry.release("missing"));
    }
}
