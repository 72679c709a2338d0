//! Claim engine - atomically selects and locks the next contact batch of a
//! campaign.
//!
//! One transaction:
//! 1. read the oldest ready pending dispatch, ordered by
//!    `(contact, message_order, created_at)`
//! 2. conditionally move that contact's whole ready group to `processing`
//! 3. load the contact profile and commit
//!
//! The conditional update in step 2 is the exclusivity point: a racing
//! claimant updates zero rows and gets `None`, which is not an error.

use std::sync::Arc;
use std::time::Duration;

use cd_common::Claim;
use chrono::Utc;
use tracing::{debug, trace};

use crate::store::DispatchStore;
use crate::{Result, SchedulerError};

#[derive(Clone)]
pub struct ClaimEngine {
    store: Arc<dyn DispatchStore>,
    timeout: Duration,
}

impl ClaimEngine {
    pub fn new(store: Arc<dyn DispatchStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Claim the next ready batch of `campaign_id`.
    ///
    /// `Ok(None)` means no ready work or a lost race. Store failures and
    /// timeouts propagate; the transaction is rolled back in both cases.
    pub async fn claim(&self, campaign_id: &str) -> Result<Option<Claim>> {
        match tokio::time::timeout(self.timeout, self.claim_in_transaction(campaign_id)).await {
            Ok(result) => result,
            Err(_) => {
                metrics::counter!("dispatch.claim_timeouts_total").increment(1);
                Err(SchedulerError::ClaimTimeout(self.timeout))
            }
        }
    }

    async fn claim_in_transaction(&self, campaign_id: &str) -> Result<Option<Claim>> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let Some(head) = tx.find_next_ready(campaign_id, now).await? else {
            tx.rollback().await?;
            trace!(campaign_id = %campaign_id, "No ready dispatches");
            return Ok(None);
        };

        let mut batch = tx
            .claim_group(campaign_id, &head.contact, &head.session_name, now)
            .await?;

        if batch.is_empty() {
            tx.rollback().await?;
            debug!(campaign_id = %campaign_id, contact = %head.contact, "Lost claim race");
            metrics::counter!("dispatch.claims_lost_total").increment(1);
            return Ok(None);
        }

        batch.sort_by(|a, b| {
            a.message_order
                .cmp(&b.message_order)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });

        let contact_profile = tx.find_contact_profile(&head.contact).await?;
        tx.commit().await?;

        metrics::counter!("dispatch.claims_total").increment(1);
        debug!(
            campaign_id = %campaign_id,
            contact = %head.contact,
            session = %head.session_name,
            count = batch.len(),
            "Claimed contact batch"
        );

        Ok(Some(Claim {
            campaign_id: campaign_id.to_string(),
            contact: head.contact,
            session_name: head.session_name,
            contact_profile,
            batch,
        }))
    }
}
