//! Per-campaign processing loop.
//!
//! ```text
//! loading-config ─▶ claiming ─▶ sending ─▶ pacing ─┐
//!   ▲   │  │            │                          │
//!   │   │  │            └─▶ terminated (no work)   │
//!   │   │  └─▶ terminated (campaign missing)       │
//!   │   └─▶ paused-wait ─┐                         │
//!   └────────────────────┴─────────────────────────┘
//! ```
//!
//! Errors at any step are logged and followed by a fixed backoff; the loop
//! only ends when the campaign disappears or has no ready work.

use std::sync::Arc;
use std::time::Duration;

use cd_common::Claim;
use tracing::{debug, error, info};

use crate::claim::ClaimEngine;
use crate::dispatcher::MessageDispatcher;
use crate::store::DispatchStore;
use crate::Result;

/// Fixed sleeps used by the loop outside of campaign pacing
#[derive(Debug, Clone, Copy)]
pub struct LoopTiming {
    pub paused_poll: Duration,
    pub error_backoff: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            paused_poll: Duration::from_secs(10),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Why a loop terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    CampaignMissing,
    NoReadyWork,
}

enum Step {
    Continue,
    Exit(LoopExit),
}

pub struct CampaignLoop {
    campaign_id: String,
    store: Arc<dyn DispatchStore>,
    claims: ClaimEngine,
    dispatcher: MessageDispatcher,
    timing: LoopTiming,
}

impl CampaignLoop {
    pub fn new(
        campaign_id: impl Into<String>,
        store: Arc<dyn DispatchStore>,
        claims: ClaimEngine,
        dispatcher: MessageDispatcher,
        timing: LoopTiming,
    ) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            store,
            claims,
            dispatcher,
            timing,
        }
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    /// Run until the campaign is gone or has no ready work
    pub async fn run(self) -> LoopExit {
        debug!("Campaign loop started");

        loop {
            match self.step().await {
                Ok(Step::Continue) => {}
                Ok(Step::Exit(exit)) => {
                    info!(exit = ?exit, "Campaign loop finished");
                    return exit;
                }
                Err(e) => {
                    error!(error = %e, transient = e.is_transient(), "Campaign loop iteration failed");
                    metrics::counter!("dispatch.loops.errors_total").increment(1);
                    tokio::time::sleep(self.timing.error_backoff).await;
                }
            }
        }
    }

    async fn step(&self) -> Result<Step> {
        let Some(campaign) = self.store.find_campaign(&self.campaign_id).await? else {
            return Ok(Step::Exit(LoopExit::CampaignMissing));
        };

        if !campaign.status.is_active() {
            debug!(status = %campaign.status, "Campaign not active, waiting");
            tokio::time::sleep(self.timing.paused_poll).await;
            return Ok(Step::Continue);
        }

        let Some(claim) = self.claims.claim(&self.campaign_id).await? else {
            return Ok(Step::Exit(LoopExit::NoReadyWork));
        };

        self.send_batch(&claim, campaign.message_delay()).await?;

        if !campaign.contact_delay().is_zero() {
            tokio::time::sleep(campaign.contact_delay()).await;
        }

        Ok(Step::Continue)
    }

    /// Send the batch in order, one message at a time
    async fn send_batch(&self, claim: &Claim, message_delay: Duration) -> Result<()> {
        let mut sent = 0usize;

        for (index, dispatch) in claim.batch.iter().enumerate() {
            if index > 0 && !message_delay.is_zero() {
                tokio::time::sleep(message_delay).await;
            }

            let outcome = self
                .dispatcher
                .send(dispatch, &claim.contact, claim.contact_profile.as_ref(), &claim.session_name)
                .await?;
            if outcome.is_sent() {
                sent += 1;
            }
        }

        debug!(
            contact = %claim.contact,
            sent = sent,
            failed = claim.batch.len() - sent,
            "Contact batch processed"
        );
        Ok(())
    }
}
