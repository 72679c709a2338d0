//! Orchestrator - periodic tick that revives stuck work, discovers campaigns
//! with ready dispatches and launches one detached loop per campaign under
//! the global concurrency ceiling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::campaign_loop::CampaignLoop;
use crate::claim::ClaimEngine;
use crate::dispatcher::MessageDispatcher;
use crate::gateway::DeliveryGateway;
use crate::registry::{AcquireOutcome, CampaignRegistry};
use crate::reviver::Reviver;
use crate::store::DispatchStore;
use crate::{Result, SchedulerConfig};

/// What one tick did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub revived: u64,
    pub discovered: usize,
    pub launched: usize,
    /// Candidates left for a later tick because the ceiling was reached
    pub deferred: usize,
    pub already_running: usize,
}

pub struct Orchestrator {
    config: SchedulerConfig,
    store: Arc<dyn DispatchStore>,
    reviver: Reviver,
    claims: ClaimEngine,
    dispatcher: MessageDispatcher,
    registry: Arc<CampaignRegistry>,
    running: Arc<RwLock<bool>>,
    /// Bumped by every start; a ticker from an older start exits on its next wake-up
    generation: AtomicU64,
    ticks: AtomicU64,
}

impl Orchestrator {
    pub fn new(config: SchedulerConfig, store: Arc<dyn DispatchStore>, gateway: Arc<dyn DeliveryGateway>) -> Self {
        let reviver = Reviver::new(store.clone(), config.stuck_ttl);
        let claims = ClaimEngine::new(store.clone(), config.claim_timeout);
        let dispatcher = MessageDispatcher::new(store.clone(), gateway);
        let registry = Arc::new(CampaignRegistry::new(config.max_concurrent_campaigns));

        Self {
            config,
            store,
            reviver,
            claims,
            dispatcher,
            registry,
            running: Arc::new(RwLock::new(false)),
            generation: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
        }
    }

    /// Start ticking on a background task
    pub async fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            info!("Campaign orchestrator is disabled");
            return;
        }

        let mut running = self.running.write().await;
        if *running {
            warn!("Orchestrator already running");
            return;
        }
        *running = true;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        drop(running);

        info!(
            tick_interval_ms = self.config.tick_interval.as_millis() as u64,
            max_concurrent_campaigns = self.config.max_concurrent_campaigns,
            stuck_ttl_ms = self.config.stuck_ttl.as_millis() as u64,
            "Starting campaign orchestrator"
        );

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(orchestrator.config.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !*orchestrator.running.read().await
                    || orchestrator.generation.load(Ordering::SeqCst) != generation
                {
                    break;
                }
                orchestrator.ticks.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = orchestrator.tick().await {
                    error!(error = %e, "Orchestrator tick failed");
                }
            }
        });
    }

    /// Stop ticking. Loops already launched run to completion.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        info!(running_campaigns = self.registry.len(), "Campaign orchestrator stopped");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Ready to serve: ticking, or intentionally disabled
    pub async fn is_ready(&self) -> bool {
        !self.config.enabled || self.is_running().await
    }

    /// Ticks run by the background ticker since construction
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn registry(&self) -> &Arc<CampaignRegistry> {
        &self.registry
    }

    pub fn running_campaigns(&self) -> Vec<String> {
        self.registry.running_ids()
    }

    /// One revive / discover / launch pass
    pub async fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport {
            revived: self.reviver.revive().await,
            ..Default::default()
        };

        let candidates = self.store.ready_campaign_ids(Utc::now()).await?;
        report.discovered = candidates.len();

        for (index, campaign_id) in candidates.iter().enumerate() {
            match self.registry.try_acquire(campaign_id) {
                AcquireOutcome::Acquired(lease) => {
                    let campaign_loop = CampaignLoop::new(
                        campaign_id.clone(),
                        self.store.clone(),
                        self.claims.clone(),
                        self.dispatcher.clone(),
                        self.config.loop_timing(),
                    );
                    let span = info_span!("campaign_loop", campaign_id = %campaign_id);

                    tokio::spawn(
                        async move {
                            let _lease = lease;
                            campaign_loop.run().await
                        }
                        .instrument(span),
                    );

                    metrics::counter!("dispatch.loops.started_total").increment(1);
                    report.launched += 1;
                }
                AcquireOutcome::AlreadyRunning => report.already_running += 1,
                AcquireOutcome::AtCapacity => {
                    report.deferred = candidates[index..]
                        .iter()
                        .filter(|id| !self.registry.contains(id))
                        .count();
                    break;
                }
            }
        }

        metrics::gauge!("dispatch.campaigns.deferred").set(report.deferred as f64);

        if report.launched > 0 || report.deferred > 0 {
            info!(
                revived = report.revived,
                discovered = report.discovered,
                launched = report.launched,
                deferred = report.deferred,
                already_running = report.already_running,
                "Orchestrator tick"
            );
        } else {
            debug!(discovered = report.discovered, already_running = report.already_running, "Orchestrator tick");
        }

        Ok(report)
    }
}
