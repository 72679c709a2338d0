//! Campaign Dispatch Scheduler
//!
//! This crate provides the campaign dispatch machinery:
//! - DispatchStore: typed access to dispatch/campaign/contact rows (SQLite, PostgreSQL)
//! - Reviver: resets dispatches stuck in `processing` past a TTL
//! - ClaimEngine: atomically claims one contact's ready batch for a campaign
//! - MessageDispatcher: renders and delivers one message, records its outcome
//! - CampaignLoop: per-campaign claim / send / pace loop
//! - Orchestrator: periodic discovery that launches loops under a concurrency ceiling

use std::time::Duration;

use thiserror::Error;

pub mod campaign_loop;
pub mod claim;
pub mod dispatcher;
pub mod gateway;
pub mod orchestrator;
pub mod registry;
pub mod reviver;
pub mod store;
pub mod template;

#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use campaign_loop::{CampaignLoop, LoopExit, LoopTiming};
pub use claim::ClaimEngine;
pub use dispatcher::{DispatchOutcome, MessageDispatcher};
pub use gateway::{DeliveryGateway, DeliveryResult, GatewayRequest, HttpGateway, HttpGatewayConfig};
pub use orchestrator::{Orchestrator, TickReport};
pub use registry::{AcquireOutcome, CampaignLease, CampaignRegistry};
pub use reviver::Reviver;
pub use store::{DispatchStore, DispatchTransaction, NewDispatch};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Claim transaction exceeded {0:?}")]
    ClaimTimeout(Duration),
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Gateway error: {0}")]
    Gateway(String),
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SchedulerError {
    /// Store connectivity or timeout failure, retried at the next opportunity
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedulerError::Database(_) | SchedulerError::ClaimTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub tick_interval: Duration,
    /// 0 = unlimited
    pub max_concurrent_campaigns: usize,
    pub stuck_ttl: Duration,
    pub claim_timeout: Duration,
    pub paused_poll: Duration,
    pub error_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval: Duration::from_secs(3),
            max_concurrent_campaigns: 0,
            stuck_ttl: Duration::from_secs(30 * 60),
            claim_timeout: Duration::from_secs(15),
            paused_poll: Duration::from_secs(10),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl From<&cd_config::SchedulerConfig> for SchedulerConfig {
    fn from(config: &cd_config::SchedulerConfig) -> Self {
        Self {
            enabled: config.enabled,
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            max_concurrent_campaigns: config.max_concurrent_campaigns,
            stuck_ttl: Duration::from_millis(config.stuck_ttl_ms),
            claim_timeout: Duration::from_millis(config.claim_timeout_ms),
            paused_poll: Duration::from_millis(config.paused_poll_ms),
            error_backoff: Duration::from_millis(config.error_backoff_ms),
        }
    }
}

impl SchedulerConfig {
    pub fn loop_timing(&self) -> LoopTiming {
        LoopTiming {
            paused_poll: self.paused_poll,
            error_backoff: self.error_backoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_app_config() {
        let app = cd_config::SchedulerConfig {
            max_concurrent_campaigns: 2,
            stuck_ttl_ms: 60_000,
            ..Default::default()
        };
        let config = SchedulerConfig::from(&app);

        assert_eq!(config.max_concurrent_campaigns, 2);
        assert_eq!(config.stuck_ttl, Duration::from_secs(60));
        assert_eq!(config.tick_interval, Duration::from_secs(3));
        assert_eq!(config.claim_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_transient_errors() {
        assert!(SchedulerError::ClaimTimeout(Duration::from_secs(15)).is_transient());
        assert!(!SchedulerError::Gateway("down".to_string()).is_transient());
    }
}
