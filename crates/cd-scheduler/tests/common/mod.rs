//! Shared fixtures for scheduler integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cd_common::{Campaign, CampaignStatus, MessageKind};
use cd_scheduler::sqlite::SqliteDispatchStore;
use cd_scheduler::{DeliveryGateway, DeliveryResult, DispatchStore, GatewayRequest, LoopTiming, SchedulerConfig};
use parking_lot::Mutex;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;

pub async fn create_store() -> Arc<SqliteDispatchStore> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteDispatchStore::new(pool);
    store.init_schema().await.unwrap();
    Arc::new(store)
}

/// File-backed store shared by several pool connections. Keep the `TempDir`
/// alive for as long as the store is used.
pub async fn create_file_store(max_connections: u32) -> (Arc<SqliteDispatchStore>, TempDir) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let dir = tempfile::tempdir().unwrap();
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("dispatch.db"))
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .unwrap();
    let store = SqliteDispatchStore::new(pool);
    store.init_schema().await.unwrap();
    (Arc::new(store), dir)
}

pub fn campaign(id: &str, delay_ms: u64, contact_delay_ms: u64) -> Campaign {
    Campaign {
        id: id.to_string(),
        delay_ms,
        contact_delay_ms,
        status: CampaignStatus::Active,
    }
}

pub fn fast_timing() -> LoopTiming {
    LoopTiming {
        paused_poll: Duration::from_millis(20),
        error_backoff: Duration::from_millis(20),
    }
}

pub fn test_config(max_concurrent_campaigns: usize) -> SchedulerConfig {
    SchedulerConfig {
        tick_interval: Duration::from_millis(50),
        max_concurrent_campaigns,
        claim_timeout: Duration::from_secs(5),
        paused_poll: Duration::from_millis(20),
        error_backoff: Duration::from_millis(20),
        ..Default::default()
    }
}

/// Gateway recording every call, optionally rejecting some kinds
#[derive(Default)]
pub struct MockGateway {
    calls: Mutex<Vec<(String, GatewayRequest)>>,
    rejections: Mutex<Vec<(MessageKind, String)>>,
    delay: Mutex<Option<Duration>>,
}

impl MockGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject(&self, kind: MessageKind, error: &str) {
        self.rejections.lock().push((kind, error.to_string()));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn calls(&self) -> Vec<(String, GatewayRequest)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl DeliveryGateway for MockGateway {
    async fn send(&self, session_name: &str, request: &GatewayRequest) -> DeliveryResult {
        self.calls.lock().push((session_name.to_string(), request.clone()));

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let rejection = self
            .rejections
            .lock()
            .iter()
            .find(|(kind, _)| *kind == request.kind())
            .map(|(_, error)| error.clone());

        match rejection {
            Some(error) => DeliveryResult::Rejected { error },
            None => DeliveryResult::Delivered,
        }
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Backdate a dispatch's `updated_at`
pub async fn backdate(store: &SqliteDispatchStore, dispatch_id: &str, age: Duration) {
    let at = chrono::Utc::now() - chrono::Duration::from_std(age).unwrap();
    sqlx::query("UPDATE dispatches SET updated_at = ? WHERE id = ?")
        .bind(at.timestamp_millis())
        .bind(dispatch_id)
        .execute(store.pool())
        .await
        .unwrap();
}
