//! SQLite Dispatch Store Implementation
//!
//! Claims rely on `UPDATE ... RETURNING` (SQLite 3.35+), which the bundled
//! libsqlite3 shipped with sqlx provides.

use async_trait::async_trait;
use cd_common::{Campaign, CampaignStatus, ContactProfile, Dispatch, DispatchStatus, StatusCounts};
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use crate::store::{
    records_to_dispatches, status_counts, to_millis, CampaignRecord, ContactRecord, DispatchRecord,
    DispatchStore, DispatchTransaction, NewDispatch, DISPATCH_COLUMNS,
};
use crate::Result;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS campaigns (
        id TEXT PRIMARY KEY,
        delay_ms INTEGER NOT NULL DEFAULT 0,
        contact_delay_ms INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'active',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dispatches (
        id TEXT PRIMARY KEY,
        campaign_id TEXT NOT NULL,
        session_name TEXT NOT NULL,
        contact TEXT NOT NULL,
        message_order INTEGER NOT NULL DEFAULT 0,
        message TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        scheduled_at INTEGER,
        error TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dispatches_ready ON dispatches (campaign_id, status, scheduled_at)",
    "CREATE INDEX IF NOT EXISTS idx_dispatches_group ON dispatches (campaign_id, contact, session_name, status)",
    "CREATE INDEX IF NOT EXISTS idx_dispatches_stuck ON dispatches (status, updated_at)",
    r#"
    CREATE TABLE IF NOT EXISTS contacts (
        phone TEXT PRIMARY KEY,
        name TEXT,
        email TEXT,
        company TEXT
    )
    "#,
];

/// SQLite implementation of DispatchStore
#[derive(Clone)]
pub struct SqliteDispatchStore {
    pool: SqlitePool,
}

impl SqliteDispatchStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // Seeding (campaign creation is owned by an external service; these
    // helpers back local development and tests)
    // ========================================================================

    pub async fn upsert_campaign(&self, campaign: &Campaign) -> Result<()> {
        let now = to_millis(Utc::now());
        sqlx::query(
            "INSERT INTO campaigns (id, delay_ms, contact_delay_ms, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET delay_ms = excluded.delay_ms, \
             contact_delay_ms = excluded.contact_delay_ms, status = excluded.status, updated_at = excluded.updated_at",
        )
        .bind(&campaign.id)
        .bind(campaign.delay_ms as i64)
        .bind(campaign.contact_delay_ms as i64)
        .bind(campaign.status.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_campaign_status(&self, campaign_id: &str, status: CampaignStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE campaigns SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(to_millis(Utc::now()))
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_campaign(&self, campaign_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = ?")
            .bind(campaign_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert a pending dispatch, returning its generated id
    pub async fn insert_dispatch(&self, dispatch: &NewDispatch) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = to_millis(Utc::now());
        sqlx::query(
            "INSERT INTO dispatches (id, campaign_id, session_name, contact, message_order, message, status, scheduled_at, error, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(&id)
        .bind(&dispatch.campaign_id)
        .bind(&dispatch.session_name)
        .bind(&dispatch.contact)
        .bind(dispatch.message_order)
        .bind(dispatch.message.to_stored())
        .bind(DispatchStatus::Pending.as_str())
        .bind(dispatch.scheduled_at.map(to_millis))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    pub async fn upsert_contact(&self, profile: &ContactProfile) -> Result<()> {
        sqlx::query(
            "INSERT INTO contacts (phone, name, email, company) VALUES (?, ?, ?, ?) \
             ON CONFLICT(phone) DO UPDATE SET name = excluded.name, email = excluded.email, company = excluded.company",
        )
        .bind(&profile.phone)
        .bind(&profile.name)
        .bind(&profile.email)
        .bind(&profile.company)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DispatchStore for SqliteDispatchStore {
    async fn begin(&self) -> Result<Box<dyn DispatchTransaction>> {
        // Take the write lock up front. A deferred transaction that reads
        // first and upgrades later fails with SQLITE_BUSY instead of waiting.
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        Ok(Box::new(SqliteDispatchTransaction { tx }))
    }

    async fn find_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>> {
        let record = sqlx::query_as::<_, CampaignRecord>(
            "SELECT id, delay_ms, contact_delay_ms, status FROM campaigns WHERE id = ?",
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(Campaign::from))
    }

    async fn find_dispatch(&self, dispatch_id: &str) -> Result<Option<Dispatch>> {
        let query = format!("SELECT {} FROM dispatches WHERE id = ?", DISPATCH_COLUMNS);
        let record = sqlx::query_as::<_, DispatchRecord>(&query)
            .bind(dispatch_id)
            .fetch_optional(&self.pool)
            .await?;
        record.map(Dispatch::try_from).transpose()
    }

    async fn list_dispatches(&self, campaign_id: &str) -> Result<Vec<Dispatch>> {
        let query = format!(
            "SELECT {} FROM dispatches WHERE campaign_id = ? ORDER BY contact ASC, message_order ASC, created_at ASC",
            DISPATCH_COLUMNS
        );
        let records = sqlx::query_as::<_, DispatchRecord>(&query)
            .bind(campaign_id)
            .fetch_all(&self.pool)
            .await?;
        records_to_dispatches(records)
    }

    async fn ready_campaign_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT campaign_id, MIN(created_at) AS first_ready FROM dispatches \
             WHERE status = ? AND (scheduled_at IS NULL OR scheduled_at <= ?) \
             GROUP BY campaign_id ORDER BY first_ready ASC, campaign_id ASC",
        )
        .bind(DispatchStatus::Pending.as_str())
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id, _)| id).collect())
    }

    async fn revive_stuck(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE dispatches SET status = ?, updated_at = ? WHERE status = ? AND updated_at < ?",
        )
        .bind(DispatchStatus::Pending.as_str())
        .bind(to_millis(now))
        .bind(DispatchStatus::Processing.as_str())
        .bind(to_millis(cutoff))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn mark_sent(&self, dispatch_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE dispatches SET status = ?, error = NULL, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(DispatchStatus::Sent.as_str())
        .bind(to_millis(Utc::now()))
        .bind(dispatch_id)
        .bind(DispatchStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, dispatch_id: &str, error: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE dispatches SET status = ?, error = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(DispatchStatus::Failed.as_str())
        .bind(error)
        .bind(to_millis(Utc::now()))
        .bind(dispatch_id)
        .bind(DispatchStatus::Processing.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self, campaign_id: &str) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) AS n FROM dispatches WHERE campaign_id = ? GROUP BY status",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(status_counts(rows))
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        info!("Initialized SQLite dispatch schema");
        Ok(())
    }
}

/// Open SQLite transaction
pub struct SqliteDispatchTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl DispatchTransaction for SqliteDispatchTransaction {
    async fn find_next_ready(&mut self, campaign_id: &str, now: DateTime<Utc>) -> Result<Option<Dispatch>> {
        let query = format!(
            "SELECT {} FROM dispatches \
             WHERE campaign_id = ? AND status = ? AND (scheduled_at IS NULL OR scheduled_at <= ?) \
             ORDER BY contact ASC, message_order ASC, created_at ASC LIMIT 1",
            DISPATCH_COLUMNS
        );
        let record = sqlx::query_as::<_, DispatchRecord>(&query)
            .bind(campaign_id)
            .bind(DispatchStatus::Pending.as_str())
            .bind(to_millis(now))
            .fetch_optional(&mut *self.tx)
            .await?;
        record.map(Dispatch::try_from).transpose()
    }

    async fn claim_group(
        &mut self,
        campaign_id: &str,
        contact: &str,
        session_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Dispatch>> {
        let now_ms = to_millis(now);
        let query = format!(
            "UPDATE dispatches SET status = ?, updated_at = ? \
             WHERE campaign_id = ? AND contact = ? AND session_name = ? AND status = ? \
             AND (scheduled_at IS NULL OR scheduled_at <= ?) \
             RETURNING {}",
            DISPATCH_COLUMNS
        );
        let records = sqlx::query_as::<_, DispatchRecord>(&query)
            .bind(DispatchStatus::Processing.as_str())
            .bind(now_ms)
            .bind(campaign_id)
            .bind(contact)
            .bind(session_name)
            .bind(DispatchStatus::Pending.as_str())
            .bind(now_ms)
            .fetch_all(&mut *self.tx)
            .await?;

        debug!(campaign_id = %campaign_id, contact = %contact, count = records.len(), "Claimed dispatch group");
        records_to_dispatches(records)
    }

    async fn find_contact_profile(&mut self, contact: &str) -> Result<Option<ContactProfile>> {
        let record = sqlx::query_as::<_, ContactRecord>(
            "SELECT phone, name, email, company FROM contacts WHERE phone = ?",
        )
        .bind(contact)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(record.map(ContactProfile::from))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
