//! PostgreSQL Dispatch Store Implementation
//!
//! Under READ COMMITTED a racing `claim_group` blocks on the winner's row
//! locks, re-evaluates `status = 'pending'` after the winner commits and
//! updates zero rows.

use async_trait::async_trait;
use cd_common::{Campaign, ContactProfile, Dispatch, DispatchStatus, StatusCounts};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info};

use crate::store::{
    records_to_dispatches, status_counts, to_millis, CampaignRecord, ContactRecord, DispatchRecord,
    DispatchStore, DispatchTransaction, DISPATCH_COLUMNS,
};
use crate::Result;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS campaigns (
        id TEXT PRIMARY KEY,
        delay_ms BIGINT NOT NULL DEFAULT 0,
        contact_delay_ms BIGINT NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT 'active',
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS dispatches (
        id TEXT PRIMARY KEY,
        campaign_id TEXT NOT NULL,
        session_name TEXT NOT NULL,
        contact TEXT NOT NULL,
        message_order BIGINT NOT NULL DEFAULT 0,
        message TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        scheduled_at BIGINT,
        error TEXT,
        created_at BIGINT NOT NULL,
        updated_at BIGINT NOT NULL
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

/// PostgreSQL implementation of DispatchStore
#[derive(Clone)]
pub struct PostgresDispatchStore {
    pool: PgPool,
}

impl PostgresDispatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the pool reference
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DispatchStore for PostgresDispatchStore {
    async fn begin(&self) -> Result<Box<dyn DispatchTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresDispatchTransaction { tx }))
    }

    async fn find_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>> {
        let record = sqlx::query_as::<_, CampaignRecord>(
            "SELECT id, delay_ms, contact_delay_ms, status FROM campaigns WHERE id = $1",
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(Campaign::from))
    }

    async fn find_dispatch(&self, dispatch_id: &str) -> Result<Option<Dispatch>> {
        let query = format!("SELECT {} FROM dispatches WHERE id = $1", DISPATCH_COLUMNS);
        let record = sqlx::query_as::<_, DispatchRecord>(&query)
            .bind(dispatch_id)
            .fetch_optional(&self.pool)
            .await?;
        record.map(Dispatch::try_from).transpose()
    }

    async fn list_dispatches(&self, campaign_id: &str) -> Result<Vec<Dispatch>> {
        let query = format!(
            "SELECT {} FROM dispatches WHERE campaign_id = $1 ORDER BY contact ASC, message_order ASC, created_at ASC",
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
             WHERE status = $1 AND (scheduled_at IS NULL OR scheduled_at <= $2) \
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
            "UPDATE dispatches SET status = $1, updated_at = $2 WHERE status = $3 AND updated_at < $4",
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
            "UPDATE dispatches SET status = $1, error = NULL, updated_at = $2 WHERE id = $3 AND status = $4",
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
            "UPDATE dispatches SET status = $1, error = $2, updated_at = $3 WHERE id = $4 AND status = $5",
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
            "SELECT status, COUNT(*) AS n FROM dispatches WHERE campaign_id = $1 GROUP BY status",
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
        info!("Initialized PostgreSQL dispatch schema");
        Ok(())
    }
}

/// Open PostgreSQL transaction
pub struct PostgresDispatchTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl DispatchTransaction for PostgresDispatchTransaction {
    async fn find_next_ready(&mut self, campaign_id: &str, now: DateTime<Utc>) -> Result<Option<Dispatch>> {
        let query = format!(
            "SELECT {} FROM dispatches \
             WHERE campaign_id = $1 AND status = $2 AND (scheduled_at IS NULL OR scheduled_at <= $3) \
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
        let query = format!(
            "UPDATE dispatches SET status = $1, updated_at = $2 \
             WHERE campaign_id = $3 AND contact = $4 AND session_name = $5 AND status = $6 \
             AND (scheduled_at IS NULL OR scheduled_at <= $2) \
             RETURNING {}",
            DISPATCH_COLUMNS
        );
        let records = sqlx::query_as::<_, DispatchRecord>(&query)
            .bind(DispatchStatus::Processing.as_str())
            .bind(to_millis(now))
            .bind(campaign_id)
            .bind(contact)
            .bind(session_name)
            .bind(DispatchStatus::Pending.as_str())
            .fetch_all(&mut *self.tx)
            .await?;

        debug!(campaign_id = %campaign_id, contact = %contact, count = records.len(), "Claimed dispatch group");
        records_to_dispatches(records)
    }

    async fn find_contact_profile(&mut self, contact: &str) -> Result<Option<ContactProfile>> {
        let record = sqlx::query_as::<_, ContactRecord>(
            "SELECT phone, name, email, company FROM contacts WHERE phone = $1",
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
