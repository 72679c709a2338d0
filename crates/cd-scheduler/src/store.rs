//! Dispatch Store Trait
//!
//! Typed access to the persisted `campaigns`, `dispatches` and `contacts`
//! tables. Adapters hold no business logic: selection order, exclusivity and
//! pacing live in the claim engine and the campaign loop.
//!
//! Timestamps are stored as epoch milliseconds, message payloads as JSON text.

use async_trait::async_trait;
use cd_common::{Campaign, CampaignStatus, ContactProfile, Dispatch, DispatchStatus, MessagePayload, StatusCounts};
use chrono::{DateTime, Utc};

use crate::{Result, SchedulerError};

/// Columns selected for every dispatch read, in `DispatchRecord` order
pub(crate) const DISPATCH_COLUMNS: &str =
    "id, campaign_id, session_name, contact, message_order, message, status, scheduled_at, error, created_at, updated_at";

/// One open store transaction.
///
/// Dropping a transaction without calling `commit` rolls it back.
#[async_trait]
pub trait DispatchTransaction: Send {
    /// Oldest ready pending dispatch of the campaign, ordered by
    /// `(contact, message_order, created_at)`
    async fn find_next_ready(&mut self, campaign_id: &str, now: DateTime<Utc>) -> Result<Option<Dispatch>>;

    /// Move every ready pending row of the `(campaign, contact, session)` group
    /// to `processing`, stamping `updated_at = now`.
    ///
    /// Returns exactly the rows this statement updated. An empty result means
    /// another claimant got there first.
    async fn claim_group(
        &mut self,
        campaign_id: &str,
        contact: &str,
        session_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Dispatch>>;

    async fn find_contact_profile(&mut self, contact: &str) -> Result<Option<ContactProfile>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait DispatchStore: Send + Sync {
    /// Open a transaction
    async fn begin(&self) -> Result<Box<dyn DispatchTransaction>>;

    async fn find_campaign(&self, campaign_id: &str) -> Result<Option<Campaign>>;

    async fn find_dispatch(&self, dispatch_id: &str) -> Result<Option<Dispatch>>;

    /// All dispatches of a campaign ordered by `(contact, message_order)`
    async fn list_dispatches(&self, campaign_id: &str) -> Result<Vec<Dispatch>>;

    /// Distinct campaigns with at least one ready pending dispatch, oldest
    /// ready work first
    async fn ready_campaign_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>>;

    /// Reset `processing` rows last touched before `cutoff` back to `pending`
    async fn revive_stuck(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64>;

    /// `processing -> sent`, clearing `error`. False if the row was not processing.
    async fn mark_sent(&self, dispatch_id: &str) -> Result<bool>;

    /// `processing -> failed` with the error text. False if the row was not processing.
    async fn mark_failed(&self, dispatch_id: &str, error: &str) -> Result<bool>;

    async fn count_by_status(&self, campaign_id: &str) -> Result<StatusCounts>;

    /// Create tables and indexes if they do not exist
    async fn init_schema(&self) -> Result<()>;
}

/// Input for seeding a dispatch row
#[derive(Debug, Clone)]
pub struct NewDispatch {
    pub campaign_id: String,
    pub session_name: String,
    pub contact: String,
    pub message_order: i64,
    pub message: MessagePayload,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl NewDispatch {
    pub fn new(campaign_id: &str, session_name: &str, contact: &str, message_order: i64, message: MessagePayload) -> Self {
        Self {
            campaign_id: campaign_id.to_string(),
            session_name: session_name.to_string(),
            contact: contact.to_string(),
            message_order,
            message,
            scheduled_at: None,
        }
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

// ============================================================================
// Row Mapping (shared by the sqlx adapters)
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DispatchRecord {
    pub id: String,
    pub campaign_id: String,
    pub session_name: String,
    pub contact: String,
    pub message_order: i64,
    pub message: String,
    pub status: String,
    pub scheduled_at: Option<i64>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<DispatchRecord> for Dispatch {
    type Error = SchedulerError;

    fn try_from(record: DispatchRecord) -> Result<Self> {
        let status = DispatchStatus::parse(&record.status).ok_or_else(|| {
            SchedulerError::InvalidRecord(format!("dispatch {} has unknown status '{}'", record.id, record.status))
        })?;

        Ok(Dispatch {
            status,
            message: MessagePayload::from_stored(&record.message),
            scheduled_at: record.scheduled_at.map(from_millis).transpose()?,
            created_at: from_millis(record.created_at)?,
            updated_at: from_millis(record.updated_at)?,
            id: record.id,
            campaign_id: record.campaign_id,
            session_name: record.session_name,
            contact: record.contact,
            message_order: record.message_order,
            error: record.error,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CampaignRecord {
    pub id: String,
    pub delay_ms: i64,
    pub contact_delay_ms: i64,
    pub status: String,
}

impl From<CampaignRecord> for Campaign {
    fn from(record: CampaignRecord) -> Self {
        Campaign {
            id: record.id,
            delay_ms: record.delay_ms.max(0) as u64,
            contact_delay_ms: record.contact_delay_ms.max(0) as u64,
            status: CampaignStatus::from(record.status.as_str()),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ContactRecord {
    pub phone: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
}

impl From<ContactRecord> for ContactProfile {
    fn from(record: ContactRecord) -> Self {
        ContactProfile {
            phone: record.phone,
            name: record.name,
            email: record.email,
            company: record.company,
        }
    }
}

pub(crate) fn records_to_dispatches(records: Vec<DispatchRecord>) -> Result<Vec<Dispatch>> {
    records.into_iter().map(Dispatch::try_from).collect()
}

pub(crate) fn status_counts(rows: Vec<(String, i64)>) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for (status, count) in rows {
        let count = count.max(0) as u64;
        match DispatchStatus::parse(&status) {
            Some(DispatchStatus::Pending) => counts.pending += count,
            Some(DispatchStatus::Processing) => counts.processing += count,
            Some(DispatchStatus::Sent) => counts.sent += count,
            Some(DispatchStatus::Failed) => counts.failed += count,
            None => {}
        }
    }
    counts
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| SchedulerError::InvalidRecord(format!("timestamp {} out of range", ms)))
}
