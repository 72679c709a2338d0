use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

pub mod logging;

// ============================================================================
// Dispatch Types
// ============================================================================

/// Lifecycle state of a single dispatch row.
///
/// `Pending -> Processing -> {Sent | Failed}`. `Processing -> Pending` only
/// happens through stuck-work revival. `Sent` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl DispatchStatus {
    /// Value persisted in the `status` column
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Pending => "pending",
            DispatchStatus::Processing => "processing",
            DispatchStatus::Sent => "sent",
            DispatchStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(DispatchStatus::Pending),
            "processing" => Some(DispatchStatus::Processing),
            "sent" => Some(DispatchStatus::Sent),
            "failed" => Some(DispatchStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchStatus::Sent | DispatchStatus::Failed)
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message kind selected by the payload's `type` tag.
///
/// Unknown tags fall back to `Text`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Image,
    Video,
    Audio,
    Document,
    #[default]
    #[serde(other)]
    Text,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
            MessageKind::Document => "document",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical message payload carried by a dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,
    /// Explicit attachment name; inferred from the media URL when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl MessagePayload {
    /// Plain text message
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Text,
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Decode the persisted form of a payload.
    ///
    /// Accepts a JSON object (`{"type": ..., "text": ...}`), a JSON string, or
    /// raw text. Anything that is not a JSON object becomes a text message.
    pub fn from_stored(raw: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value @ serde_json::Value::Object(_)) => {
                serde_json::from_value(value).unwrap_or_else(|_| Self::text(raw))
            }
            Ok(serde_json::Value::String(s)) => Self::text(s),
            _ => Self::text(raw),
        }
    }

    /// Encode for persistence
    pub fn to_stored(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.text.clone().unwrap_or_default())
    }

    /// Media reference for the payload's kind, if any
    pub fn media_url(&self) -> Option<&str> {
        match self.kind {
            MessageKind::Text => None,
            MessageKind::Image => self.image_url.as_deref(),
            MessageKind::Video => self.video_url.as_deref(),
            MessageKind::Audio => self.audio_url.as_deref(),
            MessageKind::Document => self.document_url.as_deref(),
        }
    }
}

/// One message to one contact within a campaign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dispatch {
    pub id: String,
    pub campaign_id: String,
    /// Delivery channel identifier on the gateway
    pub session_name: String,
    /// Destination address
    pub contact: String,
    pub message_order: i64,
    pub message: MessagePayload,
    pub status: DispatchStatus,
    /// `None` means ready immediately
    pub scheduled_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-status row counts for one campaign
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub sent: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.sent + self.failed
    }
}

// ============================================================================
// Campaign Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
    #[serde(untagged)]
    Other(String),
}

impl CampaignStatus {
    pub fn as_str(&self) -> &str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Other(s) => s,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, CampaignStatus::Active)
    }
}

impl From<&str> for CampaignStatus {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "active" => Self::Active,
            "paused" => Self::Paused,
            "completed" => Self::Completed,
            "cancelled" | "canceled" => Self::Cancelled,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Campaign pacing settings. Re-read on every loop iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    /// Milliseconds between messages within one contact's batch
    pub delay_ms: u64,
    /// Milliseconds between contacts
    pub contact_delay_ms: u64,
    pub status: CampaignStatus,
}

impl Campaign {
    pub fn message_delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn contact_delay(&self) -> Duration {
        Duration::from_millis(self.contact_delay_ms)
    }
}

// ============================================================================
// Contact / Claim Types
// ============================================================================

/// Directory entry used for template substitution. Never mutated here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactProfile {
    pub phone: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
}

/// A contact's batch, exclusively owned for one processing pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub campaign_id: String,
    pub contact: String,
    pub session_name: String,
    pub contact_profile: Option<ContactProfile>,
    /// Ordered by `message_order`
    pub batch: Vec<Dispatch>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_from_raw_text() {
        let payload = MessagePayload::from_stored("Hello there");
        assert_eq!(payload.kind, MessageKind::Text);
        assert_eq!(payload.text.as_deref(), Some("Hello there"));
    }

    #[test]
    fn test_payload_from_json_string() {
        let payload = MessagePayload::from_stored("\"quoted text\"");
        assert_eq!(payload.kind, MessageKind::Text);
        assert_eq!(payload.text.as_deref(), Some("quoted text"));
    }

    #[test]
    fn test_payload_from_structured_json() {
        let payload = MessagePayload::from_stored(
            r#"{"type":"image","text":"look","imageUrl":"https://cdn.example.com/a.png"}"#,
        );
        assert_eq!(payload.kind, MessageKind::Image);
        assert_eq!(payload.text.as_deref(), Some("look"));
        assert_eq!(payload.media_url(), Some("https://cdn.example.com/a.png"));
    }

    #[test]
    fn test_payload_without_type_defaults_to_text() {
        let payload = MessagePayload::from_stored(r#"{"text":"hi"}"#);
        assert_eq!(payload.kind, MessageKind::Text);
        assert_eq!(payload.text.as_deref(), Some("hi"));
    }

    #[test]
    fn test_payload_unknown_type_is_text() {
        let payload = MessagePayload::from_stored(r#"{"type":"sticker","text":"hi"}"#);
        assert_eq!(payload.kind, MessageKind::Text);
    }

    #[test]
    fn test_message_kind_names() {
        for (name, kind) in [
            ("\"text\"", MessageKind::Text),
            ("\"image\"", MessageKind::Image),
            ("\"video\"", MessageKind::Video),
            ("\"audio\"", MessageKind::Audio),
            ("\"document\"", MessageKind::Document),
        ] {
            assert_eq!(serde_json::from_str::<MessageKind>(name).unwrap(), kind);
            assert_eq!(serde_json::to_string(&kind).unwrap(), name);
        }
        assert_eq!(serde_json::from_str::<MessageKind>("\"sticker\"").unwrap(), MessageKind::Text);
    }

    #[test]
    fn test_payload_stored_form_is_stable() {
        let payload = MessagePayload {
            kind: MessageKind::Document,
            document_url: Some("https://files.example.com/report.pdf".to_string()),
            ..Default::default()
        };
        let stored = payload.to_stored();
        assert!(stored.contains("\"type\":\"document\""));
        assert_eq!(MessagePayload::from_stored(&stored), payload);
    }

    #[test]
    fn test_dispatch_status_parse() {
        assert_eq!(DispatchStatus::parse("PENDING"), Some(DispatchStatus::Pending));
        assert_eq!(DispatchStatus::parse("sent"), Some(DispatchStatus::Sent));
        assert_eq!(DispatchStatus::parse("queued"), None);
        assert!(DispatchStatus::Failed.is_terminal());
        assert!(!DispatchStatus::Processing.is_terminal());
    }

    #[test]
    fn test_campaign_status_from_str() {
        assert_eq!(CampaignStatus::from("Active"), CampaignStatus::Active);
        assert_eq!(CampaignStatus::from("paused"), CampaignStatus::Paused);
        assert_eq!(CampaignStatus::from("draft"), CampaignStatus::Other("draft".to_string()));
        assert!(!CampaignStatus::from("draft").is_active());
    }
}
