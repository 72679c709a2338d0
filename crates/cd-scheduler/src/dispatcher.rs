//! Message Dispatcher - turns one claimed dispatch into a gateway call and
//! records the per-message outcome.
//!
//! Outcomes are terminal: `sent` clears `error`, `failed` stores it. A failed
//! message never stops the rest of its batch.

use std::sync::Arc;

use cd_common::{ContactProfile, Dispatch, MessageKind, MessagePayload};
use tracing::{debug, warn};

use crate::gateway::{DeliveryGateway, DeliveryResult, GatewayRequest};
use crate::store::DispatchStore;
use crate::template;
use crate::Result;

/// Recorded outcome of one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Failed { error: String },
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DispatchOutcome::Sent)
    }
}

#[derive(Clone)]
pub struct MessageDispatcher {
    store: Arc<dyn DispatchStore>,
    gateway: Arc<dyn DeliveryGateway>,
}

impl MessageDispatcher {
    pub fn new(store: Arc<dyn DispatchStore>, gateway: Arc<dyn DeliveryGateway>) -> Self {
        Self { store, gateway }
    }

    /// Deliver `dispatch` to `contact` through `session_name` and persist the
    /// outcome.
    ///
    /// Only store failures surface as `Err`; delivery problems are recorded
    /// on the row and returned as `DispatchOutcome::Failed`.
    pub async fn send(
        &self,
        dispatch: &Dispatch,
        contact: &str,
        profile: Option<&ContactProfile>,
        session_name: &str,
    ) -> Result<DispatchOutcome> {
        let result = match build_request(&dispatch.message, contact, profile) {
            Ok(request) => self.gateway.send(session_name, &request).await,
            Err(error) => DeliveryResult::Rejected { error },
        };

        match result {
            DeliveryResult::Delivered => {
                if !self.store.mark_sent(&dispatch.id).await? {
                    warn!(dispatch_id = %dispatch.id, "Dispatch was no longer processing when marking sent");
                }
                metrics::counter!("dispatch.messages.sent_total").increment(1);
                debug!(
                    dispatch_id = %dispatch.id,
                    contact = %contact,
                    message_order = dispatch.message_order,
                    "Message sent"
                );
                Ok(DispatchOutcome::Sent)
            }
            DeliveryResult::Rejected { error } => {
                if !self.store.mark_failed(&dispatch.id, &error).await? {
                    warn!(dispatch_id = %dispatch.id, "Dispatch was no longer processing when marking failed");
                }
                metrics::counter!("dispatch.messages.failed_total").increment(1);
                warn!(
                    dispatch_id = %dispatch.id,
                    contact = %contact,
                    message_order = dispatch.message_order,
                    error = %error,
                    "Message failed"
                );
                Ok(DispatchOutcome::Failed { error })
            }
        }
    }
}

/// Build the gateway call for a payload. `Err` carries the failure text to
/// record when the payload cannot be sent at all.
pub fn build_request(
    message: &MessagePayload,
    contact: &str,
    profile: Option<&ContactProfile>,
) -> std::result::Result<GatewayRequest, String> {
    let destination = normalize_destination(contact);
    if destination.is_empty() {
        return Err(format!("Contact '{}' has no digits", contact));
    }

    match message.kind {
        MessageKind::Text => Ok(GatewayRequest::Text {
            destination,
            message: template::render(message.text.as_deref().unwrap_or_default(), profile),
        }),
        MessageKind::Audio => Ok(GatewayRequest::Audio {
            destination,
            audio_path: media_path(message)?,
        }),
        kind @ (MessageKind::Image | MessageKind::Video | MessageKind::Document) => {
            let media_path = media_path(message)?;
            let filename = message
                .filename
                .clone()
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| infer_filename(&media_path, kind));
            Ok(GatewayRequest::Media {
                kind,
                destination,
                media_path,
                filename,
                caption: message.text.clone().unwrap_or_default(),
            })
        }
    }
}

fn media_path(message: &MessagePayload) -> std::result::Result<String, String> {
    message
        .media_url()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .ok_or_else(|| format!("Missing media URL for {} message", message.kind))
}

/// Keep only ASCII digits
pub fn normalize_destination(contact: &str) -> String {
    contact.chars().filter(char::is_ascii_digit).collect()
}

/// Last path segment of the media URL, or a default per kind
pub fn infer_filename(media_path: &str, kind: MessageKind) -> String {
    let path = media_path.split(['?', '#']).next().unwrap_or_default();
    match path.rsplit('/').next() {
        Some(segment) if !segment.is_empty() && segment.contains('.') => segment.to_string(),
        _ => default_filename(kind).to_string(),
    }
}

fn default_filename(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Image => "image.jpg",
        MessageKind::Video => "video.mp4",
        MessageKind::Audio => "audio.ogg",
        MessageKind::Document | MessageKind::Text => "document.pdf",
    }
}
