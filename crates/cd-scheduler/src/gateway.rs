//! HTTP client for the outbound delivery gateway.
//!
//! One POST per message to `{base}/api/{session}/send-{kind}`:
//! - text: `{destination, message}`
//! - image/video/document: `{destination, mediaPath, filename, caption}`
//! - audio: `{destination, audioPath}`
//!
//! A 2xx response whose JSON body carries a truthy `status` is a delivery.
//! Anything else is a rejection, with the body's `message` as the detail.

use std::time::Duration;

use async_trait::async_trait;
use cd_common::MessageKind;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{Result, SchedulerError};

/// One gateway call, already rendered and normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayRequest {
    Text {
        destination: String,
        message: String,
    },
    /// Image, video or document attachment
    Media {
        kind: MessageKind,
        destination: String,
        media_path: String,
        filename: String,
        caption: String,
    },
    Audio {
        destination: String,
        audio_path: String,
    },
}

impl GatewayRequest {
    pub fn kind(&self) -> MessageKind {
        match self {
            GatewayRequest::Text { .. } => MessageKind::Text,
            GatewayRequest::Media { kind, .. } => *kind,
            GatewayRequest::Audio { .. } => MessageKind::Audio,
        }
    }

    pub fn destination(&self) -> &str {
        match self {
            GatewayRequest::Text { destination, .. }
            | GatewayRequest::Media { destination, .. }
            | GatewayRequest::Audio { destination, .. } => destination,
        }
    }

    /// Last path segment of the endpoint
    fn action(&self) -> String {
        format!("send-{}", self.kind().as_str())
    }

    fn body(&self) -> RequestBody<'_> {
        match self {
            GatewayRequest::Text { destination, message } => RequestBody::Text { destination, message },
            GatewayRequest::Media {
                destination,
                media_path,
                filename,
                caption,
                ..
            } => RequestBody::Media {
                destination,
                media_path,
                filename,
                caption,
            },
            GatewayRequest::Audio { destination, audio_path } => RequestBody::Audio { destination, audio_path },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestBody<'a> {
    Text {
        destination: &'a str,
        message: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    Media {
        destination: &'a str,
        media_path: &'a str,
        filename: &'a str,
        caption: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    Audio {
        destination: &'a str,
        audio_path: &'a str,
    },
}

/// Result of a single delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Delivered,
    Rejected { error: String },
}

impl DeliveryResult {
    pub fn rejected(error: impl Into<String>) -> Self {
        DeliveryResult::Rejected { error: error.into() }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryResult::Delivered)
    }
}

/// Outbound delivery gateway.
///
/// Implementations never return errors: transport failures are rejections.
#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    async fn send(&self, session_name: &str, request: &GatewayRequest) -> DeliveryResult;
}

/// HTTP gateway configuration
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub base_url: String,
    /// Optional Bearer token for authentication
    pub api_token: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_token: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&cd_config::GatewayConfig> for HttpGatewayConfig {
    fn from(config: &cd_config::GatewayConfig) -> Self {
        let token = config.api_token.trim();
        Self {
            base_url: config.base_url.clone(),
            api_token: (!token.is_empty()).then(|| token.to_string()),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        }
    }
}

pub struct HttpGateway {
    base_url: Url,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SchedulerError::Config(format!("invalid gateway URL '{}': {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(SchedulerError::Config(format!(
                "gateway URL '{}' cannot be a base",
                config.base_url
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SchedulerError::Gateway(e.to_string()))?;

        Ok(Self {
            base_url,
            api_token: config.api_token,
            client,
        })
    }

    /// `{base}/api/{session}/{action}`, with the session percent-encoded
    pub fn endpoint(&self, session_name: &str, action: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["api", session_name, action]);
        }
        url
    }
}

#[async_trait]
impl DeliveryGateway for HttpGateway {
    async fn send(&self, session_name: &str, request: &GatewayRequest) -> DeliveryResult {
        let url = self.endpoint(session_name, &request.action());
        debug!(url = %url, kind = %request.kind(), "Sending message to gateway");

        let mut http_request = self.client.post(url.clone()).json(&request.body());
        if let Some(ref token) = self.api_token {
            http_request = http_request.header("Authorization", format!("Bearer {}", token));
        }

        let response = match http_request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "Gateway request failed");
                return DeliveryResult::rejected(format!("Gateway request failed: {}", e));
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %url, error = %e, "Failed to read gateway response");
                return DeliveryResult::rejected(format!("Failed to read gateway response: {}", e));
            }
        };

        interpret_response(status, &body)
    }
}

/// Map a gateway HTTP response to a delivery result
pub fn interpret_response(status: StatusCode, body: &str) -> DeliveryResult {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    if status.is_success() && parsed.as_ref().and_then(|v| v.get("status")).is_some_and(is_truthy) {
        return DeliveryResult::Delivered;
    }

    let message = parsed
        .as_ref()
        .and_then(|v| v.get("message"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty());

    match message {
        Some(message) => DeliveryResult::rejected(message),
        None if !status.is_success() => DeliveryResult::rejected(format!("HTTP {}", status.as_u16())),
        None => DeliveryResult::rejected("Gateway did not confirm delivery"),
    }
}

/// JavaScript truthiness of a JSON value
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy_status_is_delivered() {
        assert!(interpret_response(StatusCode::OK, r#"{"status":true}"#).is_delivered());
        assert!(interpret_response(StatusCode::CREATED, r#"{"status":"success","id":"x"}"#).is_delivered());
        assert!(interpret_response(StatusCode::OK, r#"{"status":1}"#).is_delivered());
    }

    #[test]
    fn test_falsy_status_uses_message() {
        assert_eq!(
            interpret_response(StatusCode::OK, r#"{"status":false,"message":"number not on network"}"#),
            DeliveryResult::rejected("number not on network")
        );
        assert_eq!(
            interpret_response(StatusCode::OK, r#"{"status":""}"#),
            DeliveryResult::rejected("Gateway did not confirm delivery")
        );
    }

    #[test]
    fn test_error_status_without_message() {
        assert_eq!(
            interpret_response(StatusCode::BAD_GATEWAY, "upstream down"),
            DeliveryResult::rejected("HTTP 502")
        );
    }

    #[test]
    fn test_error_status_with_truthy_body_is_rejected() {
        assert_eq!(
            interpret_response(StatusCode::INTERNAL_SERVER_ERROR, r#"{"status":true,"message":"session closed"}"#),
            DeliveryResult::rejected("session closed")
        );
    }

    #[test]
    fn test_non_json_success_is_rejected() {
        assert!(!interpret_response(StatusCode::OK, "OK").is_delivered());
    }

    #[test]
    fn test_endpoint_layout() {
        let gateway = HttpGateway::new(HttpGatewayConfig {
            base_url: "http://gateway.local:3000/".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            gateway.endpoint("main", "send-text").as_str(),
            "http://gateway.local:3000/api/main/send-text"
        );
        assert_eq!(
            gateway.endpoint("sales team", "send-image").as_str(),
            "http://gateway.local:3000/api/sales%20team/send-image"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let result = HttpGateway::new(HttpGatewayConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(SchedulerError::Config(_))));
    }

    #[test]
    fn test_request_bodies() {
        let media = GatewayRequest::Media {
            kind: MessageKind::Image,
            destination: "5511999999999".to_string(),
            media_path: "https://cdn.example.com/a.png".to_string(),
            filename: "a.png".to_string(),
            caption: "look".to_string(),
        };
        let body = serde_json::to_value(media.body()).unwrap();
        assert_eq!(body["mediaPath"], "https://cdn.example.com/a.png");
        assert_eq!(body["filename"], "a.png");
        assert_eq!(media.action(), "send-image");

        let audio = GatewayRequest::Audio {
            destination: "5511999999999".to_string(),
            audio_path: "https://cdn.example.com/v.ogg".to_string(),
        };
        let body = serde_json::to_value(audio.body()).unwrap();
        assert_eq!(body["audioPath"], "https://cdn.example.com/v.ogg");
        assert!(body.get("caption").is_none());
    }

    #[test]
    fn test_blank_token_means_no_auth() {
        let config = HttpGatewayConfig::from(&cd_config::GatewayConfig {
            api_token: "  ".to_string(),
            ..Default::default()
        });
        assert!(config.api_token.is_none());
    }
}
