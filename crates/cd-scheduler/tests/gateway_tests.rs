//! HttpGateway Tests
//!
//! Tests for:
//! - Endpoint and request body per message kind
//! - Response status interpretation
//! - Bearer token handling
//! - Transport failures recorded as rejections

use std::time::Duration;

use cd_common::MessageKind;
use cd_scheduler::{DeliveryGateway, DeliveryResult, GatewayRequest, HttpGateway, HttpGatewayConfig};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway_for(server: &MockServer) -> HttpGateway {
    HttpGateway::new(HttpGatewayConfig {
        base_url: server.uri(),
        ..Default::default()
    })
    .unwrap()
}

fn text(message: &str) -> GatewayRequest {
    GatewayRequest::Text {
        destination: "5511999999999".to_string(),
        message: message.to_string(),
    }
}

#[tokio::test]
async fn test_text_delivery() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/main/send-text"))
        .and(body_json(serde_json::json!({
            "destination": "5511999999999",
            "message": "Hi Ana"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": true})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = gateway_for(&mock_server).send("main", &text("Hi Ana")).await;

    assert_eq!(result, DeliveryResult::Delivered);
}

#[tokio::test]
async fn test_media_delivery_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/main/send-document"))
        .and(body_json(serde_json::json!({
            "destination": "5511999999999",
            "mediaPath": "https://files.example.com/report.pdf",
            "filename": "report.pdf",
            "caption": "Monthly report"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"status": "ok"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = GatewayRequest::Media {
        kind: MessageKind::Document,
        destination: "5511999999999".to_string(),
        media_path: "https://files.example.com/report.pdf".to_string(),
        filename: "report.pdf".to_string(),
        caption: "Monthly report".to_string(),
    };

    assert!(gateway_for(&mock_server).send("main", &request).await.is_delivered());
}

#[tokio::test]
async fn test_audio_delivery_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/main/send-audio"))
        .and(body_json(serde_json::json!({
            "destination": "5511999999999",
            "audioPath": "https://cdn.example.com/voice.ogg"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": true})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = GatewayRequest::Audio {
        destination: "5511999999999".to_string(),
        audio_path: "https://cdn.example.com/voice.ogg".to_string(),
    };

    assert!(gateway_for(&mock_server).send("main", &request).await.is_delivered());
}

#[tokio::test]
async fn test_falsy_status_rejected_with_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/main/send-text"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"status": false, "message": "Session not connected"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = gateway_for(&mock_server).send("main", &text("hi")).await;

    assert_eq!(result, DeliveryResult::rejected("Session not connected"));
}

#[tokio::test]
async fn test_server_error_rejected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/main/send-text"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = gateway_for(&mock_server).send("main", &text("hi")).await;

    assert_eq!(result, DeliveryResult::rejected("HTTP 503"));
}

#[tokio::test]
async fn test_bearer_token_sent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/main/send-text"))
        .and(header("Authorization", "Bearer gateway-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": true})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let gateway = HttpGateway::new(HttpGatewayConfig {
        base_url: mock_server.uri(),
        api_token: Some("gateway-token".to_string()),
        ..Default::default()
    })
    .unwrap();

    assert!(gateway.send("main", &text("hi")).await.is_delivered());
}

#[tokio::test]
async fn test_timeout_is_rejection() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"status": true}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&mock_server)
        .await;

    let gateway = HttpGateway::new(HttpGatewayConfig {
        base_url: mock_server.uri(),
        request_timeout: Duration::from_millis(200),
        ..Default::default()
    })
    .unwrap();

    match gateway.send("main", &text("hi")).await {
        DeliveryResult::Rejected { error } => assert!(error.starts_with("Gateway request failed")),
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_gateway_is_rejection() {
    let gateway = HttpGateway::new(HttpGatewayConfig {
        base_url: "http://127.0.0.1:1".to_string(),
        connect_timeout: Duration::from_millis(500),
        ..Default::default()
    })
    .unwrap();

    assert!(!gateway.send("main", &text("hi")).await.is_delivered());
}
