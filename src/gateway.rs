//! HTTP gateway: webhook verification handshake, signed event intake,
//! and the health probe.
//!
//! The intake handler does the minimum before acknowledging: authenticate,
//! parse, classify, record statuses, enqueue messages. Reply generation
//! happens on the dispatcher workers after the ack has gone out.

use crate::dedup::{DedupCache, Observation};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::status::StatusTracker;
use crate::util::constant_time_eq;
use crate::webhook::{self, WebhookEvent};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

const MAX_BODY_SIZE: usize = 65_536;
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub dedup: Arc<DedupCache>,
    pub dispatcher: Arc<Dispatcher>,
    pub status: Arc<StatusTracker>,
    pub verify_token: Arc<str>,
    pub app_secret: Arc<str>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/webhook", get(handle_verify).post(handle_event))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
        .with_state(state)
}

pub async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "gateway listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn handle_health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Meta's subscription handshake: echo the challenge when the mode and
/// verify token match.
async fn handle_verify(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let mode = params.get("hub.mode").map(String::as_str).unwrap_or("");
    let token = params
        .get("hub.verify_token")
        .map(String::as_str)
        .unwrap_or("");
    let challenge = params
        .get("hub.challenge")
        .map(String::as_str)
        .unwrap_or("");

    if mode == "subscribe"
        && !state.verify_token.is_empty()
        && constant_time_eq(token, &state.verify_token)
    {
        tracing::info!("webhook verification succeeded");
        (StatusCode::OK, challenge.to_string())
    } else {
        tracing::warn!("webhook verification failed");
        (StatusCode::FORBIDDEN, "verification failed".to_string())
    }
}

/// Check `X-Hub-Signature-256: sha256=<hex>` against the raw body.
pub fn verify_signature(app_secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_sig) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

async fn handle_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if !state.app_secret.is_empty() {
        let header_value = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !verify_signature(&state.app_secret, &body, header_value) {
            tracing::warn!("webhook signature verification failed");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid signature"})),
            );
        }
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("webhook body is not valid JSON: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid JSON"})),
            );
        }
    };

    let events = match webhook::classify_payload(&payload) {
        Ok(events) => events,
        Err(e) => {
            // Acknowledged anyway: re-delivery of the same payload cannot
            // succeed either.
            tracing::warn!("unrecognized webhook payload: {e}");
            return (StatusCode::OK, Json(json!({"status": "ignored"})));
        }
    };

    let mut accepted = 0usize;
    let mut duplicates = 0usize;
    let mut dropped = 0usize;

    for event in events {
        match event {
            WebhookEvent::Message(message) => match state.dedup.observe(&message.message_id) {
                Observation::Duplicate => {
                    tracing::debug!(message_id = %message.message_id, "duplicate message skipped");
                    duplicates += 1;
                }
                Observation::Accepted => match state.dispatcher.dispatch(message) {
                    Ok(()) => accepted += 1,
                    Err(e @ (DispatchError::QueueFull | DispatchError::Closed)) => {
                        tracing::error!("failed to enqueue message: {e}");
                        dropped += 1;
                    }
                },
            },
            WebhookEvent::Status(status) => {
                let fresh = state.status.record(status.clone());
                tracing::debug!(
                    message_id = %status.message_id,
                    state = status.state.as_str(),
                    fresh,
                    "delivery status recorded"
                );
            }
            WebhookEvent::Unsupported {
                message_type,
                sender,
            } => {
                tracing::debug!(%message_type, %sender, "unsupported message type skipped");
            }
            WebhookEvent::Invalid(e) => {
                tracing::warn!("invalid webhook item: {e}");
            }
        }
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "accepted": accepted,
            "duplicates": duplicates,
            "dropped": dropped,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::{OutboundMessage, ReplySender, SendOutcome};
    use crate::pipeline::ResponseGenerator;
    use crate::providers::{ChatMessage, Provider};
    use crate::store::SqliteStore;
    use crate::tools;
    use crate::webhook::DeliveryState;
    use async_trait::async_trait;

    struct StubProvider;

    #[async_trait]
    impl Provider for StubProvider {
        async fn chat_with_history(
            &self,
            _messages: &[ChatMessage],
            _temperature: f64,
        ) -> anyhow::Result<String> {
            Ok("stub reply".into())
        }
    }

    struct NullSender;

    #[async_trait]
    impl ReplySender for NullSender {
        async fn send(&self, _message: &OutboundMessage) -> SendOutcome {
            SendOutcome::Sent {
                message_id: "wamid.NULL".into(),
            }
        }
    }

    fn test_state(app_secret: &str) -> AppState {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let generator = Arc::new(ResponseGenerator::new(
            Arc::new(StubProvider),
            store.clone(),
            tools::enrollment_tools(store),
            0.7,
            5,
            20,
            3500,
        ));
        AppState {
            dedup: Arc::new(DedupCache::with_default_window()),
            dispatcher: Arc::new(Dispatcher::spawn(1, 8, generator, Arc::new(NullSender))),
            status: Arc::new(StatusTracker::new()),
            verify_token: Arc::from("expected-token"),
            app_secret: Arc::from(app_secret),
        }
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn message_body(id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {
                "messages": [{
                    "from": "212600000001",
                    "id": id,
                    "timestamp": "1700000000",
                    "type": "text",
                    "text": {"body": "hello"}
                }]
            }}]}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn verify_echoes_challenge_on_match() {
        let state = test_state("");
        let params = HashMap::from([
            ("hub.mode".to_string(), "subscribe".to_string()),
            ("hub.verify_token".to_string(), "expected-token".to_string()),
            ("hub.challenge".to_string(), "12345".to_string()),
        ]);
        let (status, body) = handle_verify(State(state), Query(params)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "12345");
    }

    #[tokio::test]
    async fn verify_rejects_wrong_token() {
        let state = test_state("");
        let params = HashMap::from([
            ("hub.mode".to_string(), "subscribe".to_string()),
            ("hub.verify_token".to_string(), "wrong".to_string()),
            ("hub.challenge".to_string(), "12345".to_string()),
        ]);
        let (status, _) = handle_verify(State(state), Query(params)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn verify_rejects_wrong_mode() {
        let state = test_state("");
        let params = HashMap::from([
            ("hub.mode".to_string(), "unsubscribe".to_string()),
            ("hub.verify_token".to_string(), "expected-token".to_string()),
        ]);
        let (status, _) = handle_verify(State(state), Query(params)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn signature_round_trip() {
        let body = b"payload bytes";
        let header = sign("secret", body);
        assert!(verify_signature("secret", body, &header));
        assert!(!verify_signature("other-secret", body, &header));
        assert!(!verify_signature("secret", b"tampered", &header));
        assert!(!verify_signature("secret", body, "sha256=zzzz"));
        assert!(!verify_signature("secret", body, "md5=abcd"));
    }

    #[tokio::test]
    async fn event_with_bad_signature_is_unauthorized() {
        let state = test_state("secret");
        let body = message_body("wamid.A");
        let mut headers = HeaderMap::new();
        headers.insert("x-hub-signature-256", "sha256=0000".parse().unwrap());
        let (status, _) = handle_event(State(state), headers, Bytes::from(body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn event_without_signature_header_is_unauthorized() {
        let state = test_state("secret");
        let (status, _) = handle_event(
            State(state),
            HeaderMap::new(),
            Bytes::from(message_body("wamid.A")),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn signed_message_is_accepted() {
        let state = test_state("secret");
        let body = message_body("wamid.A");
        let mut headers = HeaderMap::new();
        headers.insert("x-hub-signature-256", sign("secret", &body).parse().unwrap());
        let (status, Json(response)) =
            handle_event(State(state), headers, Bytes::from(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["accepted"], 1);
    }

    #[tokio::test]
    async fn redelivered_message_is_deduplicated() {
        let state = test_state("");
        let body = Bytes::from(message_body("wamid.SAME"));
        let (_, Json(first)) =
            handle_event(State(state.clone()), HeaderMap::new(), body.clone()).await;
        assert_eq!(first["accepted"], 1);
        let (status, Json(second)) = handle_event(State(state), HeaderMap::new(), body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["accepted"], 0);
        assert_eq!(second["duplicates"], 1);
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let state = test_state("");
        let (status, _) = handle_event(
            State(state),
            HeaderMap::new(),
            Bytes::from_static(b"{not json"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn non_whatsapp_payload_is_acked_and_ignored() {
        let state = test_state("");
        let (status, Json(response)) = handle_event(
            State(state),
            HeaderMap::new(),
            Bytes::from_static(br#"{"object": "instagram", "entry": []}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["status"], "ignored");
    }

    #[tokio::test]
    async fn status_receipt_is_recorded() {
        let state = test_state("");
        let body = serde_json::to_vec(&json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {
                "statuses": [{
                    "id": "wamid.OUT",
                    "status": "read",
                    "timestamp": "1700000200",
                    "recipient_id": "212600000001"
                }]
            }}]}]
        }))
        .unwrap();
        let (status, _) =
            handle_event(State(state.clone()), HeaderMap::new(), Bytes::from(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            state.status.current_state("wamid.OUT"),
            Some(DeliveryState::Read)
        );
    }

    #[tokio::test]
    async fn unsupported_message_type_is_acked() {
        let state = test_state("");
        let body = serde_json::to_vec(&json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {
                "messages": [{
                    "from": "212600000001",
                    "id": "wamid.IMG",
                    "type": "image",
                    "image": {"id": "media-1"}
                }]
            }}]}]
        }))
        .unwrap();
        let (status, Json(response)) =
            handle_event(State(state), HeaderMap::new(), Bytes::from(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["accepted"], 0);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let Json(body) = handle_health().await;
        assert_eq!(body["status"], "ok");
    }
}
