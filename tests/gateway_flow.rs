//! End-to-end flow through the HTTP surface: handshake, signed intake,
//! deduplication, status tracking, and the reply that comes out the other
//! side.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use courier::dedup::DedupCache;
use courier::dispatch::Dispatcher;
use courier::gateway::{router, AppState};
use courier::outbound::{OutboundMessage, ReplySender, SendOutcome};
use courier::pipeline::ResponseGenerator;
use courier::providers::{ChatMessage, Provider};
use courier::status::StatusTracker;
use courier::store::SqliteStore;
use courier::tools;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde_json::{json, Value};
use sha2::Sha256;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt;

struct CannedProvider;

#[async_trait]
impl Provider for CannedProvider {
    async fn chat_with_history(
        &self,
        _messages: &[ChatMessage],
        _temperature: f64,
    ) -> anyhow::Result<String> {
        Ok("Welcome! Ask me about our programs.".into())
    }
}

struct CapturingSender {
    sent: Mutex<Vec<OutboundMessage>>,
    notify: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl ReplySender for CapturingSender {
    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        self.sent.lock().push(message.clone());
        let _ = self.notify.send(());
        SendOutcome::Sent {
            message_id: "wamid.REPLY".into(),
        }
    }
}

struct Harness {
    state: AppState,
    sender: Arc<CapturingSender>,
    replies: mpsc::UnboundedReceiver<()>,
}

fn harness(app_secret: &str) -> Harness {
    let (notify, replies) = mpsc::unbounded_channel();
    let sender = Arc::new(CapturingSender {
        sent: Mutex::new(Vec::new()),
        notify,
    });
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let generator = Arc::new(ResponseGenerator::new(
        Arc::new(CannedProvider),
        store.clone(),
        tools::enrollment_tools(store),
        0.7,
        5,
        20,
        3500,
    ));
    let state = AppState {
        dedup: Arc::new(DedupCache::with_default_window()),
        dispatcher: Arc::new(Dispatcher::spawn(2, 16, generator, sender.clone())),
        status: Arc::new(StatusTracker::new()),
        verify_token: Arc::from("verify-me"),
        app_secret: Arc::from(app_secret),
    };
    Harness {
        state,
        sender,
        replies,
    }
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn inbound_body(message_id: &str, text: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "object": "whatsapp_business_account",
        "entry": [{"changes": [{"value": {
            "contacts": [{"profile": {"name": "Amina"}, "wa_id": "212600000001"}],
            "messages": [{
                "from": "212600000001",
                "id": message_id,
                "timestamp": "1700000000",
                "type": "text",
                "text": {"body": text}
            }]
        }}]}]
    }))
    .unwrap()
}

async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_responds() {
    let harness = harness("");
    let response = router(harness.state)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["status"], "ok");
}

#[tokio::test]
async fn verification_handshake_echoes_challenge() {
    let harness = harness("");
    let response = router(harness.state)
        .oneshot(
            Request::get("/webhook?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=424242")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    assert_eq!(&bytes[..], b"424242");
}

#[tokio::test]
async fn signed_message_produces_a_reply() {
    let mut harness = harness("topsecret");
    let body = inbound_body("wamid.FLOW", "hello");
    let app = router(harness.state.clone());

    let response = app
        .oneshot(
            Request::post("/webhook")
                .header("content-type", "application/json")
                .header("x-hub-signature-256", sign("topsecret", &body))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["accepted"], 1);

    // The reply goes out asynchronously, after the ack.
    harness.replies.recv().await.unwrap();
    let sent = harness.sender.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "212600000001");
    assert_eq!(sent[0].text, "Welcome! Ask me about our programs.");
}

#[tokio::test]
async fn tampered_body_is_rejected() {
    let harness = harness("topsecret");
    let body = inbound_body("wamid.EVIL", "hello");
    let signature = sign("topsecret", &body);
    let mut tampered = body.clone();
    let len = tampered.len();
    tampered[len - 5] ^= 1;

    let response = router(harness.state)
        .oneshot(
            Request::post("/webhook")
                .header("x-hub-signature-256", signature)
                .body(Body::from(tampered))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn redelivery_within_window_is_suppressed() {
    let mut harness = harness("");
    let body = inbound_body("wamid.ONCE", "hello");
    let app = router(harness.state.clone());

    for expected_accepted in [1, 0] {
        let response = app
            .clone()
            .oneshot(
                Request::post("/webhook")
                    .body(Body::from(body.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_json(response).await["accepted"], expected_accepted);
    }

    harness.replies.recv().await.unwrap();
    // Only one reply despite two deliveries.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(harness.sender.sent.lock().len(), 1);
}

#[tokio::test]
async fn status_receipts_update_tracking() {
    let harness = harness("");
    let body = serde_json::to_vec(&json!({
        "object": "whatsapp_business_account",
        "entry": [{"changes": [{"value": {
            "statuses": [
                {"id": "wamid.OUT", "status": "read", "timestamp": "1700000300",
                 "recipient_id": "212600000001"},
                {"id": "wamid.OUT", "status": "delivered", "timestamp": "1700000200",
                 "recipient_id": "212600000001"}
            ]
        }}]}]
    }))
    .unwrap();

    let response = router(harness.state.clone())
        .oneshot(Request::post("/webhook").body(Body::from(body)).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        harness.state.status.current_state("wamid.OUT"),
        Some(courier::webhook::DeliveryState::Read)
    );
}

#[tokio::test]
async fn oversized_body_is_refused() {
    let harness = harness("");
    let huge = vec![b'x'; 80_000];
    let response = router(harness.state)
        .oneshot(Request::post("/webhook").body(Body::from(huge)).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
