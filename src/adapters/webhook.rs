//! LINE webhook endpoint.
//!
//! Verifies the `X-Line-Signature` HMAC-SHA256 header over the raw body,
//! normalizes text-message events into [`IncomingMessage`] and answers each
//! through the reply API. Every event is handled to completion before the
//! webhook acknowledges, so LINE's retry applies to the whole batch.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::adapters::LineClient;
use crate::lifecycle::{Controller, IncomingMessage};

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookState {
    pub controller: Arc<Controller>,
    pub line: Arc<LineClient>,
    pub channel_secret: String,
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/callback", post(callback))
        .with_state(state)
}

#[derive(Deserialize)]
struct WebhookBody {
    #[serde(default)]
    events: Vec<Event>,
}

#[derive(Deserialize)]
struct Event {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "replyToken")]
    reply_token: Option<String>,
    source: Option<EventSource>,
    message: Option<EventMessage>,
}

#[derive(Deserialize)]
struct EventSource {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

#[derive(Deserialize)]
struct EventMessage {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

async fn callback(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if !signature_valid(&state.channel_secret, &headers, &body) {
        warn!("Webhook signature verification failed");
        return (StatusCode::BAD_REQUEST, "bad signature");
    }

    let parsed: WebhookBody = match serde_json::from_slice(&body) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(%err, "Unparseable webhook body");
            return (StatusCode::BAD_REQUEST, "bad body");
        }
    };

    for event in parsed.events {
        let Some((requester_id, text, reply_token)) = text_event(&event) else {
            debug!(kind = %event.kind, "Ignoring non-text event");
            continue;
        };

        let reply = state
            .controller
            .handle(IncomingMessage {
                requester_id,
                text,
            })
            .await;

        if let Err(err) = state.line.reply(&reply_token, &reply).await {
            error!(%err, "Reply delivery failed");
        }
    }

    (StatusCode::OK, "OK")
}

fn text_event(event: &Event) -> Option<(String, String, String)> {
    if event.kind != "message" {
        return None;
    }
    let message = event.message.as_ref()?;
    if message.kind != "text" {
        return None;
    }
    Some((
        event.source.as_ref()?.user_id.clone()?,
        message.text.clone()?,
        event.reply_token.clone()?,
    ))
}

fn signature_valid(channel_secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    let Some(signature) = headers
        .get("x-line-signature")
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(channel_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Notifier, OutgoingMessage};
    use crate::registration::MemorySessions;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn push(&self, _message: OutgoingMessage) {}
    }

    fn test_router(secret: &str) -> Router {
        let controller = Arc::new(Controller::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemorySessions::new(1800)),
            Arc::new(NullNotifier),
            3,
        ));
        let line = Arc::new(LineClient::new("http://127.0.0.1:9", "token"));
        router(Arc::new(WebhookState {
            controller,
            line,
            channel_secret: secret.to_string(),
        }))
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    #[tokio::test]
    async fn test_rejects_bad_signature() {
        let app = test_router("secret");
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/callback")
                    .header("x-line-signature", "bm90LXRoZS1zaWduYXR1cmU=")
                    .body(Body::from(r#"{"events":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_accepts_signed_empty_batch() {
        let app = test_router("secret");
        let body = r#"{"events":[]}"#;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/callback")
                    .header("x-line-signature", sign("secret", body.as_bytes()))
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_signature_rejected() {
        let app = test_router("secret");
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/callback")
                    .body(Body::from(r#"{"events":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
