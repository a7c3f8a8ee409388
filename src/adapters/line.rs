//! LINE Messaging API client.
//!
//! Replies answer a webhook event through its reply token; pushes deliver
//! pairing notifications. Push failures are logged and swallowed: the
//! pairing commit is already durable and must not depend on delivery.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::Result;
use crate::notify::{Notifier, OutgoingMessage};

/// LINE Messaging API client
#[derive(Clone)]
pub struct LineClient {
    client: Client,
    api_base: String,
    access_token: String,
}

#[derive(Serialize)]
struct TextMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

impl TextMessage {
    fn new(text: &str) -> Self {
        Self {
            kind: "text",
            text: text.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ReplyPayload {
    #[serde(rename = "replyToken")]
    reply_token: String,
    messages: Vec<TextMessage>,
}

#[derive(Serialize)]
struct PushPayload {
    to: String,
    messages: Vec<TextMessage>,
}

impl LineClient {
    pub fn new(api_base: &str, access_token: &str) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    /// Answer a webhook event
    pub async fn reply(&self, reply_token: &str, text: &str) -> Result<()> {
        let payload = ReplyPayload {
            reply_token: reply_token.to_string(),
            messages: vec![TextMessage::new(text)],
        };
        self.post("/v2/bot/message/reply", &payload).await
    }

    /// Push a message outside the reply window
    pub async fn push(&self, to: &str, text: &str) -> Result<()> {
        let payload = PushPayload {
            to: to.to_string(),
            messages: vec![TextMessage::new(text)],
        };
        self.post("/v2/bot/message/push", &payload).await
    }

    async fn post<T: Serialize>(&self, path: &str, payload: &T) -> Result<()> {
        let url = format!("{}{}", self.api_base, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        debug!(status = %response.status(), %url, "LINE API call succeeded");
        Ok(())
    }
}

/// Fire-and-forget notification delivery over LINE pushes
pub struct LineNotifier {
    client: Arc<LineClient>,
}

impl LineNotifier {
    pub fn new(client: Arc<LineClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for LineNotifier {
    async fn push(&self, message: OutgoingMessage) {
        if let Err(err) = self.client.push(&message.target_id, &message.text).await {
            error!(target = %message.target_id, %err, "Pairing notification push failed");
        }
    }
}
