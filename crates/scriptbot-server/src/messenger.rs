//! Adapter between the messaging platform and the engine.

use std::time::Duration;

use reqwest::Client;
use scriptbot_config::Messenger as MessengerConfig;
use scriptbot_contracts::{
    InboundEvent, OutboundMessage, Recipient, SendRequest, SendResponse, WebhookBody, PAGE_OBJECT,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("verification request is missing hub.mode or hub.verify_token")]
    MissingParams,
    #[error("verification token mismatch")]
    TokenMismatch,
    #[error("developer password mismatch")]
    PasswordMismatch,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("send transport failed: {0}")]
    Transport(String),
    #[error("send api returned http {0}")]
    Http(u16),
    #[error("send api reported error: {0}")]
    Platform(String),
}

#[derive(Debug, Error)]
#[error("webhook object `{0}` is not a page subscription")]
pub struct NotAPageEvent(pub String);

#[derive(Debug, Default, Deserialize)]
pub struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Subscription handshake: echoes the challenge when the token matches.
pub fn verify_subscription(query: &VerifyQuery, verify_token: &str) -> Result<String, AuthError> {
    let (Some(mode), Some(token)) = (query.mode.as_deref(), query.verify_token.as_deref()) else {
        return Err(AuthError::MissingParams);
    };
    if mode == "subscribe" && token == verify_token {
        Ok(query.challenge.clone().unwrap_or_default())
    } else {
        Err(AuthError::TokenMismatch)
    }
}

/// Unwraps the webhook envelope into normalized events. Echoes of the page's
/// own messages are dropped and quick-reply taps become postbacks.
pub fn normalize_webhook(body: WebhookBody) -> Result<Vec<InboundEvent>, NotAPageEvent> {
    if body.object != PAGE_OBJECT {
        return Err(NotAPageEvent(body.object));
    }
    let mut events = Vec::new();
    for event in body.entry.into_iter().flat_map(|entry| entry.messaging) {
        let sender_id = event.sender.id;
        if let Some(message) = event.message {
            if message.is_echo {
                debug!(sender_id = %sender_id, "dropping echo");
                continue;
            }
            if let Some(quick_reply) = message.quick_reply {
                events.push(InboundEvent::Postback {
                    sender_id,
                    payload: quick_reply.payload,
                });
            } else if let Some(text) = message.text {
                events.push(InboundEvent::Text { sender_id, text });
            } else {
                debug!(sender_id = %sender_id, "dropping message without text");
            }
        } else if let Some(postback) = event.postback {
            events.push(InboundEvent::Postback {
                sender_id,
                payload: postback.payload,
            });
        }
    }
    Ok(events)
}

pub struct MessengerClient {
    send_api_url: String,
    page_access_token: String,
    client: Client,
}

impl MessengerClient {
    pub fn new(cfg: &MessengerConfig) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            send_api_url: cfg.send_api_url.clone(),
            page_access_token: cfg.page_access_token.clone(),
            client,
        })
    }

    /// One attempt, no retry.
    pub async fn send(
        &self,
        recipient_id: &str,
        message: &OutboundMessage,
    ) -> Result<(), GatewayError> {
        let request = SendRequest {
            recipient: Recipient {
                id: recipient_id.to_string(),
            },
            message: message.clone(),
        };
        let response = self
            .client
            .post(&self.send_api_url)
            .query(&[("access_token", self.page_access_token.as_str())])
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        let body: SendResponse = match response.json().await {
            Ok(v) => v,
            Err(_) if !status.is_success() => return Err(GatewayError::Http(status.as_u16())),
            Err(_) => SendResponse::default(),
        };
        if let Some(error) = body.error {
            return Err(GatewayError::Platform(error.to_string()));
        }
        if !status.is_success() {
            return Err(GatewayError::Http(status.as_u16()));
        }
        debug!(
            recipient_id,
            message_id = body.message_id.as_deref().unwrap_or(""),
            "message sent"
        );
        Ok(())
    }
}
