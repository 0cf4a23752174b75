//! Outbound messaging surface.
//!
//! A [`MessagingGateway`] posts a card once, updates it in place afterwards and
//! can answer a single user privately. The Slack client lives in
//! [`crate::slack`]; tests use the recording double from the devkit.

use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned error: {0}")]
    Api(String),
}

/// Where a posted message lives, as returned by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageHandle {
    pub channel: String,
    pub ts: String,
}

/// Button attached to a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardAction {
    pub name: String,
    pub text: String,
    pub value: String,
    pub style: Option<String>,
}

/// Rendered card, ready to be sent. Two equal payloads display identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardPayload {
    pub title: String,
    pub text: String,
    pub color: String,
    pub callback_id: String,
    pub actions: Vec<CardAction>,
}

impl CardPayload {
    pub fn has_action(&self, name: &str) -> bool {
        self.actions.iter().any(|a| a.name == name)
    }
}

#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn post_message(&self, channel: &str, payload: &CardPayload) -> Result<MessageHandle, GatewayError>;

    async fn update_message(&self, handle: &MessageHandle, payload: &CardPayload) -> Result<(), GatewayError>;

    async fn post_ephemeral(&self, channel: &str, text: &str, user_id: &str) -> Result<(), GatewayError>;
}
