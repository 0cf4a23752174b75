//! Slack Web API client and inbound interactive-message parsing.
//!
//! Cards are sent as legacy message attachments whose `callback_id` carries the
//! correlation id, so a button click comes back with exactly that token.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::gateway::{CardPayload, GatewayError, MessageHandle, MessagingGateway};

const API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    error: Option<String>,
    ts: Option<String>,
    channel: Option<String>,
}

impl SlackResponse {
    fn into_result(self) -> Result<Self, GatewayError> {
        if self.ok {
            Ok(self)
        } else {
            Err(GatewayError::Api(self.error.unwrap_or_else(|| "unknown error".into())))
        }
    }
}

fn attachments(payload: &CardPayload) -> Value {
    let actions: Vec<Value> = payload
        .actions
        .iter()
        .map(|a| {
            let mut action = json!({
                "name": a.name,
                "text": a.text,
                "value": a.value,
                "type": "button",
            });
            if let Some(style) = &a.style {
                action["style"] = Value::String(style.clone());
            }
            action
        })
        .collect();
    json!([{
        "color": payload.color,
        "title": payload.title,
        "text": payload.text,
        "fallback": format!("{}\n{}", payload.title, payload.text),
        "callback_id": payload.callback_id,
        "actions": actions,
    }])
}

pub struct SlackGateway {
    client: Client,
    token: String,
}

impl SlackGateway {
    pub fn new(token: String) -> Self {
        Self {
            client: Client::new(),
            token,
        }
    }

    async fn call(&self, method: &str, body: &Value) -> Result<SlackResponse, GatewayError> {
        let resp = self
            .client
            .post(format!("{API_BASE}/{method}"))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        let parsed: SlackResponse = resp.json().await?;
        parsed.into_result()
    }
}

#[async_trait]
impl MessagingGateway for SlackGateway {
    async fn post_message(&self, channel: &str, payload: &CardPayload) -> Result<MessageHandle, GatewayError> {
        let body = json!({
            "channel": channel,
            "text": "",
            "attachments": attachments(payload),
        });
        let resp = self.call("chat.postMessage", &body).await?;
        let ts = resp.ts.ok_or_else(|| GatewayError::Api("missing ts".into()))?;
        Ok(MessageHandle {
            // postMessage answers with the channel id even when given a name
            channel: resp.channel.unwrap_or_else(|| channel.to_string()),
            ts,
        })
    }

    async fn update_message(&self, handle: &MessageHandle, payload: &CardPayload) -> Result<(), GatewayError> {
        let body = json!({
            "channel": handle.channel,
            "ts": handle.ts,
            "text": "",
            "attachments": attachments(payload),
        });
        self.call("chat.update", &body).await.map(|_| ())
    }

    async fn post_ephemeral(&self, channel: &str, text: &str, user_id: &str) -> Result<(), GatewayError> {
        let body = json!({
            "channel": channel,
            "text": text,
            "user": user_id,
        });
        self.call("chat.postEphemeral", &body).await.map(|_| ())
    }
}

/// Who clicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub name: String,
}

/// A button click, reduced to what the dispatcher needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundAction {
    pub correlation_id: String,
    pub action: String,
    pub actor: Actor,
    pub channel: String,
}

#[derive(Debug, Deserialize)]
struct InteractivePayload {
    callback_id: String,
    token: Option<String>,
    user: IdName,
    channel: IdName,
    #[serde(default)]
    actions: Vec<ClickedAction>,
}

#[derive(Debug, Deserialize)]
struct IdName {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ClickedAction {
    name: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InboundError {
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("verification token mismatch")]
    BadToken,
}

/// Parse the `payload` form field of an interactive-message request.
/// When `verification_token` is set, the payload's `token` must match it.
pub fn parse_interaction(payload_json: &str, verification_token: Option<&str>) -> Result<InboundAction, InboundError> {
    let payload: InteractivePayload =
        serde_json::from_str(payload_json).map_err(|e| InboundError::Malformed(e.to_string()))?;

    if let Some(expected) = verification_token {
        if payload.token.as_deref() != Some(expected) {
            return Err(InboundError::BadToken);
        }
    }

    let action = payload
        .actions
        .first()
        .map(|a| a.name.clone())
        .ok_or_else(|| InboundError::Malformed("no action in payload".into()))?;

    let name = if payload.user.name.is_empty() {
        payload.user.id.clone()
    } else {
        payload.user.name
    };

    Ok(InboundAction {
        correlation_id: payload.callback_id,
        action,
        actor: Actor { id: payload.user.id, name },
        channel: payload.channel.id,
    })
}
