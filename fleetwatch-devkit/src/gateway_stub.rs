/*!
Mock messaging gateway

Stands in for Slack: every post, update and ephemeral is recorded (and pushed
to the shared timeline) so tests can assert what the operator would have seen.
Failures can be injected to exercise the retry path.
*/

use async_trait::async_trait;
use fleetwatch_kernel::gateway::{CardPayload, GatewayError, MessageHandle, MessagingGateway};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::timeline::Timeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SentKind {
    Post,
    Update,
    Ephemeral,
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub kind: SentKind,
    pub channel: String,
    pub ts: Option<String>,
    pub payload: Option<CardPayload>,
    pub text: Option<String>,
    pub user: Option<String>,
}

pub struct MockGateway {
    sent: Mutex<Vec<SentMessage>>,
    next_ts: AtomicU32,
    failures_left: AtomicU32,
    timeline: Timeline,
}

impl MockGateway {
    pub fn new(timeline: Timeline) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            next_ts: AtomicU32::new(1),
            failures_left: AtomicU32::new(0),
            timeline,
        }
    }

    /// The next `n` post/update calls fail with an API error.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    fn injected_failure(&self) -> Option<GatewayError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left == 0 {
            return None;
        }
        self.failures_left.store(left - 1, Ordering::SeqCst);
        Some(GatewayError::Api("injected failure".into()))
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn count(&self, kind: SentKind) -> usize {
        self.sent.lock().iter().filter(|m| m.kind == kind).count()
    }

    /// Posts and updates of one card, in order.
    pub fn card_messages(&self, callback_id: &str) -> Vec<SentMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.payload.as_ref().map(|p| p.callback_id == callback_id).unwrap_or(false))
            .cloned()
            .collect()
    }

    /// What the operator currently sees for this card.
    pub fn last_payload(&self, callback_id: &str) -> Option<CardPayload> {
        self.card_messages(callback_id).last().and_then(|m| m.payload.clone())
    }

    pub fn ephemerals_for(&self, user: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.kind == SentKind::Ephemeral && m.user.as_deref() == Some(user))
            .filter_map(|m| m.text.clone())
            .collect()
    }
}

#[async_trait]
impl MessagingGateway for MockGateway {
    async fn post_message(&self, channel: &str, payload: &CardPayload) -> Result<MessageHandle, GatewayError> {
        if let Some(e) = self.injected_failure() {
            return Err(e);
        }
        let ts = format!("1000.{:06}", self.next_ts.fetch_add(1, Ordering::SeqCst));
        self.timeline.push(format!("post {}", payload.callback_id));
        self.sent.lock().push(SentMessage {
            kind: SentKind::Post,
            channel: channel.to_string(),
            ts: Some(ts.clone()),
            payload: Some(payload.clone()),
            text: None,
            user: None,
        });
        Ok(MessageHandle {
            channel: channel.to_string(),
            ts,
        })
    }

    async fn update_message(&self, handle: &MessageHandle, payload: &CardPayload) -> Result<(), GatewayError> {
        if let Some(e) = self.injected_failure() {
            return Err(e);
        }
        self.timeline.push(format!("update {}", payload.callback_id));
        self.sent.lock().push(SentMessage {
            kind: SentKind::Update,
            channel: handle.channel.clone(),
            ts: Some(handle.ts.clone()),
            payload: Some(payload.clone()),
            text: None,
            user: None,
        });
        Ok(())
    }

    async fn post_ephemeral(&self, channel: &str, text: &str, user_id: &str) -> Result<(), GatewayError> {
        self.timeline.push(format!("ephemeral {}", user_id));
        self.sent.lock().push(SentMessage {
            kind: SentKind::Ephemeral,
            channel: channel.to_string(),
            ts: None,
            payload: None,
            text: Some(text.to_string()),
            user: Some(user_id.to_string()),
        });
        Ok(())
    }
}
