/**
 * NOTIFICATION CARD - what the operator sees for one DOWN episode
 *
 * ROLE: mirror a host's status into a chat message that can be updated in
 * place, carry the correlation id that ties a button click back to the episode,
 * and render the whole thing as a pure function of its own fields.
 *
 * POSTING: create-or-update. The first successful post records the message
 * handle; later posts edit that message. An unchanged payload is not re-sent.
 */

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::gateway::{CardAction, CardPayload, MessageHandle, MessagingGateway};
use crate::models::HostStatus;

pub const REBOOT_ACTION: &str = "reboot";

const POST_ATTEMPTS: u32 = 3;
const POST_BACKOFF: Duration = Duration::from_millis(500);

/// Who asked for the power cycle of this episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationRequest {
    Automatic,
    Human { user_id: String, user_name: String },
}

#[derive(Debug, Clone)]
pub struct NotificationCard {
    pub correlation_id: String,
    pub host_id: String,
    pub status: HostStatus,
    /// The episode began because a remediation did not hold.
    pub recurred: bool,
    pub remediation: Option<RemediationRequest>,
    pub error: bool,
    pub dropping_to_supervised: bool,
    pub recovering_to_automatic: bool,
    pub message: Option<MessageHandle>,
    last_posted: Option<CardPayload>,
}

pub type CardRef = Arc<Mutex<NotificationCard>>;

impl NotificationCard {
    pub fn new(correlation_id: String, host_id: String, recurred: bool) -> Self {
        Self {
            correlation_id,
            host_id,
            status: HostStatus::Down,
            recurred,
            remediation: None,
            error: false,
            dropping_to_supervised: false,
            recovering_to_automatic: false,
            message: None,
            last_posted: None,
        }
    }

    /// Still waiting for somebody to press the button.
    pub fn accepts_remediation(&self) -> bool {
        self.status == HostStatus::Down && self.remediation.is_none()
    }

    pub fn render(&self) -> CardPayload {
        let mut lines: Vec<String> = Vec::new();

        if self.recurred {
            lines.push(":warning: Host stopped responding again after a reboot.".into());
        } else {
            lines.push("Host is not responding to reachability probes.".into());
        }

        match &self.remediation {
            Some(RemediationRequest::Human { user_id, .. }) => {
                lines.push(format!(":white_check_mark: Reboot requested by <@{}>.", user_id))
            }
            Some(RemediationRequest::Automatic) => {
                lines.push(":robot_face: Reboot requested automatically.".into())
            }
            None => {}
        }

        if self.error {
            lines.push(":x: Remote power command failed.".into());
        }

        match self.status {
            HostStatus::WaitingReboot | HostStatus::TestingReboot => {
                lines.push(":hourglass_flowing_sand: Rebooting, waiting for the host to come back.".into())
            }
            HostStatus::Normal => lines.push(":white_check_mark: Host is responding again.".into()),
            HostStatus::Down if self.remediation.is_some() => {
                lines.push(":x: Reboot did not bring the host back.".into())
            }
            HostStatus::Down | HostStatus::Unknown => {}
        }

        if self.dropping_to_supervised {
            lines.push(":lock: Switched to supervised mode, further reboots need confirmation.".into());
        }
        if self.recovering_to_automatic {
            lines.push(":unlock: Switched back to automatic mode.".into());
        }

        let (title, color) = match self.status {
            HostStatus::Normal => (format!("{} is back", self.host_id), "#2eb886"),
            HostStatus::WaitingReboot | HostStatus::TestingReboot => {
                (format!("{} is rebooting", self.host_id), "#daa038")
            }
            HostStatus::Down | HostStatus::Unknown => {
                (format!("{} is not responding", self.host_id), "#a30200")
            }
        };

        let actions = if self.accepts_remediation() {
            vec![CardAction {
                name: REBOOT_ACTION.into(),
                text: "Force Reboot".into(),
                value: REBOOT_ACTION.into(),
                style: Some("danger".into()),
            }]
        } else {
            Vec::new()
        };

        CardPayload {
            title,
            text: lines.join("\n"),
            color: color.into(),
            callback_id: self.correlation_id.clone(),
            actions,
        }
    }
}

/// Sends cards to one channel through a gateway.
#[derive(Clone)]
pub struct Notifier {
    gateway: Arc<dyn MessagingGateway>,
    channel: String,
}

impl Notifier {
    pub fn new(gateway: Arc<dyn MessagingGateway>, channel: impl Into<String>) -> Self {
        Self {
            gateway,
            channel: channel.into(),
        }
    }

    pub fn gateway(&self) -> &Arc<dyn MessagingGateway> {
        &self.gateway
    }

    /// Create-or-update. Returns whether the card is now displayed as rendered.
    pub async fn post(&self, card: &CardRef) -> bool {
        let (payload, handle) = {
            let c = card.lock();
            let payload = c.render();
            if c.message.is_some() && c.last_posted.as_ref() == Some(&payload) {
                return true;
            }
            (payload, c.message.clone())
        };

        for attempt in 1..=POST_ATTEMPTS {
            let result = match &handle {
                None => self
                    .gateway
                    .post_message(&self.channel, &payload)
                    .await
                    .map(Some),
                Some(h) => self.gateway.update_message(h, &payload).await.map(|_| None),
            };
            match result {
                Ok(new_handle) => {
                    let mut c = card.lock();
                    if let Some(h) = new_handle {
                        c.message = Some(h);
                    }
                    c.last_posted = Some(payload);
                    // one-shot annotations have now been seen
                    c.dropping_to_supervised = false;
                    c.recovering_to_automatic = false;
                    return true;
                }
                Err(e) => {
                    warn!(
                        "[card {}] post attempt {}/{} failed: {}",
                        payload.callback_id, attempt, POST_ATTEMPTS, e
                    );
                    if attempt < POST_ATTEMPTS {
                        tokio::time::sleep(POST_BACKOFF * attempt).await;
                    }
                }
            }
        }
        false
    }

    pub async fn tell(&self, channel: &str, user_id: &str, text: &str) {
        if let Err(e) = self.gateway.post_ephemeral(channel, text, user_id).await {
            warn!("[notify] ephemeral to {} failed: {}", user_id, e);
        }
    }
}
