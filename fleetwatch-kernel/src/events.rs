use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::models::HostStatus;

pub const STATUS_TOPIC: &str = "fleetwatch/hosts/status@v1";

/// Emitted once per effective transition.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StatusEvent {
    pub host_id: String,
    pub from: HostStatus,
    pub to: HostStatus,
    pub supervised: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

pub type EventSender = mpsc::UnboundedSender<StatusEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<StatusEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
