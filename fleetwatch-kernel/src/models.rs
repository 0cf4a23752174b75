use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a monitored host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostStatus {
    #[default]
    Unknown,
    Normal,
    Down,
    WaitingReboot,
    TestingReboot,
}

impl HostStatus {
    /// Down, or somewhere inside a remediation attempt.
    pub fn is_down_like(self) -> bool {
        match self {
            HostStatus::Down | HostStatus::WaitingReboot | HostStatus::TestingReboot => true,
            HostStatus::Unknown | HostStatus::Normal => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostStatus::Unknown => "UNKNOWN",
            HostStatus::Normal => "NORMAL",
            HostStatus::Down => "DOWN",
            HostStatus::WaitingReboot => "WAITING_REBOOT",
            HostStatus::TestingReboot => "TESTING_REBOOT",
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a host, readable without waiting on its transition lock.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HostSnapshot {
    pub host_id: String,
    pub address: String,
    pub status: HostStatus,
    pub supervised: bool,
    pub consecutive_failures: u32,
    pub power_control: bool,
    pub retest_pending: bool,
    pub active_card: Option<String>,
}
