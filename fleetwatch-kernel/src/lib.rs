//! fleetwatch kernel: watches a fixed fleet over a reachability probe,
//! power-cycles hosts that stop answering (after human confirmation when the
//! host is supervised) and keeps one Slack card per outage in sync with each
//! host's state.

pub mod card;
pub mod config;
pub mod dispatcher;
pub mod events;
pub mod execution;
pub mod gateway;
pub mod host;
pub mod http;
pub mod models;
pub mod monitor;
pub mod mqtt;
pub mod preview;
pub mod registry;
pub mod slack;
pub mod state;

pub use card::{CardRef, NotificationCard, Notifier, RemediationRequest};
pub use config::{HostConf, KernelConfig, MonitorPolicy, PowerConf};
pub use dispatcher::{ActionDispatcher, DispatchOutcome};
pub use execution::{CommandRunner, RunError, ShellRunner};
pub use gateway::{CardPayload, GatewayError, MessageHandle, MessagingGateway};
pub use host::{Host, HostError, HostServices, RemediationOutcome};
pub use models::{HostSnapshot, HostStatus};
pub use monitor::{HealthMonitor, SweepReport};
pub use registry::CardRegistry;
pub use slack::{Actor, InboundAction};
