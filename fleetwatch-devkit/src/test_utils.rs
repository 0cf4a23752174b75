/*!
Test harness for the fleetwatch kernel

Builds a fleet the way `main` does (shared services, one Host per entry,
dispatcher, monitor) but with the mock gateway and the scripted runner. Host
`<id>` probes `<id>.probe`; its power controller, when present, is `<id>.bmc`.
*/

use anyhow::Result;
use fleetwatch_kernel::card::NotificationCard;
use fleetwatch_kernel::config::{CommandsConf, HostConf, MonitorPolicy, PowerConf};
use fleetwatch_kernel::events::{self, EventReceiver, StatusEvent};
use fleetwatch_kernel::preview::ConsolePreviewService;
use fleetwatch_kernel::{
    ActionDispatcher, Actor, CardRegistry, DispatchOutcome, HealthMonitor, Host, HostServices, HostStatus,
    InboundAction, Notifier, SweepReport,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::gateway_stub::MockGateway;
use crate::preview_stub::RecordingPreview;
use crate::runner_stub::{Outcome, ScriptedRunner};
use crate::timeline::Timeline;

pub const CHANNEL: &str = "C-test";

pub struct HarnessBuilder {
    policy: MonitorPolicy,
    hosts: Vec<HostConf>,
    preview: bool,
}

impl HarnessBuilder {
    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.policy.failure_threshold = n;
        self
    }

    pub fn supervised_by_default(mut self, supervised: bool) -> Self {
        self.policy.supervised_by_default = supervised;
        self
    }

    pub fn recovery_window_secs(mut self, secs: u64) -> Self {
        self.policy.recovery_window_secs = secs;
        self
    }

    /// Down hosts with a power controller run the console capture loop
    /// against `TestHarness::preview`.
    pub fn with_preview(mut self) -> Self {
        self.preview = true;
        self
    }

    /// A host with a power controller.
    pub fn host(mut self, id: &str) -> Self {
        self.hosts.push(HostConf {
            id: id.to_string(),
            address: format!("{id}.probe"),
            power: Some(PowerConf {
                address: format!("{id}.bmc"),
                username: "ADMIN".into(),
                password: "ADMIN".into(),
            }),
        });
        self
    }

    pub fn host_without_power(mut self, id: &str) -> Self {
        self.hosts.push(HostConf {
            id: id.to_string(),
            address: format!("{id}.probe"),
            power: None,
        });
        self
    }

    pub fn build(self) -> TestHarness {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init()
            .ok();

        let timeline = Timeline::new();
        let gateway = Arc::new(MockGateway::new(timeline.clone()));
        let runner = Arc::new(ScriptedRunner::new(timeline.clone()));
        let registry = Arc::new(CardRegistry::new());
        let notifier = Notifier::new(gateway.clone(), CHANNEL);
        let (event_tx, event_rx) = events::channel();
        let preview = Arc::new(RecordingPreview::new());
        let preview_service: Option<Arc<dyn ConsolePreviewService>> = if self.preview {
            Some(preview.clone() as Arc<dyn ConsolePreviewService>)
        } else {
            None
        };

        let commands = CommandsConf {
            proxy_host: None,
            probe: "probe {address}".into(),
            power_reset: "power-reset {power_address}".into(),
            power_on: "power-on {power_address}".into(),
            power_timeout_secs: 5,
        };
        let services = Arc::new(HostServices {
            runner: runner.clone(),
            notifier: notifier.clone(),
            registry: Arc::clone(&registry),
            policy: self.policy.clone(),
            commands,
            events: Some(event_tx),
            preview: preview_service,
        });

        let hosts: Vec<Arc<Host>> = self
            .hosts
            .into_iter()
            .map(|conf| Host::new(conf, Arc::clone(&services)))
            .collect();
        let dispatcher = Arc::new(ActionDispatcher::new(&hosts, Arc::clone(&registry), notifier));
        let monitor = HealthMonitor::new(hosts.clone(), self.policy.sweep_period());

        TestHarness {
            gateway,
            runner,
            preview,
            registry,
            hosts,
            dispatcher,
            monitor,
            timeline,
            policy: self.policy,
            events: Mutex::new(event_rx),
        }
    }
}

pub struct TestHarness {
    pub gateway: Arc<MockGateway>,
    pub runner: Arc<ScriptedRunner>,
    pub preview: Arc<RecordingPreview>,
    pub registry: Arc<CardRegistry>,
    pub hosts: Vec<Arc<Host>>,
    pub dispatcher: Arc<ActionDispatcher>,
    pub monitor: HealthMonitor,
    pub timeline: Timeline,
    pub policy: MonitorPolicy,
    events: Mutex<EventReceiver>,
}

impl TestHarness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            policy: MonitorPolicy {
                failure_threshold: 2,
                recovery_window_secs: 300,
                ..MonitorPolicy::default()
            },
            hosts: Vec::new(),
            preview: false,
        }
    }

    pub fn host(&self, id: &str) -> &Arc<Host> {
        self.hosts
            .iter()
            .find(|h| h.id() == id)
            .unwrap_or_else(|| panic!("no host {id} in harness"))
    }

    pub fn status(&self, id: &str) -> HostStatus {
        self.host(id).snapshot().status
    }

    pub fn set_reachable(&self, id: &str, reachable: bool) {
        let outcome = if reachable { Outcome::Ok } else { Outcome::Fail };
        self.runner.set_probe(&format!("{id}.probe"), outcome);
    }

    pub fn set_probe(&self, id: &str, outcome: Outcome) {
        self.runner.set_probe(&format!("{id}.probe"), outcome);
    }

    pub fn set_power(&self, id: &str, outcome: Outcome) {
        self.runner.set_power(&format!("{id}.bmc"), outcome);
    }

    pub async fn sweep(&self) -> SweepReport {
        self.monitor.sweep().await
    }

    pub async fn sweeps(&self, n: usize) {
        for _ in 0..n {
            self.monitor.sweep().await;
        }
    }

    /// Copy of the host's active card.
    pub fn active_card(&self, id: &str) -> Option<NotificationCard> {
        self.registry.active_for(id).map(|c| c.lock().clone())
    }

    pub fn correlation_id(&self, id: &str) -> Option<String> {
        self.active_card(id).map(|c| c.correlation_id)
    }

    pub fn action(&self, correlation_id: &str, user: &str) -> InboundAction {
        InboundAction {
            correlation_id: correlation_id.to_string(),
            action: "reboot".into(),
            actor: Actor {
                id: format!("U-{user}"),
                name: user.to_string(),
            },
            channel: CHANNEL.into(),
        }
    }

    /// A user presses "Force Reboot" on the card with this correlation id.
    pub async fn click(&self, correlation_id: &str, user: &str) -> DispatchOutcome {
        self.dispatcher.dispatch(&self.action(correlation_id, user)).await
    }

    /// Poll until the host reaches `status`. Works with a paused clock too.
    pub async fn wait_for_status(&self, id: &str, status: HostStatus, within: Duration) -> Result<()> {
        let step = Duration::from_millis(10);
        let mut waited = Duration::ZERO;
        while waited <= within {
            if self.status(id) == status {
                return Ok(());
            }
            tokio::time::sleep(step).await;
            waited += step;
        }
        anyhow::bail!("{id} stuck in {} while waiting for {status}", self.status(id))
    }

    /// Drop the listening side: later status events have nowhere to go.
    pub fn close_events(&self) {
        self.events.lock().close();
    }

    pub fn drain_events(&self) -> Vec<StatusEvent> {
        let mut rx = self.events.lock();
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }
}
