/**
 * HOST - per-host lifecycle state machine
 *
 * ROLE: own one monitored host's status, supervision flag, failure counter and
 * pending retest timer; apply transitions and their side effects (card sync,
 * remote power cycle, delayed retest, console preview loop).
 *
 * SERIALIZATION: every probe cycle, transition and human request runs under the
 * host's async mutex. `apply` may recurse (DOWN -> WAITING_REBOOT -> DOWN) while
 * holding it; the inner call completes before the outer one returns.
 *
 * TIMER: the retest timer is a spawned task tagged with a generation number.
 * Every transition aborts it; a timer that fires late with a stale generation
 * does nothing.
 */

use futures::future::BoxFuture;
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::card::{CardRef, Notifier, RemediationRequest};
use crate::config::{CommandsConf, HostConf, MonitorPolicy};
use crate::events::{EventSender, StatusEvent};
use crate::execution::{render_command, CommandRunner, RunError};
use crate::models::{HostSnapshot, HostStatus};
use crate::preview::{ConsolePreview, ConsolePreviewService};
use crate::registry::CardRegistry;
use crate::slack::Actor;
use crate::state::{new_state, Shared};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HostError {
    #[error("host {host}: {target} is not a valid transition target")]
    ProtocolViolation { host: String, target: HostStatus },
}

/// Result of a human remediation request once it reached the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationOutcome {
    /// The card was accepted and the power cycle ran (successfully or not).
    Started,
    /// The correlation id is no longer the host's active card.
    Stale,
    /// The episode already has a request, or the host is no longer DOWN.
    AlreadyHandled,
}

/// Everything a host needs from the outside world. Shared by the whole fleet.
pub struct HostServices {
    pub runner: Arc<dyn CommandRunner>,
    pub notifier: Notifier,
    pub registry: Arc<CardRegistry>,
    pub policy: MonitorPolicy,
    pub commands: CommandsConf,
    pub events: Option<EventSender>,
    pub preview: Option<Arc<dyn ConsolePreviewService>>,
}

struct RetestTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct HostInner {
    status: HostStatus,
    supervised: bool,
    failures: u32,
    retest: Option<RetestTimer>,
    timer_generation: u64,
    preview_task: Option<JoinHandle<()>>,
}

pub struct Host {
    conf: HostConf,
    services: Arc<HostServices>,
    inner: Mutex<HostInner>,
    snapshot: Shared<HostSnapshot>,
    latest_preview: Shared<Option<ConsolePreview>>,
}

impl Host {
    pub fn new(conf: HostConf, services: Arc<HostServices>) -> Arc<Self> {
        let supervised = services.policy.supervised_by_default || conf.power.is_none();
        let snapshot = HostSnapshot {
            host_id: conf.id.clone(),
            address: conf.address.clone(),
            status: HostStatus::Unknown,
            supervised,
            consecutive_failures: 0,
            power_control: conf.power.is_some(),
            retest_pending: false,
            active_card: None,
        };
        Arc::new(Self {
            conf,
            services,
            inner: Mutex::new(HostInner {
                status: HostStatus::Unknown,
                supervised,
                failures: 0,
                retest: None,
                timer_generation: 0,
                preview_task: None,
            }),
            snapshot: new_state(snapshot),
            latest_preview: new_state(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.conf.id
    }

    pub fn snapshot(&self) -> HostSnapshot {
        self.snapshot.lock().clone()
    }

    pub fn latest_preview(&self) -> Option<ConsolePreview> {
        self.latest_preview.lock().clone()
    }

    /// Supervision flag this host returns to after a recovery. Without a power
    /// controller a host can never reboot itself, so it stays supervised.
    fn default_supervised(&self) -> bool {
        self.services.policy.supervised_by_default || self.conf.power.is_none()
    }

    fn publish_snapshot(&self, inner: &HostInner) {
        let active_card = self
            .services
            .registry
            .active_for(&self.conf.id)
            .map(|c| c.lock().correlation_id.clone());
        let mut snap = self.snapshot.lock();
        snap.status = inner.status;
        snap.supervised = inner.supervised;
        snap.consecutive_failures = inner.failures;
        snap.retest_pending = inner.retest.is_some();
        snap.active_card = active_card;
    }

    /// One reachability check followed by whatever transition it implies.
    pub async fn probe(self: &Arc<Self>) -> Result<(), HostError> {
        let mut inner = self.inner.lock().await;
        let policy = &self.services.policy;
        let count = policy.probe_count.to_string();
        let deadline = policy.probe_deadline_secs.to_string();
        let line = render_command(
            &self.services.commands.probe,
            &[
                ("address", self.conf.address.as_str()),
                ("count", count.as_str()),
                ("deadline", deadline.as_str()),
                ("host_id", self.conf.id.as_str()),
            ],
        );

        match self.services.runner.run(&line, policy.probe_timeout()).await {
            Ok(_) => {
                inner.failures = 0;
                self.publish_snapshot(&inner);
                self.apply(&mut inner, HostStatus::Normal).await
            }
            Err(e) => {
                if inner.status == HostStatus::WaitingReboot {
                    debug!("[host {}] probe failed while waiting for reboot: {}", self.conf.id, e);
                    return Ok(());
                }
                inner.failures += 1;
                warn!(
                    "[host {}] probe failed ({}/{}): {}",
                    self.conf.id, inner.failures, policy.failure_threshold, e
                );
                self.publish_snapshot(&inner);
                // after a reboot the very next probe decides
                if inner.status == HostStatus::TestingReboot || inner.failures >= policy.failure_threshold {
                    self.apply(&mut inner, HostStatus::Down).await
                } else {
                    Ok(())
                }
            }
        }
    }

    pub async fn transition(self: &Arc<Self>, target: HostStatus) -> Result<(), HostError> {
        let mut inner = self.inner.lock().await;
        self.apply(&mut inner, target).await
    }

    /// A human pressed the reboot button on `correlation_id`.
    pub async fn request_remediation(
        self: &Arc<Self>,
        correlation_id: &str,
        actor: &Actor,
    ) -> Result<RemediationOutcome, HostError> {
        let mut inner = self.inner.lock().await;

        // re-check under the lock: the card may have been retired while we waited
        let card = match self.services.registry.resolve(correlation_id) {
            Some(card) if card.lock().host_id == self.conf.id => card,
            _ => return Ok(RemediationOutcome::Stale),
        };
        {
            let mut c = card.lock();
            if !c.accepts_remediation() || inner.status != HostStatus::Down {
                return Ok(RemediationOutcome::AlreadyHandled);
            }
            c.remediation = Some(RemediationRequest::Human {
                user_id: actor.id.clone(),
                user_name: actor.name.clone(),
            });
        }
        info!("[host {}] reboot requested by {}", self.conf.id, actor.name);
        self.apply(&mut inner, HostStatus::WaitingReboot).await?;
        Ok(RemediationOutcome::Started)
    }

    /// Flag `card` as failed and show it, under the host's lock.
    pub async fn report_card_error(self: &Arc<Self>, card: &CardRef) {
        let _inner = self.inner.lock().await;
        card.lock().error = true;
        self.services.notifier.post(card).await;
    }

    fn apply<'a>(
        self: &'a Arc<Self>,
        inner: &'a mut HostInner,
        target: HostStatus,
    ) -> BoxFuture<'a, Result<(), HostError>> {
        Box::pin(async move {
            if target == inner.status {
                return Ok(());
            }
            if target == HostStatus::Unknown {
                let err = HostError::ProtocolViolation {
                    host: self.conf.id.clone(),
                    target,
                };
                error!("[host {}] {}", self.conf.id, err);
                return Err(err);
            }

            let old = inner.status;
            inner.status = target;
            inner.failures = 0;
            if let Some(timer) = inner.retest.take() {
                timer.handle.abort();
            }
            info!("[host {}] {} -> {}", self.conf.id, old, target);

            let active = self.services.registry.active_for(&self.conf.id);
            if let Some(card) = &active {
                card.lock().status = target;
            }
            self.sync_preview(inner);
            self.emit(old, inner);
            self.publish_snapshot(inner);

            match target {
                HostStatus::Unknown => unreachable!("rejected above"),
                HostStatus::TestingReboot => {}
                HostStatus::Normal => {
                    let default = self.default_supervised();
                    if inner.supervised != default {
                        if let Some(card) = &active {
                            card.lock().recovering_to_automatic = true;
                        }
                        inner.supervised = default;
                        info!("[host {}] supervision restored to {}", self.conf.id, mode_name(default));
                        self.publish_snapshot(inner);
                    }
                    if let Some(card) = &active {
                        self.services.notifier.post(card).await;
                    }
                }
                HostStatus::Down => {
                    let recurred = matches!(old, HostStatus::TestingReboot | HostStatus::WaitingReboot);
                    if recurred {
                        if let Some(prev) = &active {
                            if !inner.supervised {
                                prev.lock().dropping_to_supervised = true;
                            }
                        }
                        inner.supervised = true;
                        info!("[host {}] remediation did not hold, now supervised", self.conf.id);
                        if let Some(prev) = &active {
                            self.services.notifier.post(prev).await;
                        }
                    }

                    let card = self.services.registry.create_for(&self.conf.id, recurred);
                    self.publish_snapshot(inner);
                    if inner.supervised || self.conf.power.is_none() {
                        self.services.notifier.post(&card).await;
                    } else {
                        card.lock().remediation = Some(RemediationRequest::Automatic);
                        self.apply(inner, HostStatus::WaitingReboot).await?;
                    }
                }
                HostStatus::WaitingReboot => {
                    // operator sees the reboot before it happens
                    if let Some(card) = &active {
                        self.services.notifier.post(card).await;
                    }
                    match self.power_cycle().await {
                        Ok(()) => {
                            self.arm_retest(inner);
                            self.publish_snapshot(inner);
                        }
                        Err(e) => {
                            warn!("[host {}] power cycle failed: {}", self.conf.id, e);
                            if let Some(card) = &active {
                                card.lock().error = true;
                            }
                            self.apply(inner, HostStatus::Down).await?;
                        }
                    }
                }
            }
            Ok(())
        })
    }

    async fn power_cycle(&self) -> Result<(), RunError> {
        let Some(power) = &self.conf.power else {
            return Err(RunError::NotConfigured(format!("no power controller for {}", self.conf.id)));
        };
        let timeout = Duration::from_secs(self.services.commands.power_timeout_secs);
        let vars = [
            ("power_address", power.address.as_str()),
            ("username", power.username.as_str()),
            ("password", power.password.as_str()),
            ("host_id", self.conf.id.as_str()),
        ];
        for template in [&self.services.commands.power_reset, &self.services.commands.power_on] {
            let line = render_command(template, &vars);
            self.services.runner.run(&line, timeout).await?;
        }
        info!("[host {}] power cycle issued", self.conf.id);
        Ok(())
    }

    fn arm_retest(self: &Arc<Self>, inner: &mut HostInner) {
        inner.timer_generation += 1;
        let generation = inner.timer_generation;
        let window = self.services.policy.recovery_window();
        let host = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            host.on_retest_due(generation).await;
        });
        inner.retest = Some(RetestTimer { generation, handle });
        debug!("[host {}] retest armed in {:?}", self.conf.id, window);
    }

    async fn on_retest_due(self: &Arc<Self>, generation: u64) {
        let mut inner = self.inner.lock().await;
        if inner.retest.as_ref().map(|t| t.generation) != Some(generation) {
            debug!("[host {}] stale retest timer ignored", self.conf.id);
            return;
        }
        // detach rather than abort: this task is the timer
        inner.retest = None;
        if let Err(e) = self.apply(&mut inner, HostStatus::TestingReboot).await {
            error!("[host {}] retest transition failed: {}", self.conf.id, e);
        }
    }

    fn emit(&self, from: HostStatus, inner: &HostInner) {
        let Some(events) = &self.services.events else {
            return;
        };
        let event = StatusEvent {
            host_id: self.conf.id.clone(),
            from,
            to: inner.status,
            supervised: inner.supervised,
            timestamp: OffsetDateTime::now_utc(),
        };
        if events.send(event).is_err() {
            debug!("[host {}] status event dropped, no listener", self.conf.id);
        }
    }

    /// Keep a capture loop running exactly while the host is down-like.
    fn sync_preview(self: &Arc<Self>, inner: &mut HostInner) {
        if !inner.status.is_down_like() {
            if let Some(task) = inner.preview_task.take() {
                task.abort();
                *self.latest_preview.lock() = None;
                debug!("[host {}] console preview stopped", self.conf.id);
            }
            return;
        }
        if inner.preview_task.is_some() {
            return;
        }
        let (Some(service), Some(power)) = (self.services.preview.clone(), self.conf.power.clone()) else {
            return;
        };
        let interval = self.services.policy.preview_interval();
        let host = Arc::clone(self);
        inner.preview_task = Some(tokio::spawn(async move {
            loop {
                match service.capture(&power).await {
                    Ok(preview) => *host.latest_preview.lock() = Some(preview),
                    Err(e) => warn!("[host {}] console preview failed: {}", host.conf.id, e),
                }
                tokio::time::sleep(interval).await;
            }
        }));
        debug!("[host {}] console preview started", self.conf.id);
    }
}

fn mode_name(supervised: bool) -> &'static str {
    if supervised {
        "supervised"
    } else {
        "automatic"
    }
}
