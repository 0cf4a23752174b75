use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::card::{Notifier, REBOOT_ACTION};
use crate::host::{Host, RemediationOutcome};
use crate::registry::CardRegistry;
use crate::slack::InboundAction;

pub const STALE_NOTICE: &str =
    "This alert is no longer active (a newer alert replaced it, or the supervisor restarted). Nothing was done.";
pub const HANDLED_NOTICE: &str = "A reboot was already requested for this alert, or the host is no longer down.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Started,
    Stale,
    AlreadyHandled,
    Failed,
    Ignored,
}

/// Routes button clicks back to the host that owns the card.
pub struct ActionDispatcher {
    hosts: HashMap<String, Arc<Host>>,
    registry: Arc<CardRegistry>,
    notifier: Notifier,
}

impl ActionDispatcher {
    pub fn new(hosts: &[Arc<Host>], registry: Arc<CardRegistry>, notifier: Notifier) -> Self {
        let hosts = hosts.iter().map(|h| (h.id().to_string(), Arc::clone(h))).collect();
        Self {
            hosts,
            registry,
            notifier,
        }
    }

    pub async fn dispatch(&self, action: &InboundAction) -> DispatchOutcome {
        if action.action != REBOOT_ACTION {
            warn!("[dispatch] ignoring unknown action {:?}", action.action);
            return DispatchOutcome::Ignored;
        }
        self.on_remediation_requested(action).await
    }

    pub async fn on_remediation_requested(&self, action: &InboundAction) -> DispatchOutcome {
        let Some(card) = self.registry.resolve(&action.correlation_id) else {
            info!("[dispatch] stale action {} from {}", action.correlation_id, action.actor.name);
            self.notifier.tell(&action.channel, &action.actor.id, STALE_NOTICE).await;
            return DispatchOutcome::Stale;
        };
        let host_id = card.lock().host_id.clone();
        let Some(host) = self.hosts.get(&host_id) else {
            error!("[dispatch] card {} points at unknown host {}", action.correlation_id, host_id);
            self.notifier.tell(&action.channel, &action.actor.id, STALE_NOTICE).await;
            return DispatchOutcome::Stale;
        };

        match host.request_remediation(&action.correlation_id, &action.actor).await {
            Ok(RemediationOutcome::Started) => DispatchOutcome::Started,
            Ok(RemediationOutcome::Stale) => {
                self.notifier.tell(&action.channel, &action.actor.id, STALE_NOTICE).await;
                DispatchOutcome::Stale
            }
            Ok(RemediationOutcome::AlreadyHandled) => {
                self.notifier.tell(&action.channel, &action.actor.id, HANDLED_NOTICE).await;
                DispatchOutcome::AlreadyHandled
            }
            Err(e) => {
                error!("[dispatch] remediation of {} failed: {}", host_id, e);
                host.report_card_error(&card).await;
                DispatchOutcome::Failed
            }
        }
    }
}
