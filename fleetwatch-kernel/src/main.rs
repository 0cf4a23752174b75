/**
 * FLEETWATCH - entry point
 *
 * ROLE: load the configuration, build one Host per configured machine around
 * shared services (runner, Slack notifier, card registry), then start the
 * health monitor and the HTTP endpoint that receives button clicks.
 *
 * Nothing is persisted: a restart starts every host from UNKNOWN and forgets
 * all correlation ids.
 */

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fleetwatch_kernel::config::load_config;
use fleetwatch_kernel::http::{build_router, AppState};
use fleetwatch_kernel::preview::{ConsolePreviewService, IpmiConsolePreview};
use fleetwatch_kernel::slack::SlackGateway;
use fleetwatch_kernel::{events, mqtt};
use fleetwatch_kernel::{ActionDispatcher, CardRegistry, HealthMonitor, Host, HostServices, Notifier, ShellRunner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = load_config().await.context("loading configuration")?;
    if cfg.slack.token.is_empty() {
        warn!("[kernel] no Slack token configured, card posts will fail");
    }

    let gateway = Arc::new(SlackGateway::new(cfg.slack.token.clone()));
    let notifier = Notifier::new(gateway, cfg.slack.channel.clone());
    let registry = Arc::new(CardRegistry::new());

    let (event_tx, event_rx) = events::channel();
    match cfg.mqtt.clone() {
        Some(conf) => {
            mqtt::spawn_status_publisher(conf, event_rx);
        }
        None => {
            mqtt::spawn_status_logger(event_rx);
        }
    }

    let preview: Option<Arc<dyn ConsolePreviewService>> = if cfg.preview.enabled {
        Some(Arc::new(IpmiConsolePreview::new().context("building preview client")?))
    } else {
        None
    };

    let services = Arc::new(HostServices {
        runner: Arc::new(ShellRunner::new(cfg.commands.proxy_host.clone())),
        notifier: notifier.clone(),
        registry: Arc::clone(&registry),
        policy: cfg.monitor.clone(),
        commands: cfg.commands.clone(),
        events: Some(event_tx),
        preview,
    });

    let hosts: Vec<Arc<Host>> = cfg
        .hosts
        .iter()
        .cloned()
        .map(|conf| Host::new(conf, Arc::clone(&services)))
        .collect();
    info!("[kernel] loaded {} hosts", hosts.len());

    HealthMonitor::new(hosts.clone(), cfg.monitor.sweep_period()).spawn();

    let dispatcher = Arc::new(ActionDispatcher::new(&hosts, registry, notifier));
    let app = build_router(AppState::new(
        &hosts,
        dispatcher,
        cfg.slack.verification_token.clone(),
        cfg.http.api_key.clone(),
    ));

    let addr: SocketAddr = cfg.http.bind.parse().context("parsing http.bind")?;
    info!("[kernel] listening on http://{addr}");
    let listener = TcpListener::bind(addr).await.context("binding HTTP listener")?;
    axum::serve(listener, app).await?;
    Ok(())
}
