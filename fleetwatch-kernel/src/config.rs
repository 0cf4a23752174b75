/**
 * CONFIGURATION - fleetwatch.yaml
 *
 * ROLE: describe the monitored fleet (probe address, optional power controller)
 * and the supervision policy shared by every host. Read once at startup, never
 * reloaded; hosts copy what they need and evolve independently afterwards.
 *
 * LOOKUP: FLEETWATCH_CONFIG (default ./fleetwatch.yaml). SLACK_TOKEN,
 * SLACK_VERIFICATION_TOKEN, SLACK_CHANNEL and FLEETWATCH_API_KEY from the
 * environment override the file.
 */

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KernelConfig {
    pub slack: SlackConf,
    #[serde(default)]
    pub http: HttpConf,
    pub mqtt: Option<MqttConf>,
    #[serde(default)]
    pub monitor: MonitorPolicy,
    #[serde(default)]
    pub commands: CommandsConf,
    #[serde(default)]
    pub preview: PreviewConf,
    pub hosts: Vec<HostConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SlackConf {
    pub channel: String,
    #[serde(default)]
    pub token: String,
    pub verification_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
    pub api_key: Option<String>,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            api_key: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

/// Global supervision policy. Immutable once loaded.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MonitorPolicy {
    pub sweep_period_secs: u64,
    pub probe_count: u32,
    pub probe_deadline_secs: u64,
    pub failure_threshold: u32,
    pub recovery_window_secs: u64,
    pub supervised_by_default: bool,
    pub preview_interval_secs: u64,
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self {
            sweep_period_secs: 60,
            probe_count: 3,
            probe_deadline_secs: 5,
            failure_threshold: 2,
            recovery_window_secs: 300,
            supervised_by_default: true,
            preview_interval_secs: 30,
        }
    }
}

impl MonitorPolicy {
    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.sweep_period_secs)
    }

    pub fn recovery_window(&self) -> Duration {
        Duration::from_secs(self.recovery_window_secs)
    }

    pub fn preview_interval(&self) -> Duration {
        Duration::from_secs(self.preview_interval_secs)
    }

    /// Budget handed to the runner for one probe: the probe's own deadline plus slack
    /// for process startup and name resolution.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_deadline_secs + 5)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CommandsConf {
    /// When set, every command runs as `ssh <proxy_host> -- <command>`.
    pub proxy_host: Option<String>,
    pub probe: String,
    pub power_reset: String,
    pub power_on: String,
    pub power_timeout_secs: u64,
}

impl Default for CommandsConf {
    fn default() -> Self {
        Self {
            proxy_host: None,
            probe: "ping -c {count} -w {deadline} {address}".into(),
            power_reset: "ipmitool -I lanplus -H {power_address} -U {username} -P {password} chassis power reset".into(),
            power_on: "ipmitool -I lanplus -H {power_address} -U {username} -P {password} chassis power on".into(),
            power_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PreviewConf {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HostConf {
    pub id: String,
    pub address: String,
    pub power: Option<PowerConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PowerConf {
    pub address: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl KernelConfig {
    pub fn from_yaml(txt: &str) -> Result<Self, ConfigError> {
        let cfg: KernelConfig = serde_yaml::from_str(txt)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hosts.is_empty() {
            return Err(ConfigError::Invalid("no hosts configured".into()));
        }
        let mut seen = HashSet::new();
        for host in &self.hosts {
            if host.id.trim().is_empty() {
                return Err(ConfigError::Invalid("host with empty id".into()));
            }
            if !seen.insert(host.id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate host id {}", host.id)));
            }
        }
        if self.monitor.failure_threshold == 0 {
            return Err(ConfigError::Invalid("monitor.failure_threshold must be at least 1".into()));
        }
        if self.monitor.sweep_period_secs == 0 {
            return Err(ConfigError::Invalid("monitor.sweep_period_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Secrets from the environment win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("SLACK_TOKEN") {
            if !token.is_empty() {
                self.slack.token = token;
            }
        }
        if let Ok(token) = std::env::var("SLACK_VERIFICATION_TOKEN") {
            if !token.is_empty() {
                self.slack.verification_token = Some(token);
            }
        }
        if let Ok(key) = std::env::var("FLEETWATCH_API_KEY") {
            if !key.is_empty() {
                self.http.api_key = Some(key);
            }
        }
        if let Ok(channel) = std::env::var("SLACK_CHANNEL") {
            if !channel.is_empty() {
                self.slack.channel = channel;
            }
        }
    }
}

pub async fn load_config() -> Result<KernelConfig, ConfigError> {
    let path = std::env::var("FLEETWATCH_CONFIG").unwrap_or_else(|_| "fleetwatch.yaml".into());
    load_config_from(&path).await
}

pub async fn load_config_from<P: AsRef<Path>>(path: P) -> Result<KernelConfig, ConfigError> {
    let path = path.as_ref();
    let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let mut cfg: KernelConfig = serde_yaml::from_str(&txt)?;
    cfg.apply_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}
