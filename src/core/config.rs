use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Kind of device a host is, matched by `deviceType` criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Linux,
    Windows,
    Network,
    Storage,
    Oob,
    Vms,
    Tru64,
    Hpux,
    Aix,
    Solaris,
    Other,
}

/// Credentials and limits for one protocol on one host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Per-probe timeout; falls back to the host default
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfiguration {
    pub hostname: String,
    #[serde(default)]
    pub host_type: DeviceKind,
    /// Enabled protocols keyed by name (`snmp`, `http`, `ssh`, ...)
    #[serde(default)]
    pub protocols: BTreeMap<String, ProtocolConfig>,
    /// Connector directives: `id`, `#tag`, `!id`, `!#tag`, `+id`
    #[serde(default)]
    pub connectors: BTreeSet<String>,
    /// Run non-priority monitor jobs one after another
    #[serde(default)]
    pub sequential: bool,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl Default for HostConfiguration {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            host_type: DeviceKind::default(),
            protocols: BTreeMap::new(),
            connectors: BTreeSet::new(),
            sequential: false,
            retry_delay_ms: default_retry_delay_ms(),
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

impl HostConfiguration {
    pub fn new<S: Into<String>>(hostname: S, host_type: DeviceKind) -> Self {
        Self {
            hostname: hostname.into(),
            host_type,
            ..Default::default()
        }
    }

    pub fn with_protocol<S: Into<String>>(mut self, name: S, config: ProtocolConfig) -> Self {
        self.protocols.insert(name.into(), config);
        self
    }

    pub fn protocol(&self, name: &str) -> Option<&ProtocolConfig> {
        self.protocols.get(name)
    }

    /// Probe timeout for a protocol, or the host default.
    pub fn timeout_for(&self, protocol: Option<&str>) -> Duration {
        let secs = protocol
            .and_then(|name| self.protocols.get(name))
            .and_then(|p| p.timeout_secs)
            .unwrap_or(self.default_timeout_secs);
        Duration::from_secs(secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Engine-wide tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hosts processed concurrently
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    /// Wait limit for the per-host serialization lock
    #[serde(default = "default_serialization_timeout_secs")]
    pub serialization_timeout_secs: u64,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub validate_detection_each_cycle: bool,
    #[serde(default = "default_engine_version")]
    pub engine_version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            cycle_interval_secs: default_cycle_interval_secs(),
            serialization_timeout_secs: default_serialization_timeout_secs(),
            job_timeout_secs: default_job_timeout_secs(),
            validate_detection_each_cycle: true,
            engine_version: default_engine_version(),
        }
    }
}

impl EngineConfig {
    pub fn serialization_timeout(&self) -> Duration {
        Duration::from_secs(self.serialization_timeout_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }
}

fn default_retry_delay_ms() -> u64 {
    30
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_workers() -> usize {
    20
}

fn default_cycle_interval_secs() -> u64 {
    120
}

fn default_serialization_timeout_secs() -> u64 {
    60
}

fn default_job_timeout_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_engine_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
