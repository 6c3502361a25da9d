//! In-memory telemetry model: one resource per host, its monitors and their
//! metrics.

mod factory;

pub use factory::{MetricFactory, MonitorFactory};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::core::config::DeviceKind;
use crate::core::table::SourceNamespace;

/// Monitor type of the per-host endpoint monitor.
pub const HOST_MONITOR_TYPE: &str = "host";
/// Monitor type recording detection results.
pub const CONNECTOR_MONITOR_TYPE: &str = "connector";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Metric {
    Number {
        value: f64,
        collect_time: DateTime<Utc>,
        previous_value: Option<f64>,
        previous_collect_time: Option<DateTime<Utc>>,
    },
    StateSet {
        value: String,
        state_set: Vec<String>,
        collect_time: DateTime<Utc>,
        previous_value: Option<String>,
    },
}

impl Metric {
    pub fn collect_time(&self) -> DateTime<Utc> {
        match self {
            Metric::Number { collect_time, .. } | Metric::StateSet { collect_time, .. } => *collect_time,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Metric::Number { value, .. } => Some(*value),
            Metric::StateSet { .. } => None,
        }
    }

    pub fn as_state(&self) -> Option<&str> {
        match self {
            Metric::StateSet { value, .. } => Some(value),
            Metric::Number { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Monitor {
    pub id: String,
    pub monitor_type: String,
    pub connector_id: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, Metric>,
    pub legacy_text_parameters: BTreeMap<String, String>,
    pub discovery_time: Option<DateTime<Utc>>,
    pub is_stale: bool,
    pub is_endpoint: bool,
}

impl Monitor {
    pub fn new<I: Into<String>, T: Into<String>>(id: I, monitor_type: T) -> Self {
        Self {
            id: id.into(),
            monitor_type: monitor_type.into(),
            ..Default::default()
        }
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    /// Set a numeric metric. The value it replaces becomes the previous one,
    /// unless it was written at the same instant.
    pub fn set_number(&mut self, name: &str, value: f64, collect_time: DateTime<Utc>) {
        let (previous_value, previous_collect_time) = match self.metrics.get(name) {
            Some(Metric::Number {
                collect_time: last_time,
                previous_value,
                previous_collect_time,
                ..
            }) if *last_time == collect_time => (*previous_value, *previous_collect_time),
            Some(Metric::Number {
                value: last,
                collect_time: last_time,
                ..
            }) => (Some(*last), Some(*last_time)),
            _ => (None, None),
        };

        self.metrics.insert(
            name.to_string(),
            Metric::Number {
                value,
                collect_time,
                previous_value,
                previous_collect_time,
            },
        );
    }

    pub fn set_state(&mut self, name: &str, value: &str, state_set: &[String], collect_time: DateTime<Utc>) {
        let previous_value = match self.metrics.get(name) {
            Some(Metric::StateSet {
                collect_time: last_time,
                previous_value,
                ..
            }) if *last_time == collect_time => previous_value.clone(),
            Some(Metric::StateSet { value: last, .. }) => Some(last.clone()),
            _ => None,
        };

        self.metrics.insert(
            name.to_string(),
            Metric::StateSet {
                value: value.to_string(),
                state_set: state_set.to_vec(),
                collect_time,
                previous_value,
            },
        );
    }
}

/// Key of a monitor within its type. Monitors of different connectors never
/// share a key, even when their ids are equal.
pub fn monitor_key(connector_id: Option<&str>, id: &str) -> String {
    match connector_id {
        Some(connector_id) => format!("{}_{}", connector_id, id),
        None => id.to_string(),
    }
}

/// Everything known about one host.
#[derive(Debug, Default)]
pub struct Resource {
    pub hostname: String,
    pub host_type: DeviceKind,
    /// monitor type -> monitor key -> monitor. See [`monitor_key`].
    pub monitors: BTreeMap<String, BTreeMap<String, Monitor>>,
    /// Tables of the current cycle, per connector.
    pub namespaces: HashMap<String, SourceNamespace>,
    /// Tables of the previous cycle, per connector.
    pub previous_tables: HashMap<String, SourceNamespace>,
    /// Connectors that passed the last full detection.
    pub detected_connectors: Option<BTreeSet<String>>,
}

impl Resource {
    pub fn new<S: Into<String>>(hostname: S, host_type: DeviceKind) -> Self {
        Self {
            hostname: hostname.into(),
            host_type,
            ..Default::default()
        }
    }

    /// First monitor of the type with this id, whichever connector owns it.
    pub fn monitor(&self, monitor_type: &str, id: &str) -> Option<&Monitor> {
        let monitors = self.monitors.get(monitor_type)?;
        monitors
            .get(id)
            .or_else(|| monitors.values().find(|m| m.id == id))
    }

    /// The monitor of this id discovered by `connector_id`.
    pub fn connector_monitor(&self, connector_id: &str, monitor_type: &str, id: &str) -> Option<&Monitor> {
        self.monitors
            .get(monitor_type)?
            .get(&monitor_key(Some(connector_id), id))
    }

    pub fn connector_monitor_mut(&mut self, connector_id: &str, monitor_type: &str, id: &str) -> Option<&mut Monitor> {
        self.monitors
            .get_mut(monitor_type)?
            .get_mut(&monitor_key(Some(connector_id), id))
    }

    pub fn monitors_of(&self, monitor_type: &str) -> impl Iterator<Item = &Monitor> {
        self.monitors.get(monitor_type).into_iter().flat_map(|m| m.values())
    }

    pub fn monitor_count(&self) -> usize {
        self.monitors.values().map(BTreeMap::len).sum()
    }

    /// Find or create a monitor that belongs to no connector.
    pub fn monitor_entry(&mut self, monitor_type: &str, id: &str) -> &mut Monitor {
        self.monitors
            .entry(monitor_type.to_string())
            .or_default()
            .entry(monitor_key(None, id))
            .or_insert_with(|| Monitor::new(id, monitor_type))
    }

    /// Find or create the monitor of `connector_id` in one step.
    pub fn connector_monitor_entry(&mut self, connector_id: &str, monitor_type: &str, id: &str) -> &mut Monitor {
        self.monitors
            .entry(monitor_type.to_string())
            .or_default()
            .entry(monitor_key(Some(connector_id), id))
            .or_insert_with(|| {
                let mut monitor = Monitor::new(id, monitor_type);
                monitor.connector_id = Some(connector_id.to_string());
                monitor
            })
    }

    /// The endpoint monitor representing the host itself.
    pub fn endpoint_mut(&mut self) -> &mut Monitor {
        let hostname = self.hostname.clone();
        let endpoint = self.monitor_entry(HOST_MONITOR_TYPE, &hostname);
        endpoint.is_endpoint = true;
        endpoint
            .attributes
            .entry("host.name".to_string())
            .or_insert(hostname);
        endpoint
    }

    /// Move this cycle's tables of a connector to the previous slot.
    pub fn rotate_tables(&mut self, connector_id: &str) -> SourceNamespace {
        let current = self.namespaces.remove(connector_id).unwrap_or_default();
        self.previous_tables
            .insert(connector_id.to_string(), current.clone());
        current
    }

    /// Mark stale the monitors of (connector, type) not in `discovered`.
    pub fn mark_stale(&mut self, connector_id: &str, monitor_type: &str, discovered: &BTreeSet<String>) -> usize {
        let mut count = 0;
        if let Some(monitors) = self.monitors.get_mut(monitor_type) {
            for monitor in monitors.values_mut() {
                if monitor.connector_id.as_deref() == Some(connector_id) && !discovered.contains(&monitor.id) {
                    if !monitor.is_stale {
                        count += 1;
                    }
                    monitor.is_stale = true;
                }
            }
        }
        count
    }
}

/// Resources keyed by hostname. The map is read-mostly; each resource has
/// its own lock.
#[derive(Debug, Default)]
pub struct TelemetryStore {
    resources: RwLock<HashMap<String, Arc<Mutex<Resource>>>>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The resource of a host, created on first use.
    pub fn resource(&self, hostname: &str, host_type: DeviceKind) -> Arc<Mutex<Resource>> {
        if let Some(resource) = self.resources.read().get(hostname) {
            return resource.clone();
        }
        self.resources
            .write()
            .entry(hostname.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Resource::new(hostname, host_type))))
            .clone()
    }

    pub fn get(&self, hostname: &str) -> Option<Arc<Mutex<Resource>>> {
        self.resources.read().get(hostname).cloned()
    }

    pub fn remove(&self, hostname: &str) -> Option<Arc<Mutex<Resource>>> {
        self.resources.write().remove(hostname)
    }

    pub fn hostnames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.read().keys().cloned().collect();
        names.sort();
        names
    }
}
