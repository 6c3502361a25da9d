use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::{Metric, Monitor, Resource};
use crate::core::compute::parse_number;
use crate::core::connector::{MetricDefinition, MetricType};

/// Creates and updates the monitors of one (connector, monitor type) job.
pub struct MonitorFactory<'a> {
    pub connector_id: &'a str,
    pub monitor_type: &'a str,
    /// Attributes whose values form the monitor id.
    pub keys: &'a [String],
    pub strategy_time: DateTime<Utc>,
}

impl<'a> MonitorFactory<'a> {
    /// Id built from the key attribute values joined with `_`. `None` when a
    /// key is missing or blank.
    pub fn monitor_id(&self, attributes: &BTreeMap<String, String>) -> Option<String> {
        let values: Option<Vec<&str>> = self
            .keys
            .iter()
            .map(|key| {
                attributes
                    .get(key)
                    .map(|v| v.trim())
                    .filter(|v| !v.is_empty())
            })
            .collect();
        values.map(|v| v.join("_"))
    }

    /// Find or create the monitor for these attributes and mark it
    /// discovered. Must be called with the resource lock held.
    pub fn create_or_update<'r>(
        &self,
        resource: &'r mut Resource,
        attributes: BTreeMap<String, String>,
    ) -> Option<&'r mut Monitor> {
        let id = self.monitor_id(&attributes)?;
        let monitor = resource.connector_monitor_entry(self.connector_id, self.monitor_type, &id);

        monitor.attributes.extend(attributes);
        monitor.discovery_time = Some(self.strategy_time);
        monitor.is_stale = false;
        Some(monitor)
    }

    /// Existing monitor of this job whose key attributes equal the row's.
    pub fn find_existing<'r>(
        &self,
        resource: &'r mut Resource,
        attributes: &BTreeMap<String, String>,
    ) -> Option<&'r mut Monitor> {
        let connector_id = self.connector_id;
        let keys = self.keys;
        resource
            .monitors
            .get_mut(self.monitor_type)?
            .values_mut()
            .find(|monitor| {
                monitor.connector_id.as_deref() == Some(connector_id)
                    && keys
                        .iter()
                        .all(|key| match (monitor.attributes.get(key), attributes.get(key)) {
                            (Some(a), Some(b)) => a.trim() == b.trim(),
                            _ => false,
                        })
            })
    }
}

fn rate_key(name: &str) -> String {
    format!("__{}.rate_from", name)
}

fn fake_counter_key(name: &str) -> String {
    format!("__{}.fake_counter_from", name)
}

/// Writes metric values onto monitors following the connector's metric
/// definitions.
pub struct MetricFactory<'a> {
    pub hostname: &'a str,
    pub definitions: &'a BTreeMap<String, MetricDefinition>,
    pub collect_time: DateTime<Utc>,
}

impl<'a> MetricFactory<'a> {
    fn definition(&self, name: &str) -> Option<&MetricDefinition> {
        self.definitions
            .get(crate::core::connector::metric_base_name(name))
    }

    /// Record a value: numbers as Number metrics, state names as StateSet
    /// metrics. Returns whether anything was written.
    pub fn record(&self, monitor: &mut Monitor, name: &str, value: &str) -> bool {
        let value = value.trim();

        if let Some(MetricType::StateSet(states)) = self.definition(name).map(|d| &d.metric_type) {
            if let Some(state) = states.iter().find(|s| s.eq_ignore_ascii_case(value)) {
                let state = state.clone();
                monitor.set_state(name, &state, states, self.collect_time);
                return true;
            }
        }

        match parse_number(value) {
            Some(number) => {
                monitor.set_number(name, number, self.collect_time);
                true
            }
            None => {
                log::debug!(
                    "Hostname {} - Ignoring value {:?} for metric {} on monitor {}",
                    self.hostname,
                    value,
                    name,
                    monitor.id
                );
                false
            }
        }
    }

    fn previous_raw(monitor: &Monitor, key: &str) -> Option<(f64, DateTime<Utc>)> {
        match monitor.metrics.get(key) {
            Some(Metric::Number {
                value, collect_time, ..
            }) => Some((*value, *collect_time)),
            _ => None,
        }
    }

    /// `rate($n)`: change per second since the previous raw sample.
    pub fn record_rate(&self, monitor: &mut Monitor, name: &str, raw: &str) -> bool {
        let current = match parse_number(raw) {
            Some(v) => v,
            None => return false,
        };
        let key = rate_key(name);
        let previous = Self::previous_raw(monitor, &key);
        monitor.set_number(&key, current, self.collect_time);

        match previous {
            Some((last, last_time)) => {
                let seconds = (self.collect_time - last_time).num_milliseconds() as f64 / 1000.0;
                if seconds <= 0.0 {
                    return false;
                }
                monitor.set_number(name, (current - last) / seconds, self.collect_time);
                true
            }
            None => false,
        }
    }

    /// `fakeCounter($n)`: integrate a rate into an ever-growing counter.
    pub fn record_fake_counter(&self, monitor: &mut Monitor, name: &str, raw: &str) -> bool {
        let current = match parse_number(raw) {
            Some(v) => v,
            None => return false,
        };
        let key = fake_counter_key(name);
        let previous = Self::previous_raw(monitor, &key);
        monitor.set_number(&key, current, self.collect_time);

        match previous {
            Some((_, last_time)) => {
                let seconds = (self.collect_time - last_time).num_milliseconds() as f64 / 1000.0;
                if seconds <= 0.0 {
                    return false;
                }
                let counter = monitor
                    .metric(name)
                    .and_then(Metric::as_number)
                    .unwrap_or(0.0);
                monitor.set_number(name, counter + current * seconds, self.collect_time);
                true
            }
            None => false,
        }
    }
}
