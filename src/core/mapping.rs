//! Mapping of table rows onto monitors.
//!
//! A mapping directive is one of:
//!
//! - `$n`: the n-th cell of the row
//! - a literal, where embedded `$n` and `$index` (1-based row number) are
//!   substituted
//! - a function over one of the above: `percent2Ratio`, `megaHertz2Hertz`,
//!   `mebiByte2Byte`, `milliVolt2Volt`, `megaBit2Bit`, `boolean`,
//!   `lookup(type, attribute, keyAttribute, keyValue)`, `rate`, `fakeCounter`
//!
//! Every row is applied under the resource lock, so a monitor is never seen
//! half-updated.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

use crate::core::compute::parse_number;
use crate::core::connector::{Connector, Mapping};
use crate::core::table::{parse_column, replace_column_references};
use crate::core::telemetry::{MetricFactory, Monitor, MonitorFactory, Resource};

const INDEX_REF: &str = "$index";

/// Value a metric directive resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Plain(String),
    Rate(String),
    FakeCounter(String),
}

/// Directives of one row, resolved.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InterpretedRow {
    pub attributes: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, MetricValue>,
    pub legacy_text_parameters: BTreeMap<String, String>,
}

/// Split `name(a, b)` into the function name and its arguments.
fn parse_function(directive: &str) -> Option<(&str, Vec<&str>)> {
    let directive = directive.trim();
    let open = directive.find('(')?;
    let inner = directive.strip_suffix(')')?.get(open + 1..)?;
    let name = &directive[..open];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some((name, inner.split(',').map(str::trim).collect()))
}

fn converted<F: Fn(f64) -> f64>(value: Option<String>, f: F) -> Option<String> {
    value.as_deref().and_then(parse_number).map(|v| f(v).to_string())
}

/// Resolves mapping directives against table rows.
pub struct MappingProcessor<'a> {
    pub hostname: &'a str,
    pub mapping: &'a Mapping,
}

impl<'a> MappingProcessor<'a> {
    pub fn new(hostname: &'a str, mapping: &'a Mapping) -> Self {
        Self { hostname, mapping }
    }

    /// Value of a `$n` column or literal with substitutions.
    fn value(&self, directive: &str, row: &[String], index: usize) -> Option<String> {
        if let Some(column) = parse_column(directive) {
            let cell = row.get(column - 1).cloned();
            if cell.is_none() {
                log::warn!(
                    "Hostname {} - Column {} is beyond the {} cells of row {} while mapping {}",
                    self.hostname,
                    column,
                    row.len(),
                    index,
                    self.mapping.source
                );
            }
            return cell;
        }

        let text = directive.replace(INDEX_REF, &index.to_string());
        Some(replace_column_references(&text, row))
    }

    fn lookup(&self, args: &[&str], row: &[String], index: usize, resource: &Resource) -> Option<String> {
        let (monitor_type, attribute, key_attribute, key_value) = match args {
            [t, a, k, v] => (*t, *a, *k, *v),
            _ => {
                log::warn!(
                    "Hostname {} - lookup() expects 4 arguments, got {}",
                    self.hostname,
                    args.len()
                );
                return None;
            }
        };
        let key_value = self.value(key_value, row, index)?;

        resource
            .monitors_of(monitor_type)
            .find(|m| m.attributes.get(key_attribute).map(String::as_str) == Some(key_value.as_str()))
            .and_then(|m| m.attributes.get(attribute).cloned())
    }

    /// Resolve a directive to a plain value.
    pub fn interpret(&self, directive: &str, row: &[String], index: usize, resource: &Resource) -> Option<String> {
        let (name, args) = match parse_function(directive) {
            Some(function) => function,
            None => return self.value(directive, row, index),
        };
        let first = || args.first().and_then(|arg| self.value(arg, row, index));

        match name {
            "percent2Ratio" => converted(first(), |v| v / 100.0),
            "megaHertz2Hertz" => converted(first(), |v| v * 1_000_000.0),
            "mebiByte2Byte" => converted(first(), |v| v * 1_048_576.0),
            "milliVolt2Volt" => converted(first(), |v| v / 1000.0),
            "megaBit2Bit" => converted(first(), |v| v * 1_000_000.0),
            "boolean" => first().map(|v| {
                let v = v.trim();
                if v.eq_ignore_ascii_case("true") || v == "1" {
                    "1".to_string()
                } else {
                    "0".to_string()
                }
            }),
            "lookup" => self.lookup(&args, row, index, resource),
            _ => self.value(directive, row, index),
        }
    }

    fn interpret_metric(&self, directive: &str, row: &[String], index: usize, resource: &Resource) -> Option<MetricValue> {
        match parse_function(directive) {
            Some(("rate", args)) => args
                .first()
                .and_then(|arg| self.value(arg, row, index))
                .map(MetricValue::Rate),
            Some(("fakeCounter", args)) => args
                .first()
                .and_then(|arg| self.value(arg, row, index))
                .map(MetricValue::FakeCounter),
            _ => self.interpret(directive, row, index, resource).map(MetricValue::Plain),
        }
    }

    /// Resolve every directive of the mapping for one row. `index` is 1-based.
    pub fn interpret_row(&self, row: &[String], index: usize, resource: &Resource) -> InterpretedRow {
        let mut interpreted = InterpretedRow::default();

        for (name, directive) in &self.mapping.attributes {
            if let Some(value) = self.interpret(directive, row, index, resource) {
                interpreted.attributes.insert(name.clone(), value);
            }
        }
        for (name, directive) in &self.mapping.legacy_text_parameters {
            if let Some(value) = self.interpret(directive, row, index, resource) {
                interpreted.legacy_text_parameters.insert(name.clone(), value);
            }
        }
        for (name, directive) in &self.mapping.metrics {
            if let Some(value) = self.interpret_metric(directive, row, index, resource) {
                interpreted.metrics.insert(name.clone(), value);
            }
        }

        interpreted
    }
}

/// Writes interpreted rows into a resource for one monitor job.
pub struct MappingApplier<'a> {
    pub connector: &'a Connector,
    pub monitor_type: &'a str,
    pub keys: &'a [String],
    pub hostname: &'a str,
    pub strategy_time: DateTime<Utc>,
}

impl<'a> MappingApplier<'a> {
    fn monitor_factory(&self) -> MonitorFactory<'_> {
        MonitorFactory {
            connector_id: &self.connector.id,
            monitor_type: self.monitor_type,
            keys: self.keys,
            strategy_time: self.strategy_time,
        }
    }

    fn metric_factory(&self) -> MetricFactory<'_> {
        MetricFactory {
            hostname: self.hostname,
            definitions: &self.connector.metrics,
            collect_time: self.strategy_time,
        }
    }

    fn write_values(&self, monitor: &mut Monitor, row: InterpretedRow) {
        let metrics = self.metric_factory();
        monitor.legacy_text_parameters.extend(row.legacy_text_parameters);
        for (name, value) in &row.metrics {
            match value {
                MetricValue::Plain(v) => metrics.record(monitor, name, v),
                MetricValue::Rate(v) => metrics.record_rate(monitor, name, v),
                MetricValue::FakeCounter(v) => metrics.record_fake_counter(monitor, name, v),
            };
        }
    }

    /// Discovery: create or update one monitor per row. Returns the ids of
    /// the monitors seen.
    pub fn apply_discovery(&self, rows: &[Vec<String>], mapping: &Mapping, resource: &Mutex<Resource>) -> BTreeSet<String> {
        let processor = MappingProcessor::new(self.hostname, mapping);
        let factory = self.monitor_factory();
        let mut discovered = BTreeSet::new();

        for (i, row) in rows.iter().enumerate() {
            let mut resource = resource.lock();
            let mut interpreted = processor.interpret_row(row, i + 1, &resource);
            let attributes = std::mem::take(&mut interpreted.attributes);

            match factory.create_or_update(&mut resource, attributes) {
                Some(monitor) => {
                    discovered.insert(monitor.id.clone());
                    self.write_values(monitor, interpreted);
                }
                None => log::debug!(
                    "Hostname {} - Row {} of {} lacks the key attributes {:?}, skipped",
                    self.hostname,
                    i + 1,
                    self.monitor_type,
                    self.keys
                ),
            }
        }

        discovered
    }

    /// Multi-instance collect: update the existing monitor matching each row.
    pub fn apply_collect(&self, rows: &[Vec<String>], mapping: &Mapping, resource: &Mutex<Resource>) -> usize {
        let processor = MappingProcessor::new(self.hostname, mapping);
        let factory = self.monitor_factory();
        let mut updated = 0;

        for (i, row) in rows.iter().enumerate() {
            let mut resource = resource.lock();
            let interpreted = processor.interpret_row(row, i + 1, &resource);

            match factory.find_existing(&mut resource, &interpreted.attributes) {
                Some(monitor) => {
                    self.write_values(monitor, interpreted);
                    updated += 1;
                }
                None => log::debug!(
                    "Hostname {} - No {} monitor of {} matches row {}",
                    self.hostname,
                    self.monitor_type,
                    self.connector.id,
                    i + 1
                ),
            }
        }

        updated
    }

    /// Mono-instance collect: the first row updates the given monitor.
    pub fn apply_mono_collect(
        &self,
        rows: &[Vec<String>],
        mapping: &Mapping,
        monitor_id: &str,
        resource: &Mutex<Resource>,
    ) -> bool {
        let row = match rows.first() {
            Some(row) => row,
            None => return false,
        };
        let processor = MappingProcessor::new(self.hostname, mapping);
        let mut resource = resource.lock();
        let interpreted = processor.interpret_row(row, 1, &resource);

        match resource.connector_monitor_mut(&self.connector.id, self.monitor_type, monitor_id) {
            Some(monitor) => {
                self.write_values(monitor, interpreted);
                true
            }
            None => false,
        }
    }
}
