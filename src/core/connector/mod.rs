//! Declarative connector model.
//!
//! A connector is decoded once from a versioned JSON document and then shared
//! read-only (behind an `Arc`) by every host run.
//!
//! ```json
//! {
//!   "formatVersion": 1,
//!   "id": "LinuxProcessors",
//!   "detection": { "criteria": [ { "type": "deviceType", "keep": ["linux"] } ] },
//!   "monitors": {
//!     "cpu": {
//!       "discovery": {
//!         "sources": [ { "key": "cpus", "type": "commandLine", "commandLine": "lscpu" } ],
//!         "mapping": { "source": "${source::cpus}", "attributes": { "id": "$1" } }
//!       }
//!     }
//!   }
//! }
//! ```

pub mod compute;
pub mod criterion;
pub mod source;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use crate::core::config::DeviceKind;
use crate::error::{Result, SentryError};

pub use compute::{
    Arithmetic, AwkCompute, Bitwise, Compute, Concat, ConversionType, MatchingLines,
    TranslationTableRef,
};
pub use criterion::{Criterion, CriterionKind, CriterionType};
pub use source::{EntryConcatMethod, ExecuteForEachEntryOf, Source, SourceKind, SourceType};

/// Interchange format understood by this build.
pub const FORMAT_VERSION: u32 = 1;

/// Named translation tables: table name -> (raw value -> translated value).
pub type TranslationTables = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    pub format_version: u32,
    /// Compiled file name, unique within a store.
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub detection: Detection,
    #[serde(default)]
    pub translations: TranslationTables,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricDefinition>,
    /// Sources run before any monitor job, readable by all of them.
    #[serde(default)]
    pub pre: Vec<Source>,
    #[serde(default)]
    pub monitors: BTreeMap<String, MonitorJob>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    #[serde(default)]
    pub applies_to: Vec<DeviceKind>,
    #[serde(default)]
    pub disable_auto_detection: bool,
    #[serde(default)]
    pub supersedes: Vec<String>,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorJob {
    /// Attributes whose values form the monitor id.
    #[serde(default = "default_keys")]
    pub keys: Vec<String>,
    #[serde(flatten)]
    pub tasks: JobTasks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobTasks {
    Standard {
        discovery: Task,
        #[serde(default)]
        collect: Option<CollectTask>,
    },
    Simple {
        simple: Task,
    },
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub mapping: Option<Mapping>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollectType {
    #[default]
    MultiInstance,
    MonoInstance,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CollectTask {
    #[serde(rename = "type", default)]
    pub collect_type: CollectType,
    #[serde(flatten)]
    pub task: Task,
}

/// Rules projecting table rows onto monitors. Values are mapping directives.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub source: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, String>,
    #[serde(default)]
    pub legacy_text_parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricDefinition {
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub metric_type: MetricType,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricType {
    #[default]
    Gauge,
    Counter,
    StateSet(Vec<String>),
}

fn default_keys() -> Vec<String> {
    vec!["id".to_string()]
}

impl Connector {
    /// Decode a connector document and assign criterion/source indices.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut connector: Connector = serde_json::from_str(json)?;

        if connector.format_version != FORMAT_VERSION {
            return Err(SentryError::connector(format!(
                "{}: unsupported format version {} (expected {})",
                connector.id, connector.format_version, FORMAT_VERSION
            )));
        }

        connector.assign_indices();
        connector.validate()?;
        Ok(connector)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read connector file: {:?}", path))?;
        let connector = Self::from_json_str(&data)
            .with_context(|| format!("Failed to decode connector file: {:?}", path))?;
        Ok(connector)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    pub fn metric_definition(&self, name: &str) -> Option<&MetricDefinition> {
        self.metrics.get(metric_base_name(name))
    }

    /// Every source of the connector, in declaration order.
    pub fn all_sources(&self) -> impl Iterator<Item = &Source> {
        self.pre.iter().chain(self.monitors.values().flat_map(|job| {
            let (first, second): (&[Source], &[Source]) = match &job.tasks {
                JobTasks::Standard { discovery, collect } => (
                    &discovery.sources,
                    collect.as_ref().map(|c| c.task.sources.as_slice()).unwrap_or(&[]),
                ),
                JobTasks::Simple { simple } => (&simple.sources, &[]),
            };
            first.iter().chain(second.iter())
        }))
    }

    fn assign_indices(&mut self) {
        for (i, criterion) in self.detection.criteria.iter_mut().enumerate() {
            criterion.index = i;
        }

        fn index_sources(sources: &mut [Source]) {
            for (i, source) in sources.iter_mut().enumerate() {
                source.index = i;
            }
        }

        index_sources(&mut self.pre);
        for job in self.monitors.values_mut() {
            match &mut job.tasks {
                JobTasks::Standard { discovery, collect } => {
                    index_sources(&mut discovery.sources);
                    if let Some(collect) = collect {
                        index_sources(&mut collect.task.sources);
                    }
                }
                JobTasks::Simple { simple } => index_sources(&mut simple.sources),
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SentryError::connector("connector id must not be empty"));
        }

        let mut keys = HashSet::new();
        for source in self.all_sources() {
            if !keys.insert(source.key.as_str()) {
                return Err(SentryError::connector(format!(
                    "{}: duplicate source key {}",
                    self.id, source.key
                )));
            }
        }

        for (monitor_type, job) in &self.monitors {
            if job.keys.is_empty() {
                return Err(SentryError::connector(format!(
                    "{}: monitor job {} declares no identifying keys",
                    self.id, monitor_type
                )));
            }
        }

        Ok(())
    }
}

/// Strip a `{attr="x"}` suffix from a metric name.
pub fn metric_base_name(name: &str) -> &str {
    name.split('{').next().unwrap_or(name).trim()
}

/// Loaded connectors keyed by id. Built once, then shared read-only.
#[derive(Debug, Clone, Default)]
pub struct ConnectorStore {
    connectors: BTreeMap<String, Arc<Connector>>,
}

impl ConnectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_connectors<I: IntoIterator<Item = Connector>>(connectors: I) -> Self {
        let mut store = Self::new();
        for connector in connectors {
            store.insert(connector);
        }
        store
    }

    /// Load every `*.json` connector of a directory. Files that fail to
    /// decode are logged and skipped.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read connector directory: {:?}", dir))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
            .collect();
        paths.sort();

        let mut store = Self::new();
        for path in paths {
            match Connector::from_path(&path) {
                Ok(connector) => store.insert(connector),
                Err(e) => log::warn!("Skipping connector {:?}: {:#}", path, e),
            }
        }
        log::info!("Loaded {} connectors from {:?}", store.len(), dir);
        Ok(store)
    }

    pub fn insert(&mut self, connector: Connector) {
        self.connectors.insert(connector.id.clone(), Arc::new(connector));
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Connector>> {
        self.connectors.get(id)
    }

    /// Case-insensitive lookup, as used by host directives.
    pub fn find(&self, id: &str) -> Option<&Arc<Connector>> {
        self.connectors
            .get(id)
            .or_else(|| {
                self.connectors
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(id))
                    .map(|(_, c)| c)
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<Connector>)> {
        self.connectors.iter()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}
