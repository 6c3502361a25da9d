//! Per-host orchestration: detection, discovery and collection of every
//! staged connector.

pub mod runtime;
pub mod staging;

pub use runtime::{Cancellation, Scheduler};
pub use staging::{stage_connectors, StagedConnector};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::core::connector::{CollectType, Connector, ConnectorStore, JobTasks, MonitorJob, Task};
use crate::core::detection::{ConnectorTestResult, CriterionEvaluator};
use crate::core::extension::{ExtensionRegistry, HostContext};
use crate::core::mapping::MappingApplier;
use crate::core::source::SourceExecutor;
use crate::core::table::{source_reference_key, SourceNamespace, SourceTable};
use crate::core::telemetry::{Resource, TelemetryStore, CONNECTOR_MONITOR_TYPE};

/// Monitor types discovered first, in this order, one at a time.
const PRIORITY_MONITOR_TYPES: [&str; 5] = ["host", "enclosure", "blade", "disk_controller", "cpu"];

const CONNECTOR_STATUS_METRIC: &str = "hw.connector.status";
const CONNECTOR_STATUS_STATES: [&str; 2] = ["ok", "failed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Succeeded,
    Skipped,
    Failed,
}

impl JobState {
    /// Combined state of the jobs of one phase.
    fn of_phase(states: &[JobState]) -> JobState {
        if states.is_empty() {
            JobState::Skipped
        } else if states.contains(&JobState::Failed) {
            JobState::Failed
        } else {
            JobState::Succeeded
        }
    }
}

/// What happened to one connector during a host run.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorReport {
    pub connector_id: String,
    pub forced: bool,
    /// `None` when the cached detection of an earlier cycle was reused.
    pub detection: Option<ConnectorTestResult>,
    pub discovery: JobState,
    pub collection: JobState,
}

impl ConnectorReport {
    fn skipped(staged: &StagedConnector, detection: Option<ConnectorTestResult>) -> Self {
        Self {
            connector_id: staged.connector.id.clone(),
            forced: staged.forced,
            detection,
            discovery: JobState::Skipped,
            collection: JobState::Skipped,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HostRunReport {
    pub hostname: String,
    pub strategy_time: DateTime<Utc>,
    pub connectors: Vec<ConnectorReport>,
    pub cancelled: bool,
}

impl HostRunReport {
    pub fn connector(&self, id: &str) -> Option<&ConnectorReport> {
        self.connectors.iter().find(|r| r.connector_id == id)
    }
}

/// Jobs of a connector in execution order.
struct JobOrder<'c> {
    priority: Vec<(&'c str, &'c MonitorJob)>,
    others: Vec<(&'c str, &'c MonitorJob)>,
}

impl<'c> JobOrder<'c> {
    fn of(connector: &'c Connector) -> Self {
        let priority = PRIORITY_MONITOR_TYPES
            .iter()
            .filter_map(|t| connector.monitors.get_key_value(*t))
            .map(|(t, job)| (t.as_str(), job))
            .collect();
        let others = connector
            .monitors
            .iter()
            .filter(|(t, _)| !PRIORITY_MONITOR_TYPES.contains(&t.as_str()))
            .map(|(t, job)| (t.as_str(), job))
            .collect();
        Self { priority, others }
    }

    /// Run `job` over every monitor job: priority types one by one, the rest
    /// one by one or all together.
    async fn run<F, Fut, T>(&self, sequential: bool, job: F) -> Vec<T>
    where
        F: Fn(&'c str, &'c MonitorJob) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut results = Vec::with_capacity(self.priority.len() + self.others.len());
        for &(monitor_type, monitor_job) in &self.priority {
            results.push(job(monitor_type, monitor_job).await);
        }

        if sequential {
            for &(monitor_type, monitor_job) in &self.others {
                results.push(job(monitor_type, monitor_job).await);
            }
        } else {
            results.extend(join_all(self.others.iter().map(|&(t, j)| job(t, j))).await);
        }
        results
    }
}

/// Drives one host through a cycle.
pub struct StrategyOrchestrator {
    registry: Arc<ExtensionRegistry>,
    connectors: Arc<ConnectorStore>,
    telemetry: Arc<TelemetryStore>,
}

impl StrategyOrchestrator {
    pub fn new(
        registry: Arc<ExtensionRegistry>,
        connectors: Arc<ConnectorStore>,
        telemetry: Arc<TelemetryStore>,
    ) -> Self {
        Self {
            registry,
            connectors,
            telemetry,
        }
    }

    pub fn telemetry(&self) -> &Arc<TelemetryStore> {
        &self.telemetry
    }

    /// One full cycle for the host of `host`.
    pub async fn run_host(&self, host: &HostContext) -> HostRunReport {
        let started = Instant::now();
        let resource = self
            .telemetry
            .resource(host.hostname(), host.config.host_type);
        let mut report = HostRunReport {
            hostname: host.hostname().to_string(),
            strategy_time: host.strategy_time,
            connectors: Vec::new(),
            cancelled: false,
        };

        self.check_protocols(host, &resource).await;

        let staged = stage_connectors(&self.connectors, &host.config);
        log::info!(
            "Hostname {} - {} connectors staged",
            host.hostname(),
            staged.len()
        );

        let selected = self.detect(host, &staged, &resource, &mut report).await;

        for staged in selected {
            if host.cancellation().is_cancelled() {
                break;
            }
            let (discovery, collection) = self.run_connector(host, &staged.connector, &resource).await;
            if let Some(entry) = report
                .connectors
                .iter_mut()
                .find(|r| r.connector_id == staged.connector.id)
            {
                entry.discovery = discovery;
                entry.collection = collection;
            }
        }

        report.cancelled = host.cancellation().is_cancelled();
        if report.cancelled {
            log::info!("Hostname {} - Run cancelled", host.hostname());
        } else {
            log::info!(
                "Hostname {} - Cycle completed in {:.2?}, {} monitors",
                host.hostname(),
                started.elapsed(),
                resource.lock().monitor_count()
            );
        }
        report
    }

    /// Probe the health of each configured protocol and record it on the
    /// endpoint monitor.
    async fn check_protocols(&self, host: &HostContext, resource: &Mutex<Resource>) {
        for extension in self.registry.extensions() {
            if !extension.supports_protocol(&host.config) {
                continue;
            }
            let what = format!("{} health check", extension.identifier());
            let up = match host
                .guard_probe(&what, host.config.timeout_for(None), false, extension.check_protocol(host))
                .await
            {
                Ok(up) => up,
                Err(e) => {
                    log::warn!("Hostname {} - {} failed: {}", host.hostname(), what, e);
                    false
                }
            };

            let metric = format!("hwsentry.host.up{{protocol=\"{}\"}}", extension.identifier());
            resource
                .lock()
                .endpoint_mut()
                .set_number(&metric, if up { 1.0 } else { 0.0 }, host.strategy_time);
        }
    }

    /// Run or reuse detection. Returns the connectors to process, and adds a
    /// report entry for every staged connector.
    async fn detect(
        &self,
        host: &HostContext,
        staged: &[StagedConnector],
        resource: &Mutex<Resource>,
        report: &mut HostRunReport,
    ) -> Vec<StagedConnector> {
        let cached = if host.engine.validate_detection_each_cycle {
            None
        } else {
            resource.lock().detected_connectors.clone()
        };

        if let Some(detected) = cached {
            log::debug!(
                "Hostname {} - Reusing detection of an earlier cycle: {:?}",
                host.hostname(),
                detected
            );
            let mut selected = Vec::new();
            for s in staged {
                report.connectors.push(ConnectorReport::skipped(s, None));
                if s.forced || detected.contains(&s.connector.id) {
                    selected.push(s.clone());
                }
            }
            return selected;
        }

        let evaluator = CriterionEvaluator::new(&self.registry, host);
        let results = join_all(
            staged
                .iter()
                .map(|s| evaluator.evaluate_detection(&s.connector)),
        )
        .await;

        let mut passed: Vec<&StagedConnector> = Vec::new();
        {
            let mut resource = resource.lock();
            for (s, result) in staged.iter().zip(&results) {
                record_detection(&mut resource, &s.connector, result, host.strategy_time);

                if result.is_success() {
                    log::info!("Hostname {} - Connector {} detected", host.hostname(), s.connector.id);
                    passed.push(s);
                } else if s.forced {
                    log::warn!(
                        "Hostname {} - Connector {} failed detection but is forced: {}",
                        host.hostname(),
                        s.connector.id,
                        result.message()
                    );
                    passed.push(s);
                } else {
                    log::debug!(
                        "Hostname {} - Connector {} not detected: {}",
                        host.hostname(),
                        s.connector.id,
                        result.message()
                    );
                }
            }
        }

        let superseded: BTreeSet<String> = passed
            .iter()
            .flat_map(|s| s.connector.detection.supersedes.iter())
            .map(|id| id.to_lowercase())
            .collect();

        let selected: Vec<StagedConnector> = passed
            .into_iter()
            .filter(|s| {
                let keep = s.forced || !superseded.contains(&s.connector.id.to_lowercase());
                if !keep {
                    log::info!(
                        "Hostname {} - Connector {} is superseded by another detected connector",
                        host.hostname(),
                        s.connector.id
                    );
                }
                keep
            })
            .cloned()
            .collect();

        if host.cancellation().is_cancelled() || results.iter().any(ConnectorTestResult::has_errors) {
            log::debug!(
                "Hostname {} - Detection incomplete, evaluating again next cycle",
                host.hostname()
            );
        } else {
            resource.lock().detected_connectors =
                Some(selected.iter().map(|s| s.connector.id.clone()).collect());
        }

        for (s, result) in staged.iter().zip(results) {
            report.connectors.push(ConnectorReport::skipped(s, Some(result)));
        }
        selected
    }

    /// Discovery then collection of one connector. The namespace of the
    /// cycle is kept on the resource for the next cycle's retry logic.
    async fn run_connector(
        &self,
        host: &HostContext,
        connector: &Connector,
        resource: &Mutex<Resource>,
    ) -> (JobState, JobState) {
        let previous = resource.lock().rotate_tables(&connector.id);
        let executor = SourceExecutor::new(&self.registry, host, connector);
        let order = JobOrder::of(connector);

        let mut namespace = SourceNamespace::new();
        let pre_failed = executor
            .run_sources(&connector.pre, &mut namespace, &previous, None)
            .await;

        let discovered = order
            .run(host.config.sequential, |monitor_type, job| {
                let base = &namespace;
                let pre_failed = &pre_failed;
                let previous = &previous;
                let executor = &executor;
                async move {
                    let task = match &job.tasks {
                        JobTasks::Standard { discovery, .. } => discovery,
                        JobTasks::Simple { simple } => simple,
                    };
                    let inputs = JobInputs {
                        base,
                        failed: pre_failed,
                        previous,
                    };
                    discover_job(executor, host, connector, monitor_type, job, task, inputs, resource).await
                }
            })
            .await;

        let mut discovery_states = Vec::with_capacity(discovered.len());
        for (state, tables) in discovered {
            discovery_states.push(state);
            for (key, table) in tables {
                namespace.entry(key).or_insert(table);
            }
        }

        let collection_states: Vec<JobState> = order
            .run(host.config.sequential, |monitor_type, job| {
                let base = &namespace;
                let previous = &previous;
                let executor = &executor;
                async move {
                    match &job.tasks {
                        JobTasks::Standard {
                            collect: Some(collect),
                            ..
                        } => Some(
                            collect_job(
                                executor,
                                host,
                                connector,
                                monitor_type,
                                job,
                                collect.collect_type,
                                &collect.task,
                                base,
                                previous,
                                resource,
                            )
                            .await,
                        ),
                        _ => None,
                    }
                }
            })
            .await
            .into_iter()
            .flatten()
            .collect();

        resource
            .lock()
            .namespaces
            .insert(connector.id.clone(), namespace);

        (
            JobState::of_phase(&discovery_states),
            JobState::of_phase(&collection_states),
        )
    }
}

fn record_detection(
    resource: &mut Resource,
    connector: &Connector,
    result: &ConnectorTestResult,
    strategy_time: DateTime<Utc>,
) {
    let states: Vec<String> = CONNECTOR_STATUS_STATES.iter().map(|s| s.to_string()).collect();
    let status = if result.is_success() { "ok" } else { "failed" };

    let monitor = resource.monitor_entry(CONNECTOR_MONITOR_TYPE, &connector.id);
    monitor.connector_id = Some(connector.id.clone());
    monitor.attributes.insert("id".to_string(), connector.id.clone());
    monitor.attributes.insert(
        "name".to_string(),
        connector
            .display_name
            .clone()
            .unwrap_or_else(|| connector.id.clone()),
    );
    monitor.discovery_time = Some(strategy_time);
    monitor.is_stale = false;
    monitor.set_state(CONNECTOR_STATUS_METRIC, status, &states, strategy_time);
    monitor
        .legacy_text_parameters
        .insert("StatusInformation".to_string(), result.message());
}

fn record_job_duration(
    resource: &Mutex<Resource>,
    host: &HostContext,
    phase: &str,
    connector_id: &str,
    monitor_type: &str,
    started: Instant,
) {
    let metric = format!(
        "hwsentry.job.duration{{job.type=\"{}\", monitor.type=\"{}\", connector_id=\"{}\"}}",
        phase, monitor_type, connector_id
    );
    resource
        .lock()
        .endpoint_mut()
        .set_number(&metric, started.elapsed().as_secs_f64(), host.strategy_time);
}

fn mapping_rows(task: &Task, namespace: &SourceNamespace) -> Vec<Vec<String>> {
    task.mapping
        .as_ref()
        .and_then(|mapping| SourceTable::lookup(&mapping.source, namespace))
        .map(|table| table.table)
        .unwrap_or_default()
}

/// Tables a job starts from.
struct JobInputs<'n> {
    /// Namespace after the `pre` sources.
    base: &'n SourceNamespace,
    /// Keys of `pre` sources that failed this cycle.
    failed: &'n BTreeSet<String>,
    /// Namespace of the previous cycle, for retries.
    previous: &'n SourceNamespace,
}

enum Discovered {
    Monitors(BTreeSet<String>),
    NoMapping,
    /// The mapping's table could not be produced this cycle.
    SourceFailed(String),
}

/// Discovery of one monitor job. Returns the job state and the namespace
/// with the job's tables.
///
/// When the mapping's source failed, existing monitors are left as they are:
/// nothing is marked stale and collection still runs on them.
#[allow(clippy::too_many_arguments)]
async fn discover_job(
    executor: &SourceExecutor<'_>,
    host: &HostContext,
    connector: &Connector,
    monitor_type: &str,
    job: &MonitorJob,
    task: &Task,
    inputs: JobInputs<'_>,
    resource: &Mutex<Resource>,
) -> (JobState, SourceNamespace) {
    let started = Instant::now();
    let mut namespace = inputs.base.clone();

    let ran = tokio::time::timeout(host.engine.job_timeout(), async {
        let failed = executor
            .run_sources(&task.sources, &mut namespace, inputs.previous, None)
            .await;

        let mapping = match &task.mapping {
            Some(mapping) => mapping,
            None => return Discovered::NoMapping,
        };
        let source_failed = source_reference_key(&mapping.source)
            .map_or(false, |key| failed.contains(key) || inputs.failed.contains(key));
        if source_failed || SourceTable::lookup(&mapping.source, &namespace).is_none() {
            return Discovered::SourceFailed(mapping.source.clone());
        }

        let applier = MappingApplier {
            connector,
            monitor_type,
            keys: &job.keys,
            hostname: host.hostname(),
            strategy_time: host.strategy_time,
        };
        Discovered::Monitors(applier.apply_discovery(&mapping_rows(task, &namespace), mapping, resource))
    })
    .await;

    let state = match ran {
        _ if host.cancellation().is_cancelled() => JobState::Failed,
        Ok(Discovered::SourceFailed(source)) => {
            log::warn!(
                "Hostname {} - {} discovery of {} could not read {}, existing monitors kept",
                host.hostname(),
                monitor_type,
                connector.id,
                source
            );
            JobState::Failed
        }
        Ok(Discovered::Monitors(discovered)) => {
            let stale = resource
                .lock()
                .mark_stale(&connector.id, monitor_type, &discovered);
            log::debug!(
                "Hostname {} - {} discovery of {}: {} monitors, {} newly stale",
                host.hostname(),
                monitor_type,
                connector.id,
                discovered.len(),
                stale
            );
            JobState::Succeeded
        }
        Ok(Discovered::NoMapping) => JobState::Succeeded,
        Err(_) => {
            log::warn!(
                "Hostname {} - {} discovery of {} exceeded {:?}",
                host.hostname(),
                monitor_type,
                connector.id,
                host.engine.job_timeout()
            );
            JobState::Failed
        }
    };

    record_job_duration(resource, host, "discovery", &connector.id, monitor_type, started);
    (state, namespace)
}

/// Collection of one monitor job.
#[allow(clippy::too_many_arguments)]
async fn collect_job(
    executor: &SourceExecutor<'_>,
    host: &HostContext,
    connector: &Connector,
    monitor_type: &str,
    job: &MonitorJob,
    collect_type: CollectType,
    task: &Task,
    base: &SourceNamespace,
    previous: &SourceNamespace,
    resource: &Mutex<Resource>,
) -> JobState {
    let started = Instant::now();
    let mapping = match &task.mapping {
        Some(mapping) => mapping,
        None => {
            log::debug!(
                "Hostname {} - {} collect of {} has no mapping",
                host.hostname(),
                monitor_type,
                connector.id
            );
            return JobState::Skipped;
        }
    };
    let applier = MappingApplier {
        connector,
        monitor_type,
        keys: &job.keys,
        hostname: host.hostname(),
        strategy_time: host.strategy_time,
    };

    let ran = tokio::time::timeout(host.engine.job_timeout(), async {
        match collect_type {
            CollectType::MultiInstance => {
                let mut namespace = base.clone();
                executor
                    .run_sources(&task.sources, &mut namespace, previous, None)
                    .await;
                applier.apply_collect(&mapping_rows(task, &namespace), mapping, resource)
            }
            CollectType::MonoInstance => {
                let monitors: Vec<(String, BTreeMap<String, String>)> = resource
                    .lock()
                    .monitors_of(monitor_type)
                    .filter(|m| m.connector_id.as_deref() == Some(connector.id.as_str()) && !m.is_stale)
                    .map(|m| (m.id.clone(), m.attributes.clone()))
                    .collect();

                let mut updated = 0;
                for (monitor_id, attributes) in monitors {
                    if host.cancellation().is_cancelled() {
                        break;
                    }
                    let mut namespace = base.clone();
                    executor
                        .run_sources(&task.sources, &mut namespace, previous, Some(&attributes))
                        .await;
                    if applier.apply_mono_collect(&mapping_rows(task, &namespace), mapping, &monitor_id, resource) {
                        updated += 1;
                    }
                }
                updated
            }
        }
    })
    .await;

    let state = match ran {
        _ if host.cancellation().is_cancelled() => JobState::Failed,
        Ok(updated) => {
            log::debug!(
                "Hostname {} - {} collect of {}: {} monitors updated",
                host.hostname(),
                monitor_type,
                connector.id,
                updated
            );
            JobState::Succeeded
        }
        Err(_) => {
            log::warn!(
                "Hostname {} - {} collect of {} exceeded {:?}",
                host.hostname(),
                monitor_type,
                connector.id,
                host.engine.job_timeout()
            );
            JobState::Failed
        }
    };

    record_job_duration(resource, host, "collect", &connector.id, monitor_type, started);
    state
}
