//! Source execution.
//!
//! Structural sources are computed from tables already in the namespace,
//! protocol sources are probes run through an extension. Either way the
//! result is folded through the source's compute chain and stored under the
//! source key. A failed probe is an empty table, never a failed run.

mod entries;
mod structural;

use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::core::compute::{self, ComputeContext};
use crate::core::connector::{Connector, Source};
use crate::core::extension::{ExtensionRegistry, HostContext};
use crate::core::table::{SourceNamespace, SourceTable};
use crate::error::{Result, SentryError};

/// One serialization lock per host. Hosts never contend with each other.
#[derive(Debug, Default)]
pub struct SerializationLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SerializationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_host(&self, hostname: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(hostname.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn remove(&self, hostname: &str) {
        self.locks.lock().remove(hostname);
    }
}

/// Runs the sources of one connector on one host.
pub struct SourceExecutor<'a> {
    registry: &'a ExtensionRegistry,
    host: &'a HostContext,
    connector: &'a Connector,
}

impl<'a> SourceExecutor<'a> {
    pub fn new(registry: &'a ExtensionRegistry, host: &'a HostContext, connector: &'a Connector) -> Self {
        Self {
            registry,
            host,
            connector,
        }
    }

    /// Execute one source: probe or structural step, then its computes.
    ///
    /// `attributes` are the monitor attributes of a mono-instance collect;
    /// they fill `${attribute::name}` references.
    pub async fn execute(
        &self,
        source: &Source,
        namespace: &SourceNamespace,
        attributes: Option<&BTreeMap<String, String>>,
    ) -> Result<SourceTable> {
        let resolved = match attributes {
            Some(attributes) => entries::with_attributes(source, attributes)?,
            None => None,
        };
        let source = resolved.as_ref().unwrap_or(source);

        let table = match &source.execute_for_each_entry_of {
            Some(each) => {
                let entries = match SourceTable::lookup(&each.source, namespace) {
                    Some(entries) => entries,
                    None => {
                        log::debug!(
                            "Hostname {} - No entries table {} for source {}",
                            self.host.hostname(),
                            each.source,
                            source.key
                        );
                        return Ok(SourceTable::empty());
                    }
                };

                let mut results = Vec::with_capacity(entries.len());
                for row in entries.table {
                    let entry = entries::entry_source(source, &row)?;
                    let table = match self.execute_raw(&entry, namespace).await {
                        Ok(table) => table,
                        Err(e @ SentryError::OrchestrationCancelled(_)) => return Err(e),
                        Err(e) => {
                            log::warn!(
                                "Hostname {} - Source {} failed for entry {:?}: {}",
                                self.host.hostname(),
                                source.key,
                                row,
                                e
                            );
                            SourceTable::empty()
                        }
                    };
                    results.push((row, table));
                }
                entries::concat_results(results, &each.concat_method)
            }
            None => self.execute_raw(source, namespace).await?,
        };

        let ctx = ComputeContext::new(self.host.hostname(), &self.connector.translations, namespace)
            .with_awk(self.registry.awk_executor());
        Ok(compute::apply_all(&source.computes, table, &ctx))
    }

    /// The probe or structural step alone.
    async fn execute_raw(&self, source: &Source, namespace: &SourceNamespace) -> Result<SourceTable> {
        let source_type = source.source_type();
        if source_type.is_structural() {
            return Ok(structural::execute(&source.kind, namespace, self.host.hostname()).unwrap_or_default());
        }

        let extension = self
            .registry
            .find_source_extension(source_type, &self.host.config)
            .ok_or_else(|| {
                SentryError::probe_unsupported(format!(
                    "no extension runs {:?} sources on {}",
                    source_type,
                    self.host.hostname()
                ))
            })?;

        let timeout = self.host.config.timeout_for(source.protocol());
        let what = format!("source {} ({})", source.key, extension.identifier());
        self.host
            .guard_probe(
                &what,
                timeout,
                source.force_serialization,
                extension.execute_source(source, self.host, timeout),
            )
            .await
    }

    /// Execute, logging a failure. `None` when the source failed.
    async fn execute_logged(
        &self,
        source: &Source,
        namespace: &SourceNamespace,
        attributes: Option<&BTreeMap<String, String>>,
    ) -> Option<SourceTable> {
        match self.execute(source, namespace, attributes).await {
            Ok(table) => Some(table),
            Err(SentryError::OrchestrationCancelled(_)) => None,
            Err(e) => {
                log::warn!(
                    "Hostname {} - Source {} of connector {} failed: {}",
                    self.host.hostname(),
                    source.key,
                    self.connector.id,
                    e
                );
                None
            }
        }
    }

    /// Execute with one retry when the previous cycle had data and this one
    /// came back empty or failed.
    async fn execute_with_retry(
        &self,
        source: &Source,
        namespace: &SourceNamespace,
        previous: &SourceNamespace,
        attributes: Option<&BTreeMap<String, String>>,
    ) -> Option<SourceTable> {
        let table = self.execute_logged(source, namespace, attributes).await;
        let had_data = previous.get(&source.key).map_or(false, |t| !t.is_empty());
        let empty = table.as_ref().map_or(true, SourceTable::is_empty);

        if empty && had_data && !self.host.cancellation().is_cancelled() {
            log::info!(
                "Hostname {} - Source {} returned nothing after returning data last cycle, retrying in {:?}",
                self.host.hostname(),
                source.key,
                self.host.config.retry_delay()
            );
            tokio::time::sleep(self.host.config.retry_delay()).await;
            return self.execute_logged(source, namespace, attributes).await;
        }

        table
    }

    /// Run `sources` wave by wave, storing each result in `namespace`. A
    /// failed source is stored as an empty table.
    ///
    /// Returns the keys of the sources that failed, including those built on
    /// a failed source.
    pub async fn run_sources(
        &self,
        sources: &[Source],
        namespace: &mut SourceNamespace,
        previous: &SourceNamespace,
        attributes: Option<&BTreeMap<String, String>>,
    ) -> BTreeSet<String> {
        let mut failed = BTreeSet::new();

        for wave in dependency_waves(sources) {
            if self.host.cancellation().is_cancelled() {
                failed.extend(sources.iter().filter(|s| !namespace.contains_key(&s.key)).map(|s| s.key.clone()));
                return failed;
            }

            let snapshot: &SourceNamespace = namespace;
            let tables = join_all(
                wave.iter()
                    .map(|source| self.execute_with_retry(source, snapshot, previous, attributes)),
            )
            .await;

            for (source, table) in wave.into_iter().zip(tables) {
                let upstream_failed = source.references().iter().any(|key| failed.contains(key));
                let table = match table {
                    Some(table) if !upstream_failed => table,
                    Some(table) => {
                        failed.insert(source.key.clone());
                        table
                    }
                    None => {
                        failed.insert(source.key.clone());
                        SourceTable::empty()
                    }
                };
                log::debug!(
                    "Hostname {} - Source {} produced {} rows",
                    self.host.hostname(),
                    source.key,
                    table.len()
                );
                namespace.insert(source.key.clone(), table);
            }
        }

        failed
    }
}

/// Group sources so that every source comes after the earlier sources it
/// references. Sources within a wave are independent.
pub fn dependency_waves(sources: &[Source]) -> Vec<Vec<&Source>> {
    let mut level_of: HashMap<&str, usize> = HashMap::new();
    let mut waves: Vec<Vec<&Source>> = Vec::new();

    for source in sources {
        let level = source
            .references()
            .iter()
            .filter_map(|key| level_of.get(key.as_str()))
            .map(|level| level + 1)
            .max()
            .unwrap_or(0);

        level_of.insert(source.key.as_str(), level);
        if waves.len() <= level {
            waves.resize_with(level + 1, Vec::new);
        }
        waves[level].push(source);
    }

    waves
}
