// In-memory protocol extension shared by the integration tests

use async_trait::async_trait;
use hwsentry::core::config::{DeviceKind, ProtocolConfig};
use hwsentry::core::connector::{Criterion, CriterionKind, CriterionType, Source, SourceKind, SourceType};
use hwsentry::core::detection::CriterionTestResult;
use hwsentry::core::extension::{HostContext, ProtocolExtension};
use hwsentry::core::table::{SourceTable, TABLE_SEP};
use hwsentry::{HostConfiguration, Result, SentryError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Reply {
    Rows(String),
    Slow(Duration, String),
    Fail,
}

/// Answers SNMP sources and criteria from canned replies keyed by OID.
#[derive(Default)]
pub struct MockSnmp {
    tables: Mutex<HashMap<String, Reply>>,
    criteria: Mutex<HashMap<String, bool>>,
    pub evaluated: Mutex<Vec<String>>,
    pub executed: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    serialized_in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub max_serialized_in_flight: AtomicUsize,
    pub down: AtomicBool,
}

impl MockSnmp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, oid: &str, rows: &str) -> Self {
        self.set_reply(oid, Reply::Rows(rows.to_string()));
        self
    }

    pub fn with_slow_table(self, oid: &str, delay: Duration, rows: &str) -> Self {
        self.set_reply(oid, Reply::Slow(delay, rows.to_string()));
        self
    }

    pub fn with_failing_table(self, oid: &str) -> Self {
        self.set_reply(oid, Reply::Fail);
        self
    }

    pub fn with_criterion(self, oid: &str, passes: bool) -> Self {
        self.set_criterion(oid, passes);
        self
    }

    /// Change a criterion answer between cycles.
    pub fn set_criterion(&self, oid: &str, passes: bool) {
        self.criteria.lock().insert(oid.to_string(), passes);
    }

    /// Change a reply between cycles.
    pub fn set_reply(&self, oid: &str, reply: Reply) {
        self.tables.lock().insert(oid.to_string(), reply);
    }

    pub fn executed_count(&self, oid: &str) -> usize {
        self.executed.lock().iter().filter(|o| o.as_str() == oid).count()
    }
}

fn raise_max(max: &AtomicUsize, current: usize) {
    max.fetch_max(current, Ordering::SeqCst);
}

#[async_trait]
impl ProtocolExtension for MockSnmp {
    fn identifier(&self) -> &str {
        "mock-snmp"
    }

    fn supported_sources(&self) -> &[SourceType] {
        &[SourceType::SnmpGet, SourceType::SnmpTable]
    }

    fn supported_criteria(&self) -> &[CriterionType] {
        &[CriterionType::SnmpGet, CriterionType::SnmpGetNext]
    }

    fn supports_protocol(&self, host: &HostConfiguration) -> bool {
        host.protocol("snmp").is_some()
    }

    async fn execute_source(&self, source: &Source, _host: &HostContext, _timeout: Duration) -> Result<SourceTable> {
        let oid = match &source.kind {
            SourceKind::SnmpTable(table) => table.oid.clone(),
            SourceKind::SnmpGet(get) => get.oid.clone(),
            other => return Err(SentryError::probe_unsupported(format!("{:?}", other))),
        };
        self.executed.lock().push(oid.clone());
        let reply = self.tables.lock().get(&oid).cloned();

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        raise_max(&self.max_in_flight, current);
        if source.force_serialization {
            let current = self.serialized_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            raise_max(&self.max_serialized_in_flight, current);
        }

        let result = match reply {
            Some(Reply::Rows(rows)) => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(SourceTable::from_csv(&rows, TABLE_SEP))
            }
            Some(Reply::Slow(delay, rows)) => {
                tokio::time::sleep(delay).await;
                Ok(SourceTable::from_csv(&rows, TABLE_SEP))
            }
            Some(Reply::Fail) => Err(SentryError::other(format!("no such object {}", oid))),
            None => Ok(SourceTable::empty()),
        };

        if source.force_serialization {
            self.serialized_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn evaluate_criterion(
        &self,
        criterion: &Criterion,
        _host: &HostContext,
        _timeout: Duration,
    ) -> Result<CriterionTestResult> {
        let oid = match &criterion.kind {
            CriterionKind::SnmpGet(snmp) | CriterionKind::SnmpGetNext(snmp) => snmp.oid.clone(),
            other => return Err(SentryError::probe_unsupported(format!("{:?}", other))),
        };
        self.evaluated.lock().push(oid.clone());

        let passes = self.criteria.lock().get(&oid).copied();
        Ok(match passes {
            Some(true) => CriterionTestResult::success(format!("{} answered", oid)),
            Some(false) => CriterionTestResult::failure(format!("{} did not match", oid)),
            None => CriterionTestResult::error(format!("{} not found", oid)),
        })
    }

    async fn check_protocol(&self, _host: &HostContext) -> Result<bool> {
        Ok(!self.down.load(Ordering::SeqCst))
    }
}

pub fn snmp_host(hostname: &str) -> HostConfiguration {
    let mut host = HostConfiguration::new(hostname, DeviceKind::Linux).with_protocol(
        "snmp",
        ProtocolConfig {
            timeout_secs: Some(2),
            ..Default::default()
        },
    );
    host.retry_delay_ms = 1;
    host
}
