//! Protocol extension contract and the registry the engine dispatches through.
//!
//! The engine never talks to a device itself. Every protocol source and
//! criterion is handed to a [`ProtocolExtension`] found in the
//! [`ExtensionRegistry`], which is built once and then shared read-only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::core::config::{EngineConfig, HostConfiguration};
use crate::core::connector::{Criterion, CriterionType, Source, SourceType};
use crate::core::detection::CriterionTestResult;
use crate::core::strategy::runtime::Cancellation;
use crate::core::table::SourceTable;
use crate::error::{Result, SentryError};

/// Runs awk scripts for the `awk` compute operator.
pub trait AwkExecutor: Send + Sync {
    fn execute(&self, script: &str, input: &str) -> Result<String>;
}

/// A protocol implementation (SNMP, HTTP, WMI, ...) plugged into the engine.
#[async_trait]
pub trait ProtocolExtension: Send + Sync {
    /// Short name used in logs.
    fn identifier(&self) -> &str;

    fn supported_sources(&self) -> &[SourceType];

    fn supported_criteria(&self) -> &[CriterionType];

    /// Whether the host configures the protocol this extension speaks.
    fn supports_protocol(&self, host: &HostConfiguration) -> bool;

    async fn execute_source(
        &self,
        source: &Source,
        host: &HostContext,
        timeout: Duration,
    ) -> Result<SourceTable>;

    async fn evaluate_criterion(
        &self,
        criterion: &Criterion,
        host: &HostContext,
        timeout: Duration,
    ) -> Result<CriterionTestResult>;

    /// Health probe for the protocol on this host.
    async fn check_protocol(&self, _host: &HostContext) -> Result<bool> {
        Ok(true)
    }
}

/// Everything a run knows about the host it is working on.
#[derive(Clone)]
pub struct HostContext {
    pub config: Arc<HostConfiguration>,
    pub engine: Arc<EngineConfig>,
    /// Timestamp of the current cycle, shared by every write of the run.
    pub strategy_time: DateTime<Utc>,
    cancellation: Cancellation,
    serialization: Arc<tokio::sync::Mutex<()>>,
}

impl HostContext {
    pub fn new(
        config: Arc<HostConfiguration>,
        engine: Arc<EngineConfig>,
        cancellation: Cancellation,
        serialization: Arc<tokio::sync::Mutex<()>>,
    ) -> Self {
        Self {
            config,
            engine,
            strategy_time: Utc::now(),
            cancellation,
            serialization,
        }
    }

    /// Context with its own lock and a token that is never cancelled.
    pub fn standalone(config: HostConfiguration, engine: EngineConfig) -> Self {
        Self::new(
            Arc::new(config),
            Arc::new(engine),
            Cancellation::never(),
            Arc::new(tokio::sync::Mutex::new(())),
        )
    }

    pub fn hostname(&self) -> &str {
        &self.config.hostname
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// Run one probe under the host rules: bounded by `timeout`, inside the
    /// per-host serialization region when `serialized`, and abandoned when
    /// the run is cancelled.
    pub async fn guard_probe<T, F>(&self, what: &str, timeout: Duration, serialized: bool, probe: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let guarded = async {
            let _guard = if serialized {
                match tokio::time::timeout(self.engine.serialization_timeout(), self.serialization.lock()).await {
                    Ok(guard) => Some(guard),
                    Err(_) => {
                        log::warn!(
                            "Hostname {} - Timed out waiting for the serialization lock before {}",
                            self.hostname(),
                            what
                        );
                        return Err(SentryError::probe_timeout(format!(
                            "serialization lock for {} on {}",
                            what,
                            self.hostname()
                        )));
                    }
                }
            } else {
                None
            };

            match tokio::time::timeout(timeout, probe).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) if e.is_probe_error() || matches!(e, SentryError::OrchestrationCancelled(_)) => Err(e),
                Ok(Err(e)) => Err(SentryError::probe_failure(format!("{}: {}", what, e))),
                Err(_) => {
                    log::warn!(
                        "Hostname {} - ProbeTimeout: {} did not answer within {:?}",
                        self.hostname(),
                        what,
                        timeout
                    );
                    Err(SentryError::probe_timeout(format!(
                        "{} on {} after {:?}",
                        what,
                        self.hostname(),
                        timeout
                    )))
                }
            }
        };

        tokio::select! {
            result = guarded => result,
            _ = self.cancellation.cancelled() => Err(SentryError::cancelled(format!(
                "{} on {}",
                what,
                self.hostname()
            ))),
        }
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("hostname", &self.config.hostname)
            .field("strategy_time", &self.strategy_time)
            .finish_non_exhaustive()
    }
}

/// Immutable set of extensions, looked up by source and criterion type.
#[derive(Clone, Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Arc<dyn ProtocolExtension>>,
    awk: Option<Arc<dyn AwkExecutor>>,
}

impl ExtensionRegistry {
    pub fn builder() -> ExtensionRegistryBuilder {
        ExtensionRegistryBuilder::default()
    }

    pub fn extensions(&self) -> &[Arc<dyn ProtocolExtension>] {
        &self.extensions
    }

    pub fn awk_executor(&self) -> Option<&dyn AwkExecutor> {
        self.awk.as_deref()
    }

    /// First extension able to run this source type for the host.
    pub fn find_source_extension(
        &self,
        source_type: SourceType,
        host: &HostConfiguration,
    ) -> Option<&Arc<dyn ProtocolExtension>> {
        self.extensions.iter().find(|ext| {
            ext.supported_sources().contains(&source_type) && ext.supports_protocol(host)
        })
    }

    pub fn find_criterion_extension(
        &self,
        criterion_type: CriterionType,
        host: &HostConfiguration,
    ) -> Option<&Arc<dyn ProtocolExtension>> {
        self.extensions.iter().find(|ext| {
            ext.supported_criteria().contains(&criterion_type) && ext.supports_protocol(host)
        })
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field(
                "extensions",
                &self.extensions.iter().map(|e| e.identifier()).collect::<Vec<_>>(),
            )
            .field("awk", &self.awk.is_some())
            .finish()
    }
}

#[derive(Default)]
pub struct ExtensionRegistryBuilder {
    extensions: Vec<Arc<dyn ProtocolExtension>>,
    awk: Option<Arc<dyn AwkExecutor>>,
}

impl ExtensionRegistryBuilder {
    pub fn with_extension(mut self, extension: Arc<dyn ProtocolExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    pub fn with_awk_executor(mut self, executor: Arc<dyn AwkExecutor>) -> Self {
        self.awk = Some(executor);
        self
    }

    pub fn build(self) -> ExtensionRegistry {
        ExtensionRegistry {
            extensions: self.extensions,
            awk: self.awk,
        }
    }
}
