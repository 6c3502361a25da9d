// Connector execution engine

pub mod compute;
pub mod config;
pub mod connector;
pub mod detection;
pub mod extension;
pub mod macros;
pub mod mapping;
pub mod source;
pub mod strategy;
pub mod table;
pub mod telemetry;

// Re-export commonly used items
pub use config::{DeviceKind, EngineConfig, HostConfiguration, ProtocolConfig};
pub use connector::{Connector, ConnectorStore};
pub use detection::{ConnectorTestResult, CriterionTestResult, Outcome};
pub use extension::{AwkExecutor, ExtensionRegistry, HostContext, ProtocolExtension};
pub use strategy::{HostRunReport, JobState, Scheduler, StrategyOrchestrator};
pub use table::{SourceNamespace, SourceTable};
pub use telemetry::{Metric, Monitor, Resource, TelemetryStore};
