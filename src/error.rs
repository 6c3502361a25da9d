use std::io;
use thiserror::Error;

/// Error type for the connector execution engine
#[derive(Error, Debug)]
pub enum SentryError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connector error: {0}")]
    Connector(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Probe timed out: {0}")]
    ProbeTimeout(String),

    #[error("Probe failed: {0}")]
    ProbeFailure(String),

    #[error("Probe unsupported: {0}")]
    ProbeUnsupported(String),

    #[error("Malformed table data: {0}")]
    MalformedTableData(String),

    #[error("Orchestration cancelled: {0}")]
    OrchestrationCancelled(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, SentryError>;

impl SentryError {
    /// Create a config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        SentryError::Config(msg.into())
    }

    /// Create a connector definition error
    pub fn connector<S: Into<String>>(msg: S) -> Self {
        SentryError::Connector(msg.into())
    }

    pub fn xml<S: Into<String>>(msg: S) -> Self {
        SentryError::Xml(msg.into())
    }

    /// Create a probe timeout error
    pub fn probe_timeout<S: Into<String>>(msg: S) -> Self {
        SentryError::ProbeTimeout(msg.into())
    }

    /// Create a probe failure error
    pub fn probe_failure<S: Into<String>>(msg: S) -> Self {
        SentryError::ProbeFailure(msg.into())
    }

    pub fn probe_unsupported<S: Into<String>>(msg: S) -> Self {
        SentryError::ProbeUnsupported(msg.into())
    }

    pub fn malformed_table_data<S: Into<String>>(msg: S) -> Self {
        SentryError::MalformedTableData(msg.into())
    }

    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        SentryError::OrchestrationCancelled(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        SentryError::Other(msg.into())
    }

    /// Whether the error is a probe-level failure that is absorbed at the
    /// source/criterion boundary instead of failing the run.
    pub fn is_probe_error(&self) -> bool {
        matches!(
            self,
            SentryError::ProbeTimeout(_)
                | SentryError::ProbeFailure(_)
                | SentryError::ProbeUnsupported(_)
                | SentryError::MalformedTableData(_)
        )
    }
}
