//! Criterion evaluation.
//!
//! `deviceType` and `productRequirements` are answered locally; every other
//! criterion is a probe delegated to the extension registry.

use serde::{Deserialize, Serialize};

use crate::core::config::DeviceKind;
use crate::core::connector::criterion::{DeviceTypeCriterion, ProductRequirementsCriterion};
use crate::core::connector::{Connector, Criterion, CriterionKind};
use crate::core::extension::{ExtensionRegistry, HostContext};
use crate::error::SentryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Failure,
    Error,
}

/// Result of one criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionTestResult {
    pub outcome: Outcome,
    pub message: String,
    /// Raw probe output, when the probe produced any.
    pub result: Option<String>,
}

impl CriterionTestResult {
    pub fn success<S: Into<String>>(message: S) -> Self {
        Self {
            outcome: Outcome::Success,
            message: message.into(),
            result: None,
        }
    }

    pub fn failure<S: Into<String>>(message: S) -> Self {
        Self {
            outcome: Outcome::Failure,
            message: message.into(),
            result: None,
        }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Self {
            outcome: Outcome::Error,
            message: message.into(),
            result: None,
        }
    }

    pub fn with_result<S: Into<String>>(mut self, result: S) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

impl From<SentryError> for CriterionTestResult {
    fn from(e: SentryError) -> Self {
        CriterionTestResult::error(e.to_string())
    }
}

/// Outcome of a connector's detection block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorTestResult {
    pub connector_id: String,
    /// Results of the criteria evaluated, in index order.
    pub results: Vec<CriterionTestResult>,
}

impl ConnectorTestResult {
    /// Every evaluated criterion succeeded. No criteria at all is a success.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(CriterionTestResult::is_success)
    }

    /// A criterion could not be evaluated (timeout, missing extension,
    /// cancellation), as opposed to evaluated and not matching.
    pub fn has_errors(&self) -> bool {
        self.results.iter().any(|r| r.outcome == Outcome::Error)
    }

    /// Messages of all evaluated criteria, one per line.
    pub fn message(&self) -> String {
        self.results
            .iter()
            .map(|r| r.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub(crate) fn device_type(criterion: &DeviceTypeCriterion, host_type: DeviceKind) -> CriterionTestResult {
    if criterion.exclude.contains(&host_type) {
        return CriterionTestResult::failure(format!("Host type {:?} is excluded", host_type));
    }
    if !criterion.keep.is_empty() && !criterion.keep.contains(&host_type) {
        return CriterionTestResult::failure(format!("Host type {:?} is not in {:?}", host_type, criterion.keep));
    }
    CriterionTestResult::success(format!("Host type {:?} matches", host_type))
}

/// Numeric components of a dotted version. Non-digit suffixes are ignored.
fn version_parts(version: &str) -> Vec<u64> {
    version
        .split('.')
        .map(|part| {
            let digits: String = part.trim().chars().take_while(char::is_ascii_digit).collect();
            digits.parse().unwrap_or(0)
        })
        .collect()
}

/// Compare two dotted versions, padding the shorter with zeros.
pub(crate) fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let (mut a, mut b) = (version_parts(a), version_parts(b));
    let len = a.len().max(b.len());
    a.resize(len, 0);
    b.resize(len, 0);
    a.cmp(&b)
}

pub(crate) fn product_requirements(criterion: &ProductRequirementsCriterion, engine_version: &str) -> CriterionTestResult {
    match criterion.engine_version.as_deref().filter(|v| !v.trim().is_empty()) {
        None => CriterionTestResult::success("No engine version required"),
        Some(required) if compare_versions(engine_version, required).is_ge() => {
            CriterionTestResult::success(format!("Engine version {} satisfies {}", engine_version, required))
        }
        Some(required) => CriterionTestResult::failure(format!(
            "Engine version {} is older than the required {}",
            engine_version, required
        )),
    }
}

/// Evaluates criteria for one host.
pub struct CriterionEvaluator<'a> {
    registry: &'a ExtensionRegistry,
    host: &'a HostContext,
}

impl<'a> CriterionEvaluator<'a> {
    pub fn new(registry: &'a ExtensionRegistry, host: &'a HostContext) -> Self {
        Self { registry, host }
    }

    pub async fn evaluate(&self, criterion: &Criterion) -> CriterionTestResult {
        match &criterion.kind {
            CriterionKind::DeviceType(params) => device_type(params, self.host.config.host_type),
            CriterionKind::ProductRequirements(params) => {
                product_requirements(params, &self.host.engine.engine_version)
            }
            _ => self.probe(criterion).await,
        }
    }

    async fn probe(&self, criterion: &Criterion) -> CriterionTestResult {
        let criterion_type = criterion.criterion_type();
        let extension = match self
            .registry
            .find_criterion_extension(criterion_type, &self.host.config)
        {
            Some(extension) => extension,
            None => {
                let e = SentryError::probe_unsupported(format!(
                    "no extension evaluates {:?} criteria on {}",
                    criterion_type,
                    self.host.hostname()
                ));
                log::debug!("Hostname {} - {}", self.host.hostname(), e);
                return e.into();
            }
        };

        let timeout = self.host.config.timeout_for(criterion.protocol());
        let what = format!("{:?} criterion #{} ({})", criterion_type, criterion.index, extension.identifier());
        self.host
            .guard_probe(
                &what,
                timeout,
                criterion.force_serialization,
                extension.evaluate_criterion(criterion, self.host, timeout),
            )
            .await
            .unwrap_or_else(CriterionTestResult::from)
    }

    /// Evaluate the connector's criteria in order, stopping at the first one
    /// that does not succeed.
    pub async fn evaluate_detection(&self, connector: &Connector) -> ConnectorTestResult {
        let mut results = Vec::with_capacity(connector.detection.criteria.len());

        for criterion in &connector.detection.criteria {
            let result = self.evaluate(criterion).await;
            let success = result.is_success();
            log::debug!(
                "Hostname {} - Connector {} criterion #{} {:?}: {}",
                self.host.hostname(),
                connector.id,
                criterion.index,
                result.outcome,
                result.message
            );
            results.push(result);
            if !success {
                break;
            }
        }

        ConnectorTestResult {
            connector_id: connector.id.clone(),
            results,
        }
    }
}
