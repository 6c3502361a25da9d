// Integration tests for connector detection

use super::support::{snmp_host, MockSnmp};
use hwsentry::core::config::{DeviceKind, EngineConfig};
use hwsentry::core::connector::Connector;
use hwsentry::core::detection::{CriterionEvaluator, Outcome};
use hwsentry::core::extension::{ExtensionRegistry, HostContext};
use hwsentry::HostConfiguration;
use std::sync::Arc;

fn connector(criteria: &str) -> Connector {
    Connector::from_json_str(&format!(
        r#"{{"formatVersion":1,"id":"Detect","detection":{{"criteria":[{}]}}}}"#,
        criteria
    ))
    .unwrap()
}

fn registry(snmp: &Arc<MockSnmp>) -> ExtensionRegistry {
    ExtensionRegistry::builder().with_extension(snmp.clone()).build()
}

#[tokio::test]
async fn test_detection_stops_at_first_failure() {
    let snmp = Arc::new(
        MockSnmp::new()
            .with_criterion("1.1", true)
            .with_criterion("1.2", false)
            .with_criterion("1.3", true),
    );
    let registry = registry(&snmp);
    let host = HostContext::standalone(snmp_host("srv"), EngineConfig::default());

    let connector = connector(
        r#"{"type":"snmpGet","oid":"1.1"},{"type":"snmpGet","oid":"1.2"},{"type":"snmpGet","oid":"1.3"}"#,
    );
    let result = CriterionEvaluator::new(&registry, &host)
        .evaluate_detection(&connector)
        .await;

    assert!(!result.is_success());
    assert_eq!(result.results.len(), 2);
    assert_eq!(result.results[1].outcome, Outcome::Failure);
    assert_eq!(*snmp.evaluated.lock(), vec!["1.1".to_string(), "1.2".to_string()]);
}

#[tokio::test]
async fn test_all_criteria_pass() {
    let snmp = Arc::new(MockSnmp::new().with_criterion("1.1", true));
    let registry = registry(&snmp);
    let host = HostContext::standalone(snmp_host("srv"), EngineConfig::default());

    let connector = connector(
        r#"{"type":"deviceType","keep":["linux"]},{"type":"productRequirements","engineVersion":"0.0.1"},{"type":"snmpGet","oid":"1.1"}"#,
    );
    let result = CriterionEvaluator::new(&registry, &host)
        .evaluate_detection(&connector)
        .await;

    assert!(result.is_success(), "{}", result.message());
    assert_eq!(result.results.len(), 3);
}

#[tokio::test]
async fn test_local_criteria_do_not_probe() {
    let snmp = Arc::new(MockSnmp::new());
    let registry = registry(&snmp);
    let host = HostContext::standalone(
        HostConfiguration::new("array-1", DeviceKind::Storage),
        EngineConfig::default(),
    );

    let connector = connector(r#"{"type":"deviceType","exclude":["storage"]},{"type":"snmpGet","oid":"1.1"}"#);
    let result = CriterionEvaluator::new(&registry, &host)
        .evaluate_detection(&connector)
        .await;

    assert_eq!(result.results.len(), 1);
    assert_eq!(result.results[0].outcome, Outcome::Failure);
    assert!(snmp.evaluated.lock().is_empty());
}

#[tokio::test]
async fn test_unconfigured_protocol_is_an_error() {
    let snmp = Arc::new(MockSnmp::new().with_criterion("1.1", true));
    let registry = registry(&snmp);
    // no snmp protocol on this host
    let host = HostContext::standalone(
        HostConfiguration::new("srv", DeviceKind::Linux),
        EngineConfig::default(),
    );

    let result = CriterionEvaluator::new(&registry, &host)
        .evaluate(&connector(r#"{"type":"snmpGet","oid":"1.1"}"#).detection.criteria[0])
        .await;

    assert_eq!(result.outcome, Outcome::Error);
    assert!(snmp.evaluated.lock().is_empty());
}

#[tokio::test]
async fn test_empty_detection_succeeds() {
    let registry = ExtensionRegistry::default();
    let host = HostContext::standalone(snmp_host("srv"), EngineConfig::default());

    let result = CriterionEvaluator::new(&registry, &host)
        .evaluate_detection(&connector(""))
        .await;

    assert!(result.is_success());
    assert!(result.results.is_empty());
}
