// Integration tests for source execution: serialization, timeouts, retries

use super::support::{snmp_host, MockSnmp};
use hwsentry::core::config::{EngineConfig, ProtocolConfig};
use hwsentry::core::connector::Connector;
use hwsentry::core::extension::{ExtensionRegistry, HostContext};
use hwsentry::core::source::SourceExecutor;
use hwsentry::core::table::{SourceNamespace, SourceTable};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn connector_with_pre(sources: &str) -> Connector {
    Connector::from_json_str(&format!(
        r#"{{"formatVersion":1,"id":"Sources","pre":[{}]}}"#,
        sources
    ))
    .unwrap()
}

fn registry(snmp: &Arc<MockSnmp>) -> ExtensionRegistry {
    ExtensionRegistry::builder().with_extension(snmp.clone()).build()
}

#[tokio::test]
async fn test_forced_serialization_never_overlaps() {
    let delay = Duration::from_millis(60);
    let snmp = Arc::new(
        MockSnmp::new()
            .with_slow_table("1.1", delay, "a")
            .with_slow_table("1.2", delay, "b")
            .with_slow_table("1.3", delay, "c"),
    );
    let registry = registry(&snmp);
    let host = HostContext::standalone(snmp_host("srv"), EngineConfig::default());
    let connector = connector_with_pre(
        r#"{"key":"a","type":"snmpGet","oid":"1.1","forceSerialization":true},
           {"key":"b","type":"snmpGet","oid":"1.2","forceSerialization":true},
           {"key":"c","type":"snmpGet","oid":"1.3"}"#,
    );

    let mut namespace = SourceNamespace::new();
    SourceExecutor::new(&registry, &host, &connector)
        .run_sources(&connector.pre, &mut namespace, &SourceNamespace::new(), None)
        .await;

    assert_eq!(snmp.max_serialized_in_flight.load(Ordering::SeqCst), 1);
    assert!(snmp.max_in_flight.load(Ordering::SeqCst) >= 2);
    for key in ["a", "b", "c"] {
        assert_eq!(namespace[key].table, vec![vec![key.to_string()]]);
    }
}

#[tokio::test]
async fn test_timed_out_probe_is_empty_and_isolated() {
    let snmp = Arc::new(
        MockSnmp::new()
            .with_slow_table("1.1", Duration::from_secs(5), "late")
            .with_table("1.2", "fast"),
    );
    let registry = registry(&snmp);
    let mut config = snmp_host("srv");
    config.protocols.insert(
        "snmp".to_string(),
        ProtocolConfig {
            timeout_secs: Some(1),
            ..Default::default()
        },
    );
    let host = HostContext::standalone(config, EngineConfig::default());
    let connector = connector_with_pre(
        r#"{"key":"slow","type":"snmpGet","oid":"1.1"},{"key":"quick","type":"snmpGet","oid":"1.2"}"#,
    );

    let started = Instant::now();
    let mut namespace = SourceNamespace::new();
    SourceExecutor::new(&registry, &host, &connector)
        .run_sources(&connector.pre, &mut namespace, &SourceNamespace::new(), None)
        .await;

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(namespace["slow"].is_empty());
    assert_eq!(namespace["quick"].table, vec![vec!["fast".to_string()]]);
}

#[tokio::test]
async fn test_empty_result_is_retried_when_previous_had_data() {
    // 1.1 has no reply: the probe answers with an empty table
    let snmp = Arc::new(MockSnmp::new());
    let registry = registry(&snmp);
    let host = HostContext::standalone(snmp_host("srv"), EngineConfig::default());
    let connector = connector_with_pre(r#"{"key":"disks","type":"snmpGet","oid":"1.1"}"#);
    let executor = SourceExecutor::new(&registry, &host, &connector);

    let mut namespace = SourceNamespace::new();
    executor
        .run_sources(&connector.pre, &mut namespace, &SourceNamespace::new(), None)
        .await;
    assert_eq!(snmp.executed_count("1.1"), 1);

    let mut previous = SourceNamespace::new();
    previous.insert("disks".to_string(), SourceTable::from_rows(vec![vec!["d0"]]));
    let mut namespace = SourceNamespace::new();
    executor
        .run_sources(&connector.pre, &mut namespace, &previous, None)
        .await;
    assert_eq!(snmp.executed_count("1.1"), 3);
}

#[tokio::test]
async fn test_per_entry_execution_skips_failed_entries() {
    let snmp = Arc::new(
        MockSnmp::new()
            .with_table("1.7.d0", "d0;ok")
            .with_failing_table("1.7.d1")
            .with_table("1.7.d2", "d2;failed"),
    );
    let registry = registry(&snmp);
    let host = HostContext::standalone(snmp_host("srv"), EngineConfig::default());
    let connector = connector_with_pre(
        r#"{"key":"ids","type":"static","value":"d0\nd1\nd2"},
           {"key":"status","type":"snmpGet","oid":"1.7.$1",
            "executeForEachEntryOf":{"source":"${source::ids}","concatMethod":"list"}}"#,
    );

    let mut namespace = SourceNamespace::new();
    SourceExecutor::new(&registry, &host, &connector)
        .run_sources(&connector.pre, &mut namespace, &SourceNamespace::new(), None)
        .await;

    assert_eq!(snmp.executed_count("1.7.d1"), 1);
    assert_eq!(
        namespace["status"].table,
        vec![
            vec!["d0".to_string(), "ok".to_string()],
            vec!["d2".to_string(), "failed".to_string()],
        ]
    );
}

#[tokio::test]
async fn test_missing_extension_is_empty() {
    let registry = ExtensionRegistry::default();
    let host = HostContext::standalone(snmp_host("srv"), EngineConfig::default());
    let connector = connector_with_pre(r#"{"key":"x","type":"snmpGet","oid":"1.1"}"#);

    let executor = SourceExecutor::new(&registry, &host, &connector);
    let error = executor
        .execute(&connector.pre[0], &SourceNamespace::new(), None)
        .await
        .unwrap_err();
    assert!(error.is_probe_error());

    let mut namespace = SourceNamespace::new();
    executor
        .run_sources(&connector.pre, &mut namespace, &SourceNamespace::new(), None)
        .await;
    assert!(namespace["x"].is_empty());
}
