// Integration tests for the scheduler: parallel hosts, overlap, cancellation

use super::support::{snmp_host, MockSnmp};
use hwsentry::core::config::EngineConfig;
use hwsentry::core::connector::{Connector, ConnectorStore};
use hwsentry::core::extension::ExtensionRegistry;
use hwsentry::core::strategy::Scheduler;
use hwsentry::core::telemetry::TelemetryStore;
use std::sync::Arc;
use std::time::{Duration, Instant};

const SLOW_CONNECTOR: &str = r#"{
    "formatVersion": 1,
    "id": "MockSlow",
    "monitors": {
        "disk": {
            "discovery": {
                "sources": [ { "key": "disks", "type": "snmpTable", "oid": "9.9", "selectColumns": "1" } ],
                "mapping": { "source": "${source::disks}", "attributes": { "id": "$1" } }
            }
        }
    }
}"#;

fn scheduler(snmp: &Arc<MockSnmp>, engine: EngineConfig) -> Scheduler {
    let registry = ExtensionRegistry::builder().with_extension(snmp.clone()).build();
    let store = ConnectorStore::from_connectors(vec![Connector::from_json_str(SLOW_CONNECTOR).unwrap()]);
    Scheduler::new(
        engine,
        Arc::new(registry),
        Arc::new(store),
        Arc::new(TelemetryStore::new()),
    )
}

#[tokio::test]
async fn test_cycle_runs_every_host() {
    let snmp = Arc::new(MockSnmp::new().with_table("9.9", "d0\nd1"));
    let scheduler = scheduler(&snmp, EngineConfig::default());
    for name in ["srv-1", "srv-2", "srv-3"] {
        scheduler.add_host(snmp_host(name));
    }

    let reports = scheduler.run_cycle().await;
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| !r.cancelled));
    assert_eq!(
        scheduler.telemetry().hostnames(),
        vec!["srv-1".to_string(), "srv-2".to_string(), "srv-3".to_string()]
    );

    let resource = scheduler.telemetry().get("srv-2").unwrap();
    assert!(resource.lock().monitor("disk", "d1").is_some());
}

#[tokio::test]
async fn test_overlapping_run_is_skipped() {
    let snmp = Arc::new(MockSnmp::new().with_slow_table("9.9", Duration::from_millis(400), "d0"));
    let scheduler = scheduler(&snmp, EngineConfig::default());
    scheduler.add_host(snmp_host("srv"));

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_cycle().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = scheduler.run_cycle().await;
    assert!(second.is_empty(), "host run should be skipped while one is in flight");

    let first = first.await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(snmp.executed_count("9.9"), 1);
}

#[tokio::test]
async fn test_remove_host_cancels_run_in_flight() {
    let snmp = Arc::new(MockSnmp::new().with_slow_table("9.9", Duration::from_secs(10), "d0"));
    let scheduler = scheduler(&snmp, EngineConfig::default());
    scheduler.add_host(snmp_host("srv"));

    let started = Instant::now();
    let cycle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_cycle().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(scheduler.remove_host("srv"));
    assert!(!scheduler.remove_host("srv"));

    let reports = cycle.await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(reports.len(), 1);
    assert!(reports[0].cancelled);
    assert!(scheduler.hostnames().is_empty());
}

#[tokio::test]
async fn test_periodic_cycles_stop_on_shutdown() {
    let snmp = Arc::new(MockSnmp::new().with_table("9.9", "d0"));
    let scheduler = scheduler(&snmp, EngineConfig::default());
    scheduler.add_host(snmp_host("srv"));

    let handle = scheduler.spawn_periodic(Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(180)).await;
    scheduler.shutdown();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("periodic task should stop")
        .unwrap();
    assert!(scheduler.is_shut_down());

    let executed = snmp.executed_count("9.9");
    assert!(executed >= 2, "expected several cycles, got {}", executed);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(snmp.executed_count("9.9"), executed);
}

#[tokio::test]
async fn test_worker_pool_bounds_parallel_hosts() {
    let snmp = Arc::new(MockSnmp::new().with_slow_table("9.9", Duration::from_millis(50), "d0"));
    let engine = EngineConfig {
        max_workers: 1,
        ..Default::default()
    };
    let scheduler = scheduler(&snmp, engine);
    for name in ["a", "b", "c"] {
        scheduler.add_host(snmp_host(name));
    }

    let reports = scheduler.run_cycle().await;
    assert_eq!(reports.len(), 3);
    assert_eq!(snmp.max_in_flight.load(std::sync::atomic::Ordering::SeqCst), 1);
}
