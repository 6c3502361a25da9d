// Integration tests for the per-host strategy: detection, discovery, collection

use super::support::{snmp_host, MockSnmp, Reply};
use hwsentry::core::config::EngineConfig;
use hwsentry::core::connector::{Connector, ConnectorStore};
use hwsentry::core::extension::{ExtensionRegistry, HostContext};
use hwsentry::core::strategy::{Cancellation, JobState, StrategyOrchestrator};
use hwsentry::core::telemetry::{Metric, TelemetryStore};
use hwsentry::HostConfiguration;
use std::sync::atomic::Ordering;
use std::sync::Arc;

const CPU_CONNECTOR: &str = r#"{
    "formatVersion": 1,
    "id": "MockCpu",
    "displayName": "Mock processors",
    "detection": { "criteria": [ { "type": "snmpGet", "oid": "1.0" } ] },
    "translations": {
        "cpuStatus": { "ok": "ok", "warn": "degraded", "default": "failed" }
    },
    "metrics": {
        "hw.status": { "type": { "stateSet": ["ok", "degraded", "failed"] } }
    },
    "monitors": {
        "cpu": {
            "discovery": {
                "sources": [
                    {
                        "key": "cpus",
                        "type": "snmpTable",
                        "oid": "1.1",
                        "selectColumns": "1,2",
                        "computes": [ { "type": "translate", "column": 2, "translationTable": "cpuStatus" } ]
                    }
                ],
                "mapping": {
                    "source": "${source::cpus}",
                    "attributes": { "id": "$1", "name": "CPU $1" },
                    "metrics": { "hw.status{hw.type=\"cpu\"}": "$2" }
                }
            },
            "collect": {
                "type": "multiInstance",
                "sources": [
                    { "key": "speeds", "type": "snmpTable", "oid": "1.2", "selectColumns": "1,2" }
                ],
                "mapping": {
                    "source": "${source::speeds}",
                    "attributes": { "id": "$1" },
                    "metrics": { "hw.cpu.speed": "megaHertz2Hertz($2)" }
                }
            }
        }
    }
}"#;

const ENCLOSURE_CONNECTOR: &str = r#"{
    "formatVersion": 1,
    "id": "MockEnclosure",
    "monitors": {
        "enclosure": {
            "discovery": {
                "sources": [ { "key": "enclosures", "type": "static", "value": "encl0;Chassis" } ],
                "mapping": { "source": "${source::enclosures}", "attributes": { "id": "$1", "model": "$2" } }
            },
            "collect": {
                "type": "monoInstance",
                "sources": [ { "key": "power", "type": "snmpGet", "oid": "1.5.${attribute::id}" } ],
                "mapping": { "source": "${source::power}", "metrics": { "hw.enclosure.power": "$1" } }
            }
        },
        "fan": {
            "simple": {
                "sources": [ { "key": "fans", "type": "static", "value": "f1;1200\nf2;1300" } ],
                "mapping": { "source": "${source::fans}", "attributes": { "id": "$1" }, "metrics": { "hw.fan.speed": "$2" } }
            }
        }
    }
}"#;

const ALT_CPU_CONNECTOR: &str = r#"{
    "formatVersion": 1,
    "id": "MockCpuAlt",
    "monitors": {
        "cpu": {
            "discovery": {
                "sources": [ { "key": "cpus", "type": "static", "value": "cpu0;AMD" } ],
                "mapping": { "source": "${source::cpus}", "attributes": { "id": "$1", "vendor": "$2" } }
            }
        }
    }
}"#;

const CHASSIS_CONNECTOR: &str = r#"{
    "formatVersion": 1,
    "id": "MockChassis",
    "monitors": {
        "enclosure": {
            "discovery": {
                "sources": [ { "key": "enclosures", "type": "snmpTable", "oid": "2.1", "selectColumns": "1" } ],
                "mapping": { "source": "${source::enclosures}", "attributes": { "id": "$1" } }
            },
            "collect": {
                "type": "monoInstance",
                "sources": [ { "key": "power", "type": "snmpGet", "oid": "2.5.${attribute::id}" } ],
                "mapping": { "source": "${source::power}", "metrics": { "hw.enclosure.power": "$1" } }
            }
        }
    }
}"#;

fn cpu_snmp() -> MockSnmp {
    MockSnmp::new()
        .with_criterion("1.0", true)
        .with_table("1.1", "cpu0;ok\ncpu1;warn")
        .with_table("1.2", "cpu0;2400\ncpu1;2600")
}

fn orchestrator(snmp: &Arc<MockSnmp>, connectors: &[&str]) -> StrategyOrchestrator {
    let registry = ExtensionRegistry::builder().with_extension(snmp.clone()).build();
    let store = ConnectorStore::from_connectors(
        connectors
            .iter()
            .map(|json| Connector::from_json_str(json).unwrap()),
    );
    StrategyOrchestrator::new(Arc::new(registry), Arc::new(store), Arc::new(TelemetryStore::new()))
}

fn host(config: HostConfiguration) -> HostContext {
    HostContext::standalone(config, EngineConfig::default())
}

#[tokio::test]
async fn test_discovery_creates_monitors_with_status() {
    let snmp = Arc::new(cpu_snmp());
    let orchestrator = orchestrator(&snmp, &[CPU_CONNECTOR]);

    let report = orchestrator.run_host(&host(snmp_host("srv"))).await;
    let cpu = report.connector("MockCpu").unwrap();
    assert_eq!(cpu.discovery, JobState::Succeeded);
    assert_eq!(cpu.collection, JobState::Succeeded);

    let resource = orchestrator.telemetry().get("srv").unwrap();
    let resource = resource.lock();
    let status = "hw.status{hw.type=\"cpu\"}";

    let cpu0 = resource.monitor("cpu", "cpu0").unwrap();
    assert_eq!(cpu0.attributes["name"], "CPU cpu0");
    assert_eq!(cpu0.connector_id.as_deref(), Some("MockCpu"));
    assert_eq!(cpu0.metric(status).unwrap().as_state(), Some("ok"));
    assert_eq!(cpu0.metric("hw.cpu.speed").unwrap().as_number(), Some(2_400_000_000.0));

    let cpu1 = resource.monitor("cpu", "cpu1").unwrap();
    assert_eq!(cpu1.metric(status).unwrap().as_state(), Some("degraded"));
}

#[tokio::test]
async fn test_detection_recorded_on_connector_monitor() {
    let snmp = Arc::new(cpu_snmp());
    let orchestrator = orchestrator(&snmp, &[CPU_CONNECTOR]);
    orchestrator.run_host(&host(snmp_host("srv"))).await;

    let resource = orchestrator.telemetry().get("srv").unwrap();
    let resource = resource.lock();
    let monitor = resource.monitor("connector", "MockCpu").unwrap();
    assert_eq!(monitor.attributes["name"], "Mock processors");
    assert_eq!(monitor.metric("hw.connector.status").unwrap().as_state(), Some("ok"));
    assert!(monitor.legacy_text_parameters["StatusInformation"].contains("1.0"));

    let endpoint = resource.monitor("host", "srv").unwrap();
    assert!(endpoint.is_endpoint);
    assert_eq!(
        endpoint
            .metric("hwsentry.host.up{protocol=\"mock-snmp\"}")
            .and_then(Metric::as_number),
        Some(1.0)
    );
    assert!(endpoint
        .metrics
        .keys()
        .any(|name| name.starts_with("hwsentry.job.duration")));
}

#[tokio::test]
async fn test_collection_is_idempotent() {
    let snmp = Arc::new(cpu_snmp());
    let orchestrator = orchestrator(&snmp, &[CPU_CONNECTOR]);

    let snapshot = |orchestrator: &StrategyOrchestrator| {
        let resource = orchestrator.telemetry().get("srv").unwrap();
        let resource = resource.lock();
        let values: Vec<_> = resource
            .monitors_of("cpu")
            .map(|m| {
                (
                    m.id.clone(),
                    m.metric("hw.cpu.speed").and_then(Metric::as_number),
                    m.metric("hw.status{hw.type=\"cpu\"}")
                        .and_then(|metric| metric.as_state().map(str::to_string)),
                )
            })
            .collect();
        values
    };

    orchestrator.run_host(&host(snmp_host("srv"))).await;
    let first = snapshot(&orchestrator);
    orchestrator.run_host(&host(snmp_host("srv"))).await;
    let second = snapshot(&orchestrator);

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_missing_monitor_is_marked_stale() {
    let snmp = Arc::new(cpu_snmp());
    let orchestrator = orchestrator(&snmp, &[CPU_CONNECTOR]);
    orchestrator.run_host(&host(snmp_host("srv"))).await;

    snmp.set_reply("1.1", Reply::Rows("cpu0;ok".to_string()));
    orchestrator.run_host(&host(snmp_host("srv"))).await;

    let resource = orchestrator.telemetry().get("srv").unwrap();
    let resource = resource.lock();
    assert!(!resource.monitor("cpu", "cpu0").unwrap().is_stale);
    assert!(resource.monitor("cpu", "cpu1").unwrap().is_stale);
}

#[tokio::test]
async fn test_failed_detection_skips_unless_forced() {
    let snmp = Arc::new(
        MockSnmp::new()
            .with_criterion("1.0", false)
            .with_table("1.1", "cpu0;ok"),
    );
    let orchestrator = orchestrator(&snmp, &[CPU_CONNECTOR]);

    let report = orchestrator.run_host(&host(snmp_host("srv"))).await;
    let cpu = report.connector("MockCpu").unwrap();
    assert_eq!(cpu.discovery, JobState::Skipped);
    assert!(!cpu.detection.as_ref().unwrap().is_success());
    assert_eq!(snmp.executed_count("1.1"), 0);

    let mut forced = snmp_host("srv");
    forced.connectors.insert("+MockCpu".to_string());
    let report = orchestrator.run_host(&host(forced)).await;
    let cpu = report.connector("MockCpu").unwrap();
    assert!(cpu.forced);
    assert_eq!(cpu.discovery, JobState::Succeeded);

    let resource = orchestrator.telemetry().get("srv").unwrap();
    let resource = resource.lock();
    assert!(resource.monitor("cpu", "cpu0").is_some());
    assert_eq!(
        resource
            .monitor("connector", "MockCpu")
            .unwrap()
            .metric("hw.connector.status")
            .unwrap()
            .as_state(),
        Some("failed")
    );
}

#[tokio::test]
async fn test_superseded_connector_is_not_run() {
    let snmp = Arc::new(cpu_snmp());
    let superseding = r#"{
        "formatVersion": 1,
        "id": "MockCpuV2",
        "detection": { "supersedes": ["MockCpu"] },
        "monitors": {}
    }"#;
    let orchestrator = orchestrator(&snmp, &[CPU_CONNECTOR, superseding]);

    let report = orchestrator.run_host(&host(snmp_host("srv"))).await;
    assert_eq!(report.connector("MockCpu").unwrap().discovery, JobState::Skipped);
    assert_eq!(snmp.executed_count("1.1"), 0);
}

#[tokio::test]
async fn test_cached_detection_when_not_revalidated() {
    let snmp = Arc::new(cpu_snmp());
    let orchestrator = orchestrator(&snmp, &[CPU_CONNECTOR]);
    let engine = EngineConfig {
        validate_detection_each_cycle: false,
        ..Default::default()
    };

    orchestrator
        .run_host(&HostContext::standalone(snmp_host("srv"), engine.clone()))
        .await;
    let report = orchestrator
        .run_host(&HostContext::standalone(snmp_host("srv"), engine))
        .await;

    assert_eq!(snmp.evaluated.lock().len(), 1);
    let cpu = report.connector("MockCpu").unwrap();
    assert!(cpu.detection.is_none());
    assert_eq!(cpu.discovery, JobState::Succeeded);
    assert_eq!(snmp.executed_count("1.1"), 2);
}

#[tokio::test]
async fn test_mono_instance_collect_and_simple_job() {
    let snmp = Arc::new(MockSnmp::new().with_table("1.5.encl0", "42"));
    let orchestrator = orchestrator(&snmp, &[ENCLOSURE_CONNECTOR]);

    let report = orchestrator.run_host(&host(snmp_host("srv"))).await;
    assert_eq!(report.connector("MockEnclosure").unwrap().collection, JobState::Succeeded);

    let resource = orchestrator.telemetry().get("srv").unwrap();
    let resource = resource.lock();
    let enclosure = resource.monitor("enclosure", "encl0").unwrap();
    assert_eq!(enclosure.attributes["model"], "Chassis");
    assert_eq!(
        enclosure.metric("hw.enclosure.power").and_then(Metric::as_number),
        Some(42.0)
    );

    let fan = resource.monitor("fan", "f2").unwrap();
    assert_eq!(fan.metric("hw.fan.speed").and_then(Metric::as_number), Some(1300.0));
}

#[tokio::test]
async fn test_protocol_health_is_recorded() {
    let snmp = Arc::new(cpu_snmp());
    snmp.down.store(true, Ordering::SeqCst);
    let orchestrator = orchestrator(&snmp, &[CPU_CONNECTOR]);
    orchestrator.run_host(&host(snmp_host("srv"))).await;

    let resource = orchestrator.telemetry().get("srv").unwrap();
    let resource = resource.lock();
    assert_eq!(
        resource
            .monitor("host", "srv")
            .unwrap()
            .metric("hwsentry.host.up{protocol=\"mock-snmp\"}")
            .and_then(Metric::as_number),
        Some(0.0)
    );
}

#[tokio::test]
async fn test_failed_discovery_keeps_multi_instance_monitors_collected() {
    let snmp = Arc::new(cpu_snmp());
    let orchestrator = orchestrator(&snmp, &[CPU_CONNECTOR]);
    orchestrator.run_host(&host(snmp_host("srv"))).await;

    snmp.set_reply("1.1", Reply::Fail);
    snmp.set_reply("1.2", Reply::Rows("cpu0;3000\ncpu1;3100".to_string()));
    let report = orchestrator.run_host(&host(snmp_host("srv"))).await;
    let cpu = report.connector("MockCpu").unwrap();
    assert_eq!(cpu.discovery, JobState::Failed);
    assert_eq!(cpu.collection, JobState::Succeeded);

    let resource = orchestrator.telemetry().get("srv").unwrap();
    let resource = resource.lock();
    let cpu1 = resource.monitor("cpu", "cpu1").unwrap();
    assert!(!cpu1.is_stale);
    assert_eq!(cpu1.metric("hw.cpu.speed").and_then(Metric::as_number), Some(3_100_000_000.0));
    assert_eq!(
        cpu1.metric("hw.status{hw.type=\"cpu\"}").and_then(Metric::as_state),
        Some("degraded")
    );
}

#[tokio::test]
async fn test_failed_discovery_keeps_mono_instance_monitors_collected() {
    let snmp = Arc::new(MockSnmp::new().with_table("2.1", "encl0").with_table("2.5.encl0", "42"));
    let orchestrator = orchestrator(&snmp, &[CHASSIS_CONNECTOR]);
    orchestrator.run_host(&host(snmp_host("srv"))).await;

    snmp.set_reply("2.1", Reply::Fail);
    snmp.set_reply("2.5.encl0", Reply::Rows("99".to_string()));
    let report = orchestrator.run_host(&host(snmp_host("srv"))).await;
    let chassis = report.connector("MockChassis").unwrap();
    assert_eq!(chassis.discovery, JobState::Failed);
    assert_eq!(chassis.collection, JobState::Succeeded);
    assert_eq!(snmp.executed_count("2.5.encl0"), 2);

    let resource = orchestrator.telemetry().get("srv").unwrap();
    let resource = resource.lock();
    let enclosure = resource.monitor("enclosure", "encl0").unwrap();
    assert!(!enclosure.is_stale);
    assert_eq!(
        enclosure.metric("hw.enclosure.power").and_then(Metric::as_number),
        Some(99.0)
    );
}

#[tokio::test]
async fn test_connectors_discovering_the_same_id_keep_their_own_monitors() {
    let snmp = Arc::new(cpu_snmp());
    let orchestrator = orchestrator(&snmp, &[CPU_CONNECTOR, ALT_CPU_CONNECTOR]);
    orchestrator.run_host(&host(snmp_host("srv"))).await;
    orchestrator.run_host(&host(snmp_host("srv"))).await;

    let resource = orchestrator.telemetry().get("srv").unwrap();
    let resource = resource.lock();
    assert_eq!(resource.monitors_of("cpu").count(), 3);

    let mock = resource.connector_monitor("MockCpu", "cpu", "cpu0").unwrap();
    assert!(!mock.is_stale);
    assert!(!mock.attributes.contains_key("vendor"));
    assert_eq!(mock.metric("hw.cpu.speed").and_then(Metric::as_number), Some(2_400_000_000.0));

    let alt = resource.connector_monitor("MockCpuAlt", "cpu", "cpu0").unwrap();
    assert_eq!(alt.id, "cpu0");
    assert!(!alt.is_stale);
    assert_eq!(alt.attributes["vendor"], "AMD");
    assert!(alt.metric("hw.cpu.speed").is_none());
}

#[tokio::test]
async fn test_detection_with_errors_is_not_cached() {
    // no answer for 1.0 yet: the criterion errors
    let snmp = Arc::new(
        MockSnmp::new()
            .with_table("1.1", "cpu0;ok")
            .with_table("1.2", "cpu0;2400"),
    );
    let orchestrator = orchestrator(&snmp, &[CPU_CONNECTOR]);
    let engine = EngineConfig {
        validate_detection_each_cycle: false,
        ..Default::default()
    };
    let run = |engine: &EngineConfig| HostContext::standalone(snmp_host("srv"), engine.clone());

    let report = orchestrator.run_host(&run(&engine)).await;
    assert_eq!(report.connector("MockCpu").unwrap().discovery, JobState::Skipped);

    snmp.set_criterion("1.0", true);
    let report = orchestrator.run_host(&run(&engine)).await;
    let cpu = report.connector("MockCpu").unwrap();
    assert!(cpu.detection.as_ref().unwrap().is_success());
    assert_eq!(cpu.discovery, JobState::Succeeded);

    let report = orchestrator.run_host(&run(&engine)).await;
    assert!(report.connector("MockCpu").unwrap().detection.is_none());
    assert_eq!(snmp.evaluated.lock().len(), 2);
}

#[tokio::test]
async fn test_cancelled_detection_is_not_cached() {
    let snmp = Arc::new(cpu_snmp());
    let orchestrator = orchestrator(&snmp, &[CPU_CONNECTOR]);
    let engine = EngineConfig {
        validate_detection_each_cycle: false,
        ..Default::default()
    };

    let (cancel, cancellation) = Cancellation::new();
    cancel.send(true).unwrap();
    let cancelled = HostContext::new(
        Arc::new(snmp_host("srv")),
        Arc::new(engine.clone()),
        cancellation,
        Arc::new(tokio::sync::Mutex::new(())),
    );
    assert!(orchestrator.run_host(&cancelled).await.cancelled);

    let report = orchestrator
        .run_host(&HostContext::standalone(snmp_host("srv"), engine))
        .await;
    let cpu = report.connector("MockCpu").unwrap();
    assert!(cpu.detection.is_some());
    assert_eq!(cpu.discovery, JobState::Succeeded);
}
