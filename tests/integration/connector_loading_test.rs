// Integration tests for loading connector files

use hwsentry::core::connector::{Connector, ConnectorStore, JobTasks};
use std::fs;
use tempfile::TempDir;

const DISK_CONNECTOR: &str = r#"{
    "formatVersion": 1,
    "id": "MockDisks",
    "tags": ["storage"],
    "detection": { "criteria": [ { "type": "deviceType", "keep": ["linux", "storage"] } ] },
    "monitors": {
        "physical_disk": {
            "keys": ["id", "slot"],
            "discovery": {
                "sources": [
                    { "key": "disks", "type": "commandLine", "commandLine": "lsblk -rno NAME,SIZE" }
                ],
                "mapping": { "source": "${source::disks}", "attributes": { "id": "$1", "slot": "$index" } }
            }
        }
    }
}"#;

#[test]
fn test_from_path_reads_connector() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("MockDisks.json");
    fs::write(&path, DISK_CONNECTOR).unwrap();

    let connector = Connector::from_path(&path).unwrap();
    assert_eq!(connector.id, "MockDisks");
    assert!(connector.has_tag("STORAGE"));

    let job = &connector.monitors["physical_disk"];
    assert_eq!(job.keys, vec!["id".to_string(), "slot".to_string()]);
    assert!(matches!(job.tasks, JobTasks::Standard { collect: None, .. }));
    assert_eq!(connector.all_sources().count(), 1);
}

#[test]
fn test_from_path_errors_name_the_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("Broken.json");
    fs::write(&path, "{ not json").unwrap();

    let error = Connector::from_path(&path).unwrap_err();
    assert!(format!("{:#}", error).contains("Broken.json"));

    let missing = Connector::from_path(temp_dir.path().join("Missing.json")).unwrap_err();
    assert!(format!("{:#}", missing).contains("Failed to read connector file"));
}

#[test]
fn test_unsupported_format_version_is_rejected() {
    let json = DISK_CONNECTOR.replace("\"formatVersion\": 1", "\"formatVersion\": 7");
    assert!(Connector::from_json_str(&json).is_err());
}

#[test]
fn test_load_dir_skips_bad_files() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("MockDisks.json"), DISK_CONNECTOR).unwrap();
    fs::write(temp_dir.path().join("Broken.json"), "[]").unwrap();
    fs::write(temp_dir.path().join("README.md"), "# connectors").unwrap();

    let store = ConnectorStore::load_dir(temp_dir.path()).unwrap();
    assert_eq!(store.len(), 1);
    assert!(store.find("mockdisks").is_some());
}
