//! Tests for the command helpers behind the `steward` binary.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::io::Write;
use std::path::PathBuf;

use serde_json::json;
use steward::commands::{
    Overrides, apply_overrides, build_client, effective_config, load_config, load_manifests,
    read_spec,
};
use steward::steward_automation::{ExternalName, ExternalSystemClient};
use steward::steward_core::StewardConfig;
use steward::steward_reconciler::spec_hash;
use steward::steward_store::{InMemoryObjectStore, ObjectKey, ObjectStore};

fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

#[test]
fn test_load_config_defaults_without_file() {
    let config = load_config(None).unwrap();
    assert_eq!(config, StewardConfig::default());
}

#[test]
fn test_load_config_reports_path_on_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "steward.toml", "[controller]\nworkers = \"many\"\n");
    let err = load_config(Some(&path)).unwrap_err();
    assert!(format!("{err:#}").contains("steward.toml"));
}

#[test]
fn test_overrides_take_precedence_and_revalidate() {
    let overrides = Overrides {
        workers: Some(8),
        namespace: Some("ns1".to_string()),
        automation_url: Some("http://jenkins:8080/".to_string()),
        ..Overrides::default()
    };
    let config = apply_overrides(StewardConfig::default(), overrides).unwrap();
    assert_eq!(config.controller.workers, 8);
    assert_eq!(config.controller.namespace.as_deref(), Some("ns1"));
    assert_eq!(config.automation.url.as_deref(), Some("http://jenkins:8080/"));

    let zero = Overrides {
        workers: Some(0),
        ..Overrides::default()
    };
    assert!(apply_overrides(StewardConfig::default(), zero).is_err());
}

#[tokio::test]
async fn test_load_manifests_creates_each_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(
        &dir,
        "jobs.yaml",
        r#"
metadata:
  namespace: ns1
  name: demo
spec:
  jenkinsfile: "pipeline {}"
---
metadata:
  namespace: ns1
  name: other
spec: {}
"#,
    );
    let store = InMemoryObjectStore::new();
    let created = load_manifests(&store, &[path]).await.unwrap();
    assert_eq!(created, 2);
    let demo = store.get(&ObjectKey::new("ns1", "demo")).await.unwrap().unwrap();
    assert_eq!(demo.spec(), &json!({"jenkinsfile": "pipeline {}"}));
}

#[tokio::test]
async fn test_load_manifests_rejects_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let doc = "metadata:\n  namespace: ns1\n  name: demo\nspec: {}\n";
    let first = write_file(&dir, "a.yaml", doc);
    let second = write_file(&dir, "b.yaml", doc);
    let store = InMemoryObjectStore::new();
    let err = load_manifests(&store, &[first, second]).await.unwrap_err();
    assert!(format!("{err:#}").contains("b.yaml"));
}

#[test]
fn test_read_spec_accepts_json_and_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let as_json = write_file(&dir, "spec.json", r#"{"b": 2, "a": [1, 2]}"#);
    let as_yaml = write_file(&dir, "spec.yaml", "a:\n  - 1\n  - 2\nb: 2\n");
    let from_json = read_spec(Some(&as_json)).unwrap();
    let from_yaml = read_spec(Some(&as_yaml)).unwrap();
    assert_eq!(spec_hash(&from_json), spec_hash(&from_yaml));
}

#[tokio::test]
async fn test_build_client_falls_back_to_in_memory() {
    let mut config = StewardConfig::default();
    let client = build_client(&config.automation, false).unwrap();
    // The in-memory backend starts empty.
    assert!(client.get(&ExternalName::new("ns1", "demo")).await.unwrap().is_none());

    config.automation.url = Some("not a url".to_string());
    assert!(build_client(&config.automation, false).is_err());
    assert!(build_client(&config.automation, true).is_ok());
}

#[test]
fn test_effective_config_masks_token() {
    let mut config = StewardConfig::default();
    config.automation.token = Some("s3cret".to_string());
    let shown = effective_config(&config).unwrap();
    assert!(!shown.contains("s3cret"));
    assert!(shown.contains("<redacted>"));
    assert!(shown.contains("workers = 2"));
}
