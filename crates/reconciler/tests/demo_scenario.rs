//! End-to-end lifecycle of `ns1/demo` through a running controller.

mod common;

use std::sync::Arc;

use common::{
    Running, TestResult, edit, eventually, test_config, wait_for_object, wait_for_removal,
};
use serde_json::json;
use steward_automation::{ExternalName, InMemoryAutomationServer, Operation};
use steward_reconciler::{
    AUTO_SYNC_ANNOTATION, CLEANUP_FINALIZER, Reason, SPEC_HASH_ANNOTATION, SYNC_STATUS_ANNOTATION,
    spec_hash, status,
};
use steward_store::{InMemoryObjectStore, ManagedResource, ObjectKey, ObjectStore};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_create_update_delete_lifecycle() -> TestResult {
    let store = InMemoryObjectStore::new_arc();
    let server = Arc::new(InMemoryAutomationServer::new());
    let running = Running::start(store.clone(), server.clone(), test_config()).await?;

    let key = ObjectKey::new("ns1", "demo");
    let name = ExternalName::for_key(&key);
    let spec_v1 = json!({"jenkinsfile": "pipeline { stages { stage('build') {} } }"});
    let spec_v2 = json!({"jenkinsfile": "pipeline { stages { stage('test') {} } }"});
    let h1 = spec_hash(&spec_v1);
    let h2 = spec_hash(&spec_v2);

    // Create: the finalizer lands, the job appears, status reads successful/H1.
    store
        .create(
            ManagedResource::new("ns1", "demo", spec_v1.clone())
                .with_annotation(AUTO_SYNC_ANNOTATION, "true"),
        )
        .await?;
    let created = wait_for_object(store.as_ref(), &key, "synced at H1", |o| {
        o.annotation(SYNC_STATUS_ANNOTATION) == Some(status::SUCCESSFUL)
            && o.annotation(SPEC_HASH_ANNOTATION) == Some(h1.as_str())
    })
    .await?;
    assert!(created.has_finalizer(CLEANUP_FINALIZER));
    let entity = server.entity(&name).await.ok_or("job missing")?;
    assert_eq!(entity.spec, Some(spec_v1.clone()));
    assert_eq!(server.calls(Operation::Create), 1);

    // Edit the spec: auto-sync pushes it, status moves to H2.
    edit(store.as_ref(), &key, |o| o.with_spec(spec_v2.clone())).await?;
    wait_for_object(store.as_ref(), &key, "synced at H2", |o| {
        o.annotation(SYNC_STATUS_ANNOTATION) == Some(status::SUCCESSFUL)
            && o.annotation(SPEC_HASH_ANNOTATION) == Some(h2.as_str())
    })
    .await?;
    let entity = server.entity(&name).await.ok_or("job missing")?;
    assert_eq!(entity.spec, Some(spec_v2));
    assert_eq!(server.calls(Operation::Create), 1);
    assert_eq!(server.calls(Operation::Update), 1);

    // Delete: the object lingers until the job is gone, then disappears.
    store.delete(&key).await?;
    wait_for_removal(store.as_ref(), &key).await?;
    assert!(server.entity(&name).await.is_none());
    assert_eq!(server.calls(Operation::Delete), 1);

    assert_eq!(
        running.recorder.reasons_for(&key),
        vec![Reason::Created, Reason::Updated, Reason::Deleted]
    );

    running.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_objects_present_before_start_are_reconciled() -> TestResult {
    let store = InMemoryObjectStore::new_arc();
    let server = Arc::new(InMemoryAutomationServer::new());
    for name in ["a", "b", "c"] {
        store
            .create(ManagedResource::new("ns1", name, json!({"name": name})))
            .await?;
    }

    let running = Running::start(store.clone(), server.clone(), test_config()).await?;
    for name in ["a", "b", "c"] {
        wait_for_object(store.as_ref(), &ObjectKey::new("ns1", name), "synced", |o| {
            o.annotation(SYNC_STATUS_ANNOTATION) == Some(status::SUCCESSFUL)
        })
        .await?;
    }
    assert_eq!(server.len().await, 3);
    running.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_namespace_scope_ignores_other_namespaces() -> TestResult {
    let store = InMemoryObjectStore::new_arc();
    let server = Arc::new(InMemoryAutomationServer::new());
    let mut config = test_config();
    config.controller.namespace = Some("ns1".to_string());
    let running = Running::start(store.clone(), server.clone(), config).await?;

    store
        .create(ManagedResource::new("ns2", "skip", json!({})))
        .await?;
    store
        .create(ManagedResource::new("ns1", "keep", json!({})))
        .await?;

    let server_ref = server.as_ref();
    let keep = ExternalName::new("ns1", "keep");
    let keep_ref = &keep;
    eventually("ns1 job", || async move { server_ref.entity(keep_ref).await.is_some() }).await?;
    assert!(server.entity(&ExternalName::new("ns2", "skip")).await.is_none());

    running.stop().await?;
    Ok(())
}
