//! In-memory automation server for tests and demos.
//!
//! Counts every call and lets tests queue failures per operation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::client::{ExternalEntity, ExternalName, ExternalSystemClient};
use crate::error::{Error, Result};

/// Operations that can be counted and failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Create,
    Update,
    Delete,
}

#[derive(Default)]
struct CallCounters {
    get: AtomicUsize,
    create: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
}

impl CallCounters {
    const fn counter(&self, op: Operation) -> &AtomicUsize {
        match op {
            Operation::Get => &self.get,
            Operation::Create => &self.create,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
        }
    }
}

/// Automation server held in memory.
#[derive(Default)]
pub struct InMemoryAutomationServer {
    entities: RwLock<BTreeMap<ExternalName, ExternalEntity>>,
    faults: Mutex<HashMap<Operation, VecDeque<Error>>>,
    calls: CallCounters,
    latency: Option<Duration>,
}

impl InMemoryAutomationServer {
    /// Create an empty server.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`, to widen race windows in tests.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next call of `op` fail with `error`. Faults queue up in
    /// order and are consumed one per call.
    pub async fn fail_next(&self, op: Operation, error: Error) {
        self.faults.lock().await.entry(op).or_default().push_back(error);
    }

    /// Make the next `times` calls of `op` fail with `error`.
    pub async fn fail_times(&self, op: Operation, error: Error, times: usize) {
        let mut faults = self.faults.lock().await;
        let queue = faults.entry(op).or_default();
        queue.extend(std::iter::repeat_n(error, times));
    }

    /// Place an entity directly, bypassing counters (e.g. one created
    /// out-of-band by a human).
    pub async fn insert(&self, name: ExternalName, spec: serde_json::Value) {
        let entity = ExternalEntity {
            name: name.clone(),
            kind: Some("external".to_string()),
            url: None,
            spec: Some(spec),
        };
        self.entities.write().await.insert(name, entity);
    }

    /// Remove an entity directly, bypassing counters.
    pub async fn remove(&self, name: &ExternalName) -> Option<ExternalEntity> {
        self.entities.write().await.remove(name)
    }

    /// Current state of an entity, bypassing counters.
    pub async fn entity(&self, name: &ExternalName) -> Option<ExternalEntity> {
        self.entities.read().await.get(name).cloned()
    }

    /// Number of entities held.
    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    /// Whether no entities are held.
    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }

    /// How many times `op` was called, failed calls included.
    #[must_use]
    pub fn calls(&self, op: Operation) -> usize {
        self.calls.counter(op).load(Ordering::SeqCst)
    }

    async fn enter(&self, op: Operation, name: &ExternalName) -> Result<()> {
        self.calls.counter(op).fetch_add(1, Ordering::SeqCst);
        debug!(operation = ?op, name = %name, "Automation server call");
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let fault = self
            .faults
            .lock()
            .await
            .get_mut(&op)
            .and_then(VecDeque::pop_front);
        fault.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl ExternalSystemClient for InMemoryAutomationServer {
    async fn get(&self, name: &ExternalName) -> Result<Option<ExternalEntity>> {
        self.enter(Operation::Get, name).await?;
        Ok(self.entities.read().await.get(name).cloned())
    }

    async fn create(&self, name: &ExternalName, spec: &serde_json::Value) -> Result<()> {
        self.enter(Operation::Create, name).await?;
        let mut entities = self.entities.write().await;
        if entities.contains_key(name) {
            return Err(Error::already_exists(name));
        }
        entities.insert(
            name.clone(),
            ExternalEntity {
                name: name.clone(),
                kind: Some("managed".to_string()),
                url: None,
                spec: Some(spec.clone()),
            },
        );
        Ok(())
    }

    async fn update(&self, name: &ExternalName, spec: &serde_json::Value) -> Result<()> {
        self.enter(Operation::Update, name).await?;
        let mut entities = self.entities.write().await;
        let entity = entities
            .get_mut(name)
            .ok_or_else(|| Error::not_found(name))?;
        entity.spec = Some(spec.clone());
        Ok(())
    }

    async fn delete(&self, name: &ExternalName) -> Result<()> {
        self.enter(Operation::Delete, name).await?;
        self.entities
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(name))
    }
}
