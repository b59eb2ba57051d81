//! In-memory backends for tests and demos.
//!
//! [`InMemoryBackend`] implements both [`EventStoreBackend`] and [`SnapshotBackend`] on a
//! single shared state, so one instance can serve an [`EventStore`](crate::EventStore) and
//! its [`SnapshotStore`](crate::SnapshotStore).

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    EsError, EventStoreBackend, Result, SnapshotBackend, StoredAggregateRoot, StoredEvent,
    StoredSnapshot,
};

#[derive(Debug, Default)]
struct Inner {
    events: Vec<StoredEvent>,
    versions: HashMap<String, u64>,
    snapshots: HashMap<String, Vec<StoredSnapshot>>,
}

/// Thread-safe in-memory backend. Clones share the same state.
#[derive(Clone, Debug, Default)]
pub struct InMemoryBackend {
    inner: Arc<Mutex<Inner>>,
    fail_next_save: Arc<AtomicBool>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next event `save` fail after staging its batch, leaving nothing stored.
    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }

    /// Every stored event, in insertion order.
    pub async fn events(&self) -> Vec<StoredEvent> {
        self.inner.lock().await.events.clone()
    }

    pub async fn snapshots_of(&self, aggregate_root_id: &str) -> Vec<StoredSnapshot> {
        self.inner
            .lock()
            .await
            .snapshots
            .get(aggregate_root_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventStoreBackend for InMemoryBackend {
    async fn generate_entity_id(&self) -> Result<String> {
        Ok(Uuid::new_v4().to_string())
    }

    #[tracing::instrument(skip(self, events), fields(aggregate_root_id = %aggregate.id, event_count = events.len()))]
    async fn save(
        &self,
        events: Vec<StoredEvent>,
        aggregate: StoredAggregateRoot,
    ) -> Result<Vec<StoredEvent>> {
        let mut inner = self.inner.lock().await;

        let actual = inner.versions.get(&aggregate.id).copied().unwrap_or(0);
        if actual != aggregate.version {
            tracing::debug!(expected = aggregate.version, actual, "version conflict");
            return Err(EsError::EventConcurrency {
                aggregate_root_id: aggregate.id,
                expected: aggregate.version,
                actual,
            });
        }

        let staged: Vec<StoredEvent> = events
            .into_iter()
            .zip(aggregate.version + 1..)
            .map(|(event, version)| event.with_version(version))
            .collect();

        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(EsError::Backend(anyhow::anyhow!(
                "injected failure after staging {} events",
                staged.len()
            )));
        }

        let version = aggregate.version + staged.len() as u64;
        inner.versions.insert(aggregate.id, version);
        inner.events.extend(staged.iter().cloned());
        tracing::debug!(version, "events appended");
        Ok(staged)
    }

    async fn find_aggregate_root_version(&self, aggregate_root_id: &str) -> Result<Option<u64>> {
        Ok(self.inner.lock().await.versions.get(aggregate_root_id).copied())
    }

    async fn find_by_aggregate_root_id(
        &self,
        aggregate_root_name: &str,
        aggregate_root_id: &str,
    ) -> Result<Vec<StoredEvent>> {
        self.find_by_aggregate_root_id_after_version(aggregate_root_name, aggregate_root_id, 0)
            .await
    }

    async fn find_by_aggregate_root_ids(
        &self,
        aggregate_root_name: &str,
        aggregate_root_ids: &[String],
    ) -> Result<HashMap<String, Vec<StoredEvent>>> {
        let inner = self.inner.lock().await;
        let mut streams: HashMap<String, Vec<StoredEvent>> = aggregate_root_ids
            .iter()
            .map(|id| (id.clone(), Vec::new()))
            .collect();

        for event in inner
            .events
            .iter()
            .filter(|event| event.aggregate_root_name() == aggregate_root_name)
        {
            if let Some(stream) = streams.get_mut(event.aggregate_root_id()) {
                stream.push(event.clone());
            }
        }
        Ok(streams)
    }

    async fn find_by_aggregate_root_id_after_version(
        &self,
        aggregate_root_name: &str,
        aggregate_root_id: &str,
        version: u64,
    ) -> Result<Vec<StoredEvent>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .iter()
            .filter(|event| {
                event.aggregate_root_name() == aggregate_root_name
                    && event.aggregate_root_id() == aggregate_root_id
                    && event.aggregate_root_version().unwrap_or_default() > version
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SnapshotBackend for InMemoryBackend {
    async fn generate_entity_id(&self) -> Result<String> {
        Ok(Uuid::new_v4().to_string())
    }

    async fn save(&self, snapshot: StoredSnapshot) -> Result<()> {
        self.inner
            .lock()
            .await
            .snapshots
            .entry(snapshot.aggregate_root_id.clone())
            .or_default()
            .push(snapshot);
        Ok(())
    }

    async fn find_latest_by_aggregate_id(
        &self,
        aggregate_root_id: &str,
    ) -> Result<Option<StoredSnapshot>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .snapshots
            .get(aggregate_root_id)
            .and_then(|snapshots| {
                snapshots
                    .iter()
                    .max_by_key(|snapshot| snapshot.aggregate_root_version)
            })
            .cloned())
    }
}
