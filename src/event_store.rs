use std::{
    collections::HashMap,
    fmt::{Debug, Formatter},
    sync::Arc,
};

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::{
    AggregateRoot, EsError, EventDispatcher, EventRegistry, PublishedEvent, Publisher, Result,
    Root, SnapshotCandidate, SnapshotStore, StoredAggregateRoot, StoredEvent, StoredSnapshot,
    UncommittedEvent,
};

/// The `EventStoreBackend` trait is the capability set a storage adapter provides to the
/// [`EventStore`].
///
/// `save` carries the concurrency contract: it must compare `aggregate.version` against the
/// version currently stored for `aggregate.id` (0 when the aggregate does not exist yet) and,
/// if they differ, fail with [`EsError::EventConcurrency`] without persisting anything.
/// Otherwise it assigns versions `aggregate.version + 1, + 2, …` to `events` in order,
/// inserts them and bumps the stored version, all atomically with respect to any other
/// `save` for the same aggregate id.
#[async_trait]
pub trait EventStoreBackend: Send + Sync {
    async fn generate_entity_id(&self) -> Result<String>;

    /// One id per event. Defaults to concurrent calls to `generate_entity_id`.
    async fn generate_entity_ids(&self, count: usize) -> Result<Vec<String>> {
        try_join_all((0..count).map(|_| self.generate_entity_id())).await
    }

    /// Appends `events` with an optimistic concurrency check, returning them with their
    /// assigned versions.
    async fn save(
        &self,
        events: Vec<StoredEvent>,
        aggregate: StoredAggregateRoot,
    ) -> Result<Vec<StoredEvent>>;

    /// Stored version of the aggregate, `None` when it has never been saved.
    async fn find_aggregate_root_version(&self, aggregate_root_id: &str) -> Result<Option<u64>>;

    async fn find_by_aggregate_root_id(
        &self,
        aggregate_root_name: &str,
        aggregate_root_id: &str,
    ) -> Result<Vec<StoredEvent>>;

    async fn find_by_aggregate_root_ids(
        &self,
        aggregate_root_name: &str,
        aggregate_root_ids: &[String],
    ) -> Result<HashMap<String, Vec<StoredEvent>>>;

    /// Events with a version strictly greater than `version`.
    async fn find_by_aggregate_root_id_after_version(
        &self,
        aggregate_root_name: &str,
        aggregate_root_id: &str,
        version: u64,
    ) -> Result<Vec<StoredEvent>>;
}

/// Latest snapshot of an aggregate plus the events stored after it.
#[derive(Clone, Debug, Default)]
pub struct EventsWithSnapshot {
    pub events: Vec<StoredEvent>,
    pub snapshot: Option<StoredSnapshot>,
}

/// The `EventStore` orchestrates the commit pipeline of attached aggregates: id generation,
/// optimistic-concurrency persistence through an [`EventStoreBackend`], snapshotting through
/// an optional [`SnapshotStore`], version resolution and dispatch to subscribers.
///
/// It is cheap to clone; every clone shares the same backend, registry and dispatcher.
#[derive(Clone)]
pub struct EventStore {
    backend: Arc<dyn EventStoreBackend>,
    registry: Arc<EventRegistry>,
    snapshots: Option<SnapshotStore>,
    dispatcher: Arc<EventDispatcher>,
}

impl EventStore {
    pub fn new(backend: Arc<dyn EventStoreBackend>, registry: Arc<EventRegistry>) -> Self {
        Self {
            backend,
            registry,
            snapshots: None,
            dispatcher: Arc::new(EventDispatcher::default()),
        }
    }

    #[must_use]
    pub fn with_snapshots(mut self, snapshots: SnapshotStore) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = Arc::new(dispatcher);
        self
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    pub fn snapshots(&self) -> Option<&SnapshotStore> {
        self.snapshots.as_ref()
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Binds this store's persistence pipeline as the aggregate's publisher.
    pub fn add_publisher<A: AggregateRoot>(&self, aggregate: &mut A) {
        let publisher: Arc<dyn Publisher<A>> = Arc::new(self.clone());
        aggregate.root_mut().attach(publisher);
    }

    /// Creates a new attached aggregate, generating an id when none is given.
    pub async fn create<A: AggregateRoot>(&self, id: Option<String>) -> Result<A> {
        let id = match id {
            Some(id) => id,
            None => self.backend.generate_entity_id().await?,
        };
        Ok(self.attached(id))
    }

    /// Loads an aggregate by replaying its full history.
    #[tracing::instrument(skip(self), fields(aggregate_root_name = A::NAME))]
    pub async fn load<A: AggregateRoot>(&self, id: &str) -> Result<A> {
        let name = A::aggregate_root_name()?;
        let events = self.backend.find_by_aggregate_root_id(name, id).await?;

        let mut aggregate: A = self.attached(id.to_string());
        aggregate.reconstitute(events)?;
        tracing::debug!(version = aggregate.version(), "aggregate loaded");
        Ok(aggregate)
    }

    pub async fn load_many<A: AggregateRoot>(&self, ids: &[String]) -> Result<HashMap<String, A>> {
        let name = A::aggregate_root_name()?;
        let mut streams = self.backend.find_by_aggregate_root_ids(name, ids).await?;

        ids.iter()
            .map(|id| {
                let mut aggregate: A = self.attached(id.clone());
                aggregate.reconstitute(streams.remove(id).unwrap_or_default())?;
                Ok((id.clone(), aggregate))
            })
            .collect()
    }

    /// Loads an aggregate from its latest snapshot plus the events stored after it.
    ///
    /// Falls back to a full replay when there is no snapshot, when the snapshot's revision
    /// does not match the type's current one, or when the type cannot restore snapshots.
    #[tracing::instrument(skip(self), fields(aggregate_root_name = A::NAME))]
    pub async fn load_with_snapshot<A: AggregateRoot>(&self, id: &str) -> Result<A> {
        let name = A::aggregate_root_name()?;
        let EventsWithSnapshot { events, snapshot } = self.find_with_snapshot(name, id).await?;

        let Some(snapshot) = snapshot else {
            let mut aggregate: A = self.attached(id.to_string());
            aggregate.reconstitute(events)?;
            return Ok(aggregate);
        };

        if !snapshot.is_compatible_with::<A>() {
            tracing::warn!(
                revision = snapshot.revision,
                expected = ?A::SNAPSHOT_REVISION,
                "snapshot revision mismatch, replaying full history"
            );
            return self.load(id).await;
        }

        let Some(hooks) = A::snapshot_hooks().filter(|hooks| hooks.can_restore()) else {
            tracing::warn!("aggregate cannot restore snapshots, replaying full history");
            return self.load(id).await;
        };

        let mut aggregate: A = self.attached(id.to_string());
        if let Some(Err(err)) = hooks.restore_state(&mut aggregate, snapshot.payload) {
            tracing::warn!(error = %err, "failed to restore snapshot, replaying full history");
            return self.load(id).await;
        }
        aggregate
            .root_mut()
            .restore_version(snapshot.aggregate_root_version);
        aggregate.reconstitute(events)?;

        tracing::debug!(
            snapshot_version = snapshot.aggregate_root_version,
            version = aggregate.version(),
            "aggregate loaded from snapshot"
        );
        Ok(aggregate)
    }

    pub async fn find_aggregate_root_version(&self, id: &str) -> Result<Option<u64>> {
        self.backend.find_aggregate_root_version(id).await
    }

    pub async fn find_by_aggregate_root_id(
        &self,
        aggregate_root_name: &str,
        id: &str,
    ) -> Result<Vec<StoredEvent>> {
        self.backend
            .find_by_aggregate_root_id(aggregate_root_name, id)
            .await
    }

    /// Latest snapshot for the aggregate and the events stored after its version, or the
    /// full history when there is no snapshot.
    pub async fn find_with_snapshot(
        &self,
        aggregate_root_name: &str,
        id: &str,
    ) -> Result<EventsWithSnapshot> {
        let snapshot = match &self.snapshots {
            Some(snapshots) => snapshots.find_latest_snapshot_by_aggregate_id(id).await?,
            None => None,
        };

        let events = match &snapshot {
            Some(snapshot) => {
                self.backend
                    .find_by_aggregate_root_id_after_version(
                        aggregate_root_name,
                        id,
                        snapshot.aggregate_root_version,
                    )
                    .await?
            }
            None => {
                self.backend
                    .find_by_aggregate_root_id(aggregate_root_name, id)
                    .await?
            }
        };

        Ok(EventsWithSnapshot { events, snapshot })
    }

    fn attached<A: AggregateRoot>(&self, id: String) -> A {
        let mut aggregate = A::new(Root::new(id, Arc::clone(&self.registry)));
        self.add_publisher(&mut aggregate);
        aggregate
    }

    async fn generate_ids(&self, count: usize) -> Result<Vec<String>> {
        let ids = self.backend.generate_entity_ids(count).await?;
        let usable = ids.iter().filter(|id| !id.trim().is_empty()).count();
        if ids.len() != count || usable != count {
            return Err(EsError::IdGeneration {
                expected: count,
                generated: usable,
            });
        }
        Ok(ids)
    }
}

#[async_trait]
impl<A: AggregateRoot> Publisher<A> for EventStore {
    /// Ids are paired with events in generation order: the first generated id goes to the
    /// first appended event.
    #[tracing::instrument(
        skip_all,
        fields(aggregate_root_id = %aggregate.id(), aggregate_root_name = A::NAME, event_count = events.len())
    )]
    async fn publish(
        &self,
        aggregate: &mut A,
        events: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>> {
        let name = A::aggregate_root_name()?;
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let ids = self.generate_ids(events.len()).await?;
        let stored = events
            .iter()
            .zip(&ids)
            .map(|(event, id)| StoredEvent::from_published(id.clone(), name, event, &self.registry))
            .collect::<Result<Vec<_>>>()?;

        let should_snapshot = match &self.snapshots {
            Some(snapshots) => {
                let candidate = SnapshotCandidate {
                    aggregate_root_name: name,
                    aggregate_root_id: aggregate.id(),
                    version: aggregate.version(),
                    pending: &events,
                };
                snapshots.should_snapshot(&candidate).await
            }
            None => false,
        };

        let expected = StoredAggregateRoot {
            id: aggregate.id().to_string(),
            version: aggregate.version(),
        };
        let saved = self.backend.save(stored, expected).await?;
        tracing::debug!(saved = saved.len(), "events saved");

        let published = events
            .into_iter()
            .zip(ids)
            .map(|(event, id)| {
                let version = saved
                    .iter()
                    .find(|candidate| candidate.id() == id)
                    .and_then(|candidate| {
                        candidate
                            .aggregate_root_version()
                            .map(|version| (candidate, version))
                    });
                match version {
                    Some((stored, version)) => Ok(PublishedEvent::new(stored, event, version)),
                    None => Err(EsError::UnknownEventVersion { event_id: id }),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        aggregate.root_mut().resolve_version(&saved);

        if should_snapshot {
            if let Some(snapshots) = &self.snapshots {
                snapshots.capture(&*aggregate).await;
            }
        }

        self.dispatcher.emit_multiple(&published).await?;
        Ok(saved)
    }
}

impl Debug for EventStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("registry", &self.registry)
            .field("snapshots", &self.snapshots)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
