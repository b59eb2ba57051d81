use std::{
    any::type_name,
    fmt::{Debug, Formatter},
    sync::Arc,
};

use async_trait::async_trait;

use crate::{
    DomainEvent, EsError, EventRegistry, Result, SnapshotHooks, StoredEvent, UncommittedEvent,
};

pub mod handlers;

pub use handlers::HandlerTable;

/// The hook an aggregate calls on `commit` to persist its uncommitted events.
///
/// Aggregates start unattached; [`EventStore::add_publisher`](crate::EventStore::add_publisher)
/// binds the store's persistence pipeline as their publisher.
#[async_trait]
pub trait Publisher<A>: Send + Sync {
    /// Persists `events` for `aggregate` and returns them as saved by the backend.
    async fn publish(&self, aggregate: &mut A, events: Vec<UncommittedEvent>)
    -> Result<Vec<StoredEvent>>;
}

/// Event-sourcing state every aggregate embeds: identity, version, the uncommitted buffer
/// and the publisher hook.
///
/// The version can only be changed by reconstitution or by the store after a successful
/// save; external callers get read-only accessors.
pub struct Root<A> {
    id: String,
    version: u64,
    uncommitted: Vec<UncommittedEvent>,
    registry: Arc<EventRegistry>,
    publisher: Option<Arc<dyn Publisher<A>>>,
}

impl<A> Root<A> {
    pub fn new(id: impl Into<String>, registry: Arc<EventRegistry>) -> Self {
        Self {
            id: id.into(),
            version: 0,
            uncommitted: Vec::new(),
            registry,
            publisher: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn uncommitted_events(&self) -> &[UncommittedEvent] {
        &self.uncommitted
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    pub fn is_attached(&self) -> bool {
        self.publisher.is_some()
    }

    pub(crate) fn attach(&mut self, publisher: Arc<dyn Publisher<A>>) {
        self.publisher = Some(publisher);
    }

    pub(crate) fn restore_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Advances the version to the highest one among `saved`.
    pub(crate) fn resolve_version(&mut self, saved: &[StoredEvent]) {
        if let Some(max) = saved.iter().filter_map(StoredEvent::aggregate_root_version).max() {
            self.version = self.version.max(max);
        }
    }
}

impl<A> Debug for Root<A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Root")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("uncommitted", &self.uncommitted.len())
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// The `AggregateRoot` trait defines an entity whose state is derived entirely from its
/// event history.
///
/// An implementation embeds a [`Root`], declares a unique [`NAME`](AggregateRoot::NAME) that
/// scopes its event stream, and returns a static [`HandlerTable`] binding each event type it
/// understands to the method applying it. Domain methods call [`record`](AggregateRoot::record)
/// to apply and buffer an event; [`commit`](AggregateRoot::commit) hands the buffer to the
/// bound publisher.
///
/// Lifecycle:
///
/// - unattached: no publisher, `commit` fails with [`EsError::NoPublisher`];
/// - attached: `commit` persists and clears the buffer on success, keeps it on a
///   recoverable failure, and clears it when the failure happened after the events were
///   durably stored (see [`EsError::is_post_persistence`]).
#[async_trait]
pub trait AggregateRoot: Send + Sync + Sized + 'static {
    /// Name scoping this type's event streams. Must not be blank.
    const NAME: &'static str;

    /// Revision of the snapshot payload shape; `None` disables snapshotting for this type.
    const SNAPSHOT_REVISION: Option<u32> = None;

    fn new(root: Root<Self>) -> Self;

    fn root(&self) -> &Root<Self>;

    fn root_mut(&mut self) -> &mut Root<Self>;

    fn handlers() -> &'static HandlerTable<Self>;

    /// State capture/restore used by the snapshot store.
    fn snapshot_hooks() -> Option<SnapshotHooks<Self>> {
        None
    }

    fn aggregate_root_name() -> Result<&'static str> {
        if Self::NAME.trim().is_empty() {
            return Err(EsError::MissingAggregateRootName {
                type_name: type_name::<Self>(),
            });
        }
        Ok(Self::NAME)
    }

    fn id(&self) -> &str {
        self.root().id()
    }

    fn version(&self) -> u64 {
        self.root().version()
    }

    fn uncommitted_events(&self) -> &[UncommittedEvent] {
        self.root().uncommitted_events()
    }

    /// Buffers `event` without applying it. The version is unchanged.
    fn append<E: DomainEvent>(&mut self, event: E) -> Result<()> {
        if self.root().registry.type_of::<E>().is_none() {
            return Err(EsError::UnregisteredEvent {
                type_name: type_name::<E>().to_string(),
            });
        }

        let root = self.root_mut();
        let event = UncommittedEvent::new(root.id.clone(), Arc::new(event));
        root.uncommitted.push(event);
        Ok(())
    }

    /// Applies `event` through the handler table, then buffers it.
    fn record<E: DomainEvent>(&mut self, event: E) -> Result<()> {
        let Some(event_name) = self.root().registry.type_of::<E>().map(str::to_string) else {
            return Err(EsError::UnregisteredEvent {
                type_name: type_name::<E>().to_string(),
            });
        };

        match Self::handlers().apply(self, &event) {
            None => Err(EsError::MissingHandler {
                aggregate_root_name: Self::NAME.to_string(),
                event_name,
            }),
            Some(Err(source)) => Err(EsError::EventHandler {
                event_name,
                aggregate_root_id: self.id().to_string(),
                source,
            }),
            Some(Ok(())) => {
                let root = self.root_mut();
                let event = UncommittedEvent::new(root.id.clone(), Arc::new(event));
                root.uncommitted.push(event);
                Ok(())
            }
        }
    }

    /// Persists the uncommitted events through the bound publisher.
    ///
    /// Returns the saved events, or an empty list when there was nothing to commit.
    async fn commit(&mut self) -> Result<Vec<StoredEvent>> {
        if self.root().uncommitted.is_empty() {
            return Ok(Vec::new());
        }

        let publisher = self
            .root()
            .publisher
            .clone()
            .ok_or_else(|| EsError::NoPublisher {
                aggregate_root_id: self.id().to_string(),
            })?;
        let pending = self.root().uncommitted.clone();

        match publisher.publish(self, pending).await {
            Ok(saved) => {
                self.root_mut().uncommitted.clear();
                Ok(saved)
            }
            Err(err) if err.is_post_persistence() => {
                tracing::warn!(
                    aggregate_root_id = %self.id(),
                    error = %err,
                    "commit failed after events were stored, clearing uncommitted events"
                );
                self.root_mut().uncommitted.clear();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Rebuilds state from stored events, in ascending version order.
    ///
    /// Fails without applying anything if an event name is unknown to the registry or has
    /// no handler on this type. A failing handler aborts the replay.
    fn reconstitute(&mut self, events: Vec<StoredEvent>) -> Result<()> {
        reconstitute(self, events)
    }
}

fn reconstitute<A: AggregateRoot>(aggregate: &mut A, mut events: Vec<StoredEvent>) -> Result<()> {
    events.sort_by_key(|event| event.aggregate_root_version().unwrap_or_default());

    let registry = Arc::clone(&aggregate.root().registry);
    let handlers = A::handlers();

    let mut unregistered: Vec<String> = Vec::new();
    let mut unhandled: Vec<String> = Vec::new();
    let mut resolved = Vec::with_capacity(events.len());

    for event in &events {
        let name = event.event_name();
        match registry.resolve(name) {
            None => {
                if !unregistered.iter().any(|n| n == name) {
                    unregistered.push(name.to_string());
                }
            }
            Some(registration) if !handlers.handles(registration.type_id()) => {
                if !unhandled.iter().any(|n| n == name) {
                    unhandled.push(name.to_string());
                }
            }
            Some(registration) => resolved.push((event, registration)),
        }
    }

    if !unregistered.is_empty() || !unhandled.is_empty() {
        tracing::error!(
            aggregate_root_id = %aggregate.id(),
            aggregate_root_name = A::NAME,
            ?unregistered,
            ?unhandled,
            "cannot reconstitute aggregate from unknown events"
        );
        return Err(EsError::UnknownEvent {
            aggregate_root_id: aggregate.id().to_string(),
            unregistered,
            unhandled,
        });
    }

    // Decode everything up front so a malformed payload leaves the aggregate untouched.
    let decoded = resolved
        .into_iter()
        .map(|(event, registration)| Ok((event, registration.decode(event.payload().clone())?)))
        .collect::<Result<Vec<_>>>()?;

    let mut version = aggregate.version();
    for (event, payload) in decoded {
        if let Some(Err(source)) = handlers.apply(aggregate, payload.as_ref()) {
            tracing::error!(
                aggregate_root_id = %aggregate.id(),
                event_name = event.event_name(),
                error = %source,
                "event handler failed during reconstitution"
            );
            return Err(EsError::EventHandler {
                event_name: event.event_name().to_string(),
                aggregate_root_id: aggregate.id().to_string(),
                source,
            });
        }
        version = version.max(event.aggregate_root_version().unwrap_or_default());
    }

    aggregate.root_mut().version = version;
    Ok(())
}
