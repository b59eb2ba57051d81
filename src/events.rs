use std::{any::Any, fmt::Debug, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EsError, EventRegistry, Result};

/// The `DomainEvent` trait is implemented by every event payload: a value object describing
/// something that happened to an aggregate.
///
/// It is blanket-implemented for any `Serialize + Debug + Send + Sync + 'static` type, so an
/// application only needs to derive `Serialize`/`Deserialize` and register the type in an
/// [`EventRegistry`] under a unique name before appending or persisting it.
pub trait DomainEvent: Any + Debug + Send + Sync {
    /// Serializes the payload into its stored form.
    fn to_payload(&self) -> serde_json::Result<serde_json::Value>;

    /// Exposes the payload for downcasting to its concrete type.
    fn as_any(&self) -> &dyn Any;

    /// Rust type name of the concrete payload.
    fn type_name(&self) -> &'static str;
}

impl<T> DomainEvent for T
where
    T: Serialize + Debug + Send + Sync + 'static,
{
    fn to_payload(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// An event appended in memory to an aggregate and not yet durably persisted.
#[derive(Clone, Debug)]
pub struct UncommittedEvent {
    pub aggregate_root_id: String,
    pub occurred_at: DateTime<Utc>,
    payload: Arc<dyn DomainEvent>,
}

impl UncommittedEvent {
    pub(crate) fn new(aggregate_root_id: String, payload: Arc<dyn DomainEvent>) -> Self {
        Self {
            aggregate_root_id,
            occurred_at: Utc::now(),
            payload,
        }
    }

    pub fn payload(&self) -> &dyn DomainEvent {
        self.payload.as_ref()
    }

    /// Returns the payload as `E` if it is an instance of that type.
    pub fn payload_as<E: 'static>(&self) -> Option<&E> {
        self.payload().as_any().downcast_ref::<E>()
    }
}

/// The `StoredEvent` struct is the persisted form of a domain event.
///
/// It is built either from a just-published event ([`StoredEvent::from_published`], version
/// not yet assigned) or from storage ([`StoredEvent::from_storage`], version present). Once
/// built it is immutable: the persistence layer may only assign the aggregate version through
/// [`StoredEvent::with_version`] before handing the value back to callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    id: String,
    aggregate_root_id: String,
    aggregate_root_name: String,
    event_name: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    aggregate_root_version: Option<u64>,
}

impl StoredEvent {
    /// Serializes an uncommitted event, resolving its name through the registry.
    pub fn from_published(
        id: String,
        aggregate_root_name: &str,
        event: &UncommittedEvent,
        registry: &EventRegistry,
    ) -> Result<Self> {
        let event_name = registry
            .name_of(event.payload())
            .ok_or_else(|| EsError::UnregisteredEvent {
                type_name: event.payload().type_name().to_string(),
            })?;

        Ok(Self {
            id,
            aggregate_root_id: event.aggregate_root_id.clone(),
            aggregate_root_name: aggregate_root_name.to_string(),
            event_name: event_name.to_string(),
            payload: event.payload().to_payload()?,
            created_at: event.occurred_at,
            aggregate_root_version: None,
        })
    }

    /// Rebuilds an event read back from a storage backend.
    pub fn from_storage(
        id: String,
        aggregate_root_id: String,
        aggregate_root_name: String,
        event_name: String,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
        aggregate_root_version: u64,
    ) -> Self {
        Self {
            id,
            aggregate_root_id,
            aggregate_root_name,
            event_name,
            payload,
            created_at,
            aggregate_root_version: Some(aggregate_root_version),
        }
    }

    /// Assigns the version the backend gave this event inside its aggregate stream.
    #[must_use]
    pub fn with_version(mut self, aggregate_root_version: u64) -> Self {
        self.aggregate_root_version = Some(aggregate_root_version);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn aggregate_root_id(&self) -> &str {
        &self.aggregate_root_id
    }

    pub fn aggregate_root_name(&self) -> &str {
        &self.aggregate_root_name
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// `None` until a backend has persisted the event.
    pub fn aggregate_root_version(&self) -> Option<u64> {
        self.aggregate_root_version
    }
}

/// A persisted event as delivered to subscribers, carrying its backend-assigned id and version.
#[derive(Clone, Debug)]
pub struct PublishedEvent {
    pub id: String,
    pub aggregate_root_id: String,
    pub aggregate_root_name: String,
    pub event_name: String,
    pub occurred_at: DateTime<Utc>,
    pub aggregate_root_version: u64,
    payload: Arc<dyn DomainEvent>,
}

impl PublishedEvent {
    pub(crate) fn new(
        stored: &StoredEvent,
        event: UncommittedEvent,
        aggregate_root_version: u64,
    ) -> Self {
        Self {
            id: stored.id.clone(),
            aggregate_root_id: event.aggregate_root_id,
            aggregate_root_name: stored.aggregate_root_name.clone(),
            event_name: stored.event_name.clone(),
            occurred_at: event.occurred_at,
            aggregate_root_version,
            payload: event.payload,
        }
    }

    pub fn payload(&self) -> &dyn DomainEvent {
        self.payload.as_ref()
    }

    pub fn payload_as<E: 'static>(&self) -> Option<&E> {
        self.payload().as_any().downcast_ref::<E>()
    }
}

/// Persistence-side projection of an aggregate: the version currently on disk.
///
/// Passed to a backend's `save` as the version the committer believes is current.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAggregateRoot {
    pub id: String,
    pub version: u64,
}
