use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use serde::de::DeserializeOwned;

use crate::{DomainEvent, EsError, Result};

type Decoder = fn(serde_json::Value) -> serde_json::Result<Arc<dyn DomainEvent>>;

/// A single name ↔ payload type binding held by an [`EventRegistry`].
#[derive(Clone, Debug)]
pub struct EventRegistration {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    decode: Decoder,
}

impl EventRegistration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Deserializes a stored payload into an instance of the registered type.
    pub fn decode(&self, payload: serde_json::Value) -> Result<Arc<dyn DomainEvent>> {
        Ok((self.decode)(payload)?)
    }
}

fn decode_as<E>(payload: serde_json::Value) -> serde_json::Result<Arc<dyn DomainEvent>>
where
    E: DomainEvent + DeserializeOwned,
{
    Ok(Arc::new(serde_json::from_value::<E>(payload)?))
}

/// The `EventRegistry` maps logical event names to their concrete payload types.
///
/// It is populated once at startup, then shared read-only (usually behind an `Arc`) by the
/// aggregates and the event store. Names are unique: registering a name twice fails with
/// [`EsError::EventNameConflict`], even for the same type. There is no removal.
#[derive(Debug, Default)]
pub struct EventRegistry {
    by_name: HashMap<String, EventRegistration>,
    by_type: HashMap<TypeId, String>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `E` under `name`.
    pub fn register<E>(&mut self, name: impl Into<String>) -> Result<&mut Self>
    where
        E: DomainEvent + DeserializeOwned,
    {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(EsError::EventNameConflict { name });
        }

        let type_id = TypeId::of::<E>();
        if let Some(existing) = self.by_type.get(&type_id) {
            return Err(EsError::EventTypeConflict {
                type_name: std::any::type_name::<E>(),
                name: existing.clone(),
            });
        }

        tracing::debug!(event_name = %name, type_name = std::any::type_name::<E>(), "event registered");
        self.by_type.insert(type_id, name.clone());
        self.by_name.insert(
            name.clone(),
            EventRegistration {
                name,
                type_id,
                type_name: std::any::type_name::<E>(),
                decode: decode_as::<E>,
            },
        );
        Ok(self)
    }

    pub fn resolve(&self, name: &str) -> Option<&EventRegistration> {
        self.by_name.get(name)
    }

    /// Name registered for the static type `E`.
    pub fn type_of<E: Any>(&self) -> Option<&str> {
        self.name_for(TypeId::of::<E>())
    }

    /// Name registered for the runtime type of `event`.
    pub fn name_of(&self, event: &dyn DomainEvent) -> Option<&str> {
        self.name_for(event.as_any().type_id())
    }

    pub fn name_for(&self, type_id: TypeId) -> Option<&str> {
        self.by_type.get(&type_id).map(String::as_str)
    }

    pub fn is_registered(&self, event: &dyn DomainEvent) -> bool {
        self.name_of(event).is_some()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
