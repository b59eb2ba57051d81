//! # mini_es
//!
//! A small event-sourcing persistence core.
//!
//! Aggregates embed a [`Root`] and record [`DomainEvent`]s, which are applied through a
//! static [`HandlerTable`] and buffered until `commit`. An [`EventStore`] attached as the
//! aggregate's publisher persists the buffer through an [`EventStoreBackend`] with an
//! optimistic concurrency check, optionally snapshots the aggregate through a
//! [`SnapshotStore`] driven by a composable [`SnapshotStrategy`], and finally hands the
//! stored events to an [`EventDispatcher`] which fans them out to [`EventSubscriber`]s.
//!
//! Event payloads are plain serde types registered by name in an [`EventRegistry`], which
//! is used both to name events on the way out and to decode them on the way back in.
//!
//! ```rust
//! use std::sync::{Arc, LazyLock};
//!
//! use mini_es::{AggregateRoot, EventRegistry, EventStore, HandlerTable, InMemoryBackend, Root};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Incremented {
//!     by: u32,
//! }
//!
//! #[derive(Debug)]
//! struct Counter {
//!     root: Root<Counter>,
//!     value: u32,
//! }
//!
//! static HANDLERS: LazyLock<HandlerTable<Counter>> = LazyLock::new(|| {
//!     HandlerTable::<Counter>::new().on::<Incremented, _>(|counter, event| {
//!         counter.value += event.by;
//!         Ok(())
//!     })
//! });
//!
//! impl AggregateRoot for Counter {
//!     const NAME: &'static str = "Counter";
//!
//!     fn new(root: Root<Self>) -> Self {
//!         Self { root, value: 0 }
//!     }
//!
//!     fn root(&self) -> &Root<Self> {
//!         &self.root
//!     }
//!
//!     fn root_mut(&mut self) -> &mut Root<Self> {
//!         &mut self.root
//!     }
//!
//!     fn handlers() -> &'static HandlerTable<Self> {
//!         &HANDLERS
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> mini_es::Result<()> {
//! let mut registry = EventRegistry::new();
//! registry.register::<Incremented>("Incremented")?;
//!
//! let store = EventStore::new(Arc::new(InMemoryBackend::new()), Arc::new(registry));
//! let mut counter: Counter = store.create(Some("counter-1".to_string())).await?;
//! counter.record(Incremented { by: 2 })?;
//! counter.commit().await?;
//!
//! let counter: Counter = store.load("counter-1").await?;
//! assert_eq!(counter.value, 2);
//! assert_eq!(counter.version(), 1);
//! # Ok(())
//! # }
//! ```

mod aggregate;
mod config;
mod dispatcher;
mod error;
mod event_store;
mod events;
mod memory;
mod registry;
mod snapshot;
mod subscriber;

pub use aggregate::{AggregateRoot, HandlerTable, Publisher, Root};
pub use config::{DispatcherConfig, EventStoreConfig, SnapshotStrategyConfig};
pub use dispatcher::EventDispatcher;
pub use error::{EsError, Result};
pub use event_store::{EventStore, EventStoreBackend, EventsWithSnapshot};
pub use events::{DomainEvent, PublishedEvent, StoredAggregateRoot, StoredEvent, UncommittedEvent};
pub use memory::InMemoryBackend;
pub use registry::{EventRegistration, EventRegistry};
pub use snapshot::{
    AllOf, AnyOf, ByAggregateType, ByCount, ByEventPresence, Never, SnapshotBackend,
    SnapshotCandidate, SnapshotHooks, SnapshotStore, SnapshotStrategy, StoredSnapshot,
};
pub use subscriber::EventSubscriber;
