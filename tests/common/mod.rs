#![allow(dead_code)]

// Account domain and backend doubles shared by the integration tests

use std::{
    collections::HashMap,
    sync::{
        Arc, LazyLock, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::bail;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use mini_es::{
    AggregateRoot, EventRegistry, EventStore, EventStoreBackend, EventSubscriber, HandlerTable,
    InMemoryBackend, PublishedEvent, Result, Root, SnapshotHooks, SnapshotStore, SnapshotStrategy,
    StoredAggregateRoot, StoredEvent,
};

// Events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Created {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Renamed {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Closed;

/// Registered, but `Account` has no handler for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audited {
    pub by: String,
}

pub fn registry() -> Arc<EventRegistry> {
    let mut registry = EventRegistry::new();
    registry
        .register::<Created>("Created")
        .unwrap()
        .register::<Renamed>("Renamed")
        .unwrap()
        .register::<Closed>("Closed")
        .unwrap()
        .register::<Audited>("Audited")
        .unwrap();
    Arc::new(registry)
}

// Aggregate
#[derive(Debug)]
pub struct Account {
    root: Root<Account>,
    name: String,
    closed: bool,
    renames: u32,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct AccountState {
    name: String,
    closed: bool,
    renames: u32,
}

static HANDLERS: LazyLock<HandlerTable<Account>> = LazyLock::new(|| {
    HandlerTable::<Account>::new()
        .on::<Created, _>(|account, event| {
            account.name = event.name.clone();
            Ok(())
        })
        .on::<Renamed, _>(|account, event| {
            if account.closed {
                bail!("account {} is closed", account.id());
            }
            account.name = event.name.clone();
            account.renames += 1;
            Ok(())
        })
        .on::<Closed, _>(|account, _| {
            account.closed = true;
            Ok(())
        })
});

impl AggregateRoot for Account {
    const NAME: &'static str = "Account";
    const SNAPSHOT_REVISION: Option<u32> = Some(1);

    fn new(root: Root<Self>) -> Self {
        Self {
            root,
            name: String::new(),
            closed: false,
            renames: 0,
        }
    }

    fn root(&self) -> &Root<Self> {
        &self.root
    }

    fn root_mut(&mut self) -> &mut Root<Self> {
        &mut self.root
    }

    fn handlers() -> &'static HandlerTable<Self> {
        &HANDLERS
    }

    fn snapshot_hooks() -> Option<SnapshotHooks<Self>> {
        Some(SnapshotHooks::capture(capture_account).with_restore(restore_account))
    }
}

fn capture_account(account: &Account) -> anyhow::Result<serde_json::Value> {
    Ok(serde_json::to_value(AccountState {
        name: account.name.clone(),
        closed: account.closed,
        renames: account.renames,
    })?)
}

fn restore_account(account: &mut Account, state: serde_json::Value) -> anyhow::Result<()> {
    let state: AccountState = serde_json::from_value(state)?;
    account.name = state.name;
    account.closed = state.closed;
    account.renames = state.renames;
    Ok(())
}

impl Account {
    pub fn open(&mut self, name: &str) -> Result<()> {
        self.record(Created {
            name: name.to_string(),
        })
    }

    pub fn rename(&mut self, name: &str) -> Result<()> {
        self.record(Renamed {
            name: name.to_string(),
        })
    }

    pub fn close(&mut self) -> Result<()> {
        self.record(Closed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn renames(&self) -> u32 {
        self.renames
    }

    /// Observable state plus version, for equivalence checks.
    pub fn state(&self) -> (String, bool, u32, u64) {
        (self.name.clone(), self.closed, self.renames, self.version())
    }
}

// Stores
pub fn store(backend: &InMemoryBackend) -> EventStore {
    EventStore::new(Arc::new(backend.clone()), registry())
}

pub fn store_with_snapshots(
    backend: &InMemoryBackend,
    strategy: Arc<dyn SnapshotStrategy>,
) -> EventStore {
    store(backend).with_snapshots(SnapshotStore::new(Arc::new(backend.clone()), strategy))
}

pub fn stored(name: &str, payload: impl Serialize, version: u64) -> StoredEvent {
    StoredEvent::from_storage(
        format!("e-{version}"),
        "A".to_string(),
        "Account".to_string(),
        name.to_string(),
        serde_json::to_value(payload).unwrap(),
        chrono::Utc::now(),
        version,
    )
}

// Subscribers
pub type Seen = Arc<Mutex<Vec<String>>>;

/// Records `Name@version` for every event it handles, failing on `fail_on`.
pub struct Recorder {
    events: Vec<String>,
    fail_on: Option<String>,
    seen: Seen,
}

impl Recorder {
    pub fn new(events: &[&str], seen: &Seen) -> Arc<dyn EventSubscriber> {
        Arc::new(Self {
            events: events.iter().map(ToString::to_string).collect(),
            fail_on: None,
            seen: Arc::clone(seen),
        })
    }

    pub fn failing_on(events: &[&str], fail_on: &str, seen: &Seen) -> Arc<dyn EventSubscriber> {
        Arc::new(Self {
            events: events.iter().map(ToString::to_string).collect(),
            fail_on: Some(fail_on.to_string()),
            seen: Arc::clone(seen),
        })
    }
}

#[async_trait]
impl EventSubscriber for Recorder {
    fn subscribed_to(&self) -> Vec<String> {
        self.events.clone()
    }

    async fn handle(&self, event: &PublishedEvent) -> anyhow::Result<()> {
        self.seen
            .lock()
            .unwrap()
            .push(format!("{}@{}", event.event_name, event.aggregate_root_version));
        if self.fail_on.as_deref() == Some(event.event_name.as_str()) {
            bail!("recorder refused {}", event.event_name);
        }
        Ok(())
    }
}

pub fn seen() -> Seen {
    Arc::new(Mutex::new(Vec::new()))
}

// Backend doubles
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// One id fewer than requested.
    ShortIds,
    /// Requested count, but blank.
    BlankIds,
    /// `id-1`, `id-2`, … in request order.
    SequentialIds,
    /// Saves everything but omits the last event from the result.
    DropLastSaved,
}

/// Wraps an [`InMemoryBackend`] and violates one part of the backend contract.
#[derive(Clone)]
pub struct FaultyBackend {
    inner: InMemoryBackend,
    fault: Fault,
    counter: Arc<AtomicUsize>,
}

impl FaultyBackend {
    pub fn new(inner: &InMemoryBackend, fault: Fault) -> Self {
        Self {
            inner: inner.clone(),
            fault,
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn store(&self) -> EventStore {
        EventStore::new(Arc::new(self.clone()), registry())
    }
}

#[async_trait]
impl EventStoreBackend for FaultyBackend {
    async fn generate_entity_id(&self) -> Result<String> {
        EventStoreBackend::generate_entity_id(&self.inner).await
    }

    async fn generate_entity_ids(&self, count: usize) -> Result<Vec<String>> {
        match self.fault {
            Fault::ShortIds => Ok((1..count).map(|i| format!("short-{i}")).collect()),
            Fault::BlankIds => Ok(vec![String::new(); count]),
            Fault::SequentialIds => Ok((0..count)
                .map(|_| format!("id-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1))
                .collect()),
            Fault::DropLastSaved => self.inner.generate_entity_ids(count).await,
        }
    }

    async fn save(
        &self,
        events: Vec<StoredEvent>,
        aggregate: StoredAggregateRoot,
    ) -> Result<Vec<StoredEvent>> {
        let mut saved = EventStoreBackend::save(&self.inner, events, aggregate).await?;
        if self.fault == Fault::DropLastSaved {
            saved.pop();
        }
        Ok(saved)
    }

    async fn find_aggregate_root_version(&self, aggregate_root_id: &str) -> Result<Option<u64>> {
        self.inner.find_aggregate_root_version(aggregate_root_id).await
    }

    async fn find_by_aggregate_root_id(
        &self,
        aggregate_root_name: &str,
        aggregate_root_id: &str,
    ) -> Result<Vec<StoredEvent>> {
        self.inner
            .find_by_aggregate_root_id(aggregate_root_name, aggregate_root_id)
            .await
    }

    async fn find_by_aggregate_root_ids(
        &self,
        aggregate_root_name: &str,
        aggregate_root_ids: &[String],
    ) -> Result<HashMap<String, Vec<StoredEvent>>> {
        self.inner
            .find_by_aggregate_root_ids(aggregate_root_name, aggregate_root_ids)
            .await
    }

    async fn find_by_aggregate_root_id_after_version(
        &self,
        aggregate_root_name: &str,
        aggregate_root_id: &str,
        version: u64,
    ) -> Result<Vec<StoredEvent>> {
        self.inner
            .find_by_aggregate_root_id_after_version(aggregate_root_name, aggregate_root_id, version)
            .await
    }
}
