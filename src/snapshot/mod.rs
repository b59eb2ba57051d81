use std::{
    fmt::{Debug, Formatter},
    sync::Arc,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{AggregateRoot, Result, UncommittedEvent};

pub mod strategy;

pub use strategy::{
    AllOf, AnyOf, ByAggregateType, ByCount, ByEventPresence, Never, SnapshotStrategy,
};

/// The `StoredSnapshot` struct is a captured full-state projection of an aggregate at a
/// specific version.
///
/// `revision` is the payload-shape revision declared by the aggregate type when the snapshot
/// was taken. A snapshot whose revision differs from the type's current
/// [`SNAPSHOT_REVISION`](AggregateRoot::SNAPSHOT_REVISION) was written for an older payload
/// shape; see [`StoredSnapshot::is_compatible_with`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub id: String,
    pub aggregate_root_id: String,
    pub aggregate_root_version: u64,
    pub revision: u32,
    pub payload: serde_json::Value,
}

impl StoredSnapshot {
    pub fn is_compatible_with<A: AggregateRoot>(&self) -> bool {
        A::SNAPSHOT_REVISION == Some(self.revision)
    }
}

type Capture<A> = fn(&A) -> anyhow::Result<serde_json::Value>;
type Restore<A> = fn(&mut A, serde_json::Value) -> anyhow::Result<()>;

/// State capture and (optionally) restore operations making an aggregate snapshot-capable.
pub struct SnapshotHooks<A> {
    capture: Capture<A>,
    restore: Option<Restore<A>>,
}

impl<A> SnapshotHooks<A> {
    pub fn capture(capture: Capture<A>) -> Self {
        Self {
            capture,
            restore: None,
        }
    }

    #[must_use]
    pub fn with_restore(mut self, restore: Restore<A>) -> Self {
        self.restore = Some(restore);
        self
    }

    pub fn can_restore(&self) -> bool {
        self.restore.is_some()
    }

    pub fn capture_state(&self, aggregate: &A) -> anyhow::Result<serde_json::Value> {
        (self.capture)(aggregate)
    }

    /// Restores `state` into `aggregate`; `None` when the hooks have no restore operation.
    pub fn restore_state(
        &self,
        aggregate: &mut A,
        state: serde_json::Value,
    ) -> Option<anyhow::Result<()>> {
        self.restore.map(|restore| restore(aggregate, state))
    }
}

impl<A> Debug for SnapshotHooks<A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotHooks")
            .field("restore", &self.can_restore())
            .finish()
    }
}

/// What a [`SnapshotStrategy`] sees of an aggregate about to be saved.
#[derive(Clone, Copy, Debug)]
pub struct SnapshotCandidate<'a> {
    pub aggregate_root_name: &'a str,
    pub aggregate_root_id: &'a str,
    /// Version before the pending events are saved.
    pub version: u64,
    pub pending: &'a [UncommittedEvent],
}

impl<'a> SnapshotCandidate<'a> {
    pub fn of<A: AggregateRoot>(aggregate: &'a A) -> Self {
        Self {
            aggregate_root_name: A::NAME,
            aggregate_root_id: aggregate.id(),
            version: aggregate.version(),
            pending: aggregate.uncommitted_events(),
        }
    }
}

/// Storage backend for snapshots.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    async fn generate_entity_id(&self) -> Result<String>;

    async fn save(&self, snapshot: StoredSnapshot) -> Result<()>;

    /// Highest-version snapshot for the aggregate, if any.
    async fn find_latest_by_aggregate_id(
        &self,
        aggregate_root_id: &str,
    ) -> Result<Option<StoredSnapshot>>;
}

/// The `SnapshotStore` decides, through its [`SnapshotStrategy`], when an aggregate should be
/// snapshotted, and persists snapshots through a [`SnapshotBackend`].
///
/// Snapshotting is best-effort: capability gaps and save failures are logged and reported
/// as `false`, never as errors, so they cannot block the event persistence path.
#[derive(Clone)]
pub struct SnapshotStore {
    backend: Arc<dyn SnapshotBackend>,
    strategy: Arc<dyn SnapshotStrategy>,
}

impl SnapshotStore {
    pub fn new(backend: Arc<dyn SnapshotBackend>, strategy: Arc<dyn SnapshotStrategy>) -> Self {
        Self { backend, strategy }
    }

    pub fn strategy(&self) -> &Arc<dyn SnapshotStrategy> {
        &self.strategy
    }

    pub async fn should_snapshot(&self, candidate: &SnapshotCandidate<'_>) -> bool {
        self.strategy.should_create_snapshot(candidate).await
    }

    /// Consults the strategy and, if it agrees, snapshots `aggregate`.
    pub async fn maybe_create<A: AggregateRoot>(&self, aggregate: &A) -> bool {
        if !self.should_snapshot(&SnapshotCandidate::of(aggregate)).await {
            return false;
        }
        self.create(aggregate).await
    }

    /// Captures and saves the current state of `aggregate`, returning whether a snapshot
    /// was stored.
    ///
    /// Aggregates with uncommitted events are skipped: their state already includes events
    /// that are not yet stored at `version()`.
    #[tracing::instrument(skip_all, fields(aggregate_root_id = %aggregate.id(), version = aggregate.version()))]
    pub async fn create<A: AggregateRoot>(&self, aggregate: &A) -> bool {
        let pending = aggregate.uncommitted_events().len();
        if pending > 0 {
            tracing::warn!(pending, "aggregate has uncommitted events, skipping snapshot");
            return false;
        }
        self.capture(aggregate).await
    }

    /// Snapshots `aggregate` regardless of its buffer. Only valid once its version already
    /// accounts for every pending event.
    pub(crate) async fn capture<A: AggregateRoot>(&self, aggregate: &A) -> bool {
        let Some(hooks) = A::snapshot_hooks() else {
            tracing::warn!(
                aggregate_root_name = A::NAME,
                "aggregate has no snapshot hooks, skipping snapshot"
            );
            return false;
        };
        let Some(revision) = A::SNAPSHOT_REVISION else {
            tracing::warn!(
                aggregate_root_name = A::NAME,
                "aggregate declares no snapshot revision, skipping snapshot"
            );
            return false;
        };

        let payload = match hooks.capture_state(aggregate) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "failed to capture aggregate state");
                return false;
            }
        };

        let id = match self.backend.generate_entity_id().await {
            Ok(id) => id,
            Err(err) => {
                tracing::warn!(error = %err, "failed to generate snapshot id");
                return false;
            }
        };

        let snapshot = StoredSnapshot {
            id,
            aggregate_root_id: aggregate.id().to_string(),
            aggregate_root_version: aggregate.version(),
            revision,
            payload,
        };

        match self.backend.save(snapshot).await {
            Ok(()) => {
                tracing::debug!(revision, "snapshot stored");
                true
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to save snapshot");
                false
            }
        }
    }

    pub async fn find_latest_snapshot_by_aggregate_id(
        &self,
        aggregate_root_id: &str,
    ) -> Result<Option<StoredSnapshot>> {
        self.backend
            .find_latest_by_aggregate_id(aggregate_root_id)
            .await
    }
}

impl Debug for SnapshotStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}
