use std::{
    any::TypeId,
    collections::HashSet,
    fmt::Debug,
    sync::Arc,
};

use async_trait::async_trait;
use futures::future::join_all;

use crate::{DomainEvent, EsError, EventRegistry, Result};

use super::SnapshotCandidate;

/// The `SnapshotStrategy` trait decides, before a batch of events is saved, whether the
/// aggregate should be snapshotted once the save succeeds.
#[async_trait]
pub trait SnapshotStrategy: Debug + Send + Sync {
    async fn should_create_snapshot(&self, candidate: &SnapshotCandidate<'_>) -> bool;
}

/// Never snapshots. The default when no strategy is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct Never;

#[async_trait]
impl SnapshotStrategy for Never {
    async fn should_create_snapshot(&self, _candidate: &SnapshotCandidate<'_>) -> bool {
        false
    }
}

/// Snapshots each time the version crosses a multiple of `every`.
///
/// A batch moving the version from 8 to 10 crosses the boundary at 10 for `every = 5`; a
/// batch moving it from 10 to 11 does not. Large batches crossing several boundaries still
/// produce a single snapshot.
#[derive(Clone, Copy, Debug)]
pub struct ByCount {
    every: u64,
}

impl ByCount {
    pub fn new(every: u64) -> Result<Self> {
        if every == 0 {
            return Err(EsError::StrategyConfiguration(
                "ByCount requires a positive event count".to_string(),
            ));
        }
        Ok(Self { every })
    }

    pub fn every(&self) -> u64 {
        self.every
    }

    fn crosses_boundary(&self, version: u64, pending: u64) -> bool {
        version.saturating_add(pending) / self.every > version / self.every
    }
}

#[async_trait]
impl SnapshotStrategy for ByCount {
    async fn should_create_snapshot(&self, candidate: &SnapshotCandidate<'_>) -> bool {
        self.crosses_boundary(candidate.version, candidate.pending.len() as u64)
    }
}

/// Snapshots aggregates whose declared type name is in the configured set.
#[derive(Clone, Debug)]
pub struct ByAggregateType {
    names: HashSet<String>,
}

impl ByAggregateType {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl SnapshotStrategy for ByAggregateType {
    async fn should_create_snapshot(&self, candidate: &SnapshotCandidate<'_>) -> bool {
        if candidate.aggregate_root_name.trim().is_empty() {
            tracing::warn!(
                aggregate_root_id = candidate.aggregate_root_id,
                "aggregate declares no type name, not matching any snapshot type"
            );
            return false;
        }
        self.names.contains(candidate.aggregate_root_name)
    }
}

/// Snapshots when any pending event is an instance of one of the configured payload types.
#[derive(Clone, Debug, Default)]
pub struct ByEventPresence {
    types: HashSet<TypeId>,
}

impl ByEventPresence {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with<E: DomainEvent>(mut self) -> Self {
        self.types.insert(TypeId::of::<E>());
        self
    }

    /// Resolves registered event names to their payload types.
    pub fn from_names<I, S>(registry: &EventRegistry, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let types = names
            .into_iter()
            .map(|name| {
                registry
                    .resolve(name.as_ref())
                    .map(|registration| registration.type_id())
                    .ok_or_else(|| {
                        EsError::StrategyConfiguration(format!(
                            "event '{}' is not registered",
                            name.as_ref()
                        ))
                    })
            })
            .collect::<Result<HashSet<_>>>()?;
        Ok(Self { types })
    }
}

#[async_trait]
impl SnapshotStrategy for ByEventPresence {
    async fn should_create_snapshot(&self, candidate: &SnapshotCandidate<'_>) -> bool {
        candidate
            .pending
            .iter()
            .any(|event| self.types.contains(&event.payload().as_any().type_id()))
    }
}

fn non_empty(
    combinator: &str,
    strategies: Vec<Arc<dyn SnapshotStrategy>>,
) -> Result<Vec<Arc<dyn SnapshotStrategy>>> {
    if strategies.is_empty() {
        return Err(EsError::StrategyConfiguration(format!(
            "{combinator} requires at least one strategy"
        )));
    }
    Ok(strategies)
}

async fn evaluate(
    strategies: &[Arc<dyn SnapshotStrategy>],
    candidate: &SnapshotCandidate<'_>,
) -> Vec<bool> {
    join_all(
        strategies
            .iter()
            .map(|strategy| strategy.should_create_snapshot(candidate)),
    )
    .await
}

/// True when every inner strategy is.
#[derive(Debug)]
pub struct AllOf {
    strategies: Vec<Arc<dyn SnapshotStrategy>>,
}

impl AllOf {
    pub fn new(strategies: Vec<Arc<dyn SnapshotStrategy>>) -> Result<Self> {
        Ok(Self {
            strategies: non_empty("AllOf", strategies)?,
        })
    }
}

#[async_trait]
impl SnapshotStrategy for AllOf {
    async fn should_create_snapshot(&self, candidate: &SnapshotCandidate<'_>) -> bool {
        evaluate(&self.strategies, candidate)
            .await
            .into_iter()
            .all(|decision| decision)
    }
}

/// True when at least one inner strategy is.
#[derive(Debug)]
pub struct AnyOf {
    strategies: Vec<Arc<dyn SnapshotStrategy>>,
}

impl AnyOf {
    pub fn new(strategies: Vec<Arc<dyn SnapshotStrategy>>) -> Result<Self> {
        Ok(Self {
            strategies: non_empty("AnyOf", strategies)?,
        })
    }
}

#[async_trait]
impl SnapshotStrategy for AnyOf {
    async fn should_create_snapshot(&self, candidate: &SnapshotCandidate<'_>) -> bool {
        evaluate(&self.strategies, candidate)
            .await
            .into_iter()
            .any(|decision| decision)
    }
}
