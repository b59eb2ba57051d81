use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    AllOf, AnyOf, ByAggregateType, ByCount, ByEventPresence, EventRegistry, Never, Result,
    SnapshotStrategy,
};

/// How the [`EventDispatcher`](crate::EventDispatcher) delivers a committed batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Dispatch all events of a batch in parallel instead of one at a time.
    pub concurrent: bool,
    /// Propagate batch dispatch failures to the committer instead of logging them.
    pub surface_errors: bool,
}

/// Declarative form of a [`SnapshotStrategy`].
///
/// ```rust
/// # use mini_es::SnapshotStrategyConfig;
/// let config: SnapshotStrategyConfig = serde_json::from_str(
///     r#"{ "kind": "any_of", "strategies": [
///         { "kind": "by_count", "every": 50 },
///         { "kind": "by_aggregate_type", "names": ["Ledger"] }
///     ] }"#,
/// )
/// .unwrap();
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotStrategyConfig {
    #[default]
    Never,
    ByCount {
        every: u64,
    },
    ByAggregateType {
        names: Vec<String>,
    },
    /// Registered event names.
    ByEventPresence {
        events: Vec<String>,
    },
    AllOf {
        strategies: Vec<SnapshotStrategyConfig>,
    },
    AnyOf {
        strategies: Vec<SnapshotStrategyConfig>,
    },
}

impl SnapshotStrategyConfig {
    /// Builds the strategy, resolving event names through `registry`.
    pub fn build(&self, registry: &EventRegistry) -> Result<Arc<dyn SnapshotStrategy>> {
        let strategy: Arc<dyn SnapshotStrategy> = match self {
            Self::Never => Arc::new(Never),
            Self::ByCount { every } => Arc::new(ByCount::new(*every)?),
            Self::ByAggregateType { names } => Arc::new(ByAggregateType::new(names.iter().cloned())),
            Self::ByEventPresence { events } => {
                Arc::new(ByEventPresence::from_names(registry, events)?)
            }
            Self::AllOf { strategies } => Arc::new(AllOf::new(build_all(strategies, registry)?)?),
            Self::AnyOf { strategies } => Arc::new(AnyOf::new(build_all(strategies, registry)?)?),
        };
        Ok(strategy)
    }
}

fn build_all(
    configs: &[SnapshotStrategyConfig],
    registry: &EventRegistry,
) -> Result<Vec<Arc<dyn SnapshotStrategy>>> {
    configs.iter().map(|config| config.build(registry)).collect()
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreConfig {
    pub dispatcher: DispatcherConfig,
    pub snapshot: SnapshotStrategyConfig,
}

impl EventStoreConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
