use thiserror::Error;

#[derive(Error, Debug)]
pub enum EsError {
    #[error("Event name '{name}' is already registered")]
    EventNameConflict { name: String },

    #[error("Event type {type_name} is already registered as '{name}'")]
    EventTypeConflict {
        type_name: &'static str,
        name: String,
    },

    #[error("Event type {type_name} is not registered")]
    UnregisteredEvent { type_name: String },

    #[error(
        "Cannot reconstitute aggregate {aggregate_root_id}: unregistered events {unregistered:?}, events without handler {unhandled:?}"
    )]
    UnknownEvent {
        aggregate_root_id: String,
        unregistered: Vec<String>,
        unhandled: Vec<String>,
    },

    #[error("Aggregate '{aggregate_root_name}' has no handler for event '{event_name}'")]
    MissingHandler {
        aggregate_root_name: String,
        event_name: String,
    },

    #[error("{aggregate_type} already has a handler for {event_type}")]
    HandlerConflict {
        aggregate_type: &'static str,
        event_type: &'static str,
    },

    #[error("Aggregate type {type_name} does not declare an aggregate root name")]
    MissingAggregateRootName { type_name: &'static str },

    #[error("No publisher assigned to aggregate {aggregate_root_id}")]
    NoPublisher { aggregate_root_id: String },

    #[error("Id generation returned {generated} usable ids for {expected} events")]
    IdGeneration { expected: usize, generated: usize },

    #[error(
        "Concurrency conflict for aggregate {aggregate_root_id}: expected version {expected}, found {actual}"
    )]
    EventConcurrency {
        aggregate_root_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Backend did not report a version for saved event {event_id}")]
    UnknownEventVersion { event_id: String },

    #[error("Handler for event '{event_name}' failed on aggregate {aggregate_root_id}: {source}")]
    EventHandler {
        event_name: String,
        aggregate_root_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Dispatch of event '{event_name}' ({event_id}) failed: {source}")]
    Dispatch {
        event_name: String,
        event_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid snapshot strategy configuration: {0}")]
    StrategyConfiguration(String),

    #[error("Failed to (de)serialize event payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl EsError {
    /// Whether the error was raised after the events were durably stored.
    ///
    /// Retrying a commit that failed this way would submit the same events twice, so
    /// the aggregate drops its uncommitted buffer before surfacing these.
    pub fn is_post_persistence(&self) -> bool {
        matches!(self, Self::Dispatch { .. } | Self::UnknownEventVersion { .. })
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::EventConcurrency { .. })
    }
}

// Result alias within the library
pub type Result<T, E = EsError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_message_carries_both_versions() {
        let err = EsError::EventConcurrency {
            aggregate_root_id: "A".to_string(),
            expected: 3,
            actual: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected version 3"));
        assert!(msg.contains("found 5"));
        assert!(err.is_concurrency_conflict());
        assert!(!err.is_post_persistence());
    }

    #[test]
    fn dispatch_and_version_errors_are_post_persistence() {
        let dispatch = EsError::Dispatch {
            event_name: "Created".to_string(),
            event_id: "e-1".to_string(),
            source: anyhow::anyhow!("subscriber down"),
        };
        let version = EsError::UnknownEventVersion {
            event_id: "e-1".to_string(),
        };
        assert!(dispatch.is_post_persistence());
        assert!(version.is_post_persistence());
        assert!(dispatch.to_string().contains("subscriber down"));
    }

    #[test]
    fn unknown_event_lists_both_sets() {
        let err = EsError::UnknownEvent {
            aggregate_root_id: "A".to_string(),
            unregistered: vec!["Ghost".to_string()],
            unhandled: vec!["Closed".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Ghost"));
        assert!(msg.contains("Closed"));
    }
}
