use std::{
    collections::HashMap,
    fmt::{Debug, Formatter},
    sync::Arc,
};

use futures::future::join_all;

use crate::{DispatcherConfig, EsError, EventSubscriber, PublishedEvent, Result};

/// The `EventDispatcher` delivers persisted events to the subscribers bound to their names.
///
/// Subscriptions are bound once at construction and only read afterwards. Batches are
/// dispatched sequentially (in persisted order, stopping at the first failing event) or
/// concurrently (no ordering between events, failures do not block other events),
/// depending on [`DispatcherConfig::concurrent`]. Handlers of a single event always run
/// together.
///
/// Batch-level failures are logged and swallowed unless
/// [`DispatcherConfig::surface_errors`] is set, so a dispatch failure is not mistaken for a
/// persistence failure by the committer.
pub struct EventDispatcher {
    subscriptions: HashMap<String, Vec<Arc<dyn EventSubscriber>>>,
    config: DispatcherConfig,
}

impl EventDispatcher {
    /// A dispatcher with no subscriptions.
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            subscriptions: HashMap::new(),
            config,
        }
    }

    /// Builds the event name → subscribers map, preserving subscriber order per name.
    pub fn bind_subscriptions<I>(subscribers: I, config: DispatcherConfig) -> Self
    where
        I: IntoIterator<Item = Arc<dyn EventSubscriber>>,
    {
        let mut subscriptions: HashMap<String, Vec<Arc<dyn EventSubscriber>>> = HashMap::new();
        for subscriber in subscribers {
            for event_name in subscriber.subscribed_to() {
                tracing::debug!(subscriber = subscriber.name(), %event_name, "subscription bound");
                subscriptions
                    .entry(event_name)
                    .or_default()
                    .push(Arc::clone(&subscriber));
            }
        }
        Self {
            subscriptions,
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn subscribers_for(&self, event_name: &str) -> &[Arc<dyn EventSubscriber>] {
        self.subscriptions
            .get(event_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Invokes every subscriber bound to the event's name.
    ///
    /// All subscribers run even if one fails; the first failure is returned.
    pub async fn emit(&self, event: &PublishedEvent) -> Result<()> {
        let subscribers = self.subscribers_for(&event.event_name);
        if subscribers.is_empty() {
            tracing::debug!(event_name = %event.event_name, event_id = %event.id, "no subscribers bound");
            return Ok(());
        }

        let outcomes = join_all(subscribers.iter().map(|subscriber| async move {
            (subscriber, subscriber.handle(event).await)
        }))
        .await;

        let mut first_error = None;
        for (subscriber, outcome) in outcomes {
            if let Err(err) = outcome {
                tracing::error!(
                    subscriber = subscriber.name(),
                    event_name = %event.event_name,
                    event_id = %event.id,
                    aggregate_root_id = %event.aggregate_root_id,
                    error = %err,
                    "subscriber failed"
                );
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            Some(source) => Err(EsError::Dispatch {
                event_name: event.event_name.clone(),
                event_id: event.id.clone(),
                source,
            }),
            None => Ok(()),
        }
    }

    pub async fn emit_multiple(&self, events: &[PublishedEvent]) -> Result<()> {
        if self.config.concurrent {
            let failures: Vec<EsError> = join_all(events.iter().map(|event| self.emit(event)))
                .await
                .into_iter()
                .filter_map(Result::err)
                .collect();

            return match failures.into_iter().next() {
                Some(err) => {
                    tracing::error!(error = %err, "concurrent dispatch had failures");
                    self.settle(err)
                }
                None => Ok(()),
            };
        }

        for (index, event) in events.iter().enumerate() {
            if let Err(err) = self.emit(event).await {
                tracing::error!(
                    error = %err,
                    skipped = events.len() - index - 1,
                    "sequential dispatch halted"
                );
                return self.settle(err);
            }
        }
        Ok(())
    }

    fn settle(&self, err: EsError) -> Result<()> {
        if self.config.surface_errors {
            Err(err)
        } else {
            Ok(())
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

impl Debug for EventDispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.subscriptions.keys().collect();
        names.sort();
        f.debug_struct("EventDispatcher")
            .field("subscriptions", &names)
            .field("config", &self.config)
            .finish()
    }
}
