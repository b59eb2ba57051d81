use async_trait::async_trait;

use crate::PublishedEvent;

/// A trait that defines the behavior of an event subscriber.
///
/// A subscriber declares the event names it is interested in and is invoked by the
/// [`EventDispatcher`](crate::EventDispatcher) with every matching event once it has been
/// durably stored. An error returned from `handle` fails the dispatch of that event.
#[async_trait]
pub trait EventSubscriber: Send + Sync + 'static {
    /// Registered names of the events this subscriber handles.
    fn subscribed_to(&self) -> Vec<String>;

    async fn handle(&self, event: &PublishedEvent) -> anyhow::Result<()>;

    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
