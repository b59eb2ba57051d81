use std::{
    any::{TypeId, type_name},
    collections::HashMap,
    fmt::{Debug, Formatter},
};

use anyhow::anyhow;

use crate::{DomainEvent, EsError, Result};

type Handler<A> = Box<dyn Fn(&mut A, &dyn DomainEvent) -> anyhow::Result<()> + Send + Sync>;

/// The `HandlerTable` binds each event type an aggregate understands to exactly one handler.
///
/// Tables are built once per aggregate type, typically in a `static` [`std::sync::LazyLock`],
/// and returned from [`AggregateRoot::handlers`](crate::AggregateRoot::handlers):
///
/// ```rust
/// # use std::sync::LazyLock;
/// # use mini_es::HandlerTable;
/// # #[derive(Default)] struct Counter { count: u32 }
/// # #[derive(Debug, serde::Serialize)] struct Incremented { by: u32 }
/// static HANDLERS: LazyLock<HandlerTable<Counter>> = LazyLock::new(|| {
///     HandlerTable::<Counter>::new().on::<Incremented, _>(|counter, event| {
///         counter.count += event.by;
///         Ok(())
///     })
/// });
/// ```
pub struct HandlerTable<A> {
    handlers: HashMap<TypeId, Handler<A>>,
}

impl<A: 'static> HandlerTable<A> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Binds `handler` to events of type `E`.
    ///
    /// # Panics
    ///
    /// Panics if a handler for `E` is already bound. Tables are declared once per aggregate
    /// type, so a duplicate binding is a programming error; use [`HandlerTable::try_on`] to
    /// build tables from dynamic input.
    #[must_use]
    pub fn on<E, F>(self, handler: F) -> Self
    where
        E: DomainEvent,
        F: Fn(&mut A, &E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        match self.try_on(handler) {
            Ok(table) => table,
            Err(err) => panic!("{err}"),
        }
    }

    /// Binds `handler` to events of type `E`, failing with [`EsError::HandlerConflict`] if a
    /// handler for `E` is already bound.
    pub fn try_on<E, F>(mut self, handler: F) -> Result<Self>
    where
        E: DomainEvent,
        F: Fn(&mut A, &E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if self.handlers.contains_key(&TypeId::of::<E>()) {
            return Err(EsError::HandlerConflict {
                aggregate_type: type_name::<A>(),
                event_type: type_name::<E>(),
            });
        }

        let erased: Handler<A> = Box::new(move |aggregate: &mut A, event: &dyn DomainEvent| {
            let event = event.as_any().downcast_ref::<E>().ok_or_else(|| {
                anyhow!("handler for {} received a different payload type", type_name::<E>())
            })?;
            handler(aggregate, event)
        });

        self.handlers.insert(TypeId::of::<E>(), erased);
        Ok(self)
    }

    pub fn handles(&self, type_id: TypeId) -> bool {
        self.handlers.contains_key(&type_id)
    }

    /// Runs the handler bound to the payload's runtime type, `None` when there is none.
    pub fn apply(&self, aggregate: &mut A, event: &dyn DomainEvent) -> Option<anyhow::Result<()>> {
        self.handlers
            .get(&event.as_any().type_id())
            .map(|handler| handler(aggregate, event))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<A: 'static> Default for HandlerTable<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Debug for HandlerTable<A> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("aggregate", &type_name::<A>())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
