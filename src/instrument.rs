//! Process-wide query event bus
//!
//! The host's database layer publishes one [`QueryEvent`] per executed query;
//! listeners registered on the bus receive every event synchronously on the
//! publishing thread. Publishing may happen from many threads at once.
//!
//! Listeners are cloned out of the registry before they are invoked, so a
//! listener can itself publish, subscribe or unsubscribe without deadlocking.
//!
//! ```
//! use nplusone::event::QueryEvent;
//! use nplusone::instrument::QueryEventBus;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let bus = QueryEventBus::new();
//! let seen = Arc::new(AtomicUsize::new(0));
//! let counter = seen.clone();
//! let id = bus.subscribe(Arc::new(move |_: &QueryEvent| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! }));
//!
//! bus.publish(&QueryEvent::new("SELECT 1"));
//! assert_eq!(seen.load(Ordering::SeqCst), 1);
//! assert!(bus.unsubscribe(id));
//! ```

use crate::event::QueryEvent;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Receiver of query events
pub trait QueryListener: Send + Sync {
    fn on_query(&self, event: &QueryEvent);
}

impl<F> QueryListener for F
where
    F: Fn(&QueryEvent) + Send + Sync,
{
    fn on_query(&self, event: &QueryEvent) {
        self(event)
    }
}

/// Handle returned by [`QueryEventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listeners = Vec<(SubscriptionId, Arc<dyn QueryListener>)>;

/// Registry of query listeners
#[derive(Default)]
pub struct QueryEventBus {
    listeners: RwLock<Listeners>,
    next_id: AtomicU64,
}

static GLOBAL_BUS: OnceLock<Arc<QueryEventBus>> = OnceLock::new();

impl QueryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide bus
    pub fn global() -> Arc<QueryEventBus> {
        GLOBAL_BUS
            .get_or_init(|| Arc::new(QueryEventBus::new()))
            .clone()
    }

    /// Register a listener
    pub fn subscribe(&self, listener: Arc<dyn QueryListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    /// Remove a listener; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Deliver an event to every listener on the calling thread
    pub fn publish(&self, event: &QueryEvent) {
        let listeners: Vec<Arc<dyn QueryListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            listener.on_query(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for QueryEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryEventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
