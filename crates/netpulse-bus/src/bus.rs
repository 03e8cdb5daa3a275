//! The event bus — topic registry and synchronous dispatch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::event::{SweepEvent, Topic};

/// Opaque handle returned by [`EventBus::subscribe`], used to
/// unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&SweepEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    /// Per-topic subscriber lists in registration order.
    subscribers: HashMap<Topic, Vec<(SubscriptionId, Handler)>>,
}

/// In-process publish/subscribe channel for sweep events.
///
/// `Clone` shares the same registry; the bus can be handed to the
/// sweeper and to any number of consumers.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a topic. Handlers for the same topic are
    /// invoked in registration order.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&SweepEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .subscribers
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(%topic, subscription = id.0, "subscriber registered");
        id
    }

    /// Remove a subscription. Idempotent; returns true if it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.lock().unwrap();
        let mut removed = false;
        for handlers in registry.subscribers.values_mut() {
            let before = handlers.len();
            handlers.retain(|(sub_id, _)| *sub_id != id);
            removed |= handlers.len() != before;
        }
        removed
    }

    /// Synchronously invoke every subscriber currently registered for
    /// the event's topic, in registration order, on the caller's own
    /// execution context.
    ///
    /// A handler error is logged and never propagated; the remaining
    /// handlers still run.
    pub fn publish(&self, event: &SweepEvent) {
        let topic = event.topic();
        // Snapshot the handler list so handlers may subscribe or
        // unsubscribe without deadlocking against the registry lock.
        let handlers: Vec<(SubscriptionId, Handler)> = {
            let registry = self.registry.lock().unwrap();
            registry
                .subscribers
                .get(&topic)
                .map(|h| h.to_vec())
                .unwrap_or_default()
        };

        for (id, handler) in handlers {
            if let Err(e) = handler(event) {
                warn!(%topic, subscription = id.0, error = %e, "subscriber failed");
            }
        }
    }

    /// Number of subscribers currently registered for a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        let registry = self.registry.lock().unwrap();
        registry.subscribers.get(&topic).map_or(0, Vec::len)
    }
}
