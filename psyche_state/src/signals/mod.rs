//! Notification bridge - publishes state and intent notifications to consumers
//! outside the core (rendering, achievements, UI).
//!
//! Handlers are invoked synchronously on the publishing thread, outside the
//! registry lock, so a handler may itself publish or subscribe.

use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::{StateError, StateResult};
use crate::state::{DynamicValue, StateTransition};

/// Well-known notification names.
pub mod names {
    pub const STATE_CHANGED: &str = "state_changed";
    pub const PHASE_CHANGED: &str = "phase_changed";
    pub const HIGH_TENSION: &str = "high_tension";
    pub const INTENT_COMPLETED: &str = "intent_completed";
    pub const INTENT_FAILED: &str = "intent_failed";
    pub const ADAPTATION: &str = "adaptation";
}

/// Payload carried by a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    StateChanged(Box<StateTransition>),
    PhaseChanged {
        old: String,
        new: String,
    },
    HighTension {
        tension: f32,
        recent_events: u32,
    },
    IntentCompleted {
        intent_id: String,
        intent_type: String,
        enhanced: bool,
    },
    IntentFailed {
        intent_id: String,
        intent_type: String,
        reason: String,
    },
    /// An adjustment whose target is owned by an external consumer.
    Adaptation {
        source: String,
        target: String,
        magnitude: f32,
    },
    Custom(DynamicValue),
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<String, Vec<(SubscriptionId, Handler)>>,
    waiters: HashMap<String, Vec<oneshot::Sender<Notification>>>,
}

/// Publish/subscribe hub shared between the core and its consumers.
#[derive(Default)]
pub struct NotificationBridge {
    registry: Mutex<Registry>,
}

impl NotificationBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bridge already wrapped for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Deliver a notification to every waiter and subscriber of `name`.
    pub fn publish(&self, name: &str, payload: Notification) {
        let (handlers, waiters) = {
            let mut registry = self.registry.lock();
            let handlers: Vec<Handler> = registry
                .handlers
                .get(name)
                .map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default();
            let waiters = registry.waiters.remove(name).unwrap_or_default();
            (handlers, waiters)
        };

        debug!(
            "publishing '{}' to {} handler(s), {} waiter(s)",
            name,
            handlers.len(),
            waiters.len()
        );

        for waiter in waiters {
            // A waiter that already timed out has dropped its receiver.
            let _ = waiter.send(payload.clone());
        }
        for handler in handlers {
            handler(&payload);
        }
    }

    /// Register a handler for every future notification named `name`.
    pub fn subscribe<F>(&self, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .handlers
            .entry(name.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.lock();
        let mut removed = false;
        for subs in registry.handlers.values_mut() {
            let before = subs.len();
            subs.retain(|(sub_id, _)| *sub_id != id);
            removed |= subs.len() != before;
        }
        removed
    }

    /// Number of handlers registered for `name`.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.registry
            .lock()
            .handlers
            .get(name)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Wait for the next notification named `name`.
    ///
    /// Resolves to `StateError::EventTimeout` if nothing arrives in time.
    /// Other waiters and subscribers are unaffected by a timeout.
    pub async fn await_once(&self, name: &str, timeout: Duration) -> StateResult<Notification> {
        let (tx, rx) = oneshot::channel();
        self.registry
            .lock()
            .waiters
            .entry(name.to_string())
            .or_default()
            .push(tx);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            _ => {
                if let Some(waiters) = self.registry.lock().waiters.get_mut(name) {
                    waiters.retain(|w| !w.is_closed());
                }
                Err(StateError::EventTimeout {
                    event: name.to_string(),
                    timeout,
                })
            }
        }
    }
}

impl std::fmt::Debug for NotificationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.lock();
        f.debug_struct("NotificationBridge")
            .field("topics", &registry.handlers.keys().collect::<Vec<_>>())
            .field("pending_waiters", &registry.waiters.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
