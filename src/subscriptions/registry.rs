//! Listener registry with fan-out notification.

use crate::types::{LogicalKey, SharedValue};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{ChangeListener, SubscriptionId};

type Listeners = HashMap<SubscriptionId, Arc<dyn ChangeListener>>;

/// Listeners for every logical key of one surface.
pub struct SubscriptionRegistry {
    /// Listeners by key, then by subscription ID.
    listeners: RwLock<[Listeners; LogicalKey::COUNT]>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Default::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `listener` under `key`.
    ///
    /// The listener is eligible for the next notification immediately. It
    /// does not receive the current value.
    pub fn register(&self, key: LogicalKey, listener: Arc<dyn ChangeListener>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.write()[key.index()].insert(id, listener);
        id
    }

    /// Remove a listener. Unknown or already removed IDs are a no-op.
    ///
    /// Returns whether a listener was removed.
    pub fn unregister(&self, key: LogicalKey, id: SubscriptionId) -> bool {
        let removed = self.listeners.write()[key.index()].remove(&id).is_some();
        if !removed {
            tracing::trace!(%key, %id, "unregister of unknown subscription ignored");
        }
        removed
    }

    /// Invoke every listener registered under `key` with `value`.
    ///
    /// Listeners are collected first and called with the lock released, so
    /// they may subscribe, unsubscribe or write from inside the callback.
    /// Returns the number of listeners invoked.
    pub fn notify(&self, key: LogicalKey, value: Option<&SharedValue>) -> usize {
        let targets: Vec<Arc<dyn ChangeListener>> =
            self.listeners.read()[key.index()].values().cloned().collect();

        for listener in &targets {
            listener.on_change(value);
        }

        targets.len()
    }

    /// Number of listeners registered under `key`.
    pub fn listener_count(&self, key: LogicalKey) -> usize {
        self.listeners.read()[key.index()].len()
    }

    /// Number of listeners across all keys.
    pub fn total_listeners(&self) -> usize {
        self.listeners.read().iter().map(HashMap::len).sum()
    }

    /// Drop every listener. Used on teardown.
    pub fn clear(&self) {
        for listeners in self.listeners.write().iter_mut() {
            listeners.clear();
        }
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<serde_json::Value>>>, Arc<dyn ChangeListener>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listener: Arc<dyn ChangeListener> = Arc::new(move |value: Option<&SharedValue>| {
            sink.lock()
                .push(value.map(|v| (**v).clone()).unwrap_or(serde_json::Value::Null));
        });
        (seen, listener)
    }

    #[test]
    fn test_register_unregister() {
        let registry = SubscriptionRegistry::new();
        let (_, listener) = recorder();

        let id = registry.register(LogicalKey::Options, listener);
        assert_eq!(registry.listener_count(LogicalKey::Options), 1);

        assert!(registry.unregister(LogicalKey::Options, id));
        assert_eq!(registry.total_listeners(), 0);
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = SubscriptionRegistry::new();
        let (_, listener) = recorder();

        let a = registry.register(LogicalKey::Options, Arc::clone(&listener));
        let b = registry.register(LogicalKey::Tracking, listener);
        assert_ne!(a, b);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let (seen, listener) = recorder();
        let (_, other) = recorder();

        let id = registry.register(LogicalKey::Tracking, listener);
        registry.register(LogicalKey::Tracking, other);

        assert!(registry.unregister(LogicalKey::Tracking, id));
        assert!(!registry.unregister(LogicalKey::Tracking, id));
        assert!(!registry.unregister(LogicalKey::Tracking, SubscriptionId(999)));
        // Wrong key for a live ID is also a no-op.
        assert_eq!(registry.listener_count(LogicalKey::Tracking), 1);

        registry.notify(LogicalKey::Tracking, Some(&Arc::new(json!(1))));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_notify_fans_out_to_key_only() {
        let registry = SubscriptionRegistry::new();
        let (first, a) = recorder();
        let (second, b) = recorder();
        let (elsewhere, c) = recorder();

        registry.register(LogicalKey::Options, a);
        registry.register(LogicalKey::Options, b);
        registry.register(LogicalKey::Updates, c);

        let count = registry.notify(LogicalKey::Options, Some(&Arc::new(json!({"x": 1}))));

        assert_eq!(count, 2);
        assert_eq!(*first.lock(), vec![json!({"x": 1})]);
        assert_eq!(*second.lock(), vec![json!({"x": 1})]);
        assert!(elsewhere.lock().is_empty());
    }

    #[test]
    fn test_listener_may_unsubscribe_itself() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let reg = Arc::clone(&registry);
        let own_id = Arc::clone(&slot);
        let id = registry.register(
            LogicalKey::Options,
            Arc::new(move |_: Option<&SharedValue>| {
                if let Some(id) = *own_id.lock() {
                    reg.unregister(LogicalKey::Options, id);
                }
            }),
        );
        *slot.lock() = Some(id);

        registry.notify(LogicalKey::Options, None);
        assert_eq!(registry.listener_count(LogicalKey::Options), 0);
    }
}
