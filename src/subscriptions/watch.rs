//! Self-unregistering subscription that tracks the latest value.

use crate::types::{LogicalKey, SharedValue};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::Arc;
use std::time::Duration;

use super::registry::SubscriptionRegistry;
use super::types::{ChangeListener, SubscriptionId};

/// Forwards changes into a single-slot channel, replacing any change the
/// watch has not picked up yet.
struct ChannelListener {
    sender: Sender<Option<SharedValue>>,
    stale: Receiver<Option<SharedValue>>,
}

impl ChangeListener for ChannelListener {
    fn on_change(&self, value: Option<&SharedValue>) {
        let mut pending = value.cloned();
        loop {
            match self.sender.try_send(pending) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(rejected)) => {
                    pending = rejected;
                    let _ = self.stale.try_recv();
                }
            }
        }
    }
}

/// Live view of one key.
///
/// Holds the value current at creation time and follows every subsequent
/// change. Dropping the watch unregisters it.
pub struct Watch {
    key: LogicalKey,
    id: SubscriptionId,
    registry: Arc<SubscriptionRegistry>,
    receiver: Receiver<Option<SharedValue>>,
    latest: Option<SharedValue>,
}

impl Watch {
    pub(crate) fn new(
        registry: Arc<SubscriptionRegistry>,
        key: LogicalKey,
        initial: Option<SharedValue>,
    ) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let listener = ChannelListener {
            sender,
            stale: receiver.clone(),
        };
        let id = registry.register(key, Arc::new(listener));
        Self {
            key,
            id,
            registry,
            receiver,
            latest: initial,
        }
    }

    /// Key being watched.
    pub fn key(&self) -> LogicalKey {
        self.key
    }

    /// Subscription backing this watch.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Latest known value, after applying any pending change.
    pub fn current(&mut self) -> Option<&SharedValue> {
        while let Ok(value) = self.receiver.try_recv() {
            self.latest = value;
        }
        self.latest.as_ref()
    }

    /// Whether changes are waiting to be applied by [`Watch::current`].
    pub fn has_pending(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// Wait for the next change and return it.
    pub fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<SharedValue>, RecvTimeoutError> {
        let value = self.receiver.recv_timeout(timeout)?;
        self.latest = value.clone();
        Ok(value)
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.registry.unregister(self.key, self.id);
    }
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("latest", &self.latest)
            .finish()
    }
}
