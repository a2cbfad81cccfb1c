//! Subscription types.

use crate::types::SharedValue;
use std::fmt;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receives the new value of a key whenever it changes.
///
/// Listeners may be invoked from the poller thread. They must not assume
/// any ordering relative to other listeners of the same key.
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, value: Option<&SharedValue>);
}

impl<F> ChangeListener for F
where
    F: Fn(Option<&SharedValue>) + Send + Sync,
{
    fn on_change(&self, value: Option<&SharedValue>) {
        self(value)
    }
}
