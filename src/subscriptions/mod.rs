//! Per-key subscription registry for live value changes.
//!
//! Each [`LogicalKey`](crate::LogicalKey) has its own set of listeners.
//! Listeners are notified when the poller detects a change made by another
//! surface, or right after a local write succeeds.
//!
//! Registration does not replay the current value; callers that need it
//! read it separately, or use a [`Watch`], which does both.
//!
//! # Example
//!
//! ```ignore
//! let id = surface.subscribe(LogicalKey::Tracking, |value: Option<&SharedValue>| {
//!     println!("tracking is now {:?}", value);
//! })?;
//!
//! // ...
//!
//! surface.unsubscribe(LogicalKey::Tracking, id);
//! ```

mod registry;
mod types;
mod watch;

pub use registry::SubscriptionRegistry;
pub use types::{ChangeListener, SubscriptionId};
pub use watch::Watch;
