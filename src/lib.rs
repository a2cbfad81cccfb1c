//! # Surface Store
//!
//! A small reactive key-value store shared by independent UI surfaces
//! (popup, options page, content script) that have no shared memory and
//! no push notifications from their persistent storage.
//!
//! ## Core Concepts
//!
//! - **Durable store**: a get/set backend keyed by a closed set of
//!   [`LogicalKey`]s, with no change notifications
//! - **Snapshot**: one value per key, fetched all-or-nothing
//! - **Poller**: re-fetches the snapshot on a timer and notifies listeners of
//!   every key whose value identity changed
//! - **Surface**: the facade UI code talks to; reads are local, writes are
//!   persisted then published locally at once
//!
//! Other surfaces see a write on their next poll, so cross-surface
//! visibility is bounded by the poll interval. Concurrent writers to one
//! key race at the backend; the last write wins.
//!
//! ## Example
//!
//! ```ignore
//! use surface_store::{LogicalKey, MemoryStore, Surface, SurfaceConfig};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(MemoryStore::new());
//! let popup = Surface::open(backend.clone(), SurfaceConfig::default())?;
//! popup.wait_until_loaded(Duration::from_secs(5));
//!
//! let id = popup.subscribe(LogicalKey::Tracking, |value: Option<&SharedValue>| {
//!     println!("tracking changed: {:?}", value);
//! })?;
//!
//! popup.write(LogicalKey::Options, json!({"autosync": true}))?;
//! assert_eq!(*popup.read(LogicalKey::Options).unwrap(), json!({"autosync": true}));
//!
//! popup.unsubscribe(LogicalKey::Tracking, id);
//! ```

pub mod backend;
pub mod error;
pub mod options;
pub mod poller;
pub mod snapshot;
pub mod subscriptions;
pub mod surface;
pub mod types;

// Re-exports
pub use backend::{DurableStore, FileStore, MemoryStore};
pub use error::{Result, SyncError};
pub use options::{Options, OptionsView, Theme};
pub use poller::{ManualClock, PollOutcome, Poller, PollerHandle, PollerState};
pub use snapshot::{changed_keys, fetch_snapshot, same_value, Snapshot};
pub use subscriptions::{ChangeListener, SubscriptionId, SubscriptionRegistry, Watch};
pub use surface::{Schedule, Surface, SurfaceConfig, DEFAULT_POLL_INTERVAL};
pub use types::*;
