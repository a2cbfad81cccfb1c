//! Durable key-value backends.
//!
//! A backend persists one value per [`LogicalKey`]. It offers no change
//! notifications and no multi-key transactions; surfaces discover changes
//! made elsewhere by polling it.
//!
//! Backends hand out [`SharedValue`]s. Returning the same `Arc` for an
//! unchanged value is what lets the poller tell "nothing happened" apart
//! from "someone wrote", so implementations should preserve identity for
//! values they have not replaced.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::Result;
use crate::types::{LogicalKey, SharedValue};

/// Asynchronous-in-spirit persistence API shared by every surface.
///
/// Implementations must tolerate concurrent calls from several surfaces.
/// Concurrent writers to one key race; the last write wins.
pub trait DurableStore: Send + Sync {
    /// Read the value stored for `key`. `None` if nothing was ever stored.
    fn get(&self, key: LogicalKey) -> Result<Option<SharedValue>>;

    /// Persist `value` for `key`.
    fn set(&self, key: LogicalKey, value: SharedValue) -> Result<()>;
}
