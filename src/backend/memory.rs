//! In-process backend.

use crate::error::Result;
use crate::types::{LogicalKey, SharedValue};
use parking_lot::RwLock;
use std::sync::Arc;

use super::DurableStore;

/// Shared in-memory backend.
///
/// Clones share the same storage, so several surfaces built from clones of
/// one `MemoryStore` behave like tabs of one browser profile. Stored `Arc`s
/// are returned as-is, which preserves value identity across reads.
#[derive(Clone, Default)]
pub struct MemoryStore {
    slots: Arc<RwLock<[Option<SharedValue>; LogicalKey::COUNT]>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with values.
    pub fn with_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = (LogicalKey, serde_json::Value)>,
    {
        let store = Self::new();
        {
            let mut slots = store.slots.write();
            for (key, value) in values {
                slots[key.index()] = Some(Arc::new(value));
            }
        }
        store
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: LogicalKey) -> Result<Option<SharedValue>> {
        Ok(self.slots.read()[key.index()].clone())
    }

    fn set(&self, key: LogicalKey, value: SharedValue) -> Result<()> {
        self.slots.write()[key.index()] = Some(value);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.read();
        let present: Vec<_> = LogicalKey::ALL
            .into_iter()
            .filter(|key| slots[key.index()].is_some())
            .collect();
        f.debug_struct("MemoryStore").field("present", &present).finish()
    }
}
