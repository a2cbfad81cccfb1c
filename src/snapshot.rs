//! Snapshot aggregation and identity diffing.

use crate::backend::DurableStore;
use crate::error::{Result, SyncError};
use crate::types::{LogicalKey, SharedValue};
use std::sync::Arc;
use std::thread;

/// One value slot per [`LogicalKey`].
///
/// A missing key is a `None` placeholder, never an absent entry.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    slots: [Option<SharedValue>; LogicalKey::COUNT],
}

impl Snapshot {
    /// Snapshot with every key set to the placeholder.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Value for `key`.
    pub fn get(&self, key: LogicalKey) -> Option<&SharedValue> {
        self.slots[key.index()].as_ref()
    }

    /// Replace the value for `key`.
    pub fn set(&mut self, key: LogicalKey, value: Option<SharedValue>) {
        self.slots[key.index()] = value;
    }

    /// Iterate `(key, value)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (LogicalKey, Option<&SharedValue>)> + '_ {
        LogicalKey::ALL
            .into_iter()
            .map(move |key| (key, self.get(key)))
    }
}

/// Read every logical key from `store` into a fresh [`Snapshot`].
///
/// With `concurrent` set, each key is read on its own scoped thread and the
/// reads are joined; otherwise they run one after another. Either way the
/// result is all-or-nothing: if any read fails, the first failing key in
/// key order is reported as [`SyncError::StorageUnavailable`] and no
/// snapshot is produced.
pub fn fetch_snapshot(store: &dyn DurableStore, concurrent: bool) -> Result<Snapshot> {
    let results: Vec<Result<Option<SharedValue>>> = if concurrent {
        thread::scope(|scope| {
            let handles: Vec<_> = LogicalKey::ALL
                .into_iter()
                .map(|key| scope.spawn(move || store.get(key)))
                .collect();

            handles
                .into_iter()
                .zip(LogicalKey::ALL)
                .map(|(handle, key)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(SyncError::StorageUnavailable {
                            key,
                            reason: "reader thread panicked".into(),
                        })
                    })
                })
                .collect()
        })
    } else {
        LogicalKey::ALL.into_iter().map(|key| store.get(key)).collect()
    };

    let mut snapshot = Snapshot::empty();
    for (key, result) in LogicalKey::ALL.into_iter().zip(results) {
        let value = result.map_err(|e| match e {
            unavailable @ SyncError::StorageUnavailable { .. } => unavailable,
            other => SyncError::StorageUnavailable {
                key,
                reason: other.to_string(),
            },
        })?;
        snapshot.set(key, value);
    }

    Ok(snapshot)
}

/// Identity comparison of two slots.
///
/// Two placeholders are the same; otherwise only the same `Arc` is.
pub fn same_value(a: Option<&SharedValue>, b: Option<&SharedValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Keys whose value identity differs between `old` and `new`, in key order.
///
/// This is pointer comparison, not structural equality. Two equal documents
/// behind different `Arc`s count as a change. A value that was somehow
/// modified behind the same `Arc` does not, so writers must always publish
/// a fresh allocation.
pub fn changed_keys(old: &Snapshot, new: &Snapshot) -> Vec<LogicalKey> {
    LogicalKey::ALL
        .into_iter()
        .filter(|&key| !same_value(old.get(key), new.get(key)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use serde_json::json;

    struct BrokenRead(LogicalKey);

    impl DurableStore for BrokenRead {
        fn get(&self, key: LogicalKey) -> Result<Option<SharedValue>> {
            if key == self.0 {
                Err(SyncError::Io(std::io::Error::other("disk gone")))
            } else {
                Ok(Some(Arc::new(json!(key.storage_name()))))
            }
        }

        fn set(&self, _key: LogicalKey, _value: SharedValue) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_fetch_fills_every_key() {
        let store = MemoryStore::with_values([(LogicalKey::Options, json!({"theme": "DARK"}))]);

        for concurrent in [false, true] {
            let snapshot = fetch_snapshot(&store, concurrent).unwrap();
            assert_eq!(
                snapshot.get(LogicalKey::Options).map(|v| (**v).clone()),
                Some(json!({"theme": "DARK"}))
            );
            assert!(snapshot.get(LogicalKey::Tracking).is_none());
            assert_eq!(snapshot.iter().count(), LogicalKey::COUNT);
        }
    }

    #[test]
    fn test_fetch_is_all_or_nothing() {
        let store = BrokenRead(LogicalKey::WorklogCache);

        for concurrent in [false, true] {
            match fetch_snapshot(&store, concurrent) {
                Err(SyncError::StorageUnavailable { key, reason }) => {
                    assert_eq!(key, LogicalKey::WorklogCache);
                    assert!(reason.contains("disk gone"));
                }
                other => panic!("expected StorageUnavailable, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_changed_keys_uses_identity() {
        let shared = Arc::new(json!({"a": 1}));

        let mut old = Snapshot::empty();
        old.set(LogicalKey::Options, Some(Arc::clone(&shared)));
        old.set(LogicalKey::Tracking, Some(Arc::new(json!(1))));

        let mut new = Snapshot::empty();
        new.set(LogicalKey::Options, Some(shared));
        // Structurally equal, different allocation.
        new.set(LogicalKey::Tracking, Some(Arc::new(json!(1))));
        new.set(LogicalKey::Updates, Some(Arc::new(json!([]))));

        assert_eq!(
            changed_keys(&old, &new),
            vec![LogicalKey::Tracking, LogicalKey::Updates]
        );
    }

    #[test]
    fn test_placeholders_are_identical() {
        assert!(same_value(None, None));
        assert!(changed_keys(&Snapshot::empty(), &Snapshot::empty()).is_empty());
    }
}
