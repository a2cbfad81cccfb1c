//! Directory-backed backend for surfaces living in different processes.
//!
//! Layout:
//!
//! ```text
//! <dir>/MANIFEST        magic + version
//! <dir>/LOCK            fs2 advisory lock (shared for reads, exclusive for writes)
//! <dir>/<key>.json      one JSON document per logical key
//! ```
//!
//! Writes go to a temp file and are renamed into place, so readers never
//! observe a half-written document.

use crate::error::{Result, SyncError};
use crate::types::{LogicalKey, SharedValue};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::DurableStore;

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"SRF\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Last value decoded for a key, with the checksum of the bytes it came from.
#[derive(Clone)]
struct CachedValue {
    checksum: u32,
    len: usize,
    value: SharedValue,
}

/// File-per-key durable store.
///
/// Reads of an unchanged file return the same `Arc` as the previous read
/// (matched by CRC32 and length), so the poller only sees a change when a
/// writer actually replaced the document.
pub struct FileStore {
    path: PathBuf,
    cache: Mutex<[Option<CachedValue>; LogicalKey::COUNT]>,
}

impl FileStore {
    /// Open an existing store or create a new one at `path`.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.join("MANIFEST").exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Create a new store.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        Self::write_manifest(&path)?;
        Ok(Self::from_path(path))
    }

    /// Open an existing store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        Self::verify_manifest(&path)?;
        Ok(Self::from_path(path))
    }

    /// Base directory of the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn from_path(path: PathBuf) -> Self {
        Self {
            path,
            cache: Mutex::new(Default::default()),
        }
    }

    fn value_path(&self, key: LogicalKey) -> PathBuf {
        self.path.join(format!("{}.json", key.storage_name()))
    }

    fn lock_file(&self) -> Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.path.join("LOCK"))?;
        Ok(file)
    }

    /// MANIFEST = magic, format version, number of logical keys.
    fn write_manifest(path: &Path) -> Result<()> {
        let mut manifest = Vec::with_capacity(STORE_MAGIC.len() + 2);
        manifest.extend_from_slice(STORE_MAGIC);
        manifest.push(STORE_VERSION);
        manifest.push(LogicalKey::COUNT as u8);

        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(&manifest)?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let manifest_path = path.join("MANIFEST");
        let bytes = fs::read(&manifest_path)?;
        let invalid = |what: String| {
            SyncError::InvalidFormat(format!("{}: {}", manifest_path.display(), what))
        };

        let [m0, m1, m2, m3, version, key_count] = bytes[..] else {
            return Err(invalid(format!(
                "manifest is {} bytes, expected 6",
                bytes.len()
            )));
        };
        if &[m0, m1, m2, m3] != STORE_MAGIC {
            return Err(invalid("not a surface store".into()));
        }
        if version != STORE_VERSION {
            return Err(invalid(format!("unsupported format version {}", version)));
        }
        if key_count as usize != LogicalKey::COUNT {
            return Err(invalid(format!(
                "written for {} logical keys, this build has {}",
                key_count,
                LogicalKey::COUNT
            )));
        }

        Ok(())
    }
}

impl DurableStore for FileStore {
    fn get(&self, key: LogicalKey) -> Result<Option<SharedValue>> {
        let lock = self.lock_file()?;
        lock.lock_shared().map_err(|_| SyncError::Locked)?;

        let bytes = match fs::read(self.value_path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.cache.lock()[key.index()] = None;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        drop(lock);

        let checksum = crc32fast::hash(&bytes);
        let mut cache = self.cache.lock();
        if let Some(cached) = &cache[key.index()] {
            if cached.checksum == checksum && cached.len == bytes.len() {
                return Ok(Some(Arc::clone(&cached.value)));
            }
        }

        let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
            SyncError::Corruption(format!("{}.json: {}", key.storage_name(), e))
        })?;
        let value = Arc::new(value);
        cache[key.index()] = Some(CachedValue {
            checksum,
            len: bytes.len(),
            value: Arc::clone(&value),
        });

        Ok(Some(value))
    }

    fn set(&self, key: LogicalKey, value: SharedValue) -> Result<()> {
        let bytes = serde_json::to_vec(&*value)?;

        let lock = self.lock_file()?;
        lock.lock_exclusive().map_err(|_| SyncError::Locked)?;

        let target = self.value_path(key);
        let tmp = target.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &target)?;
        drop(lock);

        self.cache.lock()[key.index()] = Some(CachedValue {
            checksum: crc32fast::hash(&bytes),
            len: bytes.len(),
            value,
        });

        Ok(())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_create_then_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");

        FileStore::create(&path).unwrap();
        assert!(FileStore::open(&path).is_ok());
    }

    #[test]
    fn test_open_rejects_bad_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("MANIFEST"), b"NOPE\x01\x05").unwrap();

        match FileStore::open(dir.path()) {
            Err(SyncError::InvalidFormat(msg)) => assert!(msg.contains("not a surface store")),
            other => panic!("expected InvalidFormat, got {:?}", other),
        }
    }

    #[test]
    fn test_open_rejects_foreign_key_set() {
        let dir = TempDir::new().unwrap();
        FileStore::create(dir.path()).unwrap();

        let mut manifest = fs::read(dir.path().join("MANIFEST")).unwrap();
        manifest[5] = 9;
        fs::write(dir.path().join("MANIFEST"), &manifest).unwrap();

        match FileStore::open(dir.path()) {
            Err(SyncError::InvalidFormat(msg)) => assert!(msg.contains("logical keys")),
            other => panic!("expected InvalidFormat, got {:?}", other),
        }
    }

    #[test]
    fn test_open_rejects_truncated_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("MANIFEST"), STORE_MAGIC).unwrap();

        let result = FileStore::open(dir.path());
        assert!(matches!(result, Err(SyncError::InvalidFormat(_))));
    }

    #[test]
    fn test_missing_key_is_none() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::create(dir.path()).unwrap();

        assert!(store.get(LogicalKey::Tracking).unwrap().is_none());
    }

    #[test]
    fn test_unchanged_file_keeps_identity() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::create(dir.path()).unwrap();

        let written = Arc::new(json!({"issue": "ABC-1"}));
        store.set(LogicalKey::Tracking, Arc::clone(&written)).unwrap();

        let first = store.get(LogicalKey::Tracking).unwrap().unwrap();
        let second = store.get(LogicalKey::Tracking).unwrap().unwrap();
        assert!(Arc::ptr_eq(&written, &first));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_foreign_write_yields_fresh_value() {
        let dir = TempDir::new().unwrap();
        let ours = FileStore::create(dir.path()).unwrap();
        let theirs = FileStore::open(dir.path()).unwrap();

        ours.set(LogicalKey::Options, Arc::new(json!({"autosync": false})))
            .unwrap();
        let before = ours.get(LogicalKey::Options).unwrap().unwrap();

        theirs
            .set(LogicalKey::Options, Arc::new(json!({"autosync": true})))
            .unwrap();
        let after = ours.get(LogicalKey::Options).unwrap().unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(*after, json!({"autosync": true}));
    }

    #[test]
    fn test_garbage_file_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::create(dir.path()).unwrap();
        fs::write(dir.path().join("updates.json"), b"{not json").unwrap();

        let result = store.get(LogicalKey::Updates);
        assert!(matches!(result, Err(SyncError::Corruption(_))));
    }
}
