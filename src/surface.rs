//! The store facade consumed by UI code.
//!
//! A [`Surface`] is one UI context (popup, options page, content script)
//! looking at the shared state. Reads are served from the poller's current
//! snapshot and never touch the backend. Writes are persisted first, then
//! installed locally and fanned out to local listeners, so the writing
//! surface sees its own change immediately while every other surface picks
//! it up on its next poll.

use crate::backend::DurableStore;
use crate::error::{Result, SyncError};
use crate::poller::{ManualClock, PollOutcome, Poller, PollerHandle, PollerState};
use crate::snapshot::Snapshot;
use crate::subscriptions::{ChangeListener, SubscriptionId, Watch};
use crate::types::{LogicalKey, SharedValue, SurfaceState};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Lower bound on the poll interval to avoid a busy loop.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What drives the poll timer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Schedule {
    /// A dedicated thread ticks every poll interval.
    #[default]
    Background,
    /// No thread. Time moves only through [`Surface::advance`].
    Manual,
}

/// Surface configuration.
#[derive(Clone, Debug)]
pub struct SurfaceConfig {
    /// Time between polls of the durable store.
    /// Default: 1000ms
    pub poll_interval: Duration,

    /// Timer driving the poller.
    pub schedule: Schedule,

    /// Read all keys in parallel during a poll.
    pub concurrent_reads: bool,

    /// Name of the background poller thread.
    pub thread_name: String,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            schedule: Schedule::Background,
            concurrent_reads: true,
            thread_name: "surface-poller".to_string(),
        }
    }
}

impl SurfaceConfig {
    /// Manually clocked config, for deterministic tests and embedders that
    /// own their own event loop.
    pub fn manual(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            schedule: Schedule::Manual,
            ..Default::default()
        }
    }
}

enum Driver {
    Idle,
    Background(PollerHandle),
    Manual(ManualClock),
}

/// One UI surface's view of the shared store.
pub struct Surface {
    config: SurfaceConfig,
    poller: Arc<Poller>,
    driver: Mutex<Driver>,
}

impl Surface {
    /// Construct a surface without starting it.
    pub fn new(store: Arc<dyn DurableStore>, mut config: SurfaceConfig) -> Self {
        config.poll_interval = config.poll_interval.max(MIN_POLL_INTERVAL);
        let poller = Arc::new(Poller::new(store, config.concurrent_reads));
        Self {
            config,
            poller,
            driver: Mutex::new(Driver::Idle),
        }
    }

    /// Construct and start a surface.
    pub fn open(store: Arc<dyn DurableStore>, config: SurfaceConfig) -> Result<Self> {
        let surface = Self::new(store, config);
        surface.start()?;
        Ok(surface)
    }

    /// Start the poll driver and kick off the initial load.
    ///
    /// Returns once the driver runs, not once the snapshot is loaded; use
    /// [`Surface::wait_until_loaded`] for that. Starting twice is a no-op.
    pub fn start(&self) -> Result<()> {
        let run_initial_tick = {
            let mut driver = self.driver.lock();
            if self.poller.is_stopped() {
                return Err(SyncError::Disposed);
            }
            if !matches!(*driver, Driver::Idle) {
                return Ok(());
            }

            match self.config.schedule {
                Schedule::Background => {
                    let handle = PollerHandle::spawn(
                        Arc::clone(&self.poller),
                        self.config.poll_interval,
                        &self.config.thread_name,
                    )?;
                    *driver = Driver::Background(handle);
                    false
                }
                Schedule::Manual => {
                    *driver = Driver::Manual(ManualClock::new(self.config.poll_interval));
                    true
                }
            }
        };

        tracing::info!(
            schedule = ?self.config.schedule,
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "surface started"
        );

        if run_initial_tick {
            // A failed initial load is retried on the next due tick.
            let _ = self.poller.tick();
        }

        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SurfaceState {
        match self.poller.state() {
            PollerState::Stopped => SurfaceState::Disposed,
            PollerState::Ready | PollerState::Polling => SurfaceState::Active,
            PollerState::Initializing => {
                if matches!(*self.driver.lock(), Driver::Idle) {
                    SurfaceState::Uninitialized
                } else {
                    SurfaceState::Loading
                }
            }
        }
    }

    /// Whether the initial snapshot has been loaded.
    pub fn is_loaded(&self) -> bool {
        self.state() == SurfaceState::Active
    }

    /// Block until loaded, disposed, or `timeout` elapses.
    pub fn wait_until_loaded(&self, timeout: Duration) -> bool {
        self.poller.wait_until_loaded(timeout)
    }

    /// Effective configuration.
    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    // --- Reads ---

    /// Value of `key` as of the latest poll or local write.
    ///
    /// Never blocks on the backend. `None` means nothing is stored, or the
    /// surface has not finished loading.
    pub fn read(&self, key: LogicalKey) -> Option<SharedValue> {
        self.poller.current(key)
    }

    /// Typed read of `key`.
    pub fn read_as<T: DeserializeOwned>(&self, key: LogicalKey) -> Result<Option<T>> {
        match self.read(key) {
            Some(value) => T::deserialize(&*value)
                .map(Some)
                .map_err(|e| SyncError::Deserialization(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }

    /// Copy of the whole current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.poller.snapshot()
    }

    // --- Subscriptions ---

    /// Register `listener` for changes of `key`.
    ///
    /// No initial notification is sent; read the current value separately
    /// or use [`Surface::watch`]. Every successful subscribe must be paired
    /// with an [`Surface::unsubscribe`].
    pub fn subscribe<L>(&self, key: LogicalKey, listener: L) -> Result<SubscriptionId>
    where
        L: ChangeListener + 'static,
    {
        if self.poller.is_stopped() {
            return Err(SyncError::Disposed);
        }
        Ok(self.poller.registry().register(key, Arc::new(listener)))
    }

    /// Remove a subscription. Unknown IDs are ignored.
    pub fn unsubscribe(&self, key: LogicalKey, id: SubscriptionId) -> bool {
        self.poller.registry().unregister(key, id)
    }

    /// Current value of `key` plus a live feed of its changes.
    ///
    /// The value and the registration are taken atomically with respect to
    /// polls and local writes, so no change can slip in between.
    pub fn watch(&self, key: LogicalKey) -> Result<Watch> {
        let _cycle = self.poller.lock_cycle();
        if self.poller.is_stopped() {
            return Err(SyncError::Disposed);
        }
        Ok(Watch::new(
            Arc::clone(self.poller.registry()),
            key,
            self.poller.current(key),
        ))
    }

    /// Number of live subscriptions under `key`.
    pub fn listener_count(&self, key: LogicalKey) -> usize {
        self.poller.registry().listener_count(key)
    }

    // --- Writes ---

    /// Persist `value` for `key`, then publish it locally.
    pub fn write(&self, key: LogicalKey, value: serde_json::Value) -> Result<()> {
        self.write_shared(key, Arc::new(value))
    }

    /// Persist an already shared value for `key`, then publish it locally.
    ///
    /// On success the value is visible to [`Surface::read`] right away and
    /// every local listener of `key` has been called. On failure nothing
    /// local changes and no listener is called.
    pub fn write_shared(&self, key: LogicalKey, value: SharedValue) -> Result<()> {
        let _cycle = self.poller.lock_cycle();
        if self.poller.is_stopped() {
            return Err(SyncError::Disposed);
        }

        self.poller
            .store()
            .set(key, Arc::clone(&value))
            .map_err(|e| SyncError::StorageWriteFailed {
                key,
                reason: e.to_string(),
            })?;

        self.poller.install(key, Arc::clone(&value));
        let notified = self.poller.registry().notify(key, Some(&value));
        tracing::debug!(%key, listeners = notified, "local write published");

        Ok(())
    }

    /// Typed write of `key`.
    pub fn write_as<T: Serialize>(&self, key: LogicalKey, value: &T) -> Result<()> {
        self.write(key, serde_json::to_value(value)?)
    }

    /// Shallow-merge `partial` into the current value of `key` and write
    /// the result.
    ///
    /// Fields of `partial` win. If either side is not a JSON object,
    /// `partial` replaces the current value outright.
    pub fn merge(&self, key: LogicalKey, partial: serde_json::Value) -> Result<()> {
        self.merge_onto(key, partial, serde_json::Value::Null)
    }

    /// Like [`Surface::merge`], but merges over `fallback` when nothing is
    /// stored for `key` yet.
    pub fn merge_onto(
        &self,
        key: LogicalKey,
        partial: serde_json::Value,
        fallback: serde_json::Value,
    ) -> Result<()> {
        let _cycle = self.poller.lock_cycle();

        let current = self.read(key);
        let base = current.as_deref().unwrap_or(&fallback);
        let merged = match (base, partial) {
            (serde_json::Value::Object(base), serde_json::Value::Object(update)) => {
                let mut combined = base.clone();
                combined.extend(update);
                serde_json::Value::Object(combined)
            }
            (_, partial) => partial,
        };

        self.write(key, merged)
    }

    /// Overwrite `key` with a default value.
    pub fn reset(&self, key: LogicalKey, default: serde_json::Value) -> Result<()> {
        self.write(key, default)
    }

    // --- Timer ---

    /// Run one poll right now, outside the schedule.
    pub fn poll_now(&self) -> Result<PollOutcome> {
        self.poller.tick()
    }

    /// Advance a manually clocked surface by `by`, running every poll that
    /// falls due. Returns the number of polls run.
    ///
    /// Poll failures are logged and swallowed, as on the background timer.
    pub fn advance(&self, by: Duration) -> Result<u32> {
        if self.poller.is_stopped() {
            return Err(SyncError::Disposed);
        }
        let due = match &mut *self.driver.lock() {
            Driver::Manual(clock) => clock.advance(by),
            Driver::Idle => {
                return Err(SyncError::InvalidOperation("surface not started".into()))
            }
            Driver::Background(_) => {
                return Err(SyncError::InvalidOperation(
                    "surface is driven by a background timer".into(),
                ))
            }
        };

        for _ in 0..due {
            let _ = self.poller.tick();
        }
        Ok(due)
    }

    // --- Teardown ---

    /// Stop polling and drop every listener. Idempotent.
    ///
    /// A poll already in flight finishes its reads and discards them.
    pub fn dispose(&self) {
        if self.poller.is_stopped() {
            return;
        }
        self.poller.stop();

        let driver = std::mem::replace(&mut *self.driver.lock(), Driver::Idle);
        if let Driver::Background(mut handle) = driver {
            handle.signal_stop();
        }
        tracing::info!("surface disposed");
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TICK: Duration = Duration::from_millis(1000);

    fn manual_surface(store: &MemoryStore) -> Surface {
        Surface::open(Arc::new(store.clone()), SurfaceConfig::manual(TICK)).unwrap()
    }

    #[test]
    fn test_lifecycle_states() {
        let store = MemoryStore::new();
        let surface = Surface::new(Arc::new(store), SurfaceConfig::manual(TICK));
        assert_eq!(surface.state(), SurfaceState::Uninitialized);

        surface.start().unwrap();
        assert_eq!(surface.state(), SurfaceState::Active);
        assert!(surface.is_loaded());

        surface.dispose();
        assert_eq!(surface.state(), SurfaceState::Disposed);
        assert!(matches!(surface.start(), Err(SyncError::Disposed)));
    }

    #[test]
    fn test_read_after_write() {
        let store = MemoryStore::new();
        let surface = manual_surface(&store);

        surface
            .write(LogicalKey::Options, json!({"autosync": true}))
            .unwrap();

        assert_eq!(
            *surface.read(LogicalKey::Options).unwrap(),
            json!({"autosync": true})
        );
    }

    #[test]
    fn test_local_write_does_not_refire_on_poll() {
        let store = MemoryStore::new();
        let surface = manual_surface(&store);

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        surface
            .subscribe(LogicalKey::Tracking, move |_: Option<&SharedValue>| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        surface
            .write(LogicalKey::Tracking, json!({"issue": "T-1"}))
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        surface.advance(TICK * 3).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_merge_is_shallow() {
        let store = MemoryStore::with_values([(
            LogicalKey::Options,
            json!({"user": "ann", "issues": {"A-1": ""}}),
        )]);
        let surface = manual_surface(&store);

        surface
            .merge(LogicalKey::Options, json!({"issues": {"B-2": "bee"}, "autosync": true}))
            .unwrap();

        assert_eq!(
            *surface.read(LogicalKey::Options).unwrap(),
            json!({"user": "ann", "issues": {"B-2": "bee"}, "autosync": true})
        );
    }

    #[test]
    fn test_merge_replaces_non_object() {
        let store = MemoryStore::with_values([(LogicalKey::Updates, json!([1, 2]))]);
        let surface = manual_surface(&store);

        surface.merge(LogicalKey::Updates, json!({"x": 1})).unwrap();
        assert_eq!(*surface.read(LogicalKey::Updates).unwrap(), json!({"x": 1}));
    }

    #[test]
    fn test_typed_round_trip() {
        #[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
        struct Tracking {
            issue: String,
            start: u64,
        }

        let surface = manual_surface(&MemoryStore::new());
        let tracking = Tracking {
            issue: "ABC-7".into(),
            start: 1_700_000_000_000,
        };
        surface.write_as(LogicalKey::Tracking, &tracking).unwrap();

        let back: Option<Tracking> = surface.read_as(LogicalKey::Tracking).unwrap();
        assert_eq!(back, Some(tracking));

        let wrong: Result<Option<Vec<u8>>> = surface.read_as(LogicalKey::Tracking);
        assert!(matches!(wrong, Err(SyncError::Deserialization(_))));
    }

    #[test]
    fn test_advance_requires_manual_schedule() {
        let surface = Surface::new(Arc::new(MemoryStore::new()), SurfaceConfig::manual(TICK));
        assert!(matches!(
            surface.advance(TICK),
            Err(SyncError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_disposed_surface_rejects_use() {
        let surface = manual_surface(&MemoryStore::new());
        surface.dispose();
        surface.dispose();

        assert!(matches!(
            surface.write(LogicalKey::Options, json!({})),
            Err(SyncError::Disposed)
        ));
        assert!(matches!(
            surface.subscribe(LogicalKey::Options, |_: Option<&SharedValue>| {}),
            Err(SyncError::Disposed)
        ));
        assert!(matches!(surface.watch(LogicalKey::Options), Err(SyncError::Disposed)));
    }

    #[test]
    fn test_listener_can_write_reentrantly() {
        let store = MemoryStore::new();
        let surface = Arc::new(manual_surface(&store));

        let inner = Arc::downgrade(&surface);
        surface
            .subscribe(LogicalKey::Tracking, move |value: Option<&SharedValue>| {
                if let (Some(surface), Some(value)) = (inner.upgrade(), value) {
                    let _ = surface.write(LogicalKey::Updates, json!([(**value).clone()]));
                }
            })
            .unwrap();

        surface
            .write(LogicalKey::Tracking, json!({"issue": "R-1"}))
            .unwrap();
        assert_eq!(
            *surface.read(LogicalKey::Updates).unwrap(),
            json!([{"issue": "R-1"}])
        );
    }

    #[test]
    fn test_poll_interval_is_clamped() {
        let surface = Surface::new(
            Arc::new(MemoryStore::new()),
            SurfaceConfig::manual(Duration::ZERO),
        );
        assert_eq!(surface.config().poll_interval, MIN_POLL_INTERVAL);
    }
}
