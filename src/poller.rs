//! Change detection over a non-reactive durable store.
//!
//! The [`Poller`] owns the current [`Snapshot`] and the
//! [`SubscriptionRegistry`]. One [`Poller::tick`] re-reads every key,
//! diffs the result against the current snapshot by value identity,
//! installs the new snapshot and notifies listeners of every changed key in
//! key order.
//!
//! `tick` knows nothing about time. A background thread
//! ([`PollerHandle::spawn`]) or a [`ManualClock`] decides when it runs, and
//! a push-capable backend could call it on demand instead.

use crate::backend::DurableStore;
use crate::error::Result;
use crate::snapshot::{changed_keys, fetch_snapshot, Snapshot};
use crate::subscriptions::SubscriptionRegistry;
use crate::types::{LogicalKey, SharedValue};
use crossbeam_channel::{select, Sender};
use parking_lot::{Condvar, Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lifecycle of the change detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollerState {
    /// No snapshot has been fetched successfully yet.
    Initializing,
    /// Initial snapshot installed.
    Ready,
    /// At least one recurring tick has completed after the initial load.
    Polling,
    /// Timer cancelled. Ticks are no-ops and listeners never fire again.
    Stopped,
}

/// Result of a single [`Poller::tick`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// A snapshot was installed.
    Applied {
        /// Keys whose value identity changed, in key order.
        changed: Vec<LogicalKey>,
        /// Whether this was the first successful fetch.
        initial: bool,
    },
    /// The poller was stopped while the fetch was in flight; the result was
    /// thrown away.
    Discarded,
    /// The poller is stopped; nothing was fetched.
    Stopped,
}

/// Owner of the current snapshot and the listener registry of one surface.
pub struct Poller {
    store: Arc<dyn DurableStore>,
    concurrent_reads: bool,
    snapshot: RwLock<Snapshot>,
    registry: Arc<SubscriptionRegistry>,
    state: Mutex<PollerState>,
    loaded: Condvar,
    /// Serializes ticks and local writes, the way a single event loop would.
    cycle: ReentrantMutex<()>,
}

impl Poller {
    /// Create a poller over `store`. Nothing is fetched until the first tick.
    pub fn new(store: Arc<dyn DurableStore>, concurrent_reads: bool) -> Self {
        Self {
            store,
            concurrent_reads,
            snapshot: RwLock::new(Snapshot::empty()),
            registry: Arc::new(SubscriptionRegistry::new()),
            state: Mutex::new(PollerState::Initializing),
            loaded: Condvar::new(),
            cycle: ReentrantMutex::new(()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PollerState {
        *self.state.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == PollerState::Stopped
    }

    /// Backend this poller reads from.
    pub fn store(&self) -> &dyn DurableStore {
        &*self.store
    }

    /// Listener registry.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Value of `key` in the current snapshot.
    pub fn current(&self, key: LogicalKey) -> Option<SharedValue> {
        self.snapshot.read().get(key).cloned()
    }

    /// Copy of the whole current snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.read().clone()
    }

    /// Fetch, diff, install and notify.
    ///
    /// A failed fetch leaves the snapshot and listeners untouched and is
    /// returned to the caller after being logged. While still initializing,
    /// the next tick simply retries.
    pub fn tick(&self) -> Result<PollOutcome> {
        let _cycle = self.cycle.lock();

        if self.is_stopped() {
            return Ok(PollOutcome::Stopped);
        }

        let fresh = match fetch_snapshot(&*self.store, self.concurrent_reads) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, state = ?self.state(), "poll tick failed; keeping previous snapshot");
                return Err(e);
            }
        };

        // Install the snapshot before leaving `Initializing`, so anyone who
        // observes a loaded state also reads the loaded values.
        let (changed, initial) = {
            let mut state = self.state.lock();
            if *state == PollerState::Stopped {
                return Ok(PollOutcome::Discarded);
            }

            let changed = {
                let mut current = self.snapshot.write();
                let changed = changed_keys(&current, &fresh);
                *current = fresh.clone();
                changed
            };

            let initial = *state == PollerState::Initializing;
            *state = if initial {
                PollerState::Ready
            } else {
                PollerState::Polling
            };
            (changed, initial)
        };

        if initial {
            tracing::info!(keys = changed.len(), "initial snapshot loaded");
            self.loaded.notify_all();
        }

        for &key in &changed {
            if self.is_stopped() {
                break;
            }
            let notified = self.registry.notify(key, fresh.get(key));
            tracing::debug!(%key, listeners = notified, "change detected");
        }

        Ok(PollOutcome::Applied { changed, initial })
    }

    /// Hold the cycle lock. Ticks cannot run while the guard is alive.
    pub(crate) fn lock_cycle(&self) -> ReentrantMutexGuard<'_, ()> {
        self.cycle.lock()
    }

    /// Install a value the local surface just persisted.
    ///
    /// Callers hold the cycle lock, so the next tick sees this `Arc` as the
    /// current value and does not report it again.
    pub(crate) fn install(&self, key: LogicalKey, value: SharedValue) {
        self.snapshot.write().set(key, Some(value));
    }

    /// Block until the initial snapshot is loaded, the poller stops, or
    /// `timeout` elapses. Returns whether the snapshot is loaded.
    pub fn wait_until_loaded(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while *state == PollerState::Initializing {
            if self.loaded.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        matches!(*state, PollerState::Ready | PollerState::Polling)
    }

    /// Stop for good. Listeners are dropped and become inert.
    ///
    /// A tick already fetching finishes its reads, then discards them.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == PollerState::Stopped {
                return;
            }
            *state = PollerState::Stopped;
        }
        self.loaded.notify_all();
        self.registry.clear();
    }
}

/// Handle to the background thread that ticks a [`Poller`] on a timer.
pub struct PollerHandle {
    join: Option<JoinHandle<()>>,
    stop: Option<Sender<()>>,
}

impl PollerHandle {
    /// Spawn a thread that ticks once immediately, then every `interval`,
    /// until [`PollerHandle::stop`] is called or the poller stops.
    pub fn spawn(poller: Arc<Poller>, interval: Duration, name: &str) -> Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);

        let join = thread::Builder::new().name(name.to_string()).spawn(move || {
            let ticker = crossbeam_channel::tick(interval);
            // Errors are logged inside `tick`; the timer keeps going.
            let _ = poller.tick();

            loop {
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        if poller.is_stopped() {
                            break;
                        }
                        let _ = poller.tick();
                    }
                }
            }
            tracing::debug!("poller thread exiting");
        })?;

        Ok(Self {
            join: Some(join),
            stop: Some(stop_tx),
        })
    }

    /// Cancel the timer without waiting for the thread.
    ///
    /// A tick already in progress runs to completion; the thread exits
    /// right after it.
    pub fn signal_stop(&mut self) {
        // Disconnecting the channel wakes the select.
        self.stop.take();
    }

    /// Cancel the timer and wait for the thread to exit.
    ///
    /// Called from the poller thread itself (e.g. from a listener), this
    /// only signals. Surfaces never join (dropping a handle only signals); this
    /// is for owners that drive a [`Poller`] directly and hold no cycle lock.
    pub fn stop(&mut self) {
        self.signal_stop();
        if let Some(join) = self.join.take() {
            if join.thread().id() != thread::current().id() {
                let _ = join.join();
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        // Never join here: the dropping thread may hold the cycle lock the
        // poller thread is waiting on.
        self.signal_stop();
    }
}

/// Simulated timer for driving a poller deterministically.
///
/// Time only moves through [`ManualClock::advance`], which reports how many
/// ticks fell due. A tick is due at every whole multiple of the interval.
#[derive(Clone, Debug)]
pub struct ManualClock {
    interval: Duration,
    elapsed: Duration,
    next_due: Duration,
}

impl ManualClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            elapsed: Duration::ZERO,
            next_due: interval,
        }
    }

    /// Simulated time since creation.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Move time forward by `by` and return the number of ticks now due.
    pub fn advance(&mut self, by: Duration) -> u32 {
        self.elapsed += by;
        let mut due = 0;
        while self.next_due <= self.elapsed {
            due += 1;
            self.next_due += self.interval;
        }
        due
    }
}
