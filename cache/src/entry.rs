use crate::error::LoadError;
use crate::retention::ReclaimQueue;
use crate::value::{CacheLoader, VolatileValue};

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// `enqueue_frame` of an entry that has never been queued.
pub(crate) const NEVER_ENQUEUED: u64 = 0;
/// `enqueue_frame` of a valid entry; no frame counter ever reaches it.
pub(crate) const NEVER_ENQUEUE_AGAIN: u64 = u64::MAX;

/// Result of a successful `load_if_not_valid` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadOutcome {
  /// The value was already valid (possibly loaded by another thread while we waited).
  AlreadyValid,
  /// This call performed the load and stored a valid value.
  Loaded,
}

struct EntryState<V> {
  value: Arc<V>,
  loading: bool,
}

/// A single cached key: its loader, its current value and frame bookkeeping.
///
/// The entry is the unit of single-flight loading. At most one thread runs
/// `loader.load()` at a time; everybody else waits on `loaded`.
pub(crate) struct Entry<K: Clone, V> {
  key: K,
  id: u64,
  loader: Box<dyn CacheLoader<V>>,
  state: Mutex<EntryState<V>>,
  loaded: Condvar,
  valid: AtomicBool,
  enqueue_frame: AtomicU64,
  reclaim: Weak<ReclaimQueue<K>>,
}

impl<K: Clone, V> fmt::Debug for Entry<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Entry")
      .field("id", &self.id)
      .field("valid", &self.valid.load(Ordering::Relaxed))
      .field("enqueue_frame", &self.enqueue_frame.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}

impl<K: Clone, V> Entry<K, V> {
  #[inline]
  pub(crate) fn key(&self) -> &K {
    &self.key
  }

  #[inline]
  pub(crate) fn id(&self) -> u64 {
    self.id
  }

  #[inline]
  pub(crate) fn is_valid(&self) -> bool {
    self.valid.load(Ordering::Acquire)
  }
}

impl<K: Clone, V: VolatileValue> Entry<K, V> {
  /// Creates an entry holding the loader's placeholder.
  pub(crate) fn new(
    key: K,
    id: u64,
    loader: Box<dyn CacheLoader<V>>,
    reclaim: Weak<ReclaimQueue<K>>,
  ) -> Self {
    let placeholder = loader.create_invalid();
    let valid = placeholder.is_valid();
    Self {
      key,
      id,
      loader,
      state: Mutex::new(EntryState {
        value: Arc::new(placeholder),
        loading: false,
      }),
      loaded: Condvar::new(),
      valid: AtomicBool::new(valid),
      enqueue_frame: AtomicU64::new(if valid { NEVER_ENQUEUE_AGAIN } else { NEVER_ENQUEUED }),
      reclaim,
    }
  }

  /// Returns the current value: the placeholder until a load succeeds.
  pub(crate) fn value(&self) -> Arc<V> {
    self.state.lock().value.clone()
  }

  /// Stamps the entry as queued in `frame`.
  ///
  /// Returns `true` exactly once per frame, for the caller that should push
  /// the key onto the fetch queue. Valid entries never return `true`.
  #[inline]
  pub(crate) fn try_mark_enqueued(&self, frame: u64) -> bool {
    self.enqueue_frame.fetch_max(frame, Ordering::AcqRel) < frame
  }

  /// Loads the value unless it is already valid.
  ///
  /// If another thread is loading, waits for it. If that load fails or is
  /// cancelled, this thread takes over and tries itself.
  pub(crate) fn load_if_not_valid(&self) -> Result<LoadOutcome, LoadError> {
    let mut state = self.state.lock();
    loop {
      if state.value.is_valid() {
        return Ok(LoadOutcome::AlreadyValid);
      }
      if !state.loading {
        break;
      }
      self.loaded.wait(&mut state);
    }
    state.loading = true;
    drop(state);

    // Resets `loading` and wakes waiters even if the loader panics.
    let mut in_flight = InFlight {
      entry: self,
      loaded: None,
    };

    match self.loader.load() {
      Ok(value) if value.is_valid() => {
        in_flight.loaded = Some(value);
        drop(in_flight);
        Ok(LoadOutcome::Loaded)
      }
      Ok(_) => Err(LoadError::Invalid),
      Err(err) => Err(err),
    }
  }

  /// Waits at most `timeout` for the value to become valid.
  ///
  /// `on_wait` runs under the entry lock right before waiting, and only if the
  /// value is still invalid. Returns the time actually spent waiting, or
  /// `None` if the value was already valid.
  pub(crate) fn wait_for_valid<F: FnOnce()>(&self, timeout: Duration, on_wait: F) -> Option<Duration> {
    let mut state = self.state.lock();
    if state.value.is_valid() {
      return None;
    }
    on_wait();

    let start = Instant::now();
    let deadline = start + timeout;
    while !state.value.is_valid() {
      if self.loaded.wait_until(&mut state, deadline).timed_out() {
        break;
      }
    }
    Some(start.elapsed())
  }
}

impl<K: Clone, V> Drop for Entry<K, V> {
  fn drop(&mut self) {
    if let Some(queue) = self.reclaim.upgrade() {
      queue.push(self.key.clone(), self.id);
    }
  }
}

/// Finishes an in-flight load: publishes the loaded value (if any), clears the
/// `loading` flag and wakes every waiter.
struct InFlight<'a, K: Clone, V> {
  entry: &'a Entry<K, V>,
  loaded: Option<V>,
}

impl<K: Clone, V> Drop for InFlight<'_, K, V> {
  fn drop(&mut self) {
    let mut state = self.entry.state.lock();
    if let Some(value) = self.loaded.take() {
      state.value = Arc::new(value);
      self.entry.valid.store(true, Ordering::Release);
      self
        .entry
        .enqueue_frame
        .store(NEVER_ENQUEUE_AGAIN, Ordering::Release);
    }
    state.loading = false;
    self.entry.loaded.notify_all();
  }
}
