use crate::entry::{Entry, LoadOutcome};
use crate::error::{CacheError, LoadError};
use crate::hints::{CacheHints, LoadingStrategy};
use crate::metrics::Metrics;
use crate::queue::PriorityFetchQueue;
use crate::retention::RetentionMap;
use crate::time;
use crate::timing::IoTimingRegistry;
use crate::value::VolatileValue;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// The internal, thread-safe core of the cache, shared by the user-facing
/// handle and the fetcher threads.
pub(crate) struct CacheShared<K: Clone, V, H> {
  pub(crate) retention: RetentionMap<K, V, H>,
  pub(crate) queue: PriorityFetchQueue<K>,
  pub(crate) metrics: Metrics,
  pub(crate) io_timing: Arc<IoTimingRegistry>,
  pub(crate) num_lanes: usize,
  pub(crate) reclaim_batch_size: usize,
  /// Advanced only by `prepare_next_frame`.
  frame: AtomicU64,
  /// Fetchers start no new loads before this point (nanos since the cache epoch).
  pause_until: AtomicU64,
}

impl<K: Clone, V, H> fmt::Debug for CacheShared<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("num_lanes", &self.num_lanes)
      .field("frame", &self.frame.load(Ordering::Relaxed))
      .field("queue", &self.queue)
      .field("retention", &self.retention)
      .finish_non_exhaustive()
  }
}

impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug,
  V: VolatileValue,
  H: BuildHasher + Clone,
{
  pub(crate) fn new(
    retention: RetentionMap<K, V, H>,
    queue: PriorityFetchQueue<K>,
    io_timing: Arc<IoTimingRegistry>,
    num_lanes: usize,
    reclaim_batch_size: usize,
  ) -> Self {
    Self {
      retention,
      queue,
      metrics: Metrics::new(),
      io_timing,
      num_lanes,
      reclaim_batch_size,
      frame: AtomicU64::new(1),
      pause_until: AtomicU64::new(0),
    }
  }

  #[inline]
  pub(crate) fn frame(&self) -> u64 {
    self.frame.load(Ordering::Acquire)
  }

  pub(crate) fn check_priority(&self, hints: &CacheHints) -> Result<(), CacheError> {
    if hints.queue_priority >= self.num_lanes {
      return Err(CacheError::InvalidPriority {
        priority: hints.queue_priority,
        lanes: self.num_lanes,
      });
    }
    Ok(())
  }

  /// Applies the loading strategy to an entry.
  pub(crate) fn resolve(&self, entry: &Arc<Entry<K, V>>, hints: &CacheHints) -> Result<(), CacheError> {
    if entry.is_valid() {
      return Ok(());
    }

    match hints.loading_strategy {
      LoadingStrategy::Skip => {}
      LoadingStrategy::Async => self.enqueue(entry, hints),
      LoadingStrategy::Blocking => loop {
        match self.load_entry(entry) {
          Ok(_) => break,
          Err(LoadError::Cancelled) => thread::yield_now(),
          Err(err) => return Err(err.into()),
        }
      },
      LoadingStrategy::Budgeted => self.resolve_budgeted(entry, hints),
    }
    Ok(())
  }

  fn resolve_budgeted(&self, entry: &Arc<Entry<K, V>>, hints: &CacheHints) {
    let priority = hints.queue_priority;
    let stats = self.io_timing.current();
    let time_left = stats.time_left(priority);
    if time_left <= 0 {
      Metrics::bump(&self.metrics.budget_exhausted);
      self.enqueue(entry, hints);
      return;
    }

    let timeout = Duration::from_nanos(time_left as u64);
    if let Some(waited) = entry.wait_for_valid(timeout, || self.enqueue(entry, hints)) {
      stats.use_time(waited, priority);
      Metrics::bump(&self.metrics.budgeted_waits);
    }
  }

  /// Pushes the entry's key onto the fetch queue unless it was already pushed
  /// during the current frame.
  pub(crate) fn enqueue(&self, entry: &Entry<K, V>, hints: &CacheHints) {
    let frame = self.frame();
    if entry.try_mark_enqueued(frame) {
      self
        .queue
        .put(entry.key().clone(), hints.queue_priority, hints.enqueue_to_front);
      Metrics::bump(&self.metrics.enqueued);
      tracing::trace!(key = ?entry.key(), priority = hints.queue_priority, frame, "enqueued");
    }
  }

  /// Loads the entry if needed, accounting the time to the calling thread's
  /// group and promoting the entry to the soft tier on success.
  pub(crate) fn load_entry(&self, entry: &Arc<Entry<K, V>>) -> Result<LoadOutcome, LoadError> {
    let start = Instant::now();
    let result = entry.load_if_not_valid();
    match &result {
      Ok(LoadOutcome::AlreadyValid) => {}
      Ok(LoadOutcome::Loaded) => {
        self.io_timing.current().record_load(start.elapsed());
        Metrics::bump(&self.metrics.loads_completed);
        self.promote(entry);
      }
      Err(LoadError::Cancelled) => Metrics::bump(&self.metrics.load_cancellations),
      Err(_) => {
        self.io_timing.current().record_load(start.elapsed());
        Metrics::bump(&self.metrics.load_failures);
      }
    }
    result
  }

  fn promote(&self, entry: &Arc<Entry<K, V>>) {
    if let Some(demoted) = self.retention.promote(entry) {
      Metrics::bump(&self.metrics.promotions);
      Metrics::add(&self.metrics.demotions, demoted);
      if demoted > 0 {
        tracing::debug!(demoted, "soft tier over capacity, demoted entries");
      }
    }
  }

  /// Services one key taken from the fetch queue. Errors and panics stop here.
  pub(crate) fn fetch(&self, key: K) {
    let Some(entry) = self.retention.get(&key) else {
      // Nobody holds the entry any more.
      return;
    };
    if entry.is_valid() {
      return;
    }

    match panic::catch_unwind(AssertUnwindSafe(|| self.load_entry(&entry))) {
      Ok(Ok(_)) => {}
      Ok(Err(LoadError::Cancelled)) => {
        tracing::debug!(key = ?key, "background load cancelled");
      }
      Ok(Err(err)) => {
        tracing::warn!(key = ?key, error = %err, "background load failed");
      }
      Err(_) => {
        Metrics::bump(&self.metrics.load_failures);
        tracing::warn!(key = ?key, "loader panicked in fetcher thread");
      }
    }
  }

  /// Stages leftover queue entries, sweeps reclaimed slots and advances the
  /// frame counter.
  pub(crate) fn prepare_next_frame(&self) -> u64 {
    self.queue.clear_to_prefetch();
    let reclaimed = self.retention.sweep(self.reclaim_batch_size);
    Metrics::add(&self.metrics.reclaimed, reclaimed);
    let frame = self.frame.fetch_add(1, Ordering::AcqRel) + 1;
    tracing::trace!(frame, reclaimed, "prepared next frame");
    frame
  }

  pub(crate) fn invalidate_all(&self) {
    self.queue.clear();
    self.retention.clear();
    Metrics::bump(&self.metrics.invalidations);
    let frame = self.prepare_next_frame();
    tracing::debug!(frame, "invalidated all entries");
  }

  pub(crate) fn shrink_soft_tier(&self, max_cost: u64) -> usize {
    let demoted = self.retention.shrink_soft(max_cost);
    Metrics::add(&self.metrics.demotions, demoted);
    demoted
  }
}

// Pausing does not depend on the key or value types.
impl<K: Clone, V, H> CacheShared<K, V, H> {
  pub(crate) fn pause_until(&self, deadline: Instant) {
    self
      .pause_until
      .store(time::instant_to_nanos(deadline), Ordering::Release);
  }

  pub(crate) fn resume(&self) {
    self.pause_until.store(0, Ordering::Release);
  }

  /// The end of the current fetcher pause, if one is active.
  pub(crate) fn pause_deadline(&self) -> Option<Instant> {
    let until = self.pause_until.load(Ordering::Acquire);
    (until > time::now_nanos()).then(|| time::nanos_to_instant(until))
  }
}
