use crate::builder::LoadingCacheBuilder;
use crate::entry::Entry;
use crate::error::CacheError;
use crate::handles::CacheHandle;
use crate::hints::CacheHints;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::shared::CacheShared;
use crate::task::fetcher::FetcherPool;
use crate::timing::{IoStatistics, IoTimingRegistry};
use crate::value::{CacheLoader, VolatileValue};

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A thread-safe cache of volatile values that are filled in by background
/// fetcher threads.
///
/// Values start out as cheap, invalid placeholders produced by the loader.
/// How a lookup waits for the real value is chosen per call with
/// [`CacheHints`].
pub struct LoadingCache<K: Clone, V, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<K, V, H>>,
  pub(crate) fetchers: FetcherPool,
}

impl<K: Clone, V, H> fmt::Debug for LoadingCache<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadingCache")
      .field("shared", &self.shared)
      .field("fetchers", &self.fetchers)
      .finish()
  }
}

impl<K, V> LoadingCache<K, V, ahash::RandomState>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: VolatileValue + 'static,
{
  /// Returns a builder with default settings.
  pub fn builder() -> LoadingCacheBuilder<K, V> {
    LoadingCacheBuilder::new()
  }
}

impl<K, V, H> LoadingCache<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: VolatileValue + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Returns the entry for `key`, creating it from `loader` if the key is not
  /// cached, and applies the loading strategy of `hints`.
  ///
  /// The returned handle is never empty: it holds either the placeholder or
  /// the loaded value. `loader` is dropped unused if the key already exists.
  ///
  /// # Errors
  ///
  /// `CacheError::InvalidPriority` if `hints.queue_priority` does not name a
  /// lane. `CacheError::Load` if a `Blocking` load fails.
  pub fn get<L>(&self, key: K, hints: &CacheHints, loader: L) -> Result<CacheHandle<K, V>, CacheError>
  where
    L: CacheLoader<V>,
  {
    self.shared.check_priority(hints)?;

    let lookup = self
      .shared
      .retention
      .get_or_insert_with(key, || Box::new(loader) as Box<dyn CacheLoader<V>>);
    self.record_lookup(&lookup.entry, lookup.created);

    self.shared.resolve(&lookup.entry, hints)?;
    self.record_placeholder(&lookup.entry);
    Ok(CacheHandle::new(lookup.entry))
  }

  /// Like [`get`](Self::get), but never creates an entry.
  ///
  /// Returns `Ok(None)` if `key` has not been requested before, or if its
  /// entry has been reclaimed or invalidated since.
  pub fn get_if_present(&self, key: &K, hints: &CacheHints) -> Result<Option<CacheHandle<K, V>>, CacheError> {
    self.shared.check_priority(hints)?;

    let Some(entry) = self.shared.retention.get(key) else {
      return Ok(None);
    };
    self.record_lookup(&entry, false);

    self.shared.resolve(&entry, hints)?;
    self.record_placeholder(&entry);
    Ok(Some(CacheHandle::new(entry)))
  }

  fn record_lookup(&self, entry: &Entry<K, V>, created: bool) {
    let metrics = &self.shared.metrics;
    if created {
      Metrics::bump(&metrics.misses);
    } else if entry.is_valid() {
      Metrics::bump(&metrics.hits);
      self.shared.retention.touch(entry.key());
    } else {
      Metrics::bump(&metrics.pending_hits);
    }
  }

  fn record_placeholder(&self, entry: &Entry<K, V>) {
    if !entry.is_valid() {
      Metrics::bump(&self.shared.metrics.placeholders_served);
    }
  }

  /// Ends the current frame: stages unserviced requests for prefetching,
  /// reclaims a bounded number of dead slots and advances the frame counter.
  ///
  /// Call exactly once per rendered frame. Returns the new frame number.
  pub fn prepare_next_frame(&self) -> u64 {
    self.shared.prepare_next_frame()
  }

  /// Drops every entry and every pending request. Handles that are still
  /// held keep their values but are no longer reachable through the cache.
  pub fn invalidate_all(&self) {
    self.shared.invalidate_all();
  }

  /// Resets the calling thread's I/O budget for this frame from a per-lane
  /// schedule of wait times.
  pub fn init_io_time_budget(&self, schedule: &[Duration]) {
    let nanos: Vec<u64> = schedule
      .iter()
      .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
      .collect();
    self.shared.io_timing.current().reset_budget(&nanos);
  }

  /// Budget and I/O figures of the calling thread's group.
  pub fn io_statistics(&self) -> Arc<IoStatistics> {
    self.shared.io_timing.current()
  }

  pub fn io_timing(&self) -> &Arc<IoTimingRegistry> {
    &self.shared.io_timing
  }

  /// Demotes least recently used loaded values until the soft tier weighs at
  /// most `max_cost`. Returns the number of demoted entries.
  pub fn shrink_soft_tier(&self, max_cost: u64) -> usize {
    self.shared.shrink_soft_tier(max_cost)
  }

  /// Keeps fetcher threads from starting new loads for `duration`.
  pub fn pause_fetchers_for(&self, duration: Duration) {
    self.pause_fetchers_until(Instant::now() + duration);
  }

  /// Keeps fetcher threads from starting new loads until `deadline`.
  pub fn pause_fetchers_until(&self, deadline: Instant) {
    tracing::debug!(?deadline, "pausing fetchers");
    self.shared.pause_until(deadline);
  }

  /// Ends a pause early.
  pub fn resume_fetchers(&self) {
    self.shared.resume();
  }

  /// The current frame number.
  pub fn frame(&self) -> u64 {
    self.shared.frame()
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot(self.shared.retention.soft_cost())
  }

  /// Number of keys in the retention map, including slots of dropped entries
  /// that were not swept yet.
  pub fn len(&self) -> usize {
    self.shared.retention.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Number of loaded values held by the soft tier.
  pub fn soft_len(&self) -> usize {
    self.shared.retention.soft_len()
  }

  /// Keys waiting in the priority lanes.
  pub fn pending_fetches(&self) -> usize {
    self.shared.queue.len()
  }

  /// Keys waiting in one priority lane.
  pub fn pending_fetches_at(&self, priority: usize) -> usize {
    self.shared.queue.lane_len(priority)
  }

  /// Keys staged for prefetching by earlier frames.
  pub fn staged_fetches(&self) -> usize {
    self.shared.queue.prefetch_len()
  }

  /// Dropped entries whose slots wait for the next sweep.
  pub fn pending_reclaims(&self) -> usize {
    self.shared.retention.pending_reclaims()
  }

  pub fn priority_lanes(&self) -> usize {
    self.shared.num_lanes
  }

  pub fn fetcher_threads(&self) -> usize {
    self.fetchers.len()
  }
}

impl<K: Clone, V, H> Drop for LoadingCache<K, V, H> {
  fn drop(&mut self) {
    self.fetchers.shutdown(&self.shared.queue);
    tracing::debug!("fetcher pool stopped");
  }
}
