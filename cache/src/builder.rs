use crate::error::BuildError;
use crate::handles::LoadingCache;
use crate::queue::PriorityFetchQueue;
use crate::retention::RetentionMap;
use crate::shared::CacheShared;
use crate::task::fetcher::FetcherPool;
use crate::timing::IoTimingRegistry;
use crate::value::VolatileValue;

use core::fmt;
use std::hash::{BuildHasher, Hash};
use std::marker::PhantomData;
use std::sync::Arc;

/// Lanes used when `priority_lanes` is not set.
pub const DEFAULT_PRIORITY_LANES: usize = 1;
/// Dead slots removed per `prepare_next_frame` call.
pub const DEFAULT_RECLAIM_BATCH_SIZE: usize = 500;
/// Keys kept in the prefetch staging area across frames.
pub const DEFAULT_PREFETCH_CAPACITY: usize = 16_384;

/// A builder for creating `LoadingCache` instances.
pub struct LoadingCacheBuilder<K, V, H = ahash::RandomState> {
  priority_lanes: usize,
  fetcher_threads: usize,
  shards: usize,
  hasher: H,
  soft_capacity: u64,
  reclaim_batch_size: usize,
  prefetch_capacity: usize,
  io_timing: Option<Arc<IoTimingRegistry>>,
  _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V, H> fmt::Debug for LoadingCacheBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadingCacheBuilder")
      .field("priority_lanes", &self.priority_lanes)
      .field("fetcher_threads", &self.fetcher_threads)
      .field("shards", &self.shards)
      .field("soft_capacity", &self.soft_capacity)
      .field("reclaim_batch_size", &self.reclaim_batch_size)
      .field("prefetch_capacity", &self.prefetch_capacity)
      .field("shared_io_timing", &self.io_timing.is_some())
      .finish_non_exhaustive()
  }
}

// --- General Configuration Methods ---
impl<K, V, H> LoadingCacheBuilder<K, V, H> {
  /// Sets the number of priority lanes of the fetch queue. Lane 0 is the
  /// most urgent.
  pub fn priority_lanes(mut self, lanes: usize) -> Self {
    self.priority_lanes = lanes;
    self
  }

  /// Sets the number of background fetcher threads. Zero disables
  /// background loading.
  pub fn fetcher_threads(mut self, threads: usize) -> Self {
    self.fetcher_threads = threads;
    self
  }

  /// Sets the number of concurrent shards of the retention map.
  pub fn shards(mut self, shards: usize) -> Self {
    // Power of two so a shard is picked with a mask.
    self.shards = if shards == 0 {
      0
    } else {
      shards.next_power_of_two()
    };
    self
  }

  /// Sets the total weight of loaded values kept in the soft tier. Beyond
  /// it, least recently used values are only kept while someone holds them.
  pub fn soft_capacity(mut self, capacity: u64) -> Self {
    self.soft_capacity = capacity;
    self
  }

  /// Sets how many dead slots one `prepare_next_frame` call removes at most.
  pub fn reclaim_batch_size(mut self, size: usize) -> Self {
    self.reclaim_batch_size = size;
    self
  }

  /// Sets how many leftover keys are staged for prefetching across frames.
  pub fn prefetch_capacity(mut self, capacity: usize) -> Self {
    self.prefetch_capacity = capacity;
    self
  }

  /// Shares an I/O timing registry with other caches, so that a consumer's
  /// budget covers all of them.
  pub fn io_timing(mut self, registry: Arc<IoTimingRegistry>) -> Self {
    self.io_timing = Some(registry);
    self
  }
}

// --- Default Constructor ---
impl<K, V, H: BuildHasher + Default> LoadingCacheBuilder<K, V, H> {
  /// Creates a new `LoadingCacheBuilder` with default settings.
  pub fn new() -> Self {
    Self {
      priority_lanes: DEFAULT_PRIORITY_LANES,
      fetcher_threads: num_cpus::get().saturating_sub(1).max(1),
      shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      hasher: H::default(),
      soft_capacity: u64::MAX,
      reclaim_batch_size: DEFAULT_RECLAIM_BATCH_SIZE,
      prefetch_capacity: DEFAULT_PREFETCH_CAPACITY,
      io_timing: None,
      _marker: PhantomData,
    }
  }
}

impl<K, V> Default for LoadingCacheBuilder<K, V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

// --- Build Methods ---
impl<K, V, H> LoadingCacheBuilder<K, V, H>
where
  K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
  V: VolatileValue + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Sets the hasher for the retention map.
  pub fn hasher<H2: BuildHasher + Clone>(self, hasher: H2) -> LoadingCacheBuilder<K, V, H2> {
    LoadingCacheBuilder {
      priority_lanes: self.priority_lanes,
      fetcher_threads: self.fetcher_threads,
      shards: self.shards,
      hasher,
      soft_capacity: self.soft_capacity,
      reclaim_batch_size: self.reclaim_batch_size,
      prefetch_capacity: self.prefetch_capacity,
      io_timing: self.io_timing,
      _marker: PhantomData,
    }
  }

  /// Builds the cache and starts its fetcher threads.
  pub fn build(self) -> Result<LoadingCache<K, V, H>, BuildError> {
    self.validate()?;

    let io_timing = self
      .io_timing
      .unwrap_or_else(|| Arc::new(IoTimingRegistry::new(self.priority_lanes)));

    let shared = Arc::new(CacheShared::new(
      RetentionMap::new(self.shards, self.hasher, self.soft_capacity),
      PriorityFetchQueue::new(self.priority_lanes, self.prefetch_capacity),
      io_timing,
      self.priority_lanes,
      self.reclaim_batch_size,
    ));
    let fetchers = FetcherPool::spawn(&shared, self.fetcher_threads)?;

    tracing::debug!(
      lanes = self.priority_lanes,
      fetchers = self.fetcher_threads,
      shards = self.shards,
      "loading cache built"
    );
    Ok(LoadingCache { shared, fetchers })
  }

  /// Validates the builder configuration.
  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.priority_lanes == 0 {
      return Err(BuildError::ZeroPriorityLanes);
    }
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    if let Some(registry) = &self.io_timing {
      if registry.num_lanes() < self.priority_lanes {
        return Err(BuildError::TimingLanes {
          registry: registry.num_lanes(),
          lanes: self.priority_lanes,
        });
      }
    }
    Ok(())
  }
}
