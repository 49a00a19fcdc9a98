use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Lookups ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,
  pub(crate) pending_hits: CachePadded<AtomicU64>,
  pub(crate) placeholders_served: CachePadded<AtomicU64>,

  // --- Loading ---
  pub(crate) enqueued: CachePadded<AtomicU64>,
  pub(crate) loads_completed: CachePadded<AtomicU64>,
  pub(crate) load_failures: CachePadded<AtomicU64>,
  pub(crate) load_cancellations: CachePadded<AtomicU64>,

  // --- Budgeted waits ---
  pub(crate) budgeted_waits: CachePadded<AtomicU64>,
  pub(crate) budget_exhausted: CachePadded<AtomicU64>,

  // --- Retention ---
  pub(crate) promotions: CachePadded<AtomicU64>,
  pub(crate) demotions: CachePadded<AtomicU64>,
  pub(crate) reclaimed: CachePadded<AtomicU64>,
  pub(crate) invalidations: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      pending_hits: CachePadded::new(AtomicU64::new(0)),
      placeholders_served: CachePadded::new(AtomicU64::new(0)),
      enqueued: CachePadded::new(AtomicU64::new(0)),
      loads_completed: CachePadded::new(AtomicU64::new(0)),
      load_failures: CachePadded::new(AtomicU64::new(0)),
      load_cancellations: CachePadded::new(AtomicU64::new(0)),
      budgeted_waits: CachePadded::new(AtomicU64::new(0)),
      budget_exhausted: CachePadded::new(AtomicU64::new(0)),
      promotions: CachePadded::new(AtomicU64::new(0)),
      demotions: CachePadded::new(AtomicU64::new(0)),
      reclaimed: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  #[inline]
  pub(crate) fn add(counter: &AtomicU64, n: usize) {
    if n > 0 {
      counter.fetch_add(n as u64, Ordering::Relaxed);
    }
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self, soft_cost: u64) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let pending_hits = self.pending_hits.load(Ordering::Relaxed);
    let total_lookups = hits + misses + pending_hits;

    MetricsSnapshot {
      hits,
      misses,
      pending_hits,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      placeholders_served: self.placeholders_served.load(Ordering::Relaxed),
      enqueued: self.enqueued.load(Ordering::Relaxed),
      loads_completed: self.loads_completed.load(Ordering::Relaxed),
      load_failures: self.load_failures.load(Ordering::Relaxed),
      load_cancellations: self.load_cancellations.load(Ordering::Relaxed),
      budgeted_waits: self.budgeted_waits.load(Ordering::Relaxed),
      budget_exhausted: self.budget_exhausted.load(Ordering::Relaxed),
      promotions: self.promotions.load(Ordering::Relaxed),
      demotions: self.demotions.load(Ordering::Relaxed),
      reclaimed: self.reclaimed.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      soft_cost,
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// Lookups that found a valid value.
  pub hits: u64,
  /// Lookups that had to create a new entry.
  pub misses: u64,
  /// Lookups that found an existing entry that was not loaded yet.
  pub pending_hits: u64,
  /// Share of lookups that found a valid value:
  /// hits / (hits + misses + pending_hits).
  pub hit_ratio: f64,
  /// Lookups that returned a value that was still invalid.
  pub placeholders_served: u64,
  /// Keys pushed onto the fetch queue.
  pub enqueued: u64,
  /// Loads that produced a valid value.
  pub loads_completed: u64,
  /// Loads that failed with an error (or a panic in a fetcher).
  pub load_failures: u64,
  /// Loads that were cancelled.
  pub load_cancellations: u64,
  /// Budgeted lookups that actually waited.
  pub budgeted_waits: u64,
  /// Budgeted lookups that found the budget spent and fell back to async.
  pub budget_exhausted: u64,
  /// Entries moved from the weak to the soft tier.
  pub promotions: u64,
  /// Entries moved from the soft tier back to the weak tier.
  pub demotions: u64,
  /// Slots of dropped entries removed by sweeps.
  pub reclaimed: u64,
  /// Calls to `invalidate_all`.
  pub invalidations: u64,
  /// The current total weight of the soft tier.
  pub soft_cost: u64,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("pending_hits", &self.pending_hits)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("placeholders_served", &self.placeholders_served)
      .field("enqueued", &self.enqueued)
      .field("loads_completed", &self.loads_completed)
      .field("load_failures", &self.load_failures)
      .field("load_cancellations", &self.load_cancellations)
      .field("budgeted_waits", &self.budgeted_waits)
      .field("budget_exhausted", &self.budget_exhausted)
      .field("promotions", &self.promotions)
      .field("demotions", &self.demotions)
      .field("reclaimed", &self.reclaimed)
      .field("invalidations", &self.invalidations)
      .field("soft_cost", &self.soft_cost)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
