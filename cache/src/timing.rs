//! Per-consumer I/O accounting.
//!
//! A consumer context (one viewer window, one exporter, ...) is an [`IoGroup`].
//! Threads join a group with [`IoGroup::enter`]; threads that never do are
//! their own private group. Each group owns an [`IoTimeBudget`] and a few
//! cumulative counters, so unrelated consumers never drain each other's
//! budgets.

use crate::budget::IoTimeBudget;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, RwLock};

static NEXT_GROUP_ID: AtomicU64 = AtomicU64::new(1);

type GroupMap = RwLock<HashMap<u64, Arc<IoStatistics>>>;

thread_local! {
  static ENTERED_GROUP: Cell<Option<u64>> = const { Cell::new(None) };
  static THREAD_GROUP: ThreadGroup = ThreadGroup::new();
}

/// The private group of a thread that never entered an [`IoGroup`].
///
/// Remembers every registry that created statistics for it and removes them
/// again when the thread exits.
struct ThreadGroup {
  id: u64,
  registries: RefCell<Vec<Weak<GroupMap>>>,
}

impl ThreadGroup {
  fn new() -> Self {
    Self {
      id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
      registries: RefCell::new(Vec::new()),
    }
  }

  fn track(&self, groups: &Arc<GroupMap>) {
    let mut registries = self.registries.borrow_mut();
    registries.retain(|weak| weak.strong_count() > 0);
    let weak = Arc::downgrade(groups);
    if !registries.iter().any(|known| known.ptr_eq(&weak)) {
      registries.push(weak);
    }
  }
}

impl Drop for ThreadGroup {
  fn drop(&mut self) {
    for groups in self.registries.get_mut().drain(..) {
      if let Some(groups) = groups.upgrade() {
        groups.write().remove(&self.id);
      }
    }
  }
}

/// Identifies one consumer context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoGroup {
  id: u64,
}

impl IoGroup {
  /// Creates a new, empty group.
  pub fn new() -> Self {
    Self {
      id: NEXT_GROUP_ID.fetch_add(1, Ordering::Relaxed),
    }
  }

  /// The group of the calling thread.
  pub fn current() -> Self {
    let id = ENTERED_GROUP
      .with(Cell::get)
      .unwrap_or_else(|| THREAD_GROUP.with(|group| group.id));
    Self { id }
  }

  /// Makes the calling thread part of this group until the guard is dropped.
  pub fn enter(&self) -> IoGroupGuard {
    let previous = ENTERED_GROUP.with(|cell| cell.replace(Some(self.id)));
    IoGroupGuard {
      previous,
      _not_send: PhantomData,
    }
  }

  #[inline]
  pub fn id(&self) -> u64 {
    self.id
  }
}

impl Default for IoGroup {
  fn default() -> Self {
    Self::new()
  }
}

/// Restores the thread's previous group on drop.
#[derive(Debug)]
pub struct IoGroupGuard {
  previous: Option<u64>,
  _not_send: PhantomData<*const ()>,
}

impl Drop for IoGroupGuard {
  fn drop(&mut self) {
    ENTERED_GROUP.with(|cell| cell.set(self.previous));
  }
}

/// Budget and cumulative I/O figures of one group.
#[derive(Debug)]
pub struct IoStatistics {
  budget: Mutex<IoTimeBudget>,
  io_nanos: CachePadded<AtomicU64>,
  wait_nanos: CachePadded<AtomicU64>,
  loads: CachePadded<AtomicU64>,
}

impl IoStatistics {
  fn new(num_lanes: usize) -> Self {
    Self {
      budget: Mutex::new(IoTimeBudget::new(num_lanes)),
      io_nanos: CachePadded::new(AtomicU64::new(0)),
      wait_nanos: CachePadded::new(AtomicU64::new(0)),
      loads: CachePadded::new(AtomicU64::new(0)),
    }
  }

  pub fn reset_budget(&self, schedule: &[u64]) {
    self.budget.lock().reset(schedule);
  }

  pub fn time_left(&self, priority: usize) -> i64 {
    self.budget.lock().time_left(priority)
  }

  /// Charges a budgeted wait against the budget.
  pub fn use_time(&self, elapsed: Duration, priority: usize) {
    self.budget.lock().use_time(elapsed, priority);
    self
      .wait_nanos
      .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
  }

  /// Records time spent inside a loader by a thread of this group.
  pub(crate) fn record_load(&self, elapsed: Duration) {
    self
      .io_nanos
      .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    self.loads.fetch_add(1, Ordering::Relaxed);
  }

  /// A copy of the current budget.
  pub fn budget(&self) -> IoTimeBudget {
    self.budget.lock().clone()
  }

  /// Total time this group's threads spent inside `CacheLoader::load`.
  pub fn io_time(&self) -> Duration {
    Duration::from_nanos(self.io_nanos.load(Ordering::Relaxed))
  }

  /// Total time this group's threads spent in budgeted waits.
  pub fn wait_time(&self) -> Duration {
    Duration::from_nanos(self.wait_nanos.load(Ordering::Relaxed))
  }

  /// Number of loads performed by this group's threads.
  pub fn loads(&self) -> u64 {
    self.loads.load(Ordering::Relaxed)
  }
}

/// Maps groups to their statistics. One registry may be shared by several
/// caches so that a consumer has a single budget across all of them.
///
/// Statistics of a thread's private group are dropped when that thread
/// exits. Explicit groups stay until [`remove`](Self::remove) is called.
#[derive(Debug)]
pub struct IoTimingRegistry {
  num_lanes: usize,
  groups: Arc<GroupMap>,
}

impl IoTimingRegistry {
  pub fn new(num_lanes: usize) -> Self {
    Self {
      num_lanes,
      groups: Arc::new(RwLock::new(HashMap::new())),
    }
  }

  #[inline]
  pub fn num_lanes(&self) -> usize {
    self.num_lanes
  }

  /// Statistics of `group`, created on first use.
  pub fn statistics(&self, group: IoGroup) -> Arc<IoStatistics> {
    if let Some(stats) = self.groups.read().get(&group.id) {
      return stats.clone();
    }
    let stats = self
      .groups
      .write()
      .entry(group.id)
      .or_insert_with(|| Arc::new(IoStatistics::new(self.num_lanes)))
      .clone();
    // Fails only while the thread is being torn down.
    let _ = THREAD_GROUP.try_with(|own| {
      if own.id == group.id {
        own.track(&self.groups);
      }
    });
    stats
  }

  /// Statistics of the calling thread's group.
  pub fn current(&self) -> Arc<IoStatistics> {
    self.statistics(IoGroup::current())
  }

  /// Forgets a group, e.g. when its consumer is closed.
  pub fn remove(&self, group: IoGroup) -> bool {
    self.groups.write().remove(&group.id).is_some()
  }

  pub fn len(&self) -> usize {
    self.groups.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
