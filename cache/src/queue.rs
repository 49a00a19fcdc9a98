use std::collections::VecDeque;
use std::fmt;

use parking_lot::{Condvar, Mutex};

struct Lanes<K> {
  lanes: Box<[VecDeque<K>]>,
  prefetch: VecDeque<K>,
  closed: bool,
}

impl<K> Lanes<K> {
  fn pop(&mut self) -> Option<K> {
    self
      .lanes
      .iter_mut()
      .find_map(VecDeque::pop_front)
      .or_else(|| self.prefetch.pop_front())
  }
}

/// A fixed set of strictly ordered priority lanes of pending keys.
///
/// Lane 0 is drained before lane 1 and so on. When every lane is empty, keys
/// demoted by `clear_to_prefetch` are served. The queue itself does not
/// deduplicate; the cache stamps entries with the frame they were queued in.
pub(crate) struct PriorityFetchQueue<K> {
  state: Mutex<Lanes<K>>,
  not_empty: Condvar,
  prefetch_capacity: usize,
}

impl<K> fmt::Debug for PriorityFetchQueue<K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.state.lock();
    f.debug_struct("PriorityFetchQueue")
      .field("lanes", &state.lanes.iter().map(VecDeque::len).collect::<Vec<_>>())
      .field("prefetch", &state.prefetch.len())
      .field("closed", &state.closed)
      .finish()
  }
}

impl<K> PriorityFetchQueue<K> {
  pub(crate) fn new(num_lanes: usize, prefetch_capacity: usize) -> Self {
    Self {
      state: Mutex::new(Lanes {
        lanes: (0..num_lanes).map(|_| VecDeque::new()).collect(),
        prefetch: VecDeque::new(),
        closed: false,
      }),
      not_empty: Condvar::new(),
      prefetch_capacity,
    }
  }

  /// Adds `key` to lane `priority`. The caller validates `priority`.
  pub(crate) fn put(&self, key: K, priority: usize, to_front: bool) {
    let mut state = self.state.lock();
    let lane = &mut state.lanes[priority];
    if to_front {
      lane.push_front(key);
    } else {
      lane.push_back(key);
    }
    drop(state);
    self.not_empty.notify_one();
  }

  /// Removes the next key, blocking while the queue is empty.
  ///
  /// Returns `None` once the queue has been closed.
  pub(crate) fn take_blocking(&self) -> Option<K> {
    let mut state = self.state.lock();
    loop {
      if state.closed {
        return None;
      }
      if let Some(key) = state.pop() {
        return Some(key);
      }
      self.not_empty.wait(&mut state);
    }
  }

  /// Removes the next key without blocking.
  #[cfg(test)]
  pub(crate) fn try_take(&self) -> Option<K> {
    self.state.lock().pop()
  }

  /// Moves everything still queued into the prefetch staging list.
  ///
  /// Leftovers of more urgent lanes end up in front. If the staging list grows
  /// past its capacity, the least urgent keys are dropped.
  pub(crate) fn clear_to_prefetch(&self) {
    let mut state = self.state.lock();
    let Lanes { lanes, prefetch, .. } = &mut *state;
    for lane in lanes.iter_mut().rev() {
      while let Some(key) = lane.pop_back() {
        prefetch.push_front(key);
      }
    }
    prefetch.truncate(self.prefetch_capacity);
  }

  /// Drops every pending key, including staged ones.
  pub(crate) fn clear(&self) {
    let mut state = self.state.lock();
    state.lanes.iter_mut().for_each(VecDeque::clear);
    state.prefetch.clear();
  }

  /// Wakes all blocked takers and makes `take_blocking` return `None` from now on.
  pub(crate) fn close(&self) {
    self.state.lock().closed = true;
    self.not_empty.notify_all();
  }

  pub(crate) fn is_closed(&self) -> bool {
    self.state.lock().closed
  }

  /// Number of keys queued in the lanes (not counting staged keys).
  pub(crate) fn len(&self) -> usize {
    self.state.lock().lanes.iter().map(VecDeque::len).sum()
  }

  pub(crate) fn lane_len(&self, priority: usize) -> usize {
    self.state.lock().lanes.get(priority).map_or(0, VecDeque::len)
  }

  pub(crate) fn prefetch_len(&self) -> usize {
    self.state.lock().prefetch.len()
  }
}
