use crate::entry::Entry;
use crate::soft::SoftList;
use crate::value::{CacheLoader, VolatileValue};

use core::fmt;
use std::collections::{HashMap, VecDeque};
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, RwLock};

#[inline]
fn hash_key<K: Hash, H: BuildHasher>(hasher: &H, key: &K) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

/// Notices of dropped entries, waiting to be swept out of the map.
///
/// Every `Entry` pushes `(key, id)` here from its `Drop` impl.
#[derive(Debug)]
pub(crate) struct ReclaimQueue<K> {
  notices: Mutex<VecDeque<(K, u64)>>,
}

impl<K> ReclaimQueue<K> {
  fn new() -> Self {
    Self {
      notices: Mutex::new(VecDeque::new()),
    }
  }

  pub(crate) fn push(&self, key: K, id: u64) {
    self.notices.lock().push_back((key, id));
  }

  fn drain(&self, limit: usize) -> Vec<(K, u64)> {
    let mut notices = self.notices.lock();
    let n = limit.min(notices.len());
    notices.drain(..n).collect()
  }

  fn len(&self) -> usize {
    self.notices.lock().len()
  }

  fn clear(&self) {
    self.notices.lock().clear();
  }
}

/// How the map holds on to an entry.
enum Hold<K: Clone, V> {
  /// Cheap placeholder: alive only while someone holds a handle.
  Weak(Weak<Entry<K, V>>),
  /// Loaded value: kept by the map until demoted by memory pressure.
  Soft(Arc<Entry<K, V>>),
}

struct Slot<K: Clone, V> {
  id: u64,
  hold: Hold<K, V>,
}

impl<K: Clone, V> Slot<K, V> {
  fn weak(entry: &Arc<Entry<K, V>>, id: u64) -> Self {
    Self {
      id,
      hold: Hold::Weak(Arc::downgrade(entry)),
    }
  }

  #[inline]
  fn upgrade(&self) -> Option<Arc<Entry<K, V>>> {
    match &self.hold {
      Hold::Weak(weak) => weak.upgrade(),
      Hold::Soft(entry) => Some(entry.clone()),
    }
  }

  #[inline]
  fn is_soft(&self) -> bool {
    matches!(self.hold, Hold::Soft(_))
  }

  #[inline]
  fn is_dead(&self) -> bool {
    match &self.hold {
      Hold::Weak(weak) => weak.strong_count() == 0,
      Hold::Soft(_) => false,
    }
  }
}

type ShardMap<K, V, H> = HashMap<K, Slot<K, V>, H>;

/// A sharded, two-tier key -> entry map.
///
/// Invalid entries are held weakly and disappear as soon as the last
/// `CacheHandle` is dropped. Valid entries are held softly: the map keeps them
/// alive, in LRU order, until the soft tier exceeds its cost ceiling or memory
/// pressure is applied explicitly. Slots of dropped entries are removed by a
/// bounded `sweep`, matched by entry id so a slot that was already replaced by
/// a newer entry for the same key survives.
pub(crate) struct RetentionMap<K: Clone, V, H> {
  shards: Box<[CachePadded<RwLock<ShardMap<K, V, H>>>]>,
  hasher: H,
  reclaim: Arc<ReclaimQueue<K>>,
  soft: Mutex<SoftList<K>>,
  soft_capacity: u64,
  next_id: AtomicU64,
}

impl<K: Clone, V, H> fmt::Debug for RetentionMap<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RetentionMap")
      .field("num_shards", &self.shards.len())
      .field("soft_capacity", &self.soft_capacity)
      .finish()
  }
}

/// Result of a `get_or_insert_with` call.
pub(crate) struct Lookup<K: Clone, V> {
  pub(crate) entry: Arc<Entry<K, V>>,
  pub(crate) created: bool,
}

impl<K, V, H> RetentionMap<K, V, H>
where
  K: Eq + Hash + Clone,
  V: VolatileValue,
  H: BuildHasher + Clone,
{
  /// Creates a map with `num_shards` shards. `num_shards` must be a power of two.
  pub(crate) fn new(num_shards: usize, hasher: H, soft_capacity: u64) -> Self {
    let shards = (0..num_shards)
      .map(|_| CachePadded::new(RwLock::new(HashMap::with_hasher(hasher.clone()))))
      .collect::<Vec<_>>()
      .into_boxed_slice();

    Self {
      shards,
      hasher,
      reclaim: Arc::new(ReclaimQueue::new()),
      soft: Mutex::new(SoftList::new()),
      soft_capacity,
      next_id: AtomicU64::new(1),
    }
  }

  #[inline]
  fn shard(&self, key: &K) -> &RwLock<ShardMap<K, V, H>> {
    let hash = hash_key(&self.hasher, key);
    &self.shards[hash as usize & (self.shards.len() - 1)]
  }

  /// Returns the live entry for `key`, if any.
  pub(crate) fn get(&self, key: &K) -> Option<Arc<Entry<K, V>>> {
    self.shard(key).read().get(key).and_then(Slot::upgrade)
  }

  /// Returns the live entry for `key`, creating a weakly held one if there is
  /// none. Only the insertion step takes the shard's write lock.
  ///
  /// The loader and its placeholder are built without holding any lock. If
  /// another thread inserts the key first, the new entry is discarded.
  pub(crate) fn get_or_insert_with<F>(&self, key: K, make_loader: F) -> Lookup<K, V>
  where
    F: FnOnce() -> Box<dyn CacheLoader<V>>,
  {
    let shard = self.shard(&key);
    if let Some(entry) = shard.read().get(&key).and_then(Slot::upgrade) {
      return Lookup {
        entry,
        created: false,
      };
    }

    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let fresh = Arc::new(Entry::new(
      key.clone(),
      id,
      make_loader(),
      Arc::downgrade(&self.reclaim),
    ));

    let mut guard = shard.write();
    if let Some(entry) = guard.get(&key).and_then(Slot::upgrade) {
      drop(guard);
      // Its reclaim notice carries an id no slot has, so sweeps skip it.
      drop(fresh);
      return Lookup {
        entry,
        created: false,
      };
    }

    guard.insert(key, Slot::weak(&fresh, id));
    drop(guard);
    Lookup {
      entry: fresh,
      created: true,
    }
  }

  /// Moves a freshly loaded entry from the weak to the soft tier.
  ///
  /// Returns the number of entries demoted to make room, or `None` if the
  /// map no longer holds this entry (it was invalidated meanwhile).
  ///
  /// The slot and the soft list change under the same shard lock, so a
  /// concurrent `clear` sees either both or neither.
  pub(crate) fn promote(&self, entry: &Arc<Entry<K, V>>) -> Option<usize> {
    let weight = entry.value().weight();
    {
      let mut guard = self.shard(entry.key()).write();
      match guard.get_mut(entry.key()) {
        Some(slot) if slot.id == entry.id() => {
          if slot.is_soft() {
            return Some(0);
          }
          slot.hold = Hold::Soft(entry.clone());
        }
        _ => return None,
      }
      self
        .soft
        .lock()
        .push_front(entry.key().clone(), entry.id(), weight);
    }

    Some(self.shrink_soft(self.soft_capacity))
  }

  /// Marks a soft entry as recently used. Skipped when the soft list is busy.
  #[inline]
  pub(crate) fn touch(&self, key: &K) {
    if let Some(mut soft) = self.soft.try_lock() {
      soft.move_to_front(key);
    }
  }

  /// Demotes least recently used soft entries until the soft tier costs at
  /// most `max_cost`. Returns the number of demoted entries.
  pub(crate) fn shrink_soft(&self, max_cost: u64) -> usize {
    let victims = {
      let mut soft = self.soft.lock();
      let mut victims = Vec::new();
      while soft.current_cost() > max_cost {
        match soft.pop_back() {
          Some((key, id, _)) => victims.push((key, id)),
          None => break,
        }
      }
      victims
    };

    let mut demoted = 0;
    // Dropping the released `Arc`s may drop entries, which pushes reclaim
    // notices; keep that outside the shard locks.
    let mut released = Vec::with_capacity(victims.len());
    for (key, id) in victims {
      let mut guard = self.shard(&key).write();
      if let Some(slot) = guard.get_mut(&key) {
        if slot.id == id {
          if let Hold::Soft(entry) = &slot.hold {
            let weak = Arc::downgrade(entry);
            if let Hold::Soft(entry) = std::mem::replace(&mut slot.hold, Hold::Weak(weak)) {
              released.push(entry);
            }
            demoted += 1;
          }
        }
      }
    }
    drop(released);
    demoted
  }

  /// Removes at most `limit` slots whose entries have been dropped.
  pub(crate) fn sweep(&self, limit: usize) -> usize {
    let notices = self.reclaim.drain(limit);
    let mut removed = 0;
    for (key, id) in notices {
      let mut guard = self.shard(&key).write();
      let stale = matches!(guard.get(&key), Some(slot) if slot.id == id && slot.is_dead());
      if stale {
        guard.remove(&key);
        removed += 1;
      }
    }
    removed
  }

  /// Drops every slot from both tiers.
  ///
  /// Holds every shard lock while clearing the soft list, so no promotion can
  /// slip in between.
  pub(crate) fn clear(&self) {
    let mut guards: Vec<_> = self.shards.iter().map(|shard| shard.write()).collect();
    let released: Vec<_> = guards
      .iter_mut()
      .flat_map(|guard| guard.drain().map(|(_, slot)| slot))
      .collect();
    self.soft.lock().clear();
    drop(guards);
    drop(released);
    self.reclaim.clear();
  }

  /// Number of slots, including dead ones not yet swept.
  pub(crate) fn len(&self) -> usize {
    self.shards.iter().map(|shard| shard.read().len()).sum()
  }

  pub(crate) fn soft_len(&self) -> usize {
    self.soft.lock().len()
  }

  pub(crate) fn soft_cost(&self) -> u64 {
    self.soft.lock().current_cost()
  }

  /// Number of dropped entries whose slots are still waiting for a sweep.
  pub(crate) fn pending_reclaims(&self) -> usize {
    self.reclaim.len()
  }

  #[cfg(test)]
  fn soft_slots(&self) -> usize {
    self
      .shards
      .iter()
      .map(|shard| shard.read().values().filter(|slot| slot.is_soft()).count())
      .sum()
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::error::LoadError;
  use crate::value::LoaderFn;

  #[derive(Debug)]
  struct Block {
    valid: bool,
    bytes: u64,
  }

  impl VolatileValue for Block {
    fn is_valid(&self) -> bool {
      self.valid
    }

    fn weight(&self) -> u64 {
      self.bytes
    }
  }

  fn loader(bytes: u64) -> Box<dyn CacheLoader<Block>> {
    Box::new(LoaderFn::new(
      || Block {
        valid: false,
        bytes: 0,
      },
      move || -> Result<Block, LoadError> { Ok(Block { valid: true, bytes }) },
    ))
  }

  fn map(soft_capacity: u64) -> RetentionMap<u32, Block, ahash::RandomState> {
    RetentionMap::new(4, ahash::RandomState::new(), soft_capacity)
  }

  fn load_and_promote(map: &RetentionMap<u32, Block, ahash::RandomState>, key: u32, bytes: u64) {
    let entry = map.get_or_insert_with(key, || loader(bytes)).entry;
    entry.load_if_not_valid().unwrap();
    map.promote(&entry).unwrap();
  }

  #[test]
  fn create_if_absent_returns_same_entry() {
    let map = map(u64::MAX);
    let first = map.get_or_insert_with(1, || loader(1));
    let second = map.get_or_insert_with(1, || unreachable!());

    assert!(first.created);
    assert!(!second.created);
    assert!(Arc::ptr_eq(&first.entry, &second.entry));
  }

  #[test]
  fn weak_entries_die_with_their_last_handle() {
    let map = map(u64::MAX);
    let lookup = map.get_or_insert_with(1, || loader(1));
    drop(lookup);

    assert!(map.get(&1).is_none());
    assert_eq!(map.len(), 1, "slot remains until swept");
    assert_eq!(map.pending_reclaims(), 1);
    assert_eq!(map.sweep(10), 1);
    assert_eq!(map.len(), 0);
  }

  #[test]
  fn sweep_respects_identity() {
    let map = map(u64::MAX);
    drop(map.get_or_insert_with(1, || loader(1)));
    // A new entry takes over the dead slot before the sweep runs.
    let replacement = map.get_or_insert_with(1, || loader(1));
    assert!(replacement.created);

    assert_eq!(map.sweep(10), 0);
    assert!(map.get(&1).is_some());
  }

  #[test]
  fn sweep_is_bounded() {
    let map = map(u64::MAX);
    for key in 0..10 {
      drop(map.get_or_insert_with(key, || loader(1)));
    }
    assert_eq!(map.sweep(4), 4);
    assert_eq!(map.len(), 6);
    assert_eq!(map.sweep(100), 6);
    assert_eq!(map.len(), 0);
  }

  #[test]
  fn promoted_entries_survive_without_handles() {
    let map = map(u64::MAX);
    load_and_promote(&map, 1, 10);

    let entry = map.get(&1).expect("soft entry stays alive");
    assert!(entry.is_valid());
    assert_eq!(map.soft_len(), 1);
    assert_eq!(map.soft_cost(), 10);
  }

  #[test]
  fn soft_capacity_demotes_least_recently_used() {
    let map = map(25);
    load_and_promote(&map, 1, 10);
    load_and_promote(&map, 2, 10);
    map.touch(&1);
    load_and_promote(&map, 3, 10);

    assert!(map.get(&2).is_none(), "key 2 was least recently used");
    assert!(map.get(&1).is_some());
    assert!(map.get(&3).is_some());
    assert_eq!(map.soft_cost(), 20);
  }

  #[test]
  fn shrink_soft_keeps_handled_entries_alive() {
    let map = map(u64::MAX);
    load_and_promote(&map, 1, 1);
    load_and_promote(&map, 2, 1);
    let held = map.get(&1).unwrap();

    assert_eq!(map.shrink_soft(0), 2);
    assert_eq!(map.soft_len(), 0);
    assert!(map.get(&1).is_some(), "still referenced by a handle");
    assert!(map.get(&2).is_none());
    assert!(Arc::ptr_eq(&held, &map.get(&1).unwrap()));
  }

  #[test]
  fn promote_after_clear_is_ignored() {
    let map = map(u64::MAX);
    let entry = map.get_or_insert_with(1, || loader(1)).entry;
    entry.load_if_not_valid().unwrap();
    map.clear();

    assert_eq!(map.promote(&entry), None);
    assert_eq!(map.len(), 0);
    assert_eq!(map.soft_len(), 0);
  }

  #[test]
  fn loader_construction_may_reenter_the_map() {
    let map = map(u64::MAX);
    let outer = map.get_or_insert_with(1, || {
      assert!(map.get(&1).is_none());
      assert!(map.get_or_insert_with(2, || loader(2)).created);
      loader(1)
    });
    assert!(outer.created);

    let mut inner = None;
    let raced = map.get_or_insert_with(3, || {
      inner = Some(map.get_or_insert_with(3, || loader(3)).entry);
      loader(3)
    });
    let inner = inner.unwrap();
    assert!(!raced.created, "the entry inserted first wins");
    assert!(Arc::ptr_eq(&raced.entry, &inner));
    map.sweep(10);
    assert!(Arc::ptr_eq(&map.get(&3).unwrap(), &inner), "the discarded entry's notice is ignored");
  }

  #[test]
  fn soft_list_tracks_soft_slots_across_concurrent_clears() {
    let map = map(u64::MAX);
    std::thread::scope(|s| {
      for t in 0..4u32 {
        let map = &map;
        s.spawn(move || {
          for i in 0..500 {
            load_and_promote_if_present(map, t * 1_000 + i);
          }
        });
      }
      s.spawn(|| {
        for _ in 0..50 {
          map.clear();
          std::thread::yield_now();
        }
      });
    });

    assert_eq!(map.soft_len(), map.soft_slots());
    assert_eq!(map.soft_cost(), map.soft_len() as u64);
  }

  fn load_and_promote_if_present(map: &RetentionMap<u32, Block, ahash::RandomState>, key: u32) {
    let entry = map.get_or_insert_with(key, || loader(1)).entry;
    entry.load_if_not_valid().unwrap();
    let _ = map.promote(&entry);
  }
}
