mod common;

use common::{build_cache, LoadProbe, Payload};
use volatile_cache::{CacheHandle, CacheHints, LoadingCache, LoadingStrategy};

const SKIP: CacheHints = CacheHints::new(LoadingStrategy::Skip, 0, true);
const ASYNC: CacheHints = CacheHints::new(LoadingStrategy::Async, 0, true);
const BLOCKING: CacheHints = CacheHints::new(LoadingStrategy::Blocking, 0, true);

#[test]
fn dropped_placeholders_are_swept_in_bounded_steps() {
  let cache = build_cache(1, 0);
  let probe = LoadProbe::new();

  for key in 0..1000 {
    drop(cache.get(key, &SKIP, probe.loader(key)).unwrap());
  }
  assert_eq!(cache.len(), 1000, "dead slots wait for a sweep");
  assert_eq!(cache.pending_reclaims(), 1000);

  cache.prepare_next_frame();
  assert_eq!(cache.len(), 500, "one frame sweeps at most one batch");

  cache.prepare_next_frame();
  assert_eq!(cache.len(), 0);
  assert_eq!(cache.pending_reclaims(), 0);
  assert_eq!(cache.metrics().reclaimed, 1000);

  assert!(cache.get_if_present(&3, &SKIP).unwrap().is_none());
}

#[test]
fn loaded_values_survive_until_pressure() {
  let cache = build_cache(1, 0);
  let probe = LoadProbe::new();

  for key in 0..1000 {
    drop(cache.get(key, &BLOCKING, probe.loader(key)).unwrap());
  }
  cache.prepare_next_frame();
  cache.prepare_next_frame();
  assert_eq!(cache.len(), 1000);
  assert_eq!(cache.soft_len(), 1000);
  assert_eq!(cache.metrics().soft_cost, 1000);
  for key in (0..1000).step_by(97) {
    let handle = cache.get_if_present(&key, &SKIP).unwrap().unwrap();
    assert_eq!(handle.value().value, Some(key));
  }

  // Mild pressure only trims the soft tier.
  assert_eq!(cache.shrink_soft_tier(900), 100);
  cache.prepare_next_frame();
  assert_eq!(cache.len(), 900);

  // Severe pressure releases everything nobody holds.
  let kept = cache.get_if_present(&999, &SKIP).unwrap().unwrap();
  assert_eq!(cache.shrink_soft_tier(0), 900);
  cache.prepare_next_frame();
  cache.prepare_next_frame();
  assert_eq!(cache.len(), 1);
  assert!(kept.is_valid());
  assert!(cache.get_if_present(&999, &SKIP).unwrap().is_some());
  assert_eq!(probe.loads(), 1000);
}

#[test]
fn soft_capacity_keeps_the_most_recently_used() {
  let cache = LoadingCache::<u64, Payload>::builder()
    .fetcher_threads(0)
    .soft_capacity(10)
    .build()
    .unwrap();
  let probe = LoadProbe::new();

  for key in 0..10 {
    cache.get(key, &BLOCKING, probe.loader(key)).unwrap();
  }
  // Touch key 0 so it is not the least recently used any more.
  cache.get(0, &SKIP, probe.loader(0)).unwrap();
  for key in 10..15 {
    cache.get(key, &BLOCKING, probe.loader(key)).unwrap();
  }

  assert_eq!(cache.soft_len(), 10);
  assert_eq!(cache.metrics().demotions, 5);
  cache.prepare_next_frame();
  assert_eq!(cache.len(), 10);
  assert!(cache.get_if_present(&0, &SKIP).unwrap().is_some());
  for key in 1..=5 {
    assert!(cache.get_if_present(&key, &SKIP).unwrap().is_none(), "key {key}");
  }
}

#[test]
fn held_placeholders_are_never_reclaimed() {
  let cache = build_cache(1, 0);
  let probe = LoadProbe::new();

  let held = cache.get(1, &ASYNC, probe.loader(1)).unwrap();
  for _ in 0..3 {
    cache.prepare_next_frame();
  }
  let again = cache.get(1, &SKIP, probe.loader(2)).unwrap();
  assert!(CacheHandle::ptr_eq(&held, &again));
  assert_eq!(cache.len(), 1);
}

#[test]
fn stale_notice_does_not_remove_a_replacement() {
  let cache = build_cache(1, 0);
  let probe = LoadProbe::new();

  drop(cache.get(1, &SKIP, probe.loader(1)).unwrap());
  assert_eq!(cache.pending_reclaims(), 1);

  // Same key re-requested before the sweep ran.
  let replacement = cache.get(1, &SKIP, probe.loader(2)).unwrap();
  cache.prepare_next_frame();

  let found = cache.get_if_present(&1, &BLOCKING).unwrap().unwrap();
  assert!(CacheHandle::ptr_eq(&replacement, &found));
  assert_eq!(found.value().value, Some(2));
  assert_eq!(cache.metrics().reclaimed, 0);
}

#[test]
fn reclaim_batch_size_is_configurable() {
  let cache = LoadingCache::<u64, Payload>::builder()
    .fetcher_threads(0)
    .reclaim_batch_size(10)
    .build()
    .unwrap();
  let probe = LoadProbe::new();

  for key in 0..25 {
    drop(cache.get(key, &SKIP, probe.loader(key)).unwrap());
  }
  cache.prepare_next_frame();
  assert_eq!(cache.len(), 15);
  cache.prepare_next_frame();
  cache.prepare_next_frame();
  assert_eq!(cache.len(), 0);
}
