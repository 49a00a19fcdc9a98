mod common;

use common::Payload;
use volatile_cache::{BuildError, LoadingCache, LoadingCacheBuilder};

#[test]
fn defaults_start_at_least_one_fetcher() {
  let cache = LoadingCache::<u64, Payload>::builder().build().unwrap();
  assert!(cache.fetcher_threads() >= 1);
  assert_eq!(cache.priority_lanes(), 1);
  assert_eq!(cache.frame(), 1);
  assert!(cache.is_empty());
}

#[test]
fn zero_fetchers_is_allowed() {
  let cache = LoadingCacheBuilder::<u64, Payload>::new()
    .fetcher_threads(0)
    .priority_lanes(4)
    .build()
    .unwrap();
  assert_eq!(cache.fetcher_threads(), 0);
  assert_eq!(cache.priority_lanes(), 4);
  assert_eq!(cache.io_timing().num_lanes(), 4);
}

#[test]
fn zero_lanes_is_rejected() {
  let err = LoadingCacheBuilder::<u64, Payload>::default()
    .priority_lanes(0)
    .build()
    .unwrap_err();
  assert_eq!(err, BuildError::ZeroPriorityLanes);
}

#[test]
fn zero_shards_is_rejected() {
  let err = LoadingCacheBuilder::<u64, Payload>::default()
    .shards(0)
    .build()
    .unwrap_err();
  assert_eq!(err, BuildError::ZeroShards);
}

#[test]
fn custom_hasher_is_accepted() {
  let cache = LoadingCacheBuilder::<u64, Payload>::new()
    .hasher(std::collections::hash_map::RandomState::new())
    .shards(3)
    .fetcher_threads(0)
    .build()
    .unwrap();
  assert!(cache.is_empty());
}
