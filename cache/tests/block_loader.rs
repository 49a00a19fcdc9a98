use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use volatile_cache::{
  BlockError, BlockGrid, BlockLoader, BlockReader, CacheError, CacheHints, CellKey, LoadingCache,
  LoadingStrategy, VolatileArray,
};

/// An in-memory store where every present block is filled with one value.
struct MemoryStore {
  blocks: HashMap<CellKey, u16>,
  broken: Option<CellKey>,
  reads: AtomicUsize,
}

impl BlockReader<u16> for MemoryStore {
  fn read_block(&self, key: &CellKey, _min: [i64; 3], dims: [usize; 3]) -> Result<Vec<u16>, BlockError> {
    self.reads.fetch_add(1, Ordering::SeqCst);
    if self.broken == Some(*key) {
      return Err(BlockError::Io(io::Error::new(io::ErrorKind::Other, "disk on fire")));
    }
    match self.blocks.get(key) {
      Some(&fill) => Ok(vec![fill; dims.iter().product()]),
      None => Err(BlockError::Missing),
    }
  }
}

const BLOCKING: CacheHints = CacheHints::new(LoadingStrategy::Blocking, 0, true);

fn setup() -> (LoadingCache<CellKey, VolatileArray<u16>>, Arc<MemoryStore>, BlockGrid) {
  let present = CellKey::new(0, 0, 0, [0, 0, 0]);
  let broken = CellKey::new(0, 0, 0, [1, 0, 0]);
  let store = Arc::new(MemoryStore {
    blocks: HashMap::from([(present, 7)]),
    broken: Some(broken),
    reads: AtomicUsize::new(0),
  });
  let cache = LoadingCache::builder()
    .priority_lanes(2)
    .fetcher_threads(0)
    .build()
    .unwrap();
  (cache, store, BlockGrid::new([48, 16, 16], [32, 16, 16]))
}

#[test]
fn present_block_is_loaded() {
  let (cache, store, grid) = setup();
  let key = CellKey::new(0, 0, 0, [0, 0, 0]);

  let handle = cache
    .get(key, &BLOCKING, BlockLoader::new(store.clone(), key, &grid))
    .unwrap();
  let block = handle.value();
  assert_eq!(block.dims(), [32, 16, 16]);
  assert!(block.as_slice().iter().all(|&v| v == 7));
  assert_eq!(cache.metrics().soft_cost, 32 * 16 * 16 * 2);
}

#[test]
fn missing_block_is_loaded_once_as_zeroes() {
  let (cache, store, grid) = setup();
  let key = CellKey::new(0, 0, 1, [0, 0, 0]);

  for _ in 0..3 {
    let handle = cache
      .get(key, &BLOCKING, BlockLoader::new(store.clone(), key, &grid))
      .unwrap();
    assert!(handle.is_valid());
    assert!(handle.value().as_slice().iter().all(|&v| v == 0));
    cache.prepare_next_frame();
  }
  assert_eq!(store.reads.load(Ordering::SeqCst), 1);
}

#[test]
fn broken_block_reports_an_error_and_stays_retryable() {
  let (cache, store, grid) = setup();
  let key = CellKey::new(0, 0, 0, [1, 0, 0]);

  let placeholder = cache
    .get(key, &CacheHints::new(LoadingStrategy::Skip, 0, true), BlockLoader::new(store.clone(), key, &grid))
    .unwrap();
  assert_eq!(placeholder.value().dims(), [16, 16, 16], "border block is cut off");

  for attempt in 1..=2 {
    let err = cache.get_if_present(&key, &BLOCKING).unwrap_err();
    assert!(matches!(err, CacheError::Load(_)));
    assert!(err.to_string().contains("disk on fire"));
    assert_eq!(store.reads.load(Ordering::SeqCst), attempt);
  }
  assert!(!placeholder.is_valid());
}
