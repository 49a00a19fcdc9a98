use volatile_cache::{CacheHints, CellKey, LoadingStrategy};

#[test]
fn hints_and_keys_survive_bincode() {
  let hints = CacheHints::new(LoadingStrategy::Budgeted, 3, false);
  let bytes = bincode::serialize(&hints).unwrap();
  let decoded: CacheHints = bincode::deserialize(&bytes).unwrap();
  assert_eq!(decoded, hints);

  let key = CellKey::new(4, 1, 2, [-1, 0, 17]);
  let bytes = bincode::serialize(&key).unwrap();
  let decoded: CellKey = bincode::deserialize(&bytes).unwrap();
  assert_eq!(decoded, key);
}
