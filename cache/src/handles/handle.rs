use crate::entry::Entry;
use crate::value::VolatileValue;

use std::fmt;
use std::sync::Arc;

/// A strong reference to a cached entry, returned by lookups.
///
/// While a handle exists its entry stays in the cache, even if it is still
/// only a placeholder. Once the entry is loaded, [`value`](Self::value)
/// returns the loaded value; every handle of the same entry sees the same
/// `Arc`.
pub struct CacheHandle<K: Clone, V> {
  entry: Arc<Entry<K, V>>,
}

impl<K: Clone, V: VolatileValue> CacheHandle<K, V> {
  pub(crate) fn new(entry: Arc<Entry<K, V>>) -> Self {
    Self { entry }
  }

  #[inline]
  pub fn key(&self) -> &K {
    self.entry.key()
  }

  /// The current value: the placeholder until a load has succeeded.
  #[inline]
  pub fn value(&self) -> Arc<V> {
    self.entry.value()
  }

  /// Whether the entry holds a loaded value. Never goes back to `false`.
  #[inline]
  pub fn is_valid(&self) -> bool {
    self.entry.is_valid()
  }

  /// Whether both handles refer to the same entry.
  pub fn ptr_eq(a: &Self, b: &Self) -> bool {
    Arc::ptr_eq(&a.entry, &b.entry)
  }
}

impl<K: Clone, V> Clone for CacheHandle<K, V> {
  fn clone(&self) -> Self {
    Self {
      entry: self.entry.clone(),
    }
  }
}

impl<K: Clone + fmt::Debug, V> fmt::Debug for CacheHandle<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheHandle")
      .field("key", self.entry.key())
      .field("entry", &self.entry)
      .finish()
  }
}
