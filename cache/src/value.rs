use crate::error::LoadError;

use std::fmt;

/// A value that may be a cheap placeholder or fully loaded data.
///
/// Once `is_valid` returns `true` for a value instance it must keep doing so.
/// The cache never replaces a valid value.
pub trait VolatileValue: Send + Sync + 'static {
  /// Whether this value holds real, loaded data.
  fn is_valid(&self) -> bool;

  /// The cost this value contributes to the soft tier once it is loaded.
  ///
  /// Defaults to `1`, so the soft capacity becomes an entry count.
  fn weight(&self) -> u64 {
    1
  }
}

/// Produces the values for exactly one key.
///
/// A loader is handed to the cache on every `get` and is kept by the entry it
/// creates. `create_invalid` must be fast and free of I/O. `load` performs the
/// real fetch and may block for a long time.
pub trait CacheLoader<V>: Send + Sync + 'static {
  /// Returns a placeholder that reports `is_valid() == false`.
  fn create_invalid(&self) -> V;

  /// Loads the real value. Returning `LoadError::Cancelled` leaves the entry
  /// untouched and retryable.
  fn load(&self) -> Result<V, LoadError>;
}

/// A `CacheLoader` assembled from two closures.
pub struct LoaderFn<I, L> {
  invalid: I,
  load: L,
}

impl<I, L> LoaderFn<I, L> {
  pub fn new(invalid: I, load: L) -> Self {
    Self { invalid, load }
  }
}

impl<I, L> fmt::Debug for LoaderFn<I, L> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoaderFn").finish_non_exhaustive()
  }
}

impl<V, I, L> CacheLoader<V> for LoaderFn<I, L>
where
  I: Fn() -> V + Send + Sync + 'static,
  L: Fn() -> Result<V, LoadError> + Send + Sync + 'static,
{
  #[inline]
  fn create_invalid(&self) -> V {
    (self.invalid)()
  }

  fn load(&self) -> Result<V, LoadError> {
    (self.load)()
  }
}
