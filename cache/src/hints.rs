#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How a lookup treats an entry whose value is not yet valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LoadingStrategy {
  /// Enqueue the key for the fetchers (once per frame) and return immediately.
  Async,
  /// Load on the calling thread, or wait for the in-flight load, until the
  /// value is valid. Cancelled loads are retried.
  Blocking,
  /// Wait for the value for at most the calling context's remaining I/O time
  /// budget, falling back to `Async` behaviour when the budget is spent.
  Budgeted,
  /// Do nothing; hand back whatever value is currently stored.
  Skip,
}

/// Per-request loading hints.
///
/// Hints are plain data and cheap to copy, compare and hash, so callers can
/// keep a few prebuilt instances around (one per mipmap level, for example).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CacheHints {
  pub loading_strategy: LoadingStrategy,
  /// Fetch queue lane; 0 is the most urgent.
  pub queue_priority: usize,
  /// Insert at the front of the lane (most recent first) instead of the back.
  pub enqueue_to_front: bool,
}

impl CacheHints {
  pub const fn new(loading_strategy: LoadingStrategy, queue_priority: usize, enqueue_to_front: bool) -> Self {
    Self {
      loading_strategy,
      queue_priority,
      enqueue_to_front,
    }
  }

  pub const fn with_strategy(self, loading_strategy: LoadingStrategy) -> Self {
    Self {
      loading_strategy,
      ..self
    }
  }
}

impl Default for CacheHints {
  fn default() -> Self {
    Self::new(LoadingStrategy::Async, 0, true)
  }
}
