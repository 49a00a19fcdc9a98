use thiserror::Error;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// The fetch queue needs at least one priority lane.
  #[error("priority lane count cannot be zero")]
  ZeroPriorityLanes,
  /// The retention map was configured with zero shards.
  #[error("shard count cannot be zero")]
  ZeroShards,
  /// A shared timing registry tracks fewer lanes than the cache uses.
  #[error("timing registry tracks {registry} lanes but the cache uses {lanes}")]
  TimingLanes { registry: usize, lanes: usize },
  /// A worker thread could not be spawned.
  #[error("failed to spawn fetcher thread: {0}")]
  SpawnFailed(String),
}

/// The outcome of a failed `CacheLoader::load` call.
///
/// `Cancelled` is not a failure in the usual sense: it means "try again
/// later" and leaves the entry invalid and retryable.
#[derive(Debug, Error)]
pub enum LoadError {
  /// The load was interrupted by a cooperative cancellation signal.
  #[error("load was cancelled")]
  Cancelled,
  /// The loader returned a value that reports itself as invalid.
  #[error("loader produced a value that is not valid")]
  Invalid,
  /// The underlying source failed (I/O error, malformed block, ...).
  #[error("load failed: {0}")]
  Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl LoadError {
  /// Wraps any error type as a `LoadError::Failed`.
  pub fn failed<E>(error: E) -> Self
  where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
  {
    LoadError::Failed(error.into())
  }

  #[inline]
  pub fn is_cancelled(&self) -> bool {
    matches!(self, LoadError::Cancelled)
  }
}

/// Errors returned by `LoadingCache` lookups.
#[derive(Debug, Error)]
pub enum CacheError {
  /// The requested queue priority does not name one of the configured lanes.
  #[error("queue priority {priority} is out of range for {lanes} priority lanes")]
  InvalidPriority { priority: usize, lanes: usize },
  /// A synchronous (blocking) load attempt failed.
  #[error(transparent)]
  Load(#[from] LoadError),
}

/// Errors a `BlockReader` may report for a single block.
#[derive(Debug, Error)]
pub enum BlockError {
  /// The block does not exist in the source. This is legitimate, not an error
  /// of the storage layer.
  #[error("block does not exist")]
  Missing,
  #[error("i/o error while reading block: {0}")]
  Io(#[from] std::io::Error),
  #[error("malformed block: {0}")]
  Malformed(String),
}
