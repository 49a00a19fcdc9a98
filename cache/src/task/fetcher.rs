use crate::error::BuildError;
use crate::queue::PriorityFetchQueue;
use crate::shared::CacheShared;
use crate::value::VolatileValue;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Upper bound for one sleep while the fetchers are paused, so a closed
/// queue is noticed promptly.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The background threads that drain the fetch queue.
pub(crate) struct FetcherPool {
  handles: Vec<JoinHandle<()>>,
}

impl fmt::Debug for FetcherPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FetcherPool")
      .field("threads", &self.handles.len())
      .finish()
  }
}

impl FetcherPool {
  /// Spawns `count` fetcher threads. Zero is allowed, in which case only
  /// blocking and budgeted lookups ever load anything.
  pub(crate) fn spawn<K, V, H>(shared: &Arc<CacheShared<K, V, H>>, count: usize) -> Result<Self, BuildError>
  where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: VolatileValue + 'static,
    H: BuildHasher + Clone + Send + Sync + 'static,
  {
    let mut pool = Self {
      handles: Vec::with_capacity(count),
    };

    for i in 0..count {
      let context = shared.clone();
      let spawned = thread::Builder::new()
        .name(format!("volatile-fetcher-{i}"))
        .spawn(move || Self::run(&context));

      match spawned {
        Ok(handle) => pool.handles.push(handle),
        Err(err) => {
          pool.shutdown(&shared.queue);
          return Err(BuildError::SpawnFailed(err.to_string()));
        }
      }
    }

    tracing::debug!(threads = count, "fetcher pool started");
    Ok(pool)
  }

  /// The worker loop. Ends once the queue is closed.
  fn run<K, V, H>(shared: &CacheShared<K, V, H>)
  where
    K: Eq + Hash + Clone + fmt::Debug,
    V: VolatileValue,
    H: BuildHasher + Clone,
  {
    loop {
      Self::wait_out_pause(shared);
      let Some(key) = shared.queue.take_blocking() else {
        break;
      };
      // The pause may have started while this thread was blocked.
      Self::wait_out_pause(shared);
      shared.fetch(key);
    }
    tracing::trace!("fetcher thread exiting");
  }

  fn wait_out_pause<K: Clone, V, H>(shared: &CacheShared<K, V, H>) {
    while let Some(deadline) = shared.pause_deadline() {
      if shared.queue.is_closed() {
        return;
      }
      let remaining = deadline.saturating_duration_since(Instant::now());
      thread::sleep(remaining.min(PAUSE_POLL_INTERVAL));
    }
  }

  #[inline]
  pub(crate) fn len(&self) -> usize {
    self.handles.len()
  }

  /// Closes the queue and joins every worker.
  ///
  /// A worker that ends up dropping the last cache handle runs this on itself;
  /// that thread is detached instead of joined.
  pub(crate) fn shutdown<K>(&mut self, queue: &PriorityFetchQueue<K>) {
    queue.close();
    let current = thread::current().id();
    for handle in self.handles.drain(..) {
      if handle.thread().id() == current {
        continue;
      }
      if handle.join().is_err() {
        tracing::warn!("fetcher thread terminated with a panic");
      }
    }
  }
}
