#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use volatile_cache::{CacheLoader, LoadError, LoadingCache, VolatileValue};

/// A test value: `None` is the placeholder.
#[derive(Debug, PartialEq, Eq)]
pub struct Payload {
  pub value: Option<u64>,
}

impl VolatileValue for Payload {
  fn is_valid(&self) -> bool {
    self.value.is_some()
  }
}

/// Shared record of what the loaders handed out by one probe did.
#[derive(Clone, Default)]
pub struct LoadProbe {
  loads: Arc<AtomicUsize>,
  order: Arc<Mutex<Vec<u64>>>,
}

impl LoadProbe {
  pub fn new() -> Self {
    Self::default()
  }

  /// Number of `load` calls that got past the delay.
  pub fn loads(&self) -> usize {
    self.loads.load(Ordering::SeqCst)
  }

  /// Values in the order their loads started.
  pub fn order(&self) -> Vec<u64> {
    self.order.lock().clone()
  }

  pub fn loader(&self, value: u64) -> TestLoader {
    TestLoader {
      value,
      delay: Duration::ZERO,
      outcome: Outcome::Succeed,
      probe: self.clone(),
    }
  }
}

enum Outcome {
  Succeed,
  Fail,
  Panic,
  CancelFirst(AtomicBool),
}

pub struct TestLoader {
  value: u64,
  delay: Duration,
  outcome: Outcome,
  probe: LoadProbe,
}

impl TestLoader {
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn failing(mut self) -> Self {
    self.outcome = Outcome::Fail;
    self
  }

  pub fn panicking(mut self) -> Self {
    self.outcome = Outcome::Panic;
    self
  }

  /// The first load is cancelled, later ones succeed.
  pub fn cancelled_once(mut self) -> Self {
    self.outcome = Outcome::CancelFirst(AtomicBool::new(true));
    self
  }
}

impl CacheLoader<Payload> for TestLoader {
  fn create_invalid(&self) -> Payload {
    Payload { value: None }
  }

  fn load(&self) -> Result<Payload, LoadError> {
    self.probe.order.lock().push(self.value);
    if !self.delay.is_zero() {
      thread::sleep(self.delay);
    }
    self.probe.loads.fetch_add(1, Ordering::SeqCst);
    match &self.outcome {
      Outcome::Succeed => Ok(Payload {
        value: Some(self.value),
      }),
      Outcome::Fail => Err(LoadError::failed(format!("no data for {}", self.value))),
      Outcome::Panic => panic!("loader for {} panicked", self.value),
      Outcome::CancelFirst(first) => {
        if first.swap(false, Ordering::SeqCst) {
          Err(LoadError::Cancelled)
        } else {
          Ok(Payload {
            value: Some(self.value),
          })
        }
      }
    }
  }
}

pub fn build_cache(lanes: usize, fetchers: usize) -> LoadingCache<u64, Payload> {
  LoadingCache::builder()
    .priority_lanes(lanes)
    .fetcher_threads(fetchers)
    .shards(4)
    .build()
    .unwrap()
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    thread::sleep(Duration::from_millis(1));
  }
  condition()
}
