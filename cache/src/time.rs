use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

// The single reference point for deadlines shared between threads as plain
// integers. It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Converts an `Instant` into nanoseconds since the cache's epoch.
#[inline]
pub(crate) fn instant_to_nanos(instant: Instant) -> u64 {
  instant.saturating_duration_since(*CACHE_EPOCH).as_nanos() as u64
}

/// Converts nanoseconds since the epoch back into an `Instant`.
#[inline]
pub(crate) fn nanos_to_instant(nanos: u64) -> Instant {
  *CACHE_EPOCH + Duration::from_nanos(nanos)
}

/// The current time as nanoseconds since the epoch.
#[inline]
pub(crate) fn now_nanos() -> u64 {
  instant_to_nanos(Instant::now())
}
