//! A concurrent loading cache for volatile values: entries start out as cheap,
//! invalid placeholders and are filled in by background fetcher threads.
//!
//! # Features
//! - **Four loading strategies**: per-request `Async`, `Blocking`, `Budgeted`
//!   and `Skip` behaviour, chosen with [`CacheHints`].
//! - **Single-flight loads**: at most one load per key is in flight; every
//!   caller observes the same loaded value.
//! - **Priority lanes**: fetchers drain urgent lanes first, and a key is queued
//!   at most once per frame.
//! - **Frame-bounded stalls**: `Budgeted` lookups wait no longer than the
//!   calling consumer's per-lane I/O time budget.
//! - **Two-tier retention**: placeholders live only as long as a handle does;
//!   loaded values stay in a weight-bounded LRU tier.
//! - **Observability**: Exposes detailed metrics and per-consumer I/O figures.

// Public modules that form the API
pub mod block;
pub mod budget;
pub mod builder;
pub mod error;
pub mod handles;
pub mod hints;
pub mod metrics;
pub mod timing;
pub mod value;

// Internal, crate-only modules
mod entry;
mod queue;
mod retention;
mod shared;
mod soft;
mod task;
mod time;

// Re-export the primary user-facing types for convenience
pub use block::{BlockGrid, BlockLoader, BlockReader, CellKey, VolatileArray};
pub use budget::IoTimeBudget;
pub use builder::LoadingCacheBuilder;
pub use error::{BlockError, BuildError, CacheError, LoadError};
pub use handles::{CacheHandle, LoadingCache};
pub use hints::{CacheHints, LoadingStrategy};
pub use metrics::MetricsSnapshot;
pub use timing::{IoGroup, IoGroupGuard, IoStatistics, IoTimingRegistry};
pub use value::{CacheLoader, LoaderFn, VolatileValue};
