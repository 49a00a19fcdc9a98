mod handle;
mod sync;

pub use handle::CacheHandle;
pub use sync::LoadingCache;
