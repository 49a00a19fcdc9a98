//! Background work of the cache: the fetcher threads that drain the
//! priority queue.

pub(crate) mod fetcher;
