//! Market data cache.
//!
//! Normalises adapter snapshots and stream ticks into per-symbol entries
//! keyed by a fingerprint (symbol + kind), each carrying the time it was
//! written so readers can refuse stale data. Snapshots handed out are
//! immutable clones; the cache itself is the only mutable store.

mod cache;

pub use cache::{CacheStats, MarketDataCache};
