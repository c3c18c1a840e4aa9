mod cache_store;
mod provider;
mod snapshot_io;
mod storage;
mod tiered_cache;

pub use {
    cache_store::{CacheStore, MemoryStore},
    provider::{EventSource, JsonFileSource, TradeSource},
    snapshot_io::SnapshotStore,
    storage::SqliteStore,
    tiered_cache::{
        CacheEntry, CacheError, CacheKey, CacheMeta, Cached, EntryState, Lookup, Resolution,
        SweepReport, TieredCache,
    },
};
