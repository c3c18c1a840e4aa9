//! Cache persistence configuration

/// Record layout for the tiered cache inside any key-value store.
pub struct CachePersistenceConfig {
    /// Namespace prefix shared by every cache record
    pub key_prefix: &'static str,
    pub value_suffix: &'static str,
    pub expiry_suffix: &'static str,
    pub meta_suffix: &'static str,
    /// Default SQLite file used by the CLI
    pub sqlite_path: &'static str,
    /// Default bincode snapshot file
    pub snapshot_path: &'static str,
}

/// The Master Persistence Configuration
pub struct PersistenceConfig {
    pub cache: CachePersistenceConfig,
}

pub const PERSISTENCE: PersistenceConfig = PersistenceConfig {
    cache: CachePersistenceConfig {
        key_prefix: "jc:",
        value_suffix: ".value",
        expiry_suffix: ".expiry",
        meta_suffix: ".meta",
        sqlite_path: "journal_cache.sqlite",
        snapshot_path: "journal_cache.bin",
    },
};

/// Full record key for one part of a cache entry.
/// Example: "jc:2024-06-01..2024-06-30|acct-1|9b1d...e2.meta"
pub fn cache_record_key(composite: &str, suffix: &str) -> String {
    format!("{}{}{}", PERSISTENCE.cache.key_prefix, composite, suffix)
}
