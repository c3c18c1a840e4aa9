//! Debugging feature flags.

#[allow(dead_code)]
pub struct LogFlags {
    /// Activate trace_time macro (for cool scope-level timing)
    pub log_performance: bool,

    /// Context lifecycle: spawn, ready, fault, shutdown.
    pub log_dispatcher: bool,

    /// Every request/response frame crossing the worker boundary.
    pub log_frames: bool,

    /// Chunk boundaries inside kernels.
    pub log_scheduler: bool,

    /// Cache hits, misses, tier assignments and sweeps.
    pub log_cache: bool,

    pub log_store: bool,
}

pub const DF: LogFlags = LogFlags {
    log_dispatcher: true,
    log_cache: true,

    log_frames: false,
    log_scheduler: false,
    log_store: false,
    log_performance: false,
};
