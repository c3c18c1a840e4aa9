use std::time::Duration;

pub mod scheduler {
    use crate::config::SchedulerSettings;

    /// Days (or records) processed between two yields.
    pub const CHUNK_SIZE: usize = 100;
    /// Stat kernels below this many records run in one pass.
    pub const YIELD_THRESHOLD: usize = 500;

    pub const DEFAULT: SchedulerSettings = SchedulerSettings {
        chunk_size: CHUNK_SIZE,
        yield_threshold: YIELD_THRESHOLD,
    };
}

pub mod dispatcher {
    use crate::config::DispatcherSettings;

    pub const REQUEST_TIMEOUT_MS: u64 = 30_000;
    pub const INIT_TIMEOUT_MS: u64 = 5_000;
    pub const MAX_CONTEXT_FAULTS: u32 = 3;

    pub const DEFAULT: DispatcherSettings = DispatcherSettings {
        offload_enabled: true,
        local_fallback: true,
        request_timeout_ms: REQUEST_TIMEOUT_MS,
        init_timeout_ms: INIT_TIMEOUT_MS,
        max_context_faults: MAX_CONTEXT_FAULTS,
    };
}

pub mod cache {
    use crate::config::CacheSettings;

    /// Past-tier entries are written with this lifetime, i.e. effectively never expire.
    pub const PERMANENT_TTL_DAYS: i64 = 3650;
    pub const FUTURE_TTL_HOURS: i64 = 24;
    pub const SWEEP_INTERVAL_SECS: u64 = 15 * 60;

    pub const DEFAULT: CacheSettings = CacheSettings {
        permanent_ttl_days: PERMANENT_TTL_DAYS,
        future_ttl_hours: FUTURE_TTL_HOURS,
        sweep_interval_secs: SWEEP_INTERVAL_SECS,
    };
}

/// How long the CLI waits for a graceful worker shutdown before giving up.
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
