//! Engine tuning: chunking, dispatch and cache expiry settings

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::constants;

/// Controls how kernels slice their iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Items processed per chunk before yielding (clamped to at least 1).
    pub chunk_size: usize,
    /// Stat kernels with fewer records than this skip chunking entirely.
    pub yield_threshold: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Use the auxiliary execution context at all.
    pub offload_enabled: bool,
    /// Run kernels in-process when the context is unavailable.
    pub local_fallback: bool,
    pub request_timeout_ms: u64,
    pub init_timeout_ms: u64,
    /// After this many context faults the context is not recreated again.
    pub max_context_faults: u32,
}

impl DispatcherSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub permanent_ttl_days: i64,
    pub future_ttl_hours: i64,
    pub sweep_interval_secs: u64,
}

impl CacheSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// The Master Engine Configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerSettings,
    pub dispatcher: DispatcherSettings,
    pub cache: CacheSettings,
}

pub const ENGINE: EngineConfig = EngineConfig {
    scheduler: constants::scheduler::DEFAULT,
    dispatcher: constants::dispatcher::DEFAULT,
    cache: constants::cache::DEFAULT,
};

impl Default for EngineConfig {
    fn default() -> Self {
        ENGINE
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        constants::scheduler::DEFAULT
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        constants::dispatcher::DEFAULT
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        constants::cache::DEFAULT
    }
}

impl EngineConfig {
    /// Loads a JSON override file. Missing sections fall back to `ENGINE`.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config: {}", path.display()))?;
        let config: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse engine config: {}", path.display()))?;
        Ok(config)
    }
}
