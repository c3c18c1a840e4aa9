//! Configuration module for the journal engine.

mod debug;
mod engine;
mod persistence;

// Public
pub mod constants;

// Re-export commonly used items
pub use debug::DF;
pub use engine::{CacheSettings, DispatcherSettings, ENGINE, EngineConfig, SchedulerSettings};
pub use persistence::{PERSISTENCE, cache_record_key};
