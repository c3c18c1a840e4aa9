#![allow(clippy::collapsible_if)]
#![allow(clippy::too_many_arguments)]

// Core modules
pub mod analysis;
pub mod config;
pub mod data;
pub mod domain;
pub mod engine;
pub mod models;
pub mod utils;

// Re-export commonly used types outside of crate
pub use analysis::{CancelToken, ChunkedScheduler, KernelError};
pub use config::{ENGINE, EngineConfig, PERSISTENCE};
pub use data::{CacheError, CacheKey, CacheStore, Cached, MemoryStore, TieredCache};
pub use domain::{Impact, MarketEvent, Period, QueryPeriod, Tier, TradeRecord, TradeType};
pub use engine::{
    ComputeEngine, ComputeJob, ComputeOutput, DispatchError, EventQuery, TaskDispatcher,
    TradeQuery,
};

// CLI argument parsing
use {
    chrono::NaiveDate,
    clap::{Args, Parser, Subcommand},
    std::path::PathBuf,
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON file overriding the built-in engine configuration
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Run kernels in-process instead of on the worker thread
    #[arg(long, default_value_t = false)]
    pub local: bool,

    /// SQLite file to cache results in
    #[arg(long, conflicts_with = "snapshot", num_args = 0..=1, default_missing_value = PERSISTENCE.cache.sqlite_path)]
    pub cache: Option<PathBuf>,

    /// Bincode snapshot file to cache results in
    #[arg(long, num_args = 0..=1, default_missing_value = PERSISTENCE.cache.snapshot_path)]
    pub snapshot: Option<PathBuf>,

    /// Identity cached results are filed under
    #[arg(long, default_value = "default")]
    pub identity: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Daily pnl and cumulative equity
    Chart(TradeArgs),
    /// Breakdown by tag
    Tags(TradeArgs),
    /// Breakdown by trading session
    Sessions(TradeArgs),
    /// Breakdown by day of week
    Weekdays(TradeArgs),
    /// One row per traded day
    Daily(TradeArgs),
    /// Risk/reward distribution
    RiskReward(TradeArgs),
    /// Days holding a market event of at least the given impact
    Events(EventArgs),
    /// Remove expired entries from the cache
    Sweep,
}

#[derive(Args, Debug, Clone)]
pub struct TradeArgs {
    /// JSON array of trades
    pub trades: PathBuf,

    #[arg(long, default_value_t = Period::Month)]
    pub period: Period,

    /// Date the period is anchored on (defaults to today)
    #[arg(long)]
    pub reference: Option<NaiveDate>,
}

#[derive(Args, Debug, Clone)]
pub struct EventArgs {
    /// JSON array of market events
    pub events: PathBuf,

    #[arg(long)]
    pub start: NaiveDate,

    #[arg(long)]
    pub end: NaiveDate,

    #[arg(long, default_value_t = Impact::Medium)]
    pub min_impact: Impact,
}
