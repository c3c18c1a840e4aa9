use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

/// Aggregate for one grouping value (a tag or a session name).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub name: String,
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub breakeven: usize,
    pub total_pnl: f64,
    pub average_pnl: f64,
    /// Fraction of trades that were wins (0.0 - 1.0)
    pub win_rate: f64,
}

pub type TagStats = GroupStats;
pub type SessionStats = GroupStats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekdayStats {
    pub weekday: Weekday,
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub total_pnl: f64,
    pub win_rate: f64,
}

/// Per-trading-day summary. Only days with at least one trade appear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub pnl: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRewardBucket {
    pub label: String,
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
    pub total_pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskRewardStats {
    /// Trades that carried a risk/reward value
    pub sample_size: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub buckets: Vec<RiskRewardBucket>,
}
