mod chart_point;
mod stats;

pub use chart_point::{ChartPoint, Direction};
pub use stats::{
    DailySummary, GroupStats, RiskRewardBucket, RiskRewardStats, SessionStats, TagStats,
    WeekdayStats,
};
