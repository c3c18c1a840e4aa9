// Compute kernels and the chunked scheduler that drives them
mod chart;
mod daily;
mod error;
mod event_days;
mod filter;
mod group_stats;
mod risk_reward;
mod scheduler;
mod weekday;

pub use chart::chart_points;
pub use daily::daily_summary;
pub use error::KernelError;
pub use event_days::event_days;
pub use filter::{select_trades, validate_trades};
pub use group_stats::{UNASSIGNED_SESSION, session_stats, tag_stats};
pub use risk_reward::risk_reward;
pub use scheduler::{CancelToken, ChunkedScheduler};
pub use weekday::weekday_stats;
