// Domain types and value objects
mod market_event;
mod period;
mod tier;
mod trade;

// Re-export commonly used types to the world
pub use market_event::{Impact, MarketEvent};
pub use period::{Period, QueryPeriod, period_bounds};
pub use tier::{Tier, TierAssignment, classify, classify_with};
pub use trade::{TradeRecord, TradeType};
