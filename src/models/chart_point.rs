use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::domain::TradeRecord;

/// Direction of a day's move, derived from the sign of its pnl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Increasing,
    Decreasing,
    Flat,
}

impl Direction {
    pub fn from_pnl(pnl: f64) -> Self {
        if pnl > 0.0 {
            Direction::Increasing
        } else if pnl < 0.0 {
            Direction::Decreasing
        } else {
            Direction::Flat
        }
    }
}

/// One day on the equity chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    /// Axis label, e.g. "Jun 1"
    pub label: String,
    /// Net pnl of this day alone
    pub pnl: f64,
    /// Running total up to and including this day
    pub cumulative: f64,
    pub direction: Direction,
    /// Trades that closed on this day, in input order
    pub trades: Vec<TradeRecord>,
    pub date: NaiveDate,
}

impl ChartPoint {
    pub fn is_increasing(&self) -> bool {
        self.direction == Direction::Increasing
    }

    pub fn is_decreasing(&self) -> bool {
        self.direction == Direction::Decreasing
    }

    pub fn is_flat(&self) -> bool {
        self.direction == Direction::Flat
    }
}
