use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::{domain::TradeRecord, utils::TimeUtils};

/// Granularity a dashboard query is scoped to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Period {
    #[default]
    Month,
    Year,
    All,
}

/// Resolves the inclusive calendar bounds for `period`.
///
/// `month` and `year` are anchored on `reference`. `all` spans the earliest to latest
/// trade date, collapsing to `reference` on both ends when there are no trades so the
/// result never depends on the wall clock.
pub fn period_bounds(
    trades: &[TradeRecord],
    period: Period,
    reference: NaiveDate,
) -> (NaiveDate, NaiveDate) {
    match period {
        Period::Month => TimeUtils::month_bounds(reference),
        Period::Year => TimeUtils::year_bounds(reference),
        Period::All => {
            let min = trades.iter().map(|t| t.date).min();
            let max = trades.iter().map(|t| t.date).max();
            match (min, max) {
                (Some(start), Some(end)) => (start, end),
                _ => (reference, reference),
            }
        }
    }
}

/// A concrete inclusive date range that a cached query covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl QueryPeriod {
    /// Builds a period, swapping the ends if they arrive reversed.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self::new(date, date)
    }

    pub fn week_of(date: NaiveDate) -> Self {
        let (start, end) = TimeUtils::week_bounds(date);
        Self::new(start, end)
    }

    pub fn month_of(date: NaiveDate) -> Self {
        let (start, end) = TimeUtils::month_bounds(date);
        Self::new(start, end)
    }

    pub fn year_of(date: NaiveDate) -> Self {
        let (start, end) = TimeUtils::year_bounds(date);
        Self::new(start, end)
    }

    /// The range a trade query resolves to.
    pub fn for_trades(trades: &[TradeRecord], period: Period, reference: NaiveDate) -> Self {
        let (start, end) = period_bounds(trades, period, reference);
        Self::new(start, end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for QueryPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format(TimeUtils::STANDARD_TIME_FORMAT),
            self.end.format(TimeUtils::STANDARD_TIME_FORMAT)
        )
    }
}
