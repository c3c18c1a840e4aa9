//! Tag and session breakdowns. Both are the same reduction keyed by a different
//! grouping value, so they share [`GroupAccumulator`].

use std::collections::BTreeMap;

use chrono::NaiveDate;
use itertools::Itertools;

use crate::{
    analysis::{ChunkedScheduler, KernelError, select_trades},
    domain::{Period, TradeRecord, TradeType},
    models::{GroupStats, SessionStats, TagStats},
    utils::{mean_of, safe_ratio},
};

/// Label for trades recorded without a session.
pub const UNASSIGNED_SESSION: &str = "Unassigned";

#[derive(Debug, Default, Clone)]
struct Tally {
    trades: usize,
    wins: usize,
    losses: usize,
    breakeven: usize,
    total_pnl: f64,
}

impl Tally {
    fn add(&mut self, trade: &TradeRecord) {
        self.trades += 1;
        self.total_pnl += trade.amount;
        match trade.trade_type {
            TradeType::Win => self.wins += 1,
            TradeType::Loss => self.losses += 1,
            TradeType::BreakEven => self.breakeven += 1,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct GroupAccumulator {
    groups: BTreeMap<String, Tally>,
}

impl GroupAccumulator {
    pub(crate) fn add(&mut self, name: &str, trade: &TradeRecord) {
        self.groups.entry(name.to_string()).or_default().add(trade);
    }

    /// Rows ordered by total pnl (highest first), ties broken by name.
    pub(crate) fn finish(self) -> Vec<GroupStats> {
        self.groups
            .into_iter()
            .map(|(name, t)| GroupStats {
                name,
                trades: t.trades,
                wins: t.wins,
                losses: t.losses,
                breakeven: t.breakeven,
                total_pnl: t.total_pnl,
                average_pnl: mean_of(t.total_pnl, t.trades),
                win_rate: safe_ratio(t.wins, t.trades),
            })
            .sorted_by(|a, b| {
                b.total_pnl
                    .total_cmp(&a.total_pnl)
                    .then_with(|| a.name.cmp(&b.name))
            })
            .collect()
    }
}

/// Per-tag aggregates. A trade counts once for each distinct non-empty tag it carries.
pub async fn tag_stats(
    trades: &[TradeRecord],
    period: Period,
    reference_date: NaiveDate,
    scheduler: &ChunkedScheduler,
) -> Result<Vec<TagStats>, KernelError> {
    let (_, selected) = select_trades(trades, period, reference_date)?;
    let mut acc = GroupAccumulator::default();

    scheduler
        .for_each_batch(&selected, |chunk| {
            for trade in chunk {
                for tag in trade
                    .tags
                    .iter()
                    .map(|t| t.trim())
                    .filter(|t| !t.is_empty())
                    .unique()
                {
                    acc.add(tag, trade);
                }
            }
            Ok(())
        })
        .await?;

    Ok(acc.finish())
}

/// Per-session aggregates. Missing or blank sessions are grouped as [`UNASSIGNED_SESSION`].
pub async fn session_stats(
    trades: &[TradeRecord],
    period: Period,
    reference_date: NaiveDate,
    scheduler: &ChunkedScheduler,
) -> Result<Vec<SessionStats>, KernelError> {
    let (_, selected) = select_trades(trades, period, reference_date)?;
    let mut acc = GroupAccumulator::default();

    scheduler
        .for_each_batch(&selected, |chunk| {
            for trade in chunk {
                let session = trade
                    .session
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(UNASSIGNED_SESSION);
                acc.add(session, trade);
            }
            Ok(())
        })
        .await?;

    Ok(acc.finish())
}
