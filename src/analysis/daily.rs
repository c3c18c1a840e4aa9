use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::{
    analysis::{ChunkedScheduler, KernelError, select_trades},
    domain::{Period, TradeRecord},
    models::DailySummary,
};

/// One summary per day that has at least one trade, oldest first.
pub async fn daily_summary(
    trades: &[TradeRecord],
    period: Period,
    reference_date: NaiveDate,
    scheduler: &ChunkedScheduler,
) -> Result<Vec<DailySummary>, KernelError> {
    let (_, selected) = select_trades(trades, period, reference_date)?;
    let mut days: BTreeMap<NaiveDate, DailySummary> = BTreeMap::new();

    scheduler
        .for_each_batch(&selected, |chunk| {
            for trade in chunk {
                let day = days.entry(trade.date).or_insert_with(|| DailySummary {
                    date: trade.date,
                    trades: 0,
                    wins: 0,
                    losses: 0,
                    pnl: 0.0,
                    best_trade: trade.amount,
                    worst_trade: trade.amount,
                });
                day.trades += 1;
                day.pnl += trade.amount;
                day.best_trade = day.best_trade.max(trade.amount);
                day.worst_trade = day.worst_trade.min(trade.amount);
                if trade.is_win() {
                    day.wins += 1;
                } else if trade.is_loss() {
                    day.losses += 1;
                }
            }
            Ok(())
        })
        .await?;

    Ok(days.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SchedulerSettings, domain::TradeType};

    #[tokio::test]
    async fn only_traded_days_with_extremes() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 6, day).unwrap();
        let trades = vec![
            TradeRecord::new(d(5), 30.0, TradeType::Win),
            TradeRecord::new(d(2), -10.0, TradeType::Loss),
            TradeRecord::new(d(5), -12.5, TradeType::Loss),
            TradeRecord::new(d(5), 80.0, TradeType::Win),
        ];
        let scheduler = ChunkedScheduler::new(SchedulerSettings {
            chunk_size: 1,
            yield_threshold: 0,
        });
        let summary = daily_summary(&trades, Period::Month, d(1), &scheduler).await.unwrap();

        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].date, d(2));
        assert_eq!(summary[0].best_trade, -10.0);
        assert_eq!(summary[1].trades, 3);
        assert_eq!(summary[1].wins, 2);
        assert_eq!(summary[1].pnl, 97.5);
        assert_eq!(summary[1].best_trade, 80.0);
        assert_eq!(summary[1].worst_trade, -12.5);
    }
}
