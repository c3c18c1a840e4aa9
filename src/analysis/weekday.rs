use chrono::{Datelike, NaiveDate, Weekday};

use crate::{
    analysis::{ChunkedScheduler, KernelError, select_trades},
    domain::{Period, TradeRecord},
    models::WeekdayStats,
    utils::safe_ratio,
};

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Day-of-week breakdown. Always returns seven rows, Monday first.
pub async fn weekday_stats(
    trades: &[TradeRecord],
    period: Period,
    reference_date: NaiveDate,
    scheduler: &ChunkedScheduler,
) -> Result<Vec<WeekdayStats>, KernelError> {
    let (_, selected) = select_trades(trades, period, reference_date)?;

    let mut rows: Vec<WeekdayStats> = WEEK
        .iter()
        .map(|&weekday| WeekdayStats {
            weekday,
            trades: 0,
            wins: 0,
            losses: 0,
            total_pnl: 0.0,
            win_rate: 0.0,
        })
        .collect();

    scheduler
        .for_each_batch(&selected, |chunk| {
            for trade in chunk {
                let row = &mut rows[trade.date.weekday().num_days_from_monday() as usize];
                row.trades += 1;
                row.total_pnl += trade.amount;
                if trade.is_win() {
                    row.wins += 1;
                } else if trade.is_loss() {
                    row.losses += 1;
                }
            }
            Ok(())
        })
        .await?;

    for row in &mut rows {
        row.win_rate = safe_ratio(row.wins, row.trades);
    }

    Ok(rows)
}
