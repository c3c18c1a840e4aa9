//! Daily equity-curve aggregation.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::{
    analysis::{ChunkedScheduler, KernelError, select_trades},
    domain::{Period, TradeRecord},
    models::{ChartPoint, Direction},
    trace_time,
    utils::TimeUtils,
};

#[cfg(debug_assertions)]
use crate::config::DF;

/// Builds one [`ChartPoint`] per calendar day of the resolved period.
///
/// Days are walked in chunks; the running total is carried across chunk boundaries so
/// `cumulative[n] == cumulative[n - 1] + pnl[n]` holds exactly for any chunk size.
pub async fn chart_points(
    trades: &[TradeRecord],
    period: Period,
    reference_date: NaiveDate,
    scheduler: &ChunkedScheduler,
) -> Result<Vec<ChartPoint>, KernelError> {
    // 1. Resolve bounds and filter
    let (range, selected) = select_trades(trades, period, reference_date)?;

    // 2. Bucket by day, keeping input order inside each day
    let mut by_day: BTreeMap<NaiveDate, Vec<&TradeRecord>> = BTreeMap::new();
    for trade in &selected {
        by_day.entry(trade.date).or_default().push(trade);
    }

    // 3. Every day in the range gets a point, traded or not
    let days = TimeUtils::days_in_range(range.start, range.end);

    #[cfg(debug_assertions)]
    if DF.log_scheduler {
        log::debug!(
            "chart_points(): {} days, {} trades in {}",
            days.len(),
            selected.len(),
            range
        );
    }

    // 4. Walk the days in chunks
    let mut points = Vec::with_capacity(days.len());
    let mut running = 0.0;

    scheduler
        .for_each_chunk(&days, |chunk| {
            trace_time!("chart chunk", 2000, {
                for day in chunk {
                    let day_trades = by_day.get(day).map(Vec::as_slice).unwrap_or(&[]);
                    let pnl = day_trades.iter().fold(0.0, |acc, t| acc + t.amount);
                    running += pnl;
                    points.push(ChartPoint {
                        label: TimeUtils::chart_label(*day),
                        pnl,
                        cumulative: running,
                        direction: Direction::from_pnl(pnl),
                        trades: day_trades.iter().map(|t| (*t).clone()).collect(),
                        date: *day,
                    });
                }
            });
            Ok(())
        })
        .await?;

    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SchedulerSettings, domain::TradeType};
    use proptest::prelude::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn scheduler(chunk_size: usize) -> ChunkedScheduler {
        ChunkedScheduler::new(SchedulerSettings {
            chunk_size,
            yield_threshold: 0,
        })
    }

    fn run<T>(fut: impl std::future::Future<Output = T>) -> T {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[tokio::test]
    async fn june_month_has_a_point_per_day() {
        let trades = vec![
            TradeRecord::new(d(2024, 6, 1), 100.0, TradeType::Win),
            TradeRecord::new(d(2024, 6, 3), -40.0, TradeType::Loss),
        ];
        let points = chart_points(&trades, Period::Month, d(2024, 6, 15), &scheduler(100))
            .await
            .unwrap();

        assert_eq!(points.len(), 30);
        assert_eq!(points[0].label, "Jun 1");
        assert_eq!(points[0].pnl, 100.0);
        assert_eq!(points[0].cumulative, 100.0);
        assert!(points[0].is_increasing());
        assert!(points[1].is_flat());
        assert_eq!(points[1].cumulative, 100.0);
        assert_eq!(points[2].pnl, -40.0);
        assert_eq!(points[2].cumulative, 60.0);
        assert!(points[2].is_decreasing());
        assert_eq!(points[2].trades.len(), 1);
        assert_eq!(points[29].cumulative, 60.0);
    }

    #[tokio::test]
    async fn all_period_without_trades_is_a_single_day() {
        let points = chart_points(&[], Period::All, d(2024, 6, 15), &scheduler(10))
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].date, d(2024, 6, 15));
        assert_eq!(points[0].cumulative, 0.0);
    }

    #[tokio::test]
    async fn year_spans_leap_year() {
        let points = chart_points(&[], Period::Year, d(2024, 3, 1), &scheduler(100))
            .await
            .unwrap();
        assert_eq!(points.len(), 366);
    }

    fn trade_strategy() -> impl Strategy<Value = TradeRecord> {
        (1u32..=30, -1_000i32..1_000).prop_map(|(day, cents)| {
            let amount = cents as f64 / 7.0;
            let kind = if amount > 0.0 {
                TradeType::Win
            } else if amount < 0.0 {
                TradeType::Loss
            } else {
                TradeType::BreakEven
            };
            TradeRecord::new(NaiveDate::from_ymd_opt(2024, 6, day).unwrap(), amount, kind)
        })
    }

    proptest! {
        #[test]
        fn cumulative_is_a_running_sum(trades in prop::collection::vec(trade_strategy(), 0..60)) {
            let points = run(chart_points(&trades, Period::Month, d(2024, 6, 1), &scheduler(7))).unwrap();
            prop_assert_eq!(points[0].cumulative, points[0].pnl);
            for pair in points.windows(2) {
                prop_assert_eq!(pair[1].cumulative, pair[0].cumulative + pair[1].pnl);
            }
        }

        #[test]
        fn output_ignores_chunk_size(
            trades in prop::collection::vec(trade_strategy(), 0..60),
            chunk in 1usize..40,
        ) {
            let chunked = run(chart_points(&trades, Period::Month, d(2024, 6, 1), &scheduler(chunk))).unwrap();
            let whole = run(chart_points(&trades, Period::Month, d(2024, 6, 1), &scheduler(1000))).unwrap();
            prop_assert_eq!(chunked, whole);
        }
    }
}
