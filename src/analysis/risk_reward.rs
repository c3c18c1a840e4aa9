//! Risk/reward distribution of the trades that recorded one.

use chrono::NaiveDate;
use statrs::statistics::{Data, Median, Statistics};

use crate::{
    analysis::{ChunkedScheduler, KernelError, select_trades},
    domain::{Period, TradeRecord},
    models::{RiskRewardBucket, RiskRewardStats},
    utils::safe_ratio,
};

/// Bucket labels and their upper bounds (exclusive). The last bucket is open-ended.
const BUCKETS: [(&str, f64); 4] = [
    ("<1", 1.0),
    ("1-2", 2.0),
    ("2-3", 3.0),
    ("3+", f64::INFINITY),
];

fn bucket_index(rr: f64) -> usize {
    BUCKETS
        .iter()
        .position(|(_, upper)| rr < *upper)
        .unwrap_or(BUCKETS.len() - 1)
}

pub async fn risk_reward(
    trades: &[TradeRecord],
    period: Period,
    reference_date: NaiveDate,
    scheduler: &ChunkedScheduler,
) -> Result<RiskRewardStats, KernelError> {
    let (_, selected) = select_trades(trades, period, reference_date)?;

    let mut values: Vec<f64> = Vec::new();
    let mut buckets: Vec<RiskRewardBucket> = BUCKETS
        .iter()
        .map(|(label, _)| RiskRewardBucket {
            label: label.to_string(),
            trades: 0,
            wins: 0,
            win_rate: 0.0,
            total_pnl: 0.0,
        })
        .collect();

    scheduler
        .for_each_batch(&selected, |chunk| {
            for trade in chunk {
                let Some(rr) = trade.risk_to_reward else {
                    continue;
                };
                values.push(rr);
                let bucket = &mut buckets[bucket_index(rr)];
                bucket.trades += 1;
                bucket.total_pnl += trade.amount;
                if trade.is_win() {
                    bucket.wins += 1;
                }
            }
            Ok(())
        })
        .await?;

    for bucket in &mut buckets {
        bucket.win_rate = safe_ratio(bucket.wins, bucket.trades);
    }

    let sample_size = values.len();
    if sample_size == 0 {
        return Ok(RiskRewardStats {
            buckets,
            ..Default::default()
        });
    }

    let mean = values.iter().mean();
    // Sample standard deviation is undefined for a single value
    let std_dev = if sample_size < 2 {
        0.0
    } else {
        values.iter().std_dev()
    };
    let median = Data::new(values).median();

    Ok(RiskRewardStats {
        sample_size,
        mean,
        median,
        std_dev,
        buckets,
    })
}
