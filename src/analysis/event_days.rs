use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::{
    analysis::{ChunkedScheduler, KernelError},
    domain::{Impact, MarketEvent},
    utils::TimeUtils,
};

/// Maps every day in `[start, end]` to whether it holds an event of at least `min_impact`.
pub async fn event_days(
    events: &[MarketEvent],
    start: NaiveDate,
    end: NaiveDate,
    min_impact: Impact,
    scheduler: &ChunkedScheduler,
) -> Result<BTreeMap<NaiveDate, bool>, KernelError> {
    if start > end {
        return Err(KernelError::InvalidInput(format!(
            "event range starts after it ends ({} > {})",
            start, end
        )));
    }

    let mut days: BTreeMap<NaiveDate, bool> = TimeUtils::days_in_range(start, end)
        .into_iter()
        .map(|day| (day, false))
        .collect();

    scheduler
        .for_each_batch(events, |chunk| {
            for event in chunk {
                if event.impact < min_impact {
                    continue;
                }
                if let Some(flag) = days.get_mut(&event.date) {
                    *flag = true;
                }
            }
            Ok(())
        })
        .await?;

    Ok(days)
}
