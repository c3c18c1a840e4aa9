use std::any::Any;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;

use crate::analysis::{self, ChunkedScheduler, KernelError};

use super::messages::{ComputeJob, ComputeOutput};

/// Runs one job. The same handler instance serves the execution context and the
/// in-process fallback, which is what keeps both paths bit-for-bit identical.
#[async_trait]
pub trait ComputeHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        job: ComputeJob,
        scheduler: &ChunkedScheduler,
    ) -> Result<ComputeOutput, KernelError>;
}

/// The standard kernel suite.
#[derive(Debug, Clone, Copy, Default)]
pub struct KernelSuite;

#[async_trait]
impl ComputeHandler for KernelSuite {
    async fn handle(
        &self,
        job: ComputeJob,
        scheduler: &ChunkedScheduler,
    ) -> Result<ComputeOutput, KernelError> {
        let output = match job {
            ComputeJob::Chart(q) => ComputeOutput::Chart(
                analysis::chart_points(&q.trades, q.period, q.reference_date, scheduler).await?,
            ),
            ComputeJob::TagStats(q) => ComputeOutput::TagStats(
                analysis::tag_stats(&q.trades, q.period, q.reference_date, scheduler).await?,
            ),
            ComputeJob::SessionStats(q) => ComputeOutput::SessionStats(
                analysis::session_stats(&q.trades, q.period, q.reference_date, scheduler).await?,
            ),
            ComputeJob::DayOfWeek(q) => ComputeOutput::DayOfWeek(
                analysis::weekday_stats(&q.trades, q.period, q.reference_date, scheduler).await?,
            ),
            ComputeJob::DailySummary(q) => ComputeOutput::DailySummary(
                analysis::daily_summary(&q.trades, q.period, q.reference_date, scheduler).await?,
            ),
            ComputeJob::RiskReward(q) => ComputeOutput::RiskReward(
                analysis::risk_reward(&q.trades, q.period, q.reference_date, scheduler).await?,
            ),
            ComputeJob::EventDays(q) => ComputeOutput::EventDays(
                analysis::event_days(&q.events, q.start, q.end, q.min_impact, scheduler).await?,
            ),
        };
        Ok(output)
    }
}

/// Runs `job`, turning a panic inside the handler into [`KernelError::Panicked`].
pub(crate) async fn run_guarded(
    handler: &dyn ComputeHandler,
    job: ComputeJob,
    scheduler: &ChunkedScheduler,
) -> Result<ComputeOutput, KernelError> {
    match AssertUnwindSafe(handler.handle(job, scheduler))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(KernelError::Panicked(panic_message(panic.as_ref()))),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
