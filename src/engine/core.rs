use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use itertools::Itertools;
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{DF, EngineConfig};
use crate::data::{CacheError, CacheKey, CacheStore, Cached, SweepReport, TieredCache};
use crate::domain::{Impact, QueryPeriod, TradeRecord};
use crate::models::{
    ChartPoint, DailySummary, RiskRewardStats, SessionStats, TagStats, WeekdayStats,
};
use crate::utils::now_utc;

use super::{
    dispatcher::TaskDispatcher,
    error::DispatchError,
    messages::{ComputeJob, ComputeOutput, EventQuery, TradeQuery},
};

/// Composes the dispatcher and the tiered cache. Construct once, pass by reference,
/// and call [`ComputeEngine::shutdown`] when done.
pub struct ComputeEngine {
    config: EngineConfig,
    dispatcher: TaskDispatcher,
    cache: Arc<TieredCache>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ComputeEngine {
    pub fn new(config: EngineConfig, store: Arc<dyn CacheStore>) -> Self {
        Self::with_dispatcher(config, TaskDispatcher::new(&config), store)
    }

    pub fn with_dispatcher(
        config: EngineConfig,
        dispatcher: TaskDispatcher,
        store: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            config,
            dispatcher,
            cache: Arc::new(TieredCache::new(store, config.cache)),
            sweeper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &TaskDispatcher {
        &self.dispatcher
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Starts the execution context (if offloading is on) and, optionally, the periodic
    /// cache sweeper. A context that fails to start is logged, not fatal: jobs fall back
    /// to in-process execution when the configuration allows it.
    pub async fn start(&self, with_sweeper: bool) {
        if self.config.dispatcher.offload_enabled {
            if let Err(e) = self.dispatcher.start().await {
                log::warn!("ENGINE: execution context not started: {}", e);
            }
        }
        if with_sweeper {
            self.spawn_sweeper();
        }
    }

    fn spawn_sweeper(&self) {
        let interval = self.config.cache.sweep_interval();
        if interval.is_zero() {
            return;
        }

        let Ok(mut slot) = self.sweeper.lock() else {
            return;
        };
        if slot.is_some() {
            return;
        }

        let cache = Arc::clone(&self.cache);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match cache.sweep(now_utc()).await {
                    Ok(report) => {
                        if DF.log_cache {
                            log::debug!("ENGINE: periodic sweep {:?}", report);
                        }
                    }
                    Err(e) => log::warn!("ENGINE: periodic sweep failed: {}", e),
                }
            }
        }));
    }

    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = sweeper {
            handle.abort();
        }
        self.dispatcher.shutdown().await;
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, CacheError> {
        self.cache.sweep(now).await
    }

    /// Runs `job` without touching the cache.
    pub async fn run(&self, job: ComputeJob) -> Result<ComputeOutput, DispatchError> {
        self.dispatcher.submit_default(job).await
    }

    /// Cache key for `job` on behalf of `identity`.
    ///
    /// Only what can change the output goes into the `inputs` fingerprint: the records
    /// inside the resolved period. The anchoring `reference_date` and records outside
    /// the period do not, so a closed month keeps one key while the journal grows.
    pub fn cache_key(&self, identity: &str, job: &ComputeJob) -> Result<CacheKey, CacheError> {
        let period = job.query_period();
        let inputs = KeyInputs::of(job, &period);
        let encoded = serde_json::to_vec(&inputs).map_err(|e| CacheError::Codec(e.to_string()))?;
        let fingerprint = Uuid::new_v5(&Uuid::NAMESPACE_OID, &encoded).simple().to_string();
        Ok(CacheKey::new(period, identity)
            .with_param("kind", job.kind())
            .with_param("inputs", fingerprint))
    }

    /// Runs `job` through the cache: fresh entries are served directly, anything else is
    /// recomputed, and a failed recompute falls back to a stale entry when there is one.
    pub async fn run_cached(
        &self,
        identity: &str,
        job: ComputeJob,
        now: DateTime<Utc>,
    ) -> Result<Cached<ComputeOutput>, CacheError> {
        let key = self.cache_key(identity, &job)?;
        self.cache
            .get_or_refresh(&key, now, || self.run(job))
            .await
    }

    pub async fn chart(
        &self,
        identity: &str,
        query: TradeQuery,
        now: DateTime<Utc>,
    ) -> Result<Cached<Vec<ChartPoint>>, CacheError> {
        let cached = self.run_cached(identity, ComputeJob::Chart(query), now).await?;
        narrow(cached, |o| match o {
            ComputeOutput::Chart(v) => Some(v),
            _ => None,
        })
    }

    pub async fn tag_stats(
        &self,
        identity: &str,
        query: TradeQuery,
        now: DateTime<Utc>,
    ) -> Result<Cached<Vec<TagStats>>, CacheError> {
        let cached = self.run_cached(identity, ComputeJob::TagStats(query), now).await?;
        narrow(cached, |o| match o {
            ComputeOutput::TagStats(v) => Some(v),
            _ => None,
        })
    }

    pub async fn session_stats(
        &self,
        identity: &str,
        query: TradeQuery,
        now: DateTime<Utc>,
    ) -> Result<Cached<Vec<SessionStats>>, CacheError> {
        let cached = self.run_cached(identity, ComputeJob::SessionStats(query), now).await?;
        narrow(cached, |o| match o {
            ComputeOutput::SessionStats(v) => Some(v),
            _ => None,
        })
    }

    pub async fn weekday_stats(
        &self,
        identity: &str,
        query: TradeQuery,
        now: DateTime<Utc>,
    ) -> Result<Cached<Vec<WeekdayStats>>, CacheError> {
        let cached = self.run_cached(identity, ComputeJob::DayOfWeek(query), now).await?;
        narrow(cached, |o| match o {
            ComputeOutput::DayOfWeek(v) => Some(v),
            _ => None,
        })
    }

    pub async fn daily_summary(
        &self,
        identity: &str,
        query: TradeQuery,
        now: DateTime<Utc>,
    ) -> Result<Cached<Vec<DailySummary>>, CacheError> {
        let cached = self.run_cached(identity, ComputeJob::DailySummary(query), now).await?;
        narrow(cached, |o| match o {
            ComputeOutput::DailySummary(v) => Some(v),
            _ => None,
        })
    }

    pub async fn risk_reward(
        &self,
        identity: &str,
        query: TradeQuery,
        now: DateTime<Utc>,
    ) -> Result<Cached<RiskRewardStats>, CacheError> {
        let cached = self.run_cached(identity, ComputeJob::RiskReward(query), now).await?;
        narrow(cached, |o| match o {
            ComputeOutput::RiskReward(v) => Some(v),
            _ => None,
        })
    }

    pub async fn event_days(
        &self,
        identity: &str,
        query: EventQuery,
        now: DateTime<Utc>,
    ) -> Result<Cached<std::collections::BTreeMap<NaiveDate, bool>>, CacheError> {
        let cached = self.run_cached(identity, ComputeJob::EventDays(query), now).await?;
        narrow(cached, |o| match o {
            ComputeOutput::EventDays(v) => Some(v),
            _ => None,
        })
    }
}

/// The part of a job its output depends on.
#[derive(Serialize)]
#[serde(untagged)]
enum KeyInputs<'a> {
    Trades(Vec<&'a TradeRecord>),
    Events {
        start: NaiveDate,
        end: NaiveDate,
        min_impact: Impact,
        days: Vec<NaiveDate>,
    },
}

impl<'a> KeyInputs<'a> {
    fn of(job: &'a ComputeJob, period: &QueryPeriod) -> Self {
        match job {
            ComputeJob::Chart(q)
            | ComputeJob::TagStats(q)
            | ComputeJob::SessionStats(q)
            | ComputeJob::DayOfWeek(q)
            | ComputeJob::DailySummary(q)
            | ComputeJob::RiskReward(q) => {
                KeyInputs::Trades(q.trades.iter().filter(|t| period.contains(t.date)).collect())
            }
            // Only the dates of qualifying events reach the output
            ComputeJob::EventDays(q) => KeyInputs::Events {
                start: q.start,
                end: q.end,
                min_impact: q.min_impact,
                days: q
                    .events
                    .iter()
                    .filter(|e| e.impact >= q.min_impact && period.contains(e.date))
                    .map(|e| e.date)
                    .sorted()
                    .dedup()
                    .collect(),
            },
        }
    }
}

/// Unwraps the expected output variant, keeping the cache flags.
fn narrow<T>(
    cached: Cached<ComputeOutput>,
    extract: impl FnOnce(ComputeOutput) -> Option<T>,
) -> Result<Cached<T>, CacheError> {
    let kind = cached.value.kind();
    let Cached {
        value,
        stale,
        resolution,
    } = cached;
    match extract(value) {
        Some(value) => Ok(Cached {
            value,
            stale,
            resolution,
        }),
        None => Err(CacheError::Codec(format!("unexpected {} result", kind))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MemoryStore, Resolution};
    use crate::domain::{Period, TradeRecord, TradeType};
    use chrono::TimeZone;

    fn local_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.dispatcher.offload_enabled = false;
        config
    }

    #[tokio::test]
    async fn second_call_is_a_cache_hit() {
        let engine = ComputeEngine::new(local_config(), Arc::new(MemoryStore::new()));
        let june = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let query = TradeQuery::new(
            vec![TradeRecord::new(june, 10.0, TradeType::Win)],
            Period::Month,
            june,
        );
        let now = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();

        let first = engine.chart("acct", query.clone(), now).await.unwrap();
        assert_eq!(first.resolution, Resolution::Fetched);
        let second = engine.chart("acct", query, now).await.unwrap();
        assert_eq!(second.resolution, Resolution::Hit);
        assert_eq!(first.value, second.value);
        assert_eq!(engine.dispatcher().stats().completed_local, 1);

        engine.shutdown().await;
    }

    #[tokio::test]
    async fn failed_recompute_serves_stale_result() {
        let mut config = local_config();
        config.dispatcher.local_fallback = false;
        let engine = ComputeEngine::new(config, Arc::new(MemoryStore::new()));

        let june = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let job = ComputeJob::DayOfWeek(TradeQuery::new(Vec::new(), Period::Month, june));
        let key = engine.cache_key("acct", &job).unwrap();

        // Written mid-June, read after the week rolled over
        let written = Utc.with_ymd_and_hms(2024, 6, 5, 12, 0, 0).unwrap();
        let read = Utc.with_ymd_and_hms(2024, 6, 12, 12, 0, 0).unwrap();
        engine
            .cache()
            .put(&key, &ComputeOutput::DayOfWeek(Vec::new()), written)
            .await
            .unwrap();

        let cached = engine.run_cached("acct", job, read).await.unwrap();
        assert!(cached.stale);
        assert_eq!(cached.resolution, Resolution::StaleServed);
        assert_eq!(cached.value, ComputeOutput::DayOfWeek(Vec::new()));
        assert_eq!(engine.dispatcher().stats().failed, 1);
    }

    fn may_trades() -> Vec<TradeRecord> {
        let may = |day| NaiveDate::from_ymd_opt(2024, 5, day).unwrap();
        vec![
            TradeRecord::new(may(3), 40.0, TradeType::Win),
            TradeRecord::new(may(20), -15.0, TradeType::Loss),
        ]
    }

    #[tokio::test]
    async fn reference_date_within_the_month_shares_one_entry() {
        let store = Arc::new(MemoryStore::new());
        let engine = ComputeEngine::new(local_config(), store.clone());
        let now = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
        let on = |day| {
            let reference = NaiveDate::from_ymd_opt(2024, 5, day).unwrap();
            ComputeJob::Chart(TradeQuery::new(may_trades(), Period::Month, reference))
        };

        assert_eq!(
            engine.cache_key("acct", &on(10)).unwrap(),
            engine.cache_key("acct", &on(11)).unwrap()
        );

        let first = engine.run_cached("acct", on(10), now).await.unwrap();
        let second = engine.run_cached("acct", on(11), now).await.unwrap();
        assert_eq!(first.resolution, Resolution::Fetched);
        assert_eq!(second.resolution, Resolution::Hit);
        assert_eq!(first.value, second.value);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn trades_outside_a_closed_month_keep_its_key() {
        let store = Arc::new(MemoryStore::new());
        let engine = ComputeEngine::new(local_config(), store.clone());
        let now = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
        let reference = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();

        let before = ComputeJob::TagStats(TradeQuery::new(may_trades(), Period::Month, reference));
        let mut grown = may_trades();
        grown.push(TradeRecord::new(
            NaiveDate::from_ymd_opt(2024, 7, 2).unwrap(),
            5.0,
            TradeType::Win,
        ));
        let after = ComputeJob::TagStats(TradeQuery::new(grown, Period::Month, reference));

        assert_eq!(
            engine.cache_key("acct", &before).unwrap(),
            engine.cache_key("acct", &after).unwrap()
        );

        engine.run_cached("acct", before, now).await.unwrap();
        let cached = engine.run_cached("acct", after, now).await.unwrap();
        assert_eq!(cached.resolution, Resolution::Hit);

        // One permanent entry, not one per journal revision
        let report = engine.sweep(now + chrono::Duration::days(365 * 20)).await.unwrap();
        assert_eq!((report.scanned, report.retained), (1, 1));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn a_trade_inside_the_period_changes_the_key() {
        let engine = ComputeEngine::new(local_config(), Arc::new(MemoryStore::new()));
        let reference = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        let mut edited = may_trades();
        edited[1].amount = -16.0;

        let a = ComputeJob::Chart(TradeQuery::new(may_trades(), Period::Month, reference));
        let b = ComputeJob::Chart(TradeQuery::new(edited, Period::Month, reference));
        assert_ne!(
            engine.cache_key("acct", &a).unwrap(),
            engine.cache_key("acct", &b).unwrap()
        );
    }

    #[test]
    fn event_key_ignores_events_that_cannot_flag_a_day() {
        use crate::domain::{Impact, MarketEvent};

        let engine = ComputeEngine::new(local_config(), Arc::new(MemoryStore::new()));
        let june = |day| NaiveDate::from_ymd_opt(2024, 6, day).unwrap();
        let query = |events| EventQuery {
            events,
            start: june(1),
            end: june(30),
            min_impact: Impact::High,
        };

        let base = vec![MarketEvent::new(june(7), "NFP", Impact::High)];
        let mut noisy = base.clone();
        noisy.push(MarketEvent::new(june(8), "Speech", Impact::Low));
        noisy.push(MarketEvent::new(
            NaiveDate::from_ymd_opt(2024, 7, 3).unwrap(),
            "FOMC",
            Impact::High,
        ));
        let mut flagged = base.clone();
        flagged.push(MarketEvent::new(june(12), "CPI", Impact::High));

        let key = |events| engine.cache_key("acct", &ComputeJob::EventDays(query(events))).unwrap();
        assert_eq!(key(base.clone()), key(noisy));
        assert_ne!(key(base), key(flagged));
    }

    #[tokio::test]
    async fn different_inputs_use_different_keys() {
        let engine = ComputeEngine::new(local_config(), Arc::new(MemoryStore::new()));
        let june = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let a = ComputeJob::Chart(TradeQuery::new(Vec::new(), Period::Month, june));
        let b = ComputeJob::Chart(TradeQuery::new(
            vec![TradeRecord::new(june, 1.0, TradeType::Win)],
            Period::Month,
            june,
        ));
        let key_a = engine.cache_key("acct", &a).unwrap();
        let key_b = engine.cache_key("acct", &b).unwrap();
        assert_eq!(key_a.period, key_b.period);
        assert_ne!(key_a.composite(), key_b.composite());
        assert_eq!(key_a.params["kind"], "chart");
    }
}
