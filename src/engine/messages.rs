//! Wire protocol between the dispatcher and its execution context.
//!
//! Frames are JSON text. A request is `{ "id", "kind", "payload" }`; a response is
//! `{ "id", "payload" }` on success or `{ "id", "error": { "message", "trace" } }`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use uuid::Uuid;

use crate::{
    analysis::KernelError,
    domain::{Impact, MarketEvent, Period, QueryPeriod, TradeRecord},
    models::{
        ChartPoint, DailySummary, RiskRewardStats, SessionStats, TagStats, WeekdayStats,
    },
};

/// Correlation token for one request, unique among outstanding requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    Chart,
    TagStats,
    SessionStats,
    DayOfWeek,
    DailySummary,
    RiskReward,
    EventDays,
}

/// Inputs shared by every trade kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeQuery {
    pub trades: Vec<TradeRecord>,
    #[serde(default)]
    pub period: Period,
    /// Anchors `month`/`year`, and stands in for both bounds of an empty `all`.
    pub reference_date: NaiveDate,
}

impl TradeQuery {
    pub fn new(trades: Vec<TradeRecord>, period: Period, reference_date: NaiveDate) -> Self {
        Self {
            trades,
            period,
            reference_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventQuery {
    pub events: Vec<MarketEvent>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub min_impact: Impact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ComputeJob {
    Chart(TradeQuery),
    TagStats(TradeQuery),
    SessionStats(TradeQuery),
    DayOfWeek(TradeQuery),
    DailySummary(TradeQuery),
    RiskReward(TradeQuery),
    EventDays(EventQuery),
}

impl ComputeJob {
    pub fn kind(&self) -> JobKind {
        match self {
            ComputeJob::Chart(_) => JobKind::Chart,
            ComputeJob::TagStats(_) => JobKind::TagStats,
            ComputeJob::SessionStats(_) => JobKind::SessionStats,
            ComputeJob::DayOfWeek(_) => JobKind::DayOfWeek,
            ComputeJob::DailySummary(_) => JobKind::DailySummary,
            ComputeJob::RiskReward(_) => JobKind::RiskReward,
            ComputeJob::EventDays(_) => JobKind::EventDays,
        }
    }

    /// The calendar range the job's result describes. Used to tier cached results.
    pub fn query_period(&self) -> QueryPeriod {
        match self {
            ComputeJob::Chart(q)
            | ComputeJob::TagStats(q)
            | ComputeJob::SessionStats(q)
            | ComputeJob::DayOfWeek(q)
            | ComputeJob::DailySummary(q)
            | ComputeJob::RiskReward(q) => {
                QueryPeriod::for_trades(&q.trades, q.period, q.reference_date)
            }
            ComputeJob::EventDays(q) => QueryPeriod::new(q.start, q.end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ComputeOutput {
    Chart(Vec<ChartPoint>),
    TagStats(Vec<TagStats>),
    SessionStats(Vec<SessionStats>),
    DayOfWeek(Vec<WeekdayStats>),
    DailySummary(Vec<DailySummary>),
    RiskReward(RiskRewardStats),
    EventDays(BTreeMap<NaiveDate, bool>),
}

impl ComputeOutput {
    pub fn kind(&self) -> JobKind {
        match self {
            ComputeOutput::Chart(_) => JobKind::Chart,
            ComputeOutput::TagStats(_) => JobKind::TagStats,
            ComputeOutput::SessionStats(_) => JobKind::SessionStats,
            ComputeOutput::DayOfWeek(_) => JobKind::DayOfWeek,
            ComputeOutput::DailySummary(_) => JobKind::DailySummary,
            ComputeOutput::RiskReward(_) => JobKind::RiskReward,
            ComputeOutput::EventDays(_) => JobKind::EventDays,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeRequest {
    pub id: RequestId,
    #[serde(flatten)]
    pub job: ComputeJob,
}

impl ComputeRequest {
    pub fn new(job: ComputeJob) -> Self {
        Self {
            id: RequestId::new(),
            job,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl From<&KernelError> for WireError {
    fn from(err: &KernelError) -> Self {
        let trace = match err {
            KernelError::Panicked(detail) => Some(detail.clone()),
            _ => None,
        };
        Self {
            message: err.to_string(),
            trace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeResponse {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<ComputeOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl ComputeResponse {
    pub fn success(id: RequestId, output: ComputeOutput) -> Self {
        Self {
            id,
            payload: Some(output),
            error: None,
        }
    }

    pub fn failure(id: RequestId, error: WireError) -> Self {
        Self {
            id,
            payload: None,
            error: Some(error),
        }
    }
}

/// Reads just the `id` of a frame so a reply can be correlated even when the rest is garbage.
pub fn peek_id(frame: &serde_json::Value) -> Option<RequestId> {
    frame
        .get("id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
}
