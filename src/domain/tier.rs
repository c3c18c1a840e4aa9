//! Expiry tiers for cached query results.
//!
//! A query about a period that has fully elapsed can never change, so its entry is kept
//! "forever". A query touching the current period must be refreshed once that period
//! rolls over, and one about the future is re-checked daily. All tier arithmetic lives
//! in [`classify`]: it is a pure function of `(period, now)`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::{
    config::{CacheSettings, ENGINE},
    domain::QueryPeriod,
    utils::TimeUtils,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Tier {
    Past,
    Current,
    Future,
}

impl Tier {
    /// Past entries are never removed by a sweep.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Tier::Past)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierAssignment {
    pub tier: Tier,
    pub expiry: DateTime<Utc>,
}

/// Classifies with the default engine cache settings.
pub fn classify(period: &QueryPeriod, now: DateTime<Utc>) -> TierAssignment {
    classify_with(period, now, &ENGINE.cache)
}

pub fn classify_with(
    period: &QueryPeriod,
    now: DateTime<Utc>,
    settings: &CacheSettings,
) -> TierAssignment {
    let today = now.date_naive();

    let tier = if period.end < today {
        Tier::Past
    } else if period.start > today {
        Tier::Future
    } else {
        Tier::Current
    };

    let expiry = match tier {
        Tier::Past => now + Duration::days(settings.permanent_ttl_days),
        Tier::Current => TimeUtils::start_of_next_week(now),
        Tier::Future => now + Duration::hours(settings.future_ttl_hours),
    };

    TierAssignment { tier, expiry }
}
