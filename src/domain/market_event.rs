use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Impact classification supplied by the market-event repository.
/// Ordered so that `High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Impact {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub date: NaiveDate,
    pub title: String,
    #[serde(default)]
    pub currency: Option<String>,
    pub impact: Impact,
}

impl MarketEvent {
    pub fn new(date: NaiveDate, title: impl Into<String>, impact: Impact) -> Self {
        Self {
            date,
            title: title.into(),
            currency: None,
            impact,
        }
    }
}
