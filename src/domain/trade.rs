use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Outcome classification recorded with each trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TradeType {
    Win,
    Loss,
    #[serde(alias = "break_even")]
    BreakEven,
}

/// One closed trade as supplied by the trade repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub date: NaiveDate,
    pub amount: f64,
    #[serde(rename = "type")]
    pub trade_type: TradeType,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default, rename = "riskToReward", alias = "risk_to_reward")]
    pub risk_to_reward: Option<f64>,
}

impl TradeRecord {
    // A constructor for convenience
    pub fn new(date: NaiveDate, amount: f64, trade_type: TradeType) -> Self {
        Self {
            date,
            amount,
            trade_type,
            tags: Vec::new(),
            session: None,
            risk_to_reward: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn with_risk_to_reward(mut self, rr: f64) -> Self {
        self.risk_to_reward = Some(rr);
        self
    }

    pub fn is_win(&self) -> bool {
        self.trade_type == TradeType::Win
    }

    pub fn is_loss(&self) -> bool {
        self.trade_type == TradeType::Loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_journal_json_shape() {
        let json = r#"{"date":"2024-06-01","amount":100.5,"type":"win","tags":["breakout"],"session":"London","riskToReward":2.0}"#;
        let trade: TradeRecord = serde_json::from_str(json).unwrap();
        assert_eq!(trade.date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(trade.trade_type, TradeType::Win);
        assert_eq!(trade.tags, vec!["breakout".to_string()]);
        assert_eq!(trade.risk_to_reward, Some(2.0));

        let minimal: TradeRecord =
            serde_json::from_str(r#"{"date":"2024-06-03","amount":-40,"type":"loss"}"#).unwrap();
        assert!(minimal.tags.is_empty());
        assert!(minimal.session.is_none());
    }

    #[test]
    fn dates_cross_the_boundary_as_iso_strings() {
        let trade = TradeRecord::new(NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(), -40.0, TradeType::Loss);
        let json = serde_json::to_string(&trade).unwrap();
        assert!(json.contains(r#""date":"2024-06-03""#));
        assert!(json.contains(r#""type":"loss""#));
    }
}
