use chrono::NaiveDate;

use crate::{
    analysis::KernelError,
    domain::{Period, QueryPeriod, TradeRecord},
};

/// Rejects trades whose numbers would poison every aggregate downstream.
pub fn validate_trades(trades: &[TradeRecord]) -> Result<(), KernelError> {
    for (idx, trade) in trades.iter().enumerate() {
        if !trade.amount.is_finite() {
            return Err(KernelError::InvalidInput(format!(
                "trade #{} on {} has a non-finite amount",
                idx, trade.date
            )));
        }
        if let Some(rr) = trade.risk_to_reward {
            if !rr.is_finite() {
                return Err(KernelError::InvalidInput(format!(
                    "trade #{} on {} has a non-finite risk/reward",
                    idx, trade.date
                )));
            }
        }
    }
    Ok(())
}

/// Validates, resolves the period bounds and keeps the trades inside them, in input order.
pub fn select_trades(
    trades: &[TradeRecord],
    period: Period,
    reference_date: NaiveDate,
) -> Result<(QueryPeriod, Vec<&TradeRecord>), KernelError> {
    validate_trades(trades)?;
    let range = QueryPeriod::for_trades(trades, period, reference_date);
    let selected = trades.iter().filter(|t| range.contains(t.date)).collect();
    Ok((range, selected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TradeType;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn keeps_only_trades_in_the_month() {
        let trades = vec![
            TradeRecord::new(d(2024, 5, 31), 5.0, TradeType::Win),
            TradeRecord::new(d(2024, 6, 2), 1.0, TradeType::Win),
            TradeRecord::new(d(2024, 6, 1), 2.0, TradeType::Win),
            TradeRecord::new(d(2024, 7, 1), 3.0, TradeType::Win),
        ];
        let (range, selected) = select_trades(&trades, Period::Month, d(2024, 6, 10)).unwrap();
        assert_eq!(range, QueryPeriod::new(d(2024, 6, 1), d(2024, 6, 30)));
        let amounts: Vec<f64> = selected.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![1.0, 2.0]);
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        let bad_amount = vec![TradeRecord::new(d(2024, 6, 1), f64::NAN, TradeType::Win)];
        assert!(matches!(validate_trades(&bad_amount), Err(KernelError::InvalidInput(_))));

        let bad_rr =
            vec![TradeRecord::new(d(2024, 6, 1), 1.0, TradeType::Win).with_risk_to_reward(f64::INFINITY)];
        assert!(matches!(validate_trades(&bad_rr), Err(KernelError::InvalidInput(_))));
    }
}
