use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};

pub type AppInstant = web_time::Instant;

pub struct TimeUtils;

impl TimeUtils {
    pub const STANDARD_TIME_FORMAT: &str = "%Y-%m-%d";
    /// Short label used on chart axes, e.g. "Jun 1".
    pub const CHART_LABEL_FORMAT: &str = "%b %-d";

    /// First and last calendar day of the month containing `date`.
    pub fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
        let first = date.with_day(1).unwrap_or(date);
        let next_month = if first.month() == 12 {
            NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
        };
        let last = next_month
            .and_then(|d| d.pred_opt())
            .unwrap_or(first);
        (first, last)
    }

    /// Jan 1 and Dec 31 of the year containing `date`.
    pub fn year_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
        let first = NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date);
        let last = NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(date);
        (first, last)
    }

    /// Every calendar day from `start` to `end` inclusive. Empty if `start > end`.
    pub fn days_in_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        if start > end {
            return Vec::new();
        }
        start.iter_days().take_while(|d| *d <= end).collect()
    }

    /// Monday 00:00 UTC of the ISO week following the one containing `now`.
    pub fn start_of_next_week(now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let days_from_monday = today.weekday().num_days_from_monday() as i64;
        let monday = today - Duration::days(days_from_monday);
        let next_monday = monday + Duration::days(7);
        next_monday
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now + Duration::weeks(1))
    }

    /// Monday-first week bounds containing `date`.
    pub fn week_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
        let start = date.week(Weekday::Mon).first_day();
        (start, start + Duration::days(6))
    }

    pub fn chart_label(date: NaiveDate) -> String {
        date.format(Self::CHART_LABEL_FORMAT).to_string()
    }
}

pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn month_bounds_handle_december_and_leap_years() {
        assert_eq!(TimeUtils::month_bounds(d(2024, 12, 15)), (d(2024, 12, 1), d(2024, 12, 31)));
        assert_eq!(TimeUtils::month_bounds(d(2024, 2, 10)), (d(2024, 2, 1), d(2024, 2, 29)));
        assert_eq!(TimeUtils::month_bounds(d(2023, 2, 10)), (d(2023, 2, 1), d(2023, 2, 28)));
    }

    #[test]
    fn next_week_starts_on_monday_midnight() {
        // Wednesday
        let now = Utc.with_ymd_and_hms(2024, 6, 5, 15, 30, 0).unwrap();
        assert_eq!(
            TimeUtils::start_of_next_week(now),
            Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap()
        );
        // Monday midnight itself rolls to the following Monday
        let monday = Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap();
        assert_eq!(
            TimeUtils::start_of_next_week(monday),
            Utc.with_ymd_and_hms(2024, 6, 17, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn days_in_range_is_inclusive() {
        let days = TimeUtils::days_in_range(d(2024, 6, 1), d(2024, 6, 3));
        assert_eq!(days, vec![d(2024, 6, 1), d(2024, 6, 2), d(2024, 6, 3)]);
        assert!(TimeUtils::days_in_range(d(2024, 6, 3), d(2024, 6, 1)).is_empty());
    }
}
