//! Weekly period boundaries.
//!
//! A period starts every Wednesday at 12:00 UTC and lasts seven days. Averages
//! are computed per period and stored data is retained per period.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};

/// Weekday on which every period starts.
pub const ANCHOR_WEEKDAY: Weekday = Weekday::Wed;

/// Hour of day (UTC) at which every period starts.
pub const ANCHOR_HOUR: i64 = 12;

/// Length of one period in days.
pub const PERIOD_DAYS: i64 = 7;

/// Start of the period containing `now`: the latest anchor weekday/hour at or
/// before `now`. Saturates at the earliest representable instant.
pub fn period_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let weekday = i64::from(now.weekday().num_days_from_monday());
    let anchor = i64::from(ANCHOR_WEEKDAY.num_days_from_monday());
    let days_since_anchor = (weekday - anchor).rem_euclid(PERIOD_DAYS);

    let anchor_date = now
        .date_naive()
        .checked_sub_signed(Duration::days(days_since_anchor))
        .unwrap_or(NaiveDate::MIN);
    let start = anchor_date.and_time(NaiveTime::MIN).and_utc() + Duration::hours(ANCHOR_HOUR);

    // Anchor weekday, before the anchor hour: still in the previous period.
    if start > now {
        start
            .checked_sub_signed(Duration::days(PERIOD_DAYS))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    } else {
        start
    }
}
