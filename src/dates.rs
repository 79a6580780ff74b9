//! Calendar-date arithmetic for training windows and freshness checks.
//!
//! All month arithmetic in the crate goes through this module. A window of
//! `window_months = 2` means "subtract two calendar months from `end_date`",
//! with the resulting range inclusive at both ends; when the start month is
//! shorter than the end month's day, the day clamps to the month end
//! (e.g. 2025-03-31 minus one month is 2025-02-28).

use chrono::{Months, NaiveDate};

/// Subtract `months` calendar months from `date`, clamping to month end.
pub fn months_before(date: NaiveDate, months: u32) -> NaiveDate {
    // checked_sub_months only fails outside the representable range.
    date.checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}

/// The inclusive `[period_start, period_end]` training window ending on
/// `end_date`.
pub fn training_window(end_date: NaiveDate, window_months: u32) -> (NaiveDate, NaiveDate) {
    (months_before(end_date, window_months), end_date)
}

/// Whole days from `from` to `to` (positive when `to` is later).
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}
