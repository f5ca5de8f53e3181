//! Shared utility functions for CWB crates.

/// Day-of-year date helpers.
///
/// Imagery is addressed by `(year, day)` where `day` is the 1-based ordinal
/// day of the calendar year, so leap years run to day 366.
pub mod dates {
    use chrono::{Datelike, NaiveDate};

    /// Number of days in the given calendar year.
    pub fn days_in_year(year: i32) -> u32 {
        if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
            366
        } else {
            365
        }
    }

    /// True when `day` is a valid ordinal day of `year`.
    pub fn is_valid_day(year: i32, day: u32) -> bool {
        day >= 1 && day <= days_in_year(year)
    }

    /// Convert a `(year, day)` pair into a calendar date.
    pub fn date_from_year_day(year: i32, day: u32) -> anyhow::Result<NaiveDate> {
        NaiveDate::from_yo_opt(year, day)
            .ok_or_else(|| anyhow::anyhow!("Invalid day of year: {}-{:03}", year, day))
    }

    /// Split a calendar date into its `(year, day)` pair.
    pub fn year_day(date: &NaiveDate) -> (i32, u32) {
        (date.year(), date.ordinal())
    }

    /// Single sortable integer for a `(year, day)` pair.
    ///
    /// Used for range filters: `(2024, 1)` sorts after `(2023, 365)`.
    pub fn ordinal_key(year: i32, day: u32) -> i64 {
        i64::from(year) * 1000 + i64::from(day)
    }

    /// Format as `YYYY-DDD`, the label used in logs and raster paths.
    pub fn format_year_day(year: i32, day: u32) -> String {
        format!("{}-{:03}", year, day)
    }

}
