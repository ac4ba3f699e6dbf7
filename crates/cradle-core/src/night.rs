//! Night versus nap classification of sleep intervals.
//!
//! # Algorithm
//!
//! The night window recurs every calendar day and covers the clock hours
//! `[start_hour, 24) ∪ [0, end_hour)` (or `[start_hour, end_hour)` when the
//! window does not wrap midnight). The number of night seconds inside an
//! interval is computed in constant time from a cumulative function
//!
//! ```text
//! F(t) = days_since_epoch(t) * window_seconds_per_day + window_seconds_before(time_of_day(t))
//! night_seconds([s, e)) = F(e) - F(s)
//! ```
//!
//! so arbitrarily long intervals cost the same as short ones.
//!
//! An interval is a night sleep when it has at least 90 night minutes, or when
//! it crosses a calendar date and lasts at least 120 minutes.

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::Serialize;

use crate::types::{SleepKind, ValidationError};

const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;

/// Night minutes at or above which a sleep counts as night sleep.
pub const NIGHT_MINUTES_THRESHOLD: i64 = 90;

/// Minimum duration of a date-crossing sleep for it to count as night sleep.
pub const CROSS_DATE_MIN_MINUTES: i64 = 120;

/// The recurring daily night window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NightWindow {
    start_hour: u32,
    end_hour: u32,
}

impl Default for NightWindow {
    fn default() -> Self {
        Self {
            start_hour: 21,
            end_hour: 6,
        }
    }
}

impl NightWindow {
    /// Creates a window starting at `start_hour` and ending at `end_hour` (local clock).
    ///
    /// `start_hour` must be in `0..24`, `end_hour` in `0..=24`, and the two must differ.
    pub fn new(start_hour: u32, end_hour: u32) -> Result<Self, ValidationError> {
        if start_hour >= 24 || end_hour > 24 || start_hour == end_hour {
            return Err(ValidationError::InvalidNightWindow {
                start: start_hour,
                end: end_hour,
            });
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    #[must_use]
    pub const fn start_hour(&self) -> u32 {
        self.start_hour
    }

    #[must_use]
    pub const fn end_hour(&self) -> u32 {
        self.end_hour
    }

    /// Clock-of-day segments `[from, to)` in seconds covered by the window.
    fn segments(&self) -> [(i64, i64); 2] {
        let start = i64::from(self.start_hour) * SECONDS_PER_HOUR;
        let end = i64::from(self.end_hour) * SECONDS_PER_HOUR;
        if start > end {
            [(0, end), (start, SECONDS_PER_DAY)]
        } else {
            [(start, end), (0, 0)]
        }
    }

    fn seconds_per_day(&self) -> i64 {
        self.segments().iter().map(|(from, to)| to - from).sum()
    }

    /// Window seconds between local midnight and `second_of_day`.
    fn seconds_before(&self, second_of_day: i64) -> i64 {
        self.segments()
            .iter()
            .map(|&(from, to)| (second_of_day.min(to) - from).max(0))
            .sum()
    }

    fn cumulative(&self, t: NaiveDateTime) -> i64 {
        let days = i64::from(t.date().num_days_from_ce());
        let second_of_day = i64::from(t.time().num_seconds_from_midnight());
        days * self.seconds_per_day() + self.seconds_before(second_of_day)
    }

    /// Seconds of `[start, end)` that fall inside the recurring window.
    ///
    /// Empty or inverted intervals contribute zero.
    #[must_use]
    pub fn night_seconds(&self, start: NaiveDateTime, end: NaiveDateTime) -> i64 {
        if end <= start {
            return 0;
        }
        self.cumulative(end) - self.cumulative(start)
    }

    /// Classifies a local wall-clock interval.
    #[must_use]
    pub fn classify(&self, start: NaiveDateTime, end: NaiveDateTime) -> SleepKind {
        let night_minutes = self.night_seconds(start, end) / 60;
        let total_minutes = (end - start).num_minutes();
        let crosses_date = start.date() != end.date();

        if night_minutes >= NIGHT_MINUTES_THRESHOLD
            || (crosses_date && total_minutes >= CROSS_DATE_MIN_MINUTES)
        {
            SleepKind::Night
        } else {
            SleepKind::Nap
        }
    }

    /// Classifies a UTC interval against the window expressed in `tz` local time.
    ///
    /// Across a DST change the local interval is an hour longer or shorter than
    /// the elapsed time; the window is defined on the local clock, so the local
    /// interval is what gets measured.
    #[must_use]
    pub fn classify_in<Tz: TimeZone>(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tz: &Tz,
    ) -> SleepKind {
        self.classify(
            start.with_timezone(tz).naive_local(),
            end.with_timezone(tz).naive_local(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, NaiveDate};

    fn dt(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_ninety_night_minutes_is_night() {
        let window = NightWindow::default();
        assert_eq!(window.night_seconds(dt(1, 21, 0), dt(1, 22, 30)), 90 * 60);
        assert_eq!(window.classify(dt(1, 21, 0), dt(1, 22, 30)), SleepKind::Night);
    }

    #[test]
    fn test_evening_before_window_is_nap() {
        let window = NightWindow::default();
        assert_eq!(window.night_seconds(dt(1, 20, 0), dt(1, 21, 0)), 0);
        assert_eq!(window.classify(dt(1, 20, 0), dt(1, 21, 0)), SleepKind::Nap);
    }

    #[test]
    fn test_across_midnight_is_night() {
        let window = NightWindow::default();
        assert_eq!(window.night_seconds(dt(1, 23, 0), dt(2, 1, 30)), 150 * 60);
        assert_eq!(window.classify(dt(1, 23, 0), dt(2, 1, 30)), SleepKind::Night);
    }

    #[test]
    fn test_short_nap_straddling_window_start_is_nap() {
        let window = NightWindow::default();
        assert_eq!(window.night_seconds(dt(1, 20, 55), dt(1, 21, 10)), 10 * 60);
        assert_eq!(window.classify(dt(1, 20, 55), dt(1, 21, 10)), SleepKind::Nap);
    }

    #[test]
    fn test_eighty_nine_night_minutes_is_nap() {
        let window = NightWindow::default();
        assert_eq!(window.classify(dt(1, 21, 0), dt(1, 22, 29)), SleepKind::Nap);
    }

    #[test]
    fn test_date_crossing_with_two_hours_is_night_even_with_little_night_time() {
        // A 01:00-02:00 window never overlaps 22:00-00:00.
        let window = NightWindow::new(1, 2).unwrap();
        assert_eq!(window.classify(dt(1, 22, 0), dt(2, 0, 0)), SleepKind::Night);
        assert_eq!(window.night_seconds(dt(1, 22, 0), dt(2, 0, 0)), 0);
        assert_eq!(window.classify(dt(1, 22, 30), dt(2, 0, 29)), SleepKind::Nap);
    }

    #[test]
    fn test_early_morning_segment_counts() {
        let window = NightWindow::default();
        assert_eq!(window.night_seconds(dt(2, 4, 0), dt(2, 7, 0)), 120 * 60);
        assert_eq!(window.classify(dt(2, 4, 0), dt(2, 7, 0)), SleepKind::Night);
    }

    #[test]
    fn test_multi_day_interval_is_constant_time_and_exact() {
        let window = NightWindow::default();
        let start = dt(1, 12, 0);
        let end = start + Duration::days(365 * 50);
        // Nine window hours per day over whole days.
        assert_eq!(
            window.night_seconds(start, end),
            365 * 50 * 9 * SECONDS_PER_HOUR
        );
    }

    #[test]
    fn test_inverted_interval_is_nap_with_no_night_time() {
        let window = NightWindow::default();
        assert_eq!(window.night_seconds(dt(2, 1, 0), dt(1, 23, 0)), 0);
        assert_eq!(window.classify(dt(2, 1, 0), dt(1, 23, 0)), SleepKind::Nap);
    }

    #[test]
    fn test_non_wrapping_window() {
        let window = NightWindow::new(0, 6).unwrap();
        assert_eq!(window.night_seconds(dt(1, 23, 0), dt(2, 1, 0)), 60 * 60);
        assert_eq!(window.night_seconds(dt(1, 20, 0), dt(2, 8, 0)), 6 * 60 * 60);
    }

    #[test]
    fn test_rejects_invalid_windows() {
        assert!(NightWindow::new(24, 6).is_err());
        assert!(NightWindow::new(21, 25).is_err());
        assert!(NightWindow::new(6, 6).is_err());
        assert!(NightWindow::new(20, 24).is_ok());
    }

    #[test]
    fn test_classify_in_uses_local_clock() {
        let window = NightWindow::default();
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        // 13:00-14:30 UTC is 21:00-22:30 at UTC+8.
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 14, 30, 0).unwrap();
        assert_eq!(window.classify_in(start, end, &tz), SleepKind::Night);
        assert_eq!(window.classify_in(start, end, &Utc), SleepKind::Nap);
    }
}
