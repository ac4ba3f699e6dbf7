//! Sleep statistics over a range of sessions.

use serde::Serialize;

use crate::sleep::SleepSession;
use crate::types::{SleepKind, SleepStatus};

/// Aggregate figures for a set of sleep sessions.
///
/// Cancelled sessions are ignored. Durations only come from completed
/// sessions; open and auto-closed sessions count as records but not as time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SleepStats {
    pub total_records: usize,
    pub measured_records: usize,
    pub total_duration_minutes: i64,
    pub total_duration_hours: f64,
    /// Mean over measured records.
    pub average_duration_minutes: f64,
    pub total_wake_count: u64,
    pub night_sleep_count: usize,
    pub nap_count: usize,
    pub auto_closed_count: usize,
}

impl SleepStats {
    #[must_use]
    pub fn from_sessions(sessions: &[SleepSession]) -> Self {
        let mut stats = Self::default();
        for session in sessions
            .iter()
            .filter(|s| s.status != SleepStatus::Cancelled)
        {
            stats.total_records += 1;
            stats.total_wake_count += u64::from(session.wake_count);
            if let Some(minutes) = session.duration_minutes {
                stats.measured_records += 1;
                stats.total_duration_minutes += minutes;
            }
            match session.kind {
                Some(SleepKind::Night) => stats.night_sleep_count += 1,
                Some(SleepKind::Nap) => stats.nap_count += 1,
                None => {}
            }
            if session.status == SleepStatus::AutoClosed {
                stats.auto_closed_count += 1;
            }
        }
        stats.total_duration_hours = round2(minutes_to_f64(stats.total_duration_minutes) / 60.0);
        if stats.measured_records > 0 {
            stats.average_duration_minutes = round2(
                minutes_to_f64(stats.total_duration_minutes)
                    / count_to_f64(stats.measured_records),
            );
        }
        stats
    }
}

#[expect(
    clippy::cast_precision_loss,
    reason = "sleep minutes are far below 2^52"
)]
const fn minutes_to_f64(minutes: i64) -> f64 {
    minutes as f64
}

#[expect(
    clippy::cast_precision_loss,
    reason = "record counts are far below 2^52"
)]
const fn count_to_f64(count: usize) -> f64 {
    count as f64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
