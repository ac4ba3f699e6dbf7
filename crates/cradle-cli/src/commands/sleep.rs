//! `cradle sleep` subcommands.

use std::fmt::Display;
use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use cradle_core::types::ensure_ordered;
use cradle_core::{
    ActivePolicy, Clock, RecordSleep, SleepKind, SleepQuery, SleepSession, SleepSessionManager,
    SleepSessionUpdate, SleepSource, SleepStats, SleepStatus, StartSleep,
};
use cradle_db::Database;

use super::Context;
use super::util::{format_local, format_minutes, parse_datetime, parse_optional_datetime, write_json};
use crate::SleepAction;

#[expect(
    clippy::too_many_lines,
    reason = "CLI command dispatch is inherently verbose"
)]
pub fn run<W, C, Tz>(
    writer: &mut W,
    db: &mut Database,
    ctx: &Context<C, Tz>,
    action: SleepAction,
) -> Result<()>
where
    W: Write,
    C: Clock,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let now = ctx.clock.now();
    let mut manager = SleepSessionManager::new(db, &ctx.clock)
        .with_timezone(ctx.tz.clone())
        .with_config(ctx.settings.sleep.clone());

    match action {
        SleepAction::Start {
            baby,
            at,
            position,
            auto,
        } => {
            let source = if auto {
                SleepSource::Auto
            } else {
                SleepSource::Manual
            };
            let session = manager.start(
                ctx.caregiver.clone(),
                StartSleep {
                    baby_id: baby,
                    start_time: parse_datetime(&at, now)?,
                    source: Some(source),
                    position,
                },
            )?;
            write_session(writer, ctx, &session)
        }
        SleepAction::Stop { session, at } => {
            let session = manager.stop(&session, parse_datetime(&at, now)?)?;
            write_session(writer, ctx, &session)
        }
        SleepAction::AutoClose { session, at } => {
            let session = manager.auto_close(&session, parse_datetime(&at, now)?)?;
            write_session(writer, ctx, &session)
        }
        SleepAction::Cancel { session } => {
            let session = manager.cancel(&session)?;
            write_session(writer, ctx, &session)
        }
        SleepAction::Record {
            baby,
            start,
            end,
            position,
            quality,
            wake_count,
            notes,
        } => {
            let session = manager.record_completed(
                ctx.caregiver.clone(),
                RecordSleep {
                    baby_id: baby,
                    start_time: parse_datetime(&start, now)?,
                    end_time: parse_datetime(&end, now)?,
                    position,
                    quality,
                    wake_count,
                    notes,
                },
            )?;
            write_session(writer, ctx, &session)
        }
        SleepAction::Update {
            session,
            start,
            end,
            position,
            quality,
            wake_count,
            notes,
        } => {
            let update = SleepSessionUpdate {
                start_time: parse_optional_datetime(start.as_deref(), now)?,
                end_time: parse_optional_datetime(end.as_deref(), now)?,
                position,
                quality,
                wake_count,
                notes,
            };
            let session = manager.update(&session, update)?;
            write_session(writer, ctx, &session)
        }
        SleepAction::Active {
            baby,
            include_auto_closed,
        } => {
            let policy = if include_auto_closed {
                ActivePolicy::IncludeAutoClosed
            } else {
                ActivePolicy::InProgressOnly
            };
            let active = manager.get_active(&baby, policy)?;
            if ctx.json {
                return write_json(writer, &active);
            }
            match active {
                Some(session) => writeln!(writer, "{}", session_line(&session, &ctx.tz))?,
                None => writeln!(writer, "No sleep session in progress for {baby}.")?,
            }
            Ok(())
        }
        SleepAction::List {
            baby,
            since,
            until,
            status,
            limit,
        } => {
            let query = SleepQuery {
                start: parse_optional_datetime(since.as_deref(), now)?,
                end: parse_optional_datetime(until.as_deref(), now)?,
                status,
                limit,
            };
            let sessions = manager.list(&baby, &query)?;
            if ctx.json {
                return write_json(writer, &sessions);
            }
            if sessions.is_empty() {
                writeln!(writer, "No sleep sessions.")?;
            }
            for session in &sessions {
                writeln!(writer, "{}", session_line(session, &ctx.tz))?;
            }
            Ok(())
        }
        SleepAction::Stats { baby, since, until } => {
            let start = parse_datetime(&since, now)?;
            let end = parse_datetime(&until, now)?;
            let stats = manager.stats(&baby, start, end)?;
            if ctx.json {
                return write_json(writer, &stats);
            }
            write_stats(writer, ctx, &baby.to_string(), start, end, &stats)
        }
        SleepAction::Classify { start, end } => {
            let start = parse_datetime(&start, now)?;
            let end = parse_datetime(&end, now)?;
            classify(writer, ctx, start, end)
        }
    }
}

fn write_session<W, C, Tz>(writer: &mut W, ctx: &Context<C, Tz>, session: &SleepSession) -> Result<()>
where
    W: Write,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    if ctx.json {
        return write_json(writer, session);
    }
    writeln!(writer, "{}", session_line(session, &ctx.tz))?;
    Ok(())
}

/// One line per session: id, status, local start and end, duration, kind.
fn session_line<Tz>(session: &SleepSession, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let start = format_local(session.start_time, tz);
    let end = match session.status {
        SleepStatus::Completed => session
            .end_time
            .map_or_else(|| "-".to_string(), |end| format_local(end, tz)),
        SleepStatus::AutoClosed => session.auto_closed_at.map_or_else(
            || "-".to_string(),
            |at| format!("closed {}", format_local(at, tz)),
        ),
        SleepStatus::InProgress => "...".to_string(),
        SleepStatus::Cancelled => "-".to_string(),
    };
    let duration = session
        .duration_minutes
        .map_or_else(|| "-".to_string(), format_minutes);
    let kind = session.kind.as_ref().map_or("-", SleepKind::as_str);
    format!(
        "{}  {:<11}  {start} -> {end}  {duration}  {kind}",
        session.id,
        session.status.as_str()
    )
}

fn write_stats<W, C, Tz>(
    writer: &mut W,
    ctx: &Context<C, Tz>,
    baby: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    stats: &SleepStats,
) -> Result<()>
where
    W: Write,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    writeln!(
        writer,
        "Sleep for {baby}, {} to {} ({})",
        format_local(start, &ctx.tz),
        format_local(end, &ctx.tz),
        ctx.tz_name
    )?;
    writeln!(
        writer,
        "Sessions:      {} ({} measured, {} auto-closed)",
        stats.total_records, stats.measured_records, stats.auto_closed_count
    )?;
    writeln!(
        writer,
        "Total:         {}",
        format_minutes(stats.total_duration_minutes)
    )?;
    writeln!(
        writer,
        "Average:       {:.2}m",
        stats.average_duration_minutes
    )?;
    writeln!(writer, "Night sleeps:  {}", stats.night_sleep_count)?;
    writeln!(writer, "Naps:          {}", stats.nap_count)?;
    writeln!(writer, "Wake-ups:      {}", stats.total_wake_count)?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct Classification {
    kind: SleepKind,
    duration_minutes: i64,
    night_minutes: i64,
}

fn classify<W, C, Tz>(
    writer: &mut W,
    ctx: &Context<C, Tz>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<()>
where
    W: Write,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    ensure_ordered("end", start, end)?;
    let window = ctx.settings.sleep.night_window;
    let night_seconds = window.night_seconds(
        start.with_timezone(&ctx.tz).naive_local(),
        end.with_timezone(&ctx.tz).naive_local(),
    );
    let classification = Classification {
        kind: window.classify_in(start, end, &ctx.tz),
        duration_minutes: (end - start).num_minutes(),
        night_minutes: night_seconds / 60,
    };
    if ctx.json {
        return write_json(writer, &classification);
    }
    writeln!(
        writer,
        "{} ({} of {} minutes between {:02}:00 and {:02}:00)",
        classification.kind,
        classification.night_minutes,
        classification.duration_minutes,
        window.start_hour(),
        window.end_hour()
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;
    use cradle_core::{BabyId, CaregiverId, ManualClock, Settings};
    use insta::assert_snapshot;

    fn ctx(json: bool) -> Context<ManualClock, Utc> {
        Context {
            clock: ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap()),
            tz: Utc,
            tz_name: "UTC".to_string(),
            settings: Settings::default(),
            caregiver: CaregiverId::new("mum").unwrap(),
            json,
        }
    }

    fn baby() -> BabyId {
        BabyId::new("baby-1").unwrap()
    }

    fn output(
        db: &mut Database,
        ctx: &Context<ManualClock, Utc>,
        action: SleepAction,
    ) -> String {
        let mut out = Vec::new();
        run(&mut out, db, ctx, action).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn record(db: &mut Database, ctx: &Context<ManualClock, Utc>, start: &str, end: &str) -> String {
        output(
            db,
            ctx,
            SleepAction::Record {
                baby: baby(),
                start: start.to_string(),
                end: end.to_string(),
                position: None,
                quality: None,
                wake_count: Some(1),
                notes: None,
            },
        )
    }

    #[test]
    fn test_start_then_stop_prints_a_night_sleep() {
        let mut db = Database::open_in_memory().unwrap();
        let ctx = ctx(true);

        let started = output(
            &mut db,
            &ctx,
            SleepAction::Start {
                baby: baby(),
                at: "2024-01-01T23:00:00Z".to_string(),
                position: None,
                auto: false,
            },
        );
        let started: SleepSession = serde_json::from_str(&started).unwrap();
        assert_eq!(started.status, SleepStatus::InProgress);

        let stopped = output(
            &mut db,
            &ctx,
            SleepAction::Stop {
                session: started.id.clone(),
                at: "2024-01-02T01:30:00Z".to_string(),
            },
        );
        let stopped: SleepSession = serde_json::from_str(&stopped).unwrap();
        assert_eq!(stopped.duration_minutes, Some(150));
        assert_eq!(stopped.kind, Some(SleepKind::Night));

        let line = session_line(&stopped, &Utc).replace(stopped.id.as_str(), "[ID]");
        assert_snapshot!(line, @"[ID]  completed    2024-01-01 23:00 -> 2024-01-02 01:30  2h 30m  night");
    }

    #[test]
    fn test_active_reports_when_nothing_runs() {
        let mut db = Database::open_in_memory().unwrap();
        let out = output(
            &mut db,
            &ctx(false),
            SleepAction::Active {
                baby: baby(),
                include_auto_closed: false,
            },
        );
        assert_snapshot!(out, @"No sleep session in progress for baby-1.");
    }

    #[test]
    fn test_stats_summarize_recorded_sleeps() {
        let mut db = Database::open_in_memory().unwrap();
        let ctx = ctx(false);
        record(&mut db, &ctx, "2024-01-01T21:00:00Z", "2024-01-02T06:00:00Z");
        record(&mut db, &ctx, "2024-01-01T13:00:00Z", "2024-01-01T13:45:00Z");

        let out = output(
            &mut db,
            &ctx,
            SleepAction::Stats {
                baby: baby(),
                since: "1 day ago".to_string(),
                until: "now".to_string(),
            },
        );
        assert_snapshot!(out, @r"
        Sleep for baby-1, 2024-01-01 08:00 to 2024-01-02 08:00 (UTC)
        Sessions:      2 (2 measured, 0 auto-closed)
        Total:         9h 45m
        Average:       292.50m
        Night sleeps:  1
        Naps:          1
        Wake-ups:      2
        ");
    }

    #[test]
    fn test_list_prints_newest_first() {
        let mut db = Database::open_in_memory().unwrap();
        let ctx = ctx(false);
        record(&mut db, &ctx, "2024-01-01T13:00:00Z", "2024-01-01T13:45:00Z");
        record(&mut db, &ctx, "2024-01-01T21:00:00Z", "2024-01-02T06:00:00Z");

        let out = output(
            &mut db,
            &ctx,
            SleepAction::List {
                baby: baby(),
                since: None,
                until: None,
                status: None,
                limit: None,
            },
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("2024-01-01 21:00 -> 2024-01-02 06:00  9h 00m  night"));
        assert!(lines[1].contains("2024-01-01 13:00 -> 2024-01-01 13:45  45m  nap"));
    }

    #[test]
    fn test_classify_reports_night_minutes() {
        let mut db = Database::open_in_memory().unwrap();
        let out = output(
            &mut db,
            &ctx(false),
            SleepAction::Classify {
                start: "2024-01-01T20:00:00Z".to_string(),
                end: "2024-01-01T21:00:00Z".to_string(),
            },
        );
        assert_snapshot!(out, @"nap (0 of 60 minutes between 21:00 and 06:00)");
    }

    #[test]
    fn test_classify_rejects_inverted_interval() {
        let mut db = Database::open_in_memory().unwrap();
        let ctx = ctx(false);
        let mut out = Vec::new();
        let err = run(
            &mut out,
            &mut db,
            &ctx,
            SleepAction::Classify {
                start: "now".to_string(),
                end: "1 hour ago".to_string(),
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("before start_time"));
    }

    #[test]
    fn test_future_start_is_rejected() {
        let mut db = Database::open_in_memory().unwrap();
        let ctx = ctx(false);
        let future = (ctx.clock.now() + Duration::minutes(30)).to_rfc3339();
        let mut out = Vec::new();
        let result = run(
            &mut out,
            &mut db,
            &ctx,
            SleepAction::Start {
                baby: baby(),
                at: future,
                position: None,
                auto: false,
            },
        );
        assert!(result.is_err());
    }
}
