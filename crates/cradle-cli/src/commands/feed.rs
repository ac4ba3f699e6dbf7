//! `cradle feed` subcommands.

use std::fmt::Display;
use std::io::Write;

use anyhow::Result;
use chrono::TimeZone;

use cradle_core::{
    Clock, FeedingAccumulator, FeedingActionKind, FeedingQuery, FeedingRecord, FeedingTimerState,
};
use cradle_db::Database;

use super::Context;
use super::util::{format_local, format_seconds, parse_optional_datetime, write_json};
use crate::FeedAction;

pub fn run<W, C, Tz>(
    writer: &mut W,
    db: &mut Database,
    ctx: &Context<C, Tz>,
    action: FeedAction,
) -> Result<()>
where
    W: Write,
    C: Clock,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let now = ctx.clock.now();
    let mut feeding =
        FeedingAccumulator::new(db, &ctx.clock).with_config(ctx.settings.feeding.clone());

    match action {
        FeedAction::Left { baby } => {
            let state = feeding.apply(&baby, FeedingActionKind::StartLeft)?;
            write_timer(writer, ctx, &state)
        }
        FeedAction::Right { baby } => {
            let state = feeding.apply(&baby, FeedingActionKind::StartRight)?;
            write_timer(writer, ctx, &state)
        }
        FeedAction::Pause { baby } => {
            let state = feeding.apply(&baby, FeedingActionKind::Pause)?;
            write_timer(writer, ctx, &state)
        }
        FeedAction::Status { baby } => {
            let ongoing = feeding.current(&baby)?;
            if ctx.json {
                return write_json(writer, &ongoing);
            }
            match ongoing {
                Some(ongoing) => write_timer(writer, ctx, &ongoing.state),
                None => {
                    writeln!(writer, "No feeding in progress for {baby}.")?;
                    Ok(())
                }
            }
        }
        FeedAction::Finish { baby } => {
            let record = feeding.finish(&baby, ctx.caregiver.clone())?;
            if ctx.json {
                return write_json(writer, &record);
            }
            writeln!(writer, "Saved feeding {}", record.id)?;
            writeln!(writer, "{}", record_line(&record, &ctx.tz))?;
            Ok(())
        }
        FeedAction::Resume { record } => {
            let state = feeding.resume_from_record(&record)?;
            write_timer(writer, ctx, &state)
        }
        FeedAction::List {
            baby,
            since,
            until,
            limit,
        } => {
            let query = FeedingQuery {
                start: parse_optional_datetime(since.as_deref(), now)?,
                end: parse_optional_datetime(until.as_deref(), now)?,
                limit,
            };
            let records = feeding.records(&baby, &query)?;
            if ctx.json {
                return write_json(writer, &records);
            }
            if records.is_empty() {
                writeln!(writer, "No feedings.")?;
            }
            for record in &records {
                writeln!(writer, "{}", record_line(record, &ctx.tz))?;
            }
            Ok(())
        }
    }
}

/// Prints the timer with the running segment included in the totals.
fn write_timer<W, C, Tz>(writer: &mut W, ctx: &Context<C, Tz>, state: &FeedingTimerState) -> Result<()>
where
    W: Write,
    C: Clock,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    if ctx.json {
        return write_json(writer, state);
    }
    let (left, right) = state.totals_at(ctx.clock.now());
    writeln!(
        writer,
        "{}: {} since {}, left {}, right {}",
        state.baby_id,
        state.current_side,
        format_local(state.start_time, &ctx.tz),
        format_seconds(left),
        format_seconds(right)
    )?;
    Ok(())
}

fn record_line<Tz>(record: &FeedingRecord, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    format!(
        "{}  {}  left {}  right {}  total {}",
        record.id,
        format_local(record.start_time, tz),
        format_seconds(record.duration_left),
        format_seconds(record.duration_right),
        format_seconds(record.total_seconds())
    )
}
