//! Status command for showing what is currently running.

use std::fmt::Display;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::TimeZone;
use serde_json::json;

use cradle_core::Clock;
use cradle_db::Database;

use super::Context;
use super::util::{format_local, format_seconds, write_json};

pub fn run<W, C, Tz>(
    writer: &mut W,
    db: &Database,
    database_path: &Path,
    ctx: &Context<C, Tz>,
) -> Result<()>
where
    W: Write,
    C: Clock,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let sleeping = db.in_progress_sleep_sessions()?;
    let feeding = db.feeding_states()?;

    if ctx.json {
        let body = json!({
            "database": database_path,
            "sleeping": sleeping,
            "feeding": feeding,
            "server_time": ctx.clock.now(),
        });
        return write_json(writer, &body);
    }

    writeln!(writer, "Cradle status")?;
    writeln!(writer, "Database: {}", database_path.display())?;

    if sleeping.is_empty() && feeding.is_empty() {
        writeln!(writer, "Nothing in progress.")?;
        return Ok(());
    }

    if !sleeping.is_empty() {
        writeln!(writer, "Sleeping:")?;
        for session in &sleeping {
            writeln!(
                writer,
                "- {} since {} (session {})",
                session.baby_id,
                format_local(session.start_time, &ctx.tz),
                session.id
            )?;
        }
    }

    if !feeding.is_empty() {
        let now = ctx.clock.now();
        writeln!(writer, "Feeding:")?;
        for state in &feeding {
            let (left, right) = state.totals_at(now);
            writeln!(
                writer,
                "- {} {} since {} (left {}, right {})",
                state.baby_id,
                state.current_side,
                format_local(state.start_time, &ctx.tz),
                format_seconds(left),
                format_seconds(right)
            )?;
        }
    }

    Ok(())
}
