//! `cradle request`: one JSON request in, one JSON response out.
//!
//! Errors are written to stdout as `{"error": {"kind": ..., "message": ...}}`
//! so a calling process can always parse the output; the command still exits
//! with a failure status.

use std::io::{Read, Write};

use anyhow::{Context as _, Result};
use chrono::TimeZone;
use serde_json::json;

use cradle_core::{Clock, Request, dispatch};
use cradle_db::Database;

use super::Context;

pub fn run<R, W, C, Tz>(
    reader: &mut R,
    writer: &mut W,
    db: &mut Database,
    ctx: &Context<C, Tz>,
) -> Result<()>
where
    R: Read,
    W: Write,
    C: Clock,
    Tz: TimeZone,
{
    let mut input = String::new();
    reader
        .read_to_string(&mut input)
        .context("failed to read request from stdin")?;

    let request: Request = match serde_json::from_str(&input) {
        Ok(request) => request,
        Err(err) => {
            write_error(writer, "validation", &err.to_string())?;
            anyhow::bail!("invalid request: {err}");
        }
    };
    tracing::debug!(?request, "dispatching request");

    match dispatch(
        db,
        &ctx.clock,
        &ctx.tz,
        &ctx.settings,
        &ctx.caregiver,
        request,
    ) {
        Ok(response) => {
            serde_json::to_writer(&mut *writer, &response).context("failed to write response")?;
            writeln!(writer)?;
            Ok(())
        }
        Err(err) => {
            write_error(writer, err.kind(), &err.to_string())?;
            Err(err.into())
        }
    }
}

fn write_error<W: Write>(writer: &mut W, kind: &str, message: &str) -> Result<()> {
    let body = json!({ "error": { "kind": kind, "message": message } });
    serde_json::to_writer(&mut *writer, &body).context("failed to write error")?;
    writeln!(writer)?;
    Ok(())
}
