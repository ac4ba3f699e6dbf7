//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use cradle_core::{BabyId, RecordId, SessionId, SleepPosition, SleepQuality, SleepStatus};

/// Shared infant care tracker.
///
/// Records sleep sessions and breastfeeding timers for one or more babies,
/// classifying finished sleeps as night sleep or naps.
#[derive(Debug, Parser)]
#[command(name = "cradle", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Print JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the database and everything currently running.
    Status,

    /// Track sleep sessions.
    Sleep {
        #[command(subcommand)]
        action: SleepAction,
    },

    /// Track breastfeeding.
    Feed {
        #[command(subcommand)]
        action: FeedAction,
    },

    /// Execute one JSON request read from stdin and print the JSON response.
    Request,
}

/// Sleep session actions.
///
/// Times accept ISO 8601 (`2026-01-15T21:30:00Z`), `now`, or relative
/// expressions such as `20 minutes ago`.
#[derive(Debug, Subcommand)]
pub enum SleepAction {
    /// Start a sleep session.
    Start {
        #[arg(long)]
        baby: BabyId,

        /// When the baby fell asleep.
        #[arg(long, default_value = "now")]
        at: String,

        #[arg(long)]
        position: Option<SleepPosition>,

        /// Mark the session as detected automatically rather than entered by hand.
        #[arg(long)]
        auto: bool,
    },

    /// Stop a sleep session.
    Stop {
        session: SessionId,

        /// When the baby woke up.
        #[arg(long, default_value = "now")]
        at: String,
    },

    /// Close a session whose real end is unknown.
    AutoClose {
        session: SessionId,

        #[arg(long, default_value = "now")]
        at: String,
    },

    /// Discard an open session.
    Cancel { session: SessionId },

    /// Record a sleep that already ended.
    Record {
        #[arg(long)]
        baby: BabyId,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        #[arg(long)]
        position: Option<SleepPosition>,

        #[arg(long)]
        quality: Option<SleepQuality>,

        #[arg(long)]
        wake_count: Option<u32>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Edit a session's details.
    Update {
        session: SessionId,

        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,

        #[arg(long)]
        position: Option<SleepPosition>,

        #[arg(long)]
        quality: Option<SleepQuality>,

        #[arg(long)]
        wake_count: Option<u32>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Show the session currently running.
    Active {
        #[arg(long)]
        baby: BabyId,

        /// Fall back to the latest session if it was auto-closed.
        #[arg(long)]
        include_auto_closed: bool,
    },

    /// List sessions, newest first.
    List {
        #[arg(long)]
        baby: BabyId,

        /// Only sessions starting at or after this time.
        #[arg(long)]
        since: Option<String>,

        /// Only sessions starting at or before this time.
        #[arg(long)]
        until: Option<String>,

        #[arg(long)]
        status: Option<SleepStatus>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Summarize sessions starting in a period.
    Stats {
        #[arg(long)]
        baby: BabyId,

        #[arg(long, default_value = "1 week ago")]
        since: String,

        #[arg(long, default_value = "now")]
        until: String,
    },

    /// Classify an interval as night sleep or nap without recording it.
    Classify {
        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,
    },
}

/// Breastfeeding timer actions.
#[derive(Debug, Subcommand)]
pub enum FeedAction {
    /// Start or switch to the left side.
    Left {
        #[arg(long)]
        baby: BabyId,
    },

    /// Start or switch to the right side.
    Right {
        #[arg(long)]
        baby: BabyId,
    },

    /// Pause the running side.
    Pause {
        #[arg(long)]
        baby: BabyId,
    },

    /// Show the ongoing feeding.
    Status {
        #[arg(long)]
        baby: BabyId,
    },

    /// Finish the ongoing feeding and save it.
    Finish {
        #[arg(long)]
        baby: BabyId,
    },

    /// Reopen a recently finished feeding as a paused timer.
    Resume { record: RecordId },

    /// List finished feedings, newest first.
    List {
        #[arg(long)]
        baby: BabyId,

        #[arg(long)]
        since: Option<String>,

        #[arg(long)]
        until: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },
}
