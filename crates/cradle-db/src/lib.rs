//! Storage layer for cradle.
//!
//! Provides persistence for sleep sessions, ongoing feeding timers and
//! finished feeding records using `rusqlite`, and implements the
//! [`SleepStore`] and [`FeedingStore`] contracts from `cradle-core`.
//!
//! # Concurrency
//!
//! Several processes (one per caregiver device) may open the same file. The
//! store contract is enforced by the database itself:
//! - at most one `in_progress` session per baby is a partial unique index;
//! - sleep and timer updates are single `UPDATE ... WHERE` statements guarded
//!   by the previous status or revision;
//! - finishing and resuming a feeding run in one `IMMEDIATE` transaction.
//!
//! A [`Database`] wraps a `rusqlite::Connection`, which is `Send` but not
//! `Sync`. Open one `Database` per thread.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 with nanoseconds and a `Z`
//! suffix (e.g. `2024-01-15T10:30:00.000000000Z`). The width is fixed, so
//! lexicographic ordering matches chronological ordering.
//!
//! ## Feeding Sequence Storage
//!
//! `feeding_records.sequence` holds the per-side summary as a JSON array of
//! `{"side", "duration_seconds", "start_time"}` objects.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior, params, params_from_iter,
};
use thiserror::Error;
use tracing::debug;

use cradle_core::{
    BabyId, FeedingQuery, FeedingRecord, FeedingSequenceItem, FeedingStore, FeedingTimerState,
    RecordId, SessionId, SleepQuery, SleepSession, SleepStatus, SleepStore, StoreError,
    ValidationError,
};

/// How long a writer waits for another connection's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SLEEP_COLUMNS: &str = "id, baby_id, caregiver_id, status, start_time, end_time, \
     duration_minutes, auto_closed_at, source, position, quality, wake_count, notes, kind, \
     created_at, updated_at";

const FEEDING_STATE_COLUMNS: &str = "baby_id, start_time, current_side, last_action_time, \
     accumulated_left_seconds, accumulated_right_seconds, revision, updated_at";

const FEEDING_RECORD_COLUMNS: &str = "id, baby_id, caregiver_id, start_time, end_time, \
     duration_left, duration_right, sequence, notes, created_at";

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp for {id}: {timestamp}")]
    TimestampParse {
        id: String,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored value does not fit the domain model.
    #[error("invalid data for {id}: {message}")]
    InvalidData { id: String, message: String },
    /// A uniqueness or check-and-set condition failed.
    #[error("{0}")]
    Conflict(String),
    /// The row to change does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict(message) => Self::Conflict(message),
            DbError::NotFound { entity, id } => Self::NotFound { entity, id },
            err => Self::Backend(Box::new(err)),
        }
    }
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for concurrency considerations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        self.conn.execute_batch(
            "
            -- Sleep sessions
            -- end_time/duration_minutes/kind: set only when status = 'completed'
            -- auto_closed_at: set only when status = 'auto_closed'
            CREATE TABLE IF NOT EXISTS sleep_sessions (
                id TEXT PRIMARY KEY,
                baby_id TEXT NOT NULL,
                caregiver_id TEXT NOT NULL,
                status TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT,
                duration_minutes INTEGER,
                auto_closed_at TEXT,
                source TEXT NOT NULL,
                position TEXT,
                quality TEXT,
                wake_count INTEGER NOT NULL DEFAULT 0,
                notes TEXT,
                kind TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sleep_baby_start
                ON sleep_sessions(baby_id, start_time);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_sleep_one_in_progress
                ON sleep_sessions(baby_id) WHERE status = 'in_progress';

            -- Ongoing feeding timers, at most one per baby
            CREATE TABLE IF NOT EXISTS feeding_states (
                baby_id TEXT PRIMARY KEY,
                start_time TEXT NOT NULL,
                current_side TEXT NOT NULL,
                last_action_time TEXT NOT NULL,
                accumulated_left_seconds INTEGER NOT NULL DEFAULT 0,
                accumulated_right_seconds INTEGER NOT NULL DEFAULT 0,
                revision INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            -- Finished feedings; sequence is a JSON array
            CREATE TABLE IF NOT EXISTS feeding_records (
                id TEXT PRIMARY KEY,
                baby_id TEXT NOT NULL,
                caregiver_id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                duration_left INTEGER NOT NULL,
                duration_right INTEGER NOT NULL,
                sequence TEXT NOT NULL DEFAULT '[]',
                notes TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_feeding_records_baby_start
                ON feeding_records(baby_id, start_time);
            ",
        )?;
        Ok(())
    }

    /// Inserts a new sleep session.
    pub fn insert_sleep_session(&self, session: &SleepSession) -> Result<(), DbError> {
        let result = self.conn.execute(
            &format!(
                "INSERT INTO sleep_sessions ({SLEEP_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                session.id.as_str(),
                session.baby_id.as_str(),
                session.caregiver_id.as_str(),
                session.status.as_str(),
                format_timestamp(session.start_time),
                session.end_time.map(format_timestamp),
                session.duration_minutes,
                session.auto_closed_at.map(format_timestamp),
                session.source.as_str(),
                session.position.map(|p| p.as_str()),
                session.quality.map(|q| q.as_str()),
                session.wake_count,
                session.notes,
                session.kind.map(|k| k.as_str()),
                format_timestamp(session.created_at),
                format_timestamp(session.updated_at),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(err) => match constraint_message(&err) {
                Some(message) if message.contains("sleep_sessions.baby_id") => {
                    Err(DbError::Conflict(format!(
                        "baby {} already has a sleep session in progress",
                        session.baby_id
                    )))
                }
                Some(_) => Err(DbError::Conflict(format!(
                    "sleep session {} already exists",
                    session.id
                ))),
                None => Err(err.into()),
            },
        }
    }

    /// Looks up a sleep session by ID.
    pub fn get_sleep_session(&self, id: &SessionId) -> Result<Option<SleepSession>, DbError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {SLEEP_COLUMNS} FROM sleep_sessions WHERE id = ?1"),
                [id.as_str()],
                SleepRow::from_row,
            )
            .optional()?;
        row.map(SleepRow::into_session).transpose()
    }

    /// Replaces a sleep session if its stored status is still `expected_status`.
    pub fn update_sleep_session(
        &self,
        session: &SleepSession,
        expected_status: SleepStatus,
    ) -> Result<(), DbError> {
        let result = self.conn.execute(
            "
            UPDATE sleep_sessions
            SET status = ?2, start_time = ?3, end_time = ?4, duration_minutes = ?5,
                auto_closed_at = ?6, position = ?7, quality = ?8, wake_count = ?9,
                notes = ?10, kind = ?11, updated_at = ?12
            WHERE id = ?1 AND status = ?13
            ",
            params![
                session.id.as_str(),
                session.status.as_str(),
                format_timestamp(session.start_time),
                session.end_time.map(format_timestamp),
                session.duration_minutes,
                session.auto_closed_at.map(format_timestamp),
                session.position.map(|p| p.as_str()),
                session.quality.map(|q| q.as_str()),
                session.wake_count,
                session.notes,
                session.kind.map(|k| k.as_str()),
                format_timestamp(session.updated_at),
                expected_status.as_str(),
            ],
        );
        let changed = match result {
            Ok(changed) => changed,
            Err(err) if constraint_message(&err).is_some() => {
                return Err(DbError::Conflict(format!(
                    "baby {} already has a sleep session in progress",
                    session.baby_id
                )));
            }
            Err(err) => return Err(err.into()),
        };
        if changed > 0 {
            return Ok(());
        }

        let current: Option<String> = self
            .conn
            .query_row(
                "SELECT status FROM sleep_sessions WHERE id = ?1",
                [session.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match current {
            None => Err(DbError::NotFound {
                entity: "sleep session",
                id: session.id.to_string(),
            }),
            Some(status) => Err(DbError::Conflict(format!(
                "sleep session {} changed concurrently (now {status})",
                session.id
            ))),
        }
    }

    /// Deletes a sleep session, returning whether it existed.
    pub fn delete_sleep_session(&self, id: &SessionId) -> Result<bool, DbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM sleep_sessions WHERE id = ?1", [id.as_str()])?;
        Ok(deleted > 0)
    }

    /// Lists a baby's sleep sessions, newest start first.
    pub fn list_sleep_sessions(
        &self,
        baby_id: &BabyId,
        query: &SleepQuery,
    ) -> Result<Vec<SleepSession>, DbError> {
        let mut sql = format!("SELECT {SLEEP_COLUMNS} FROM sleep_sessions WHERE baby_id = ?");
        let mut args = vec![baby_id.to_string()];
        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            args.push(status.as_str().to_string());
        }
        push_range(&mut sql, &mut args, query.start, query.end);
        sql.push_str(" ORDER BY start_time DESC, id ASC");
        push_limit(&mut sql, query.limit);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), SleepRow::from_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?.into_session()?);
        }
        Ok(sessions)
    }

    /// Returns the baby's ongoing feeding timer.
    pub fn get_feeding_state(&self, baby_id: &BabyId) -> Result<Option<FeedingTimerState>, DbError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {FEEDING_STATE_COLUMNS} FROM feeding_states WHERE baby_id = ?1"),
                [baby_id.as_str()],
                FeedingStateRow::from_row,
            )
            .optional()?;
        row.map(FeedingStateRow::into_state).transpose()
    }

    /// Creates a feeding timer; a baby can only have one.
    pub fn insert_feeding_state(&self, state: &FeedingTimerState) -> Result<(), DbError> {
        insert_feeding_state(&self.conn, state)
    }

    /// Replaces a feeding timer if its stored revision is still `expected_revision`.
    pub fn update_feeding_state(
        &self,
        state: &FeedingTimerState,
        expected_revision: i64,
    ) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "
            UPDATE feeding_states
            SET start_time = ?2, current_side = ?3, last_action_time = ?4,
                accumulated_left_seconds = ?5, accumulated_right_seconds = ?6,
                revision = ?7, updated_at = ?8
            WHERE baby_id = ?1 AND revision = ?9
            ",
            params![
                state.baby_id.as_str(),
                format_timestamp(state.start_time),
                state.current_side.as_str(),
                format_timestamp(state.last_action_time),
                state.accumulated_left_seconds,
                state.accumulated_right_seconds,
                state.revision,
                format_timestamp(state.updated_at),
                expected_revision,
            ],
        )?;
        if changed > 0 {
            return Ok(());
        }
        Err(stale_feeding_state(&self.conn, &state.baby_id)?)
    }

    /// Looks up a feeding record by ID.
    pub fn get_feeding_record(&self, id: &RecordId) -> Result<Option<FeedingRecord>, DbError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {FEEDING_RECORD_COLUMNS} FROM feeding_records WHERE id = ?1"),
                [id.as_str()],
                FeedingRecordRow::from_row,
            )
            .optional()?;
        row.map(FeedingRecordRow::into_record).transpose()
    }

    /// Lists a baby's feeding records, newest start first.
    pub fn list_feeding_records(
        &self,
        baby_id: &BabyId,
        query: &FeedingQuery,
    ) -> Result<Vec<FeedingRecord>, DbError> {
        let mut sql =
            format!("SELECT {FEEDING_RECORD_COLUMNS} FROM feeding_records WHERE baby_id = ?");
        let mut args = vec![baby_id.to_string()];
        push_range(&mut sql, &mut args, query.start, query.end);
        sql.push_str(" ORDER BY start_time DESC, id ASC");
        push_limit(&mut sql, query.limit);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), FeedingRecordRow::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }

    /// Deletes a feeding record, returning whether it existed.
    pub fn delete_feeding_record(&self, id: &RecordId) -> Result<bool, DbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM feeding_records WHERE id = ?1", [id.as_str()])?;
        Ok(deleted > 0)
    }

    /// Replaces the baby's timer with `record` in one transaction.
    pub fn finish_feeding(
        &mut self,
        expected_revision: i64,
        record: &FeedingRecord,
    ) -> Result<(), DbError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted = tx.execute(
            "DELETE FROM feeding_states WHERE baby_id = ?1 AND revision = ?2",
            params![record.baby_id.as_str(), expected_revision],
        )?;
        if deleted == 0 {
            return Err(stale_feeding_state(&tx, &record.baby_id)?);
        }
        insert_feeding_record(&tx, record)?;
        tx.commit()?;
        debug!(record_id = %record.id, baby_id = %record.baby_id, "feeding record stored");
        Ok(())
    }

    /// Replaces a feeding record with a reopened timer in one transaction.
    pub fn resume_feeding(
        &mut self,
        record_id: &RecordId,
        state: &FeedingTimerState,
    ) -> Result<(), DbError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let deleted = tx.execute(
            "DELETE FROM feeding_records WHERE id = ?1",
            [record_id.as_str()],
        )?;
        if deleted == 0 {
            return Err(DbError::NotFound {
                entity: "feeding record",
                id: record_id.to_string(),
            });
        }
        insert_feeding_state(&tx, state)?;
        tx.commit()?;
        debug!(%record_id, baby_id = %state.baby_id, "feeding record reopened");
        Ok(())
    }

    /// In-progress sleep sessions across all babies, ordered by baby.
    pub fn in_progress_sleep_sessions(&self) -> Result<Vec<SleepSession>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SLEEP_COLUMNS} FROM sleep_sessions
             WHERE status = 'in_progress'
             ORDER BY baby_id ASC"
        ))?;
        let rows = stmt.query_map([], SleepRow::from_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?.into_session()?);
        }
        Ok(sessions)
    }

    /// Ongoing feeding timers across all babies, ordered by baby.
    pub fn feeding_states(&self) -> Result<Vec<FeedingTimerState>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FEEDING_STATE_COLUMNS} FROM feeding_states ORDER BY baby_id ASC"
        ))?;
        let rows = stmt.query_map([], FeedingStateRow::from_row)?;
        let mut states = Vec::new();
        for row in rows {
            states.push(row?.into_state()?);
        }
        Ok(states)
    }
}

impl SleepStore for Database {
    fn insert_sleep(&mut self, session: &SleepSession) -> Result<(), StoreError> {
        Ok(self.insert_sleep_session(session)?)
    }

    fn get_sleep(&self, id: &SessionId) -> Result<Option<SleepSession>, StoreError> {
        Ok(self.get_sleep_session(id)?)
    }

    fn update_sleep(
        &mut self,
        session: &SleepSession,
        expected_status: SleepStatus,
    ) -> Result<(), StoreError> {
        Ok(self.update_sleep_session(session, expected_status)?)
    }

    fn delete_sleep(&mut self, id: &SessionId) -> Result<bool, StoreError> {
        Ok(self.delete_sleep_session(id)?)
    }

    fn query_sleep(
        &self,
        baby_id: &BabyId,
        query: &SleepQuery,
    ) -> Result<Vec<SleepSession>, StoreError> {
        Ok(self.list_sleep_sessions(baby_id, query)?)
    }
}

impl FeedingStore for Database {
    fn get_feeding_state(
        &self,
        baby_id: &BabyId,
    ) -> Result<Option<FeedingTimerState>, StoreError> {
        Ok(Self::get_feeding_state(self, baby_id)?)
    }

    fn insert_feeding_state(&mut self, state: &FeedingTimerState) -> Result<(), StoreError> {
        Ok(Self::insert_feeding_state(self, state)?)
    }

    fn update_feeding_state(
        &mut self,
        state: &FeedingTimerState,
        expected_revision: i64,
    ) -> Result<(), StoreError> {
        Ok(Self::update_feeding_state(self, state, expected_revision)?)
    }

    fn get_feeding_record(&self, id: &RecordId) -> Result<Option<FeedingRecord>, StoreError> {
        Ok(Self::get_feeding_record(self, id)?)
    }

    fn query_feeding_records(
        &self,
        baby_id: &BabyId,
        query: &FeedingQuery,
    ) -> Result<Vec<FeedingRecord>, StoreError> {
        Ok(self.list_feeding_records(baby_id, query)?)
    }

    fn delete_feeding_record(&mut self, id: &RecordId) -> Result<bool, StoreError> {
        Ok(Self::delete_feeding_record(self, id)?)
    }

    fn finish_feeding(
        &mut self,
        expected_revision: i64,
        record: &FeedingRecord,
    ) -> Result<(), StoreError> {
        Ok(Self::finish_feeding(self, expected_revision, record)?)
    }

    fn resume_feeding(
        &mut self,
        record_id: &RecordId,
        state: &FeedingTimerState,
    ) -> Result<(), StoreError> {
        Ok(Self::resume_feeding(self, record_id, state)?)
    }
}

fn insert_feeding_state(conn: &Connection, state: &FeedingTimerState) -> Result<(), DbError> {
    let result = conn.execute(
        &format!(
            "INSERT INTO feeding_states ({FEEDING_STATE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ),
        params![
            state.baby_id.as_str(),
            format_timestamp(state.start_time),
            state.current_side.as_str(),
            format_timestamp(state.last_action_time),
            state.accumulated_left_seconds,
            state.accumulated_right_seconds,
            state.revision,
            format_timestamp(state.updated_at),
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(err) if constraint_message(&err).is_some() => Err(DbError::Conflict(format!(
            "baby {} already has an ongoing feeding",
            state.baby_id
        ))),
        Err(err) => Err(err.into()),
    }
}

fn insert_feeding_record(conn: &Connection, record: &FeedingRecord) -> Result<(), DbError> {
    let sequence =
        serde_json::to_string(&record.sequence).map_err(|err| DbError::InvalidData {
            id: record.id.to_string(),
            message: err.to_string(),
        })?;
    let result = conn.execute(
        &format!(
            "INSERT INTO feeding_records ({FEEDING_RECORD_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            record.id.as_str(),
            record.baby_id.as_str(),
            record.caregiver_id.as_str(),
            format_timestamp(record.start_time),
            format_timestamp(record.end_time),
            record.duration_left,
            record.duration_right,
            sequence,
            record.notes,
            format_timestamp(record.created_at),
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(err) if constraint_message(&err).is_some() => Err(DbError::Conflict(format!(
            "feeding record {} already exists",
            record.id
        ))),
        Err(err) => Err(err.into()),
    }
}

/// Explains why a revision-guarded write to `feeding_states` touched no row.
fn stale_feeding_state(conn: &Connection, baby_id: &BabyId) -> Result<DbError, DbError> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT revision FROM feeding_states WHERE baby_id = ?1",
            [baby_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(match exists {
        None => DbError::NotFound {
            entity: "ongoing feeding",
            id: baby_id.to_string(),
        },
        Some(_) => DbError::Conflict(format!(
            "ongoing feeding for baby {baby_id} changed concurrently"
        )),
    })
}

/// The SQLite message of a constraint violation, if `err` is one.
fn constraint_message(err: &rusqlite::Error) -> Option<&str> {
    match err {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            Some(message.as_deref().unwrap_or_default())
        }
        _ => None,
    }
}

fn push_range(
    sql: &mut String,
    args: &mut Vec<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) {
    if let Some(start) = start {
        sql.push_str(" AND start_time >= ?");
        args.push(format_timestamp(start));
    }
    if let Some(end) = end {
        sql.push_str(" AND start_time <= ?");
        args.push(format_timestamp(end));
    }
}

fn push_limit(sql: &mut String, limit: Option<usize>) {
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
}

/// A `sleep_sessions` row before validation.
struct SleepRow {
    id: String,
    baby_id: String,
    caregiver_id: String,
    status: String,
    start_time: String,
    end_time: Option<String>,
    duration_minutes: Option<i64>,
    auto_closed_at: Option<String>,
    source: String,
    position: Option<String>,
    quality: Option<String>,
    wake_count: u32,
    notes: Option<String>,
    kind: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SleepRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            baby_id: row.get(1)?,
            caregiver_id: row.get(2)?,
            status: row.get(3)?,
            start_time: row.get(4)?,
            end_time: row.get(5)?,
            duration_minutes: row.get(6)?,
            auto_closed_at: row.get(7)?,
            source: row.get(8)?,
            position: row.get(9)?,
            quality: row.get(10)?,
            wake_count: row.get(11)?,
            notes: row.get(12)?,
            kind: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    fn into_session(self) -> Result<SleepSession, DbError> {
        let id = &self.id;
        Ok(SleepSession {
            id: parse_field(id, id)?,
            baby_id: parse_field(&self.baby_id, id)?,
            caregiver_id: parse_field(&self.caregiver_id, id)?,
            status: parse_field(&self.status, id)?,
            start_time: parse_timestamp(&self.start_time, id)?,
            end_time: parse_optional_timestamp(self.end_time.as_deref(), id)?,
            duration_minutes: self.duration_minutes,
            auto_closed_at: parse_optional_timestamp(self.auto_closed_at.as_deref(), id)?,
            source: parse_field(&self.source, id)?,
            position: parse_optional_field(self.position.as_deref(), id)?,
            quality: parse_optional_field(self.quality.as_deref(), id)?,
            wake_count: self.wake_count,
            notes: self.notes,
            kind: parse_optional_field(self.kind.as_deref(), id)?,
            created_at: parse_timestamp(&self.created_at, id)?,
            updated_at: parse_timestamp(&self.updated_at, id)?,
        })
    }
}

/// A `feeding_states` row before validation.
struct FeedingStateRow {
    baby_id: String,
    start_time: String,
    current_side: String,
    last_action_time: String,
    accumulated_left_seconds: i64,
    accumulated_right_seconds: i64,
    revision: i64,
    updated_at: String,
}

impl FeedingStateRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            baby_id: row.get(0)?,
            start_time: row.get(1)?,
            current_side: row.get(2)?,
            last_action_time: row.get(3)?,
            accumulated_left_seconds: row.get(4)?,
            accumulated_right_seconds: row.get(5)?,
            revision: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_state(self) -> Result<FeedingTimerState, DbError> {
        let id = &self.baby_id;
        Ok(FeedingTimerState {
            baby_id: parse_field(id, id)?,
            start_time: parse_timestamp(&self.start_time, id)?,
            current_side: parse_field(&self.current_side, id)?,
            last_action_time: parse_timestamp(&self.last_action_time, id)?,
            accumulated_left_seconds: self.accumulated_left_seconds,
            accumulated_right_seconds: self.accumulated_right_seconds,
            revision: self.revision,
            updated_at: parse_timestamp(&self.updated_at, id)?,
        })
    }
}

/// A `feeding_records` row before validation.
struct FeedingRecordRow {
    id: String,
    baby_id: String,
    caregiver_id: String,
    start_time: String,
    end_time: String,
    duration_left: i64,
    duration_right: i64,
    sequence: String,
    notes: Option<String>,
    created_at: String,
}

impl FeedingRecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            baby_id: row.get(1)?,
            caregiver_id: row.get(2)?,
            start_time: row.get(3)?,
            end_time: row.get(4)?,
            duration_left: row.get(5)?,
            duration_right: row.get(6)?,
            sequence: row.get(7)?,
            notes: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<FeedingRecord, DbError> {
        let id = &self.id;
        let sequence: Vec<FeedingSequenceItem> =
            serde_json::from_str(&self.sequence).map_err(|err| DbError::InvalidData {
                id: id.clone(),
                message: format!("invalid feeding sequence: {err}"),
            })?;
        Ok(FeedingRecord {
            id: parse_field(id, id)?,
            baby_id: parse_field(&self.baby_id, id)?,
            caregiver_id: parse_field(&self.caregiver_id, id)?,
            start_time: parse_timestamp(&self.start_time, id)?,
            end_time: parse_timestamp(&self.end_time, id)?,
            duration_left: self.duration_left,
            duration_right: self.duration_right,
            sequence,
            notes: self.notes,
            created_at: parse_timestamp(&self.created_at, id)?,
        })
    }
}

fn parse_field<T>(value: &str, id: &str) -> Result<T, DbError>
where
    T: FromStr<Err = ValidationError>,
{
    value.parse().map_err(|err: ValidationError| DbError::InvalidData {
        id: id.to_string(),
        message: err.to_string(),
    })
}

fn parse_optional_field<T>(value: Option<&str>, id: &str) -> Result<Option<T>, DbError>
where
    T: FromStr<Err = ValidationError>,
{
    value.map(|v| parse_field(v, id)).transpose()
}

fn parse_timestamp(timestamp: &str, id: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            id: id.to_string(),
            timestamp: timestamp.to_string(),
            source,
        })
}

fn parse_optional_timestamp(
    timestamp: Option<&str>,
    id: &str,
) -> Result<Option<DateTime<Utc>>, DbError> {
    timestamp.map(|t| parse_timestamp(t, id)).transpose()
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use chrono::TimeZone;
    use cradle_core::{
        BreastSide, CaregiverId, FeedingAccumulator, FeedingActionKind, FeedingSide, ManualClock,
        SleepKind, SleepPosition, SleepSessionManager, SleepSource, StartSleep,
    };

    fn t(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, 0).unwrap()
    }

    fn baby() -> BabyId {
        BabyId::new("baby-1").unwrap()
    }

    fn session(id: &str, status: SleepStatus, start: DateTime<Utc>) -> SleepSession {
        SleepSession {
            id: SessionId::new(id).unwrap(),
            baby_id: baby(),
            caregiver_id: CaregiverId::new("mum").unwrap(),
            status,
            start_time: start,
            end_time: None,
            duration_minutes: None,
            auto_closed_at: None,
            source: SleepSource::Manual,
            position: Some(SleepPosition::Left),
            quality: None,
            wake_count: 0,
            notes: None,
            kind: None,
            created_at: start,
            updated_at: start,
        }
    }

    fn timer(revision: i64) -> FeedingTimerState {
        FeedingTimerState {
            baby_id: baby(),
            start_time: t(3, 0),
            current_side: FeedingSide::Left,
            last_action_time: t(3, 0),
            accumulated_left_seconds: 0,
            accumulated_right_seconds: 0,
            revision,
            updated_at: t(3, 0),
        }
    }

    fn record(id: &str, start: DateTime<Utc>) -> FeedingRecord {
        FeedingRecord {
            id: RecordId::new(id).unwrap(),
            baby_id: baby(),
            caregiver_id: CaregiverId::new("mum").unwrap(),
            start_time: start,
            end_time: start + chrono::Duration::minutes(12),
            duration_left: 420,
            duration_right: 300,
            sequence: vec![
                FeedingSequenceItem {
                    side: BreastSide::Left,
                    duration_seconds: 420,
                    start_time: start,
                },
                FeedingSequenceItem {
                    side: BreastSide::Right,
                    duration_seconds: 300,
                    start_time: start,
                },
            ],
            notes: Some("sleepy".to_string()),
            created_at: start,
        }
    }

    fn table_columns(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info({table})"))
            .expect("prepare table_info");
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query table_info");
        rows.map(|row| row.expect("table_info row")).collect()
    }

    fn index_names(conn: &Connection, table: &str) -> HashSet<String> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA index_list({table})"))
            .expect("prepare index_list");
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .expect("query index_list");
        rows.map(|row| row.expect("index_list row")).collect()
    }

    #[test]
    fn test_open_in_memory_database() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_schema_matches_data_model() {
        let db = Database::open_in_memory().expect("open in-memory db");

        assert_eq!(
            table_columns(&db.conn, "sleep_sessions"),
            vec![
                "id",
                "baby_id",
                "caregiver_id",
                "status",
                "start_time",
                "end_time",
                "duration_minutes",
                "auto_closed_at",
                "source",
                "position",
                "quality",
                "wake_count",
                "notes",
                "kind",
                "created_at",
                "updated_at",
            ]
        );
        assert_eq!(
            table_columns(&db.conn, "feeding_states"),
            vec![
                "baby_id",
                "start_time",
                "current_side",
                "last_action_time",
                "accumulated_left_seconds",
                "accumulated_right_seconds",
                "revision",
                "updated_at",
            ]
        );
        assert_eq!(
            table_columns(&db.conn, "feeding_records"),
            vec![
                "id",
                "baby_id",
                "caregiver_id",
                "start_time",
                "end_time",
                "duration_left",
                "duration_right",
                "sequence",
                "notes",
                "created_at",
            ]
        );

        let sleep_indexes = index_names(&db.conn, "sleep_sessions");
        assert!(sleep_indexes.contains("idx_sleep_baby_start"));
        assert!(sleep_indexes.contains("idx_sleep_one_in_progress"));
        assert!(index_names(&db.conn, "feeding_records").contains("idx_feeding_records_baby_start"));
    }

    #[test]
    fn test_init_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db.init().unwrap();
    }

    #[test]
    fn test_sleep_session_round_trips() {
        let db = Database::open_in_memory().unwrap();
        let mut completed = session("s1", SleepStatus::Completed, t(21, 0));
        completed.end_time = Some(t(23, 30));
        completed.duration_minutes = Some(150);
        completed.kind = Some(SleepKind::Night);
        completed.wake_count = 2;
        completed.notes = Some("fussy at first".to_string());

        db.insert_sleep_session(&completed).unwrap();

        let loaded = db.get_sleep_session(&completed.id).unwrap();
        assert_eq!(loaded, Some(completed));
        assert_eq!(
            db.get_sleep_session(&SessionId::new("missing").unwrap())
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_sub_second_timestamps_survive_storage() {
        let db = Database::open_in_memory().unwrap();
        let start = t(9, 0) + chrono::Duration::nanoseconds(123_456_789);
        let stored = session("s1", SleepStatus::InProgress, start);
        db.insert_sleep_session(&stored).unwrap();

        let loaded = db.get_sleep_session(&stored.id).unwrap().unwrap();
        assert_eq!(loaded.start_time, start);
    }

    #[test]
    fn test_duplicate_session_id_conflicts() {
        let db = Database::open_in_memory().unwrap();
        db.insert_sleep_session(&session("s1", SleepStatus::Completed, t(9, 0)))
            .unwrap();

        let err = db
            .insert_sleep_session(&session("s1", SleepStatus::Completed, t(10, 0)))
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(ref m) if m.contains("already exists")));
    }

    #[test]
    fn test_second_in_progress_session_conflicts() {
        let db = Database::open_in_memory().unwrap();
        db.insert_sleep_session(&session("s1", SleepStatus::InProgress, t(9, 0)))
            .unwrap();

        let err = db
            .insert_sleep_session(&session("s2", SleepStatus::InProgress, t(9, 5)))
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(ref m) if m.contains("in progress")));

        // Closed sessions are unrestricted.
        db.insert_sleep_session(&session("s3", SleepStatus::Completed, t(7, 0)))
            .unwrap();
        db.insert_sleep_session(&session("s4", SleepStatus::Cancelled, t(8, 0)))
            .unwrap();
    }

    #[test]
    fn test_concurrent_connections_cannot_both_start_a_session() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("cradle.db");
        let first = Database::open(&path).unwrap();
        let second = Database::open(&path).unwrap();

        first
            .insert_sleep_session(&session("s1", SleepStatus::InProgress, t(9, 0)))
            .unwrap();
        let err = second
            .insert_sleep_session(&session("s2", SleepStatus::InProgress, t(9, 0)))
            .unwrap_err();

        assert!(matches!(err, DbError::Conflict(_)));
        let sessions = second
            .list_sleep_sessions(&baby(), &SleepQuery::default())
            .unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id.as_str(), "s1");
    }

    #[test]
    fn test_update_checks_expected_status() {
        let db = Database::open_in_memory().unwrap();
        let open = session("s1", SleepStatus::InProgress, t(9, 0));
        db.insert_sleep_session(&open).unwrap();

        let mut cancelled = open.clone();
        cancelled.status = SleepStatus::Cancelled;
        db.update_sleep_session(&cancelled, SleepStatus::InProgress)
            .unwrap();

        let mut completed = open;
        completed.status = SleepStatus::Completed;
        completed.end_time = Some(t(10, 0));
        completed.duration_minutes = Some(60);
        let err = db
            .update_sleep_session(&completed, SleepStatus::InProgress)
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(ref m) if m.contains("now cancelled")));

        let stored = db.get_sleep_session(&completed.id).unwrap().unwrap();
        assert_eq!(stored.status, SleepStatus::Cancelled);
    }

    #[test]
    fn test_update_of_missing_session_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .update_sleep_session(
                &session("ghost", SleepStatus::Completed, t(9, 0)),
                SleepStatus::InProgress,
            )
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { entity: "sleep session", .. }));
    }

    #[test]
    fn test_reopening_a_session_respects_the_in_progress_index() {
        let db = Database::open_in_memory().unwrap();
        db.insert_sleep_session(&session("s1", SleepStatus::InProgress, t(9, 0)))
            .unwrap();
        let done = session("s2", SleepStatus::Cancelled, t(8, 0));
        db.insert_sleep_session(&done).unwrap();

        let mut reopened = done;
        reopened.status = SleepStatus::InProgress;
        let err = db
            .update_sleep_session(&reopened, SleepStatus::Cancelled)
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[test]
    fn test_list_orders_filters_and_limits() {
        let db = Database::open_in_memory().unwrap();
        db.insert_sleep_session(&session("a", SleepStatus::Completed, t(8, 0)))
            .unwrap();
        db.insert_sleep_session(&session("b", SleepStatus::Cancelled, t(12, 0)))
            .unwrap();
        db.insert_sleep_session(&session("c", SleepStatus::Completed, t(12, 0)))
            .unwrap();
        db.insert_sleep_session(&session("d", SleepStatus::InProgress, t(15, 0)))
            .unwrap();
        let mut other_baby = session("e", SleepStatus::Completed, t(13, 0));
        other_baby.baby_id = BabyId::new("baby-2").unwrap();
        db.insert_sleep_session(&other_baby).unwrap();

        let ids = |sessions: Vec<SleepSession>| -> Vec<String> {
            sessions.into_iter().map(|s| s.id.to_string()).collect()
        };

        let all = db
            .list_sleep_sessions(&baby(), &SleepQuery::default())
            .unwrap();
        assert_eq!(ids(all), vec!["d", "b", "c", "a"]);

        let window = SleepQuery {
            start: Some(t(8, 0)),
            end: Some(t(12, 0)),
            status: Some(SleepStatus::Completed),
            limit: None,
        };
        assert_eq!(
            ids(db.list_sleep_sessions(&baby(), &window).unwrap()),
            vec!["c", "a"]
        );

        let latest = SleepQuery {
            limit: Some(1),
            ..SleepQuery::default()
        };
        assert_eq!(
            ids(db.list_sleep_sessions(&baby(), &latest).unwrap()),
            vec!["d"]
        );
    }

    #[test]
    fn test_delete_reports_whether_row_existed() {
        let db = Database::open_in_memory().unwrap();
        let stored = session("s1", SleepStatus::Completed, t(9, 0));
        db.insert_sleep_session(&stored).unwrap();

        assert!(db.delete_sleep_session(&stored.id).unwrap());
        assert!(!db.delete_sleep_session(&stored.id).unwrap());
    }

    #[test]
    fn test_feeding_state_updates_are_revision_checked() {
        let db = Database::open_in_memory().unwrap();
        db.insert_feeding_state(&timer(0)).unwrap();
        assert!(matches!(
            db.insert_feeding_state(&timer(0)),
            Err(DbError::Conflict(_))
        ));

        let mut next = timer(1);
        next.current_side = FeedingSide::Right;
        next.accumulated_left_seconds = 300;
        db.update_feeding_state(&next, 0).unwrap();
        assert_eq!(db.get_feeding_state(&baby()).unwrap(), Some(next.clone()));

        let err = db.update_feeding_state(&timer(1), 0).unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));

        let err = db
            .update_feeding_state(
                &FeedingTimerState {
                    baby_id: BabyId::new("nobody").unwrap(),
                    ..timer(1)
                },
                0,
            )
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[test]
    fn test_feeding_record_round_trips_with_sequence() {
        let db = Database::open_in_memory().unwrap();
        let stored = record("r1", t(3, 0));
        insert_feeding_record(&db.conn, &stored).unwrap();

        assert_eq!(db.get_feeding_record(&stored.id).unwrap(), Some(stored));
    }

    #[test]
    fn test_finish_swaps_timer_for_record() {
        let mut db = Database::open_in_memory().unwrap();
        db.insert_feeding_state(&timer(3)).unwrap();

        db.finish_feeding(3, &record("r1", t(3, 0))).unwrap();

        assert_eq!(db.get_feeding_state(&baby()).unwrap(), None);
        assert!(db.get_feeding_record(&RecordId::new("r1").unwrap()).unwrap().is_some());
    }

    #[test]
    fn test_failed_finish_keeps_the_timer() {
        let mut db = Database::open_in_memory().unwrap();
        insert_feeding_record(&db.conn, &record("r1", t(1, 0))).unwrap();
        db.insert_feeding_state(&timer(2)).unwrap();

        // Duplicate record ID: the insert fails after the timer row was deleted.
        let err = db.finish_feeding(2, &record("r1", t(3, 0))).unwrap_err();
        assert!(matches!(err, DbError::Conflict(ref m) if m.contains("r1")));
        assert_eq!(db.get_feeding_state(&baby()).unwrap(), Some(timer(2)));

        let err = db.finish_feeding(1, &record("r2", t(3, 0))).unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
        assert_eq!(db.get_feeding_state(&baby()).unwrap(), Some(timer(2)));
    }

    #[test]
    fn test_resume_swaps_record_for_timer() {
        let mut db = Database::open_in_memory().unwrap();
        let stored = record("r1", t(3, 0));
        insert_feeding_record(&db.conn, &stored).unwrap();

        let mut reopened = timer(0);
        reopened.current_side = FeedingSide::Paused;
        db.resume_feeding(&stored.id, &reopened).unwrap();

        assert_eq!(db.get_feeding_record(&stored.id).unwrap(), None);
        assert_eq!(db.get_feeding_state(&baby()).unwrap(), Some(reopened.clone()));

        let err = db.resume_feeding(&stored.id, &reopened).unwrap_err();
        assert!(matches!(err, DbError::NotFound { entity: "feeding record", .. }));
    }

    #[test]
    fn test_failed_resume_keeps_the_record() {
        let mut db = Database::open_in_memory().unwrap();
        let stored = record("r1", t(3, 0));
        insert_feeding_record(&db.conn, &stored).unwrap();
        db.insert_feeding_state(&timer(0)).unwrap();

        let err = db.resume_feeding(&stored.id, &timer(0)).unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
        assert!(db.get_feeding_record(&stored.id).unwrap().is_some());
    }

    #[test]
    fn test_open_timers_are_listed_across_babies() {
        let db = Database::open_in_memory().unwrap();
        let mut other = session("s2", SleepStatus::InProgress, t(9, 30));
        other.baby_id = BabyId::new("baby-0").unwrap();
        db.insert_sleep_session(&session("s1", SleepStatus::InProgress, t(9, 0)))
            .unwrap();
        db.insert_sleep_session(&other).unwrap();
        db.insert_sleep_session(&session("s3", SleepStatus::Completed, t(7, 0)))
            .unwrap();
        db.insert_feeding_state(&timer(0)).unwrap();

        let sleeping: Vec<String> = db
            .in_progress_sleep_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.id.to_string())
            .collect();
        assert_eq!(sleeping, vec!["s2", "s1"]);
        assert_eq!(db.feeding_states().unwrap(), vec![timer(0)]);
    }

    #[test]
    fn test_db_errors_map_to_store_errors() {
        let err: StoreError = DbError::Conflict("taken".into()).into();
        assert!(matches!(err, StoreError::Conflict(_)));

        let err: StoreError = DbError::InvalidData {
            id: "s1".into(),
            message: "bad".into(),
        }
        .into();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[test]
    fn test_sleep_manager_runs_on_sqlite() {
        let mut db = Database::open_in_memory().unwrap();
        let clock = ManualClock::new(t(22, 0));
        let mut manager = SleepSessionManager::new(&mut db, &clock);

        let started = manager
            .start(
                CaregiverId::new("dad").unwrap(),
                StartSleep {
                    baby_id: baby(),
                    start_time: t(21, 0),
                    source: None,
                    position: None,
                },
            )
            .unwrap();
        let stopped = manager.stop(&started.id, t(23, 45)).unwrap();

        assert_eq!(stopped.duration_minutes, Some(165));
        assert_eq!(stopped.kind, Some(SleepKind::Night));
        assert_eq!(db.get_sleep_session(&started.id).unwrap(), Some(stopped));
    }

    #[test]
    fn test_feeding_accumulator_runs_on_sqlite() {
        let mut db = Database::open_in_memory().unwrap();
        let clock = ManualClock::new(t(3, 0));
        let mut feeding = FeedingAccumulator::new(&mut db, &clock);

        feeding.apply(&baby(), FeedingActionKind::StartLeft).unwrap();
        clock.advance(chrono::Duration::minutes(5));
        feeding.apply(&baby(), FeedingActionKind::StartRight).unwrap();
        clock.advance(chrono::Duration::minutes(3));
        let finished = feeding
            .finish(&baby(), CaregiverId::new("mum").unwrap())
            .unwrap();

        assert_eq!(finished.duration_left, 300);
        assert_eq!(finished.duration_right, 180);
        assert_eq!(feeding.latest(&baby()).unwrap(), Some(finished.clone()));

        clock.advance(chrono::Duration::minutes(10));
        let resumed = feeding.resume_from_record(&finished.id).unwrap();
        assert_eq!(resumed.current_side, FeedingSide::Paused);
        assert_eq!(resumed.accumulated_left_seconds, 300);
        assert_eq!(db.get_feeding_record(&finished.id).unwrap(), None);
    }
}
