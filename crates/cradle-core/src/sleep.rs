//! Sleep session lifecycle.
//!
//! A session is opened by [`SleepSessionManager::start`] and closed exactly once,
//! by one of:
//!
//! - [`stop`](SleepSessionManager::stop): measured end, `completed`, classified night/nap;
//! - [`auto_close`](SleepSessionManager::auto_close): end unknown, `auto_closed`, no duration;
//! - [`cancel`](SleepSessionManager::cancel): discarded, `cancelled`.
//!
//! Closed sessions are terminal. `stop` on a completed session returns it
//! unchanged so retried requests are harmless.
//!
//! A baby has at most one `in_progress` session. The manager checks this before
//! inserting, and the store enforces it again so that two racing `start`
//! requests cannot both succeed.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::error::EngineError;
use crate::night::NightWindow;
use crate::request::{RecordSleep, StartSleep};
use crate::stats::SleepStats;
use crate::store::{SleepStore, StoreError};
use crate::types::{
    BabyId, CaregiverId, SessionId, SleepKind, SleepPosition, SleepQuality, SleepSource,
    SleepStatus, ValidationError, ensure_ordered, floor_minutes,
};

/// A bounded sleep interval for one baby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepSession {
    pub id: SessionId,
    pub baby_id: BabyId,
    pub caregiver_id: CaregiverId,
    pub status: SleepStatus,
    pub start_time: DateTime<Utc>,
    /// Set if and only if `status` is `completed`.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// `floor((end_time - start_time) / 60s)`, set if and only if `status` is `completed`.
    #[serde(default)]
    pub duration_minutes: Option<i64>,
    /// Set if and only if `status` is `auto_closed`.
    #[serde(default)]
    pub auto_closed_at: Option<DateTime<Utc>>,
    pub source: SleepSource,
    #[serde(default)]
    pub position: Option<SleepPosition>,
    #[serde(default)]
    pub quality: Option<SleepQuality>,
    #[serde(default)]
    pub wake_count: u32,
    #[serde(default)]
    pub notes: Option<String>,
    /// Night or nap, derived when the session completes.
    #[serde(default)]
    pub kind: Option<SleepKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field edits for an existing session. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepSessionUpdate {
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub position: Option<SleepPosition>,
    #[serde(default)]
    pub quality: Option<SleepQuality>,
    #[serde(default)]
    pub wake_count: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SleepSessionUpdate {
    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Filter for listing a baby's sessions.
///
/// Bounds apply to `start_time` and are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub status: Option<SleepStatus>,
    pub limit: Option<usize>,
}

/// Which sessions count as "active" for [`SleepSessionManager::get_active`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivePolicy {
    /// Only an `in_progress` session.
    #[default]
    InProgressOnly,
    /// An `in_progress` session, or else the most recent session if it was auto-closed.
    IncludeAutoClosed,
}

/// Tunables for the sleep lifecycle.
#[derive(Debug, Clone)]
pub struct SleepConfig {
    /// Window used to classify completed sessions.
    pub night_window: NightWindow,
    /// How far in the future a start time may lie (device clock drift).
    pub max_future_skew: Duration,
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            night_window: NightWindow::default(),
            max_future_skew: Duration::minutes(5),
        }
    }
}

/// Owns the lifecycle of sleep sessions.
///
/// `Tz` is the caregivers' local time zone; the night window is applied to
/// local clock time.
pub struct SleepSessionManager<S, C, Tz: TimeZone = Utc> {
    store: S,
    clock: C,
    tz: Tz,
    config: SleepConfig,
}

impl<S: SleepStore, C: Clock> SleepSessionManager<S, C, Utc> {
    pub fn new(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            tz: Utc,
            config: SleepConfig::default(),
        }
    }
}

impl<S: SleepStore, C: Clock, Tz: TimeZone> SleepSessionManager<S, C, Tz> {
    /// Classifies against `tz` local time instead.
    pub fn with_timezone<T: TimeZone>(self, tz: T) -> SleepSessionManager<S, C, T> {
        SleepSessionManager {
            store: self.store,
            clock: self.clock,
            tz,
            config: self.config,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: SleepConfig) -> Self {
        self.config = config;
        self
    }

    /// Opens a new `in_progress` session.
    pub fn start(
        &mut self,
        caregiver_id: CaregiverId,
        request: StartSleep,
    ) -> Result<SleepSession, EngineError> {
        let now = self.clock.now();
        self.ensure_not_future(request.start_time, now)?;

        if let Some(active) = self.get_active(&request.baby_id, ActivePolicy::InProgressOnly)? {
            return Err(EngineError::conflict(format!(
                "baby {} already has sleep session {} in progress",
                request.baby_id, active.id
            )));
        }

        let session = SleepSession {
            id: SessionId::generate(),
            baby_id: request.baby_id,
            caregiver_id,
            status: SleepStatus::InProgress,
            start_time: request.start_time,
            end_time: None,
            duration_minutes: None,
            auto_closed_at: None,
            source: request.source.unwrap_or(SleepSource::Manual),
            position: request.position,
            quality: None,
            wake_count: 0,
            notes: None,
            kind: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_sleep(&session)?;
        debug!(
            session_id = %session.id,
            baby_id = %session.baby_id,
            start_time = %session.start_time,
            "sleep session started"
        );
        Ok(session)
    }

    /// Creates an already-completed session after the fact.
    pub fn record_completed(
        &mut self,
        caregiver_id: CaregiverId,
        request: RecordSleep,
    ) -> Result<SleepSession, EngineError> {
        let now = self.clock.now();
        ensure_ordered("end_time", request.start_time, request.end_time)?;
        self.ensure_not_future(request.start_time, now)?;

        let mut session = SleepSession {
            id: SessionId::generate(),
            baby_id: request.baby_id,
            caregiver_id,
            status: SleepStatus::InProgress,
            start_time: request.start_time,
            end_time: None,
            duration_minutes: None,
            auto_closed_at: None,
            source: SleepSource::Manual,
            position: request.position,
            quality: request.quality,
            wake_count: request.wake_count.unwrap_or(0),
            notes: request.notes,
            kind: None,
            created_at: now,
            updated_at: now,
        };
        self.complete(&mut session, request.end_time);
        self.store.insert_sleep(&session)?;
        debug!(
            session_id = %session.id,
            baby_id = %session.baby_id,
            duration_minutes = ?session.duration_minutes,
            kind = ?session.kind,
            "sleep session recorded"
        );
        Ok(session)
    }

    /// Closes a session with a measured end time.
    ///
    /// Returns a completed session unchanged, whatever `end_time` is passed.
    pub fn stop(
        &mut self,
        id: &SessionId,
        end_time: DateTime<Utc>,
    ) -> Result<SleepSession, EngineError> {
        let mut session = self.load(id)?;
        match session.status {
            SleepStatus::Completed => {
                debug!(session_id = %id, "sleep session already completed");
                return Ok(session);
            }
            SleepStatus::AutoClosed | SleepStatus::Cancelled => {
                return Err(EngineError::conflict(format!(
                    "sleep session {id} is {} and cannot be stopped",
                    session.status
                )));
            }
            SleepStatus::InProgress => {}
        }
        ensure_ordered("end_time", session.start_time, end_time)?;

        self.complete(&mut session, end_time);
        session.updated_at = self.clock.now();
        let session = self.close(session, &[SleepStatus::Completed])?;
        debug!(
            session_id = %id,
            duration_minutes = ?session.duration_minutes,
            kind = ?session.kind,
            "sleep session stopped"
        );
        Ok(session)
    }

    /// Closes a session whose real end is unknown.
    ///
    /// A session that already has an end (completed) or was already
    /// auto-closed is returned unchanged.
    pub fn auto_close(
        &mut self,
        id: &SessionId,
        auto_closed_at: DateTime<Utc>,
    ) -> Result<SleepSession, EngineError> {
        let mut session = self.load(id)?;
        match session.status {
            SleepStatus::Completed | SleepStatus::AutoClosed => return Ok(session),
            SleepStatus::Cancelled => {
                return Err(EngineError::conflict(format!(
                    "sleep session {id} is cancelled and cannot be auto-closed"
                )));
            }
            SleepStatus::InProgress => {}
        }
        ensure_ordered("auto_closed_at", session.start_time, auto_closed_at)?;

        session.status = SleepStatus::AutoClosed;
        session.auto_closed_at = Some(auto_closed_at);
        session.end_time = None;
        session.duration_minutes = None;
        session.kind = None;
        session.updated_at = self.clock.now();
        let session = self.close(session, &[SleepStatus::Completed, SleepStatus::AutoClosed])?;
        debug!(session_id = %id, status = %session.status, "sleep session auto-closed");
        Ok(session)
    }

    /// Discards an open session.
    pub fn cancel(&mut self, id: &SessionId) -> Result<SleepSession, EngineError> {
        let mut session = self.load(id)?;
        match session.status {
            SleepStatus::Cancelled => return Ok(session),
            SleepStatus::Completed | SleepStatus::AutoClosed => {
                return Err(EngineError::conflict(format!(
                    "sleep session {id} is {} and cannot be cancelled",
                    session.status
                )));
            }
            SleepStatus::InProgress => {}
        }
        session.status = SleepStatus::Cancelled;
        session.updated_at = self.clock.now();
        let session = self.close(session, &[SleepStatus::Cancelled])?;
        debug!(session_id = %id, "sleep session cancelled");
        Ok(session)
    }

    /// Edits fields of a session without changing its status.
    ///
    /// Changing the times of a completed session recomputes its duration and
    /// classification. `end_time` can only be edited on completed sessions;
    /// open sessions are closed with [`stop`](Self::stop).
    pub fn update(
        &mut self,
        id: &SessionId,
        update: SleepSessionUpdate,
    ) -> Result<SleepSession, EngineError> {
        let current = self.load(id)?;
        if update.is_empty() {
            return Ok(current);
        }
        let now = self.clock.now();
        let mut session = current.clone();

        if update.end_time.is_some() && session.status != SleepStatus::Completed {
            return Err(EngineError::conflict(format!(
                "sleep session {id} is {}; only completed sessions have an end_time",
                session.status
            )));
        }

        let start_time = update.start_time.unwrap_or(session.start_time);
        match session.status {
            SleepStatus::Completed => {
                let end_time = update
                    .end_time
                    .or(session.end_time)
                    .ok_or(ValidationError::MissingField { field: "end_time" })?;
                ensure_ordered("end_time", start_time, end_time)?;
                session.start_time = start_time;
                self.complete(&mut session, end_time);
            }
            SleepStatus::AutoClosed => {
                if let Some(closed_at) = session.auto_closed_at {
                    ensure_ordered("auto_closed_at", start_time, closed_at)?;
                }
                session.start_time = start_time;
            }
            SleepStatus::InProgress => {
                self.ensure_not_future(start_time, now)?;
                session.start_time = start_time;
            }
            SleepStatus::Cancelled => session.start_time = start_time,
        }

        if let Some(position) = update.position {
            session.position = Some(position);
        }
        if let Some(quality) = update.quality {
            session.quality = Some(quality);
        }
        if let Some(wake_count) = update.wake_count {
            session.wake_count = wake_count;
        }
        if let Some(notes) = update.notes {
            session.notes = Some(notes);
        }
        session.updated_at = now;

        self.store.update_sleep(&session, current.status)?;
        debug!(session_id = %id, "sleep session updated");
        Ok(session)
    }

    pub fn get(&self, id: &SessionId) -> Result<SleepSession, EngineError> {
        self.load(id)
    }

    /// The session a client should show as running for `baby_id`.
    pub fn get_active(
        &self,
        baby_id: &BabyId,
        policy: ActivePolicy,
    ) -> Result<Option<SleepSession>, EngineError> {
        let in_progress = SleepQuery {
            status: Some(SleepStatus::InProgress),
            limit: Some(1),
            ..SleepQuery::default()
        };
        if let Some(session) = self.store.query_sleep(baby_id, &in_progress)?.into_iter().next() {
            return Ok(Some(session));
        }
        if policy == ActivePolicy::InProgressOnly {
            return Ok(None);
        }
        let latest = SleepQuery {
            limit: Some(1),
            ..SleepQuery::default()
        };
        Ok(self
            .store
            .query_sleep(baby_id, &latest)?
            .into_iter()
            .next()
            .filter(|s| s.status == SleepStatus::AutoClosed))
    }

    pub fn list(
        &self,
        baby_id: &BabyId,
        query: &SleepQuery,
    ) -> Result<Vec<SleepSession>, EngineError> {
        if let (Some(start), Some(end)) = (query.start, query.end) {
            ensure_ordered("end", start, end)?;
        }
        Ok(self.store.query_sleep(baby_id, query)?)
    }

    /// Aggregates sessions starting within `[start, end]`.
    pub fn stats(
        &self,
        baby_id: &BabyId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SleepStats, EngineError> {
        let query = SleepQuery {
            start: Some(start),
            end: Some(end),
            ..SleepQuery::default()
        };
        let sessions = self.list(baby_id, &query)?;
        Ok(SleepStats::from_sessions(&sessions))
    }

    fn load(&self, id: &SessionId) -> Result<SleepSession, EngineError> {
        self.store
            .get_sleep(id)?
            .ok_or_else(|| EngineError::not_found("sleep session", id))
    }

    /// Writes a closed session over its `in_progress` row.
    ///
    /// If another request closed the session first and left it in one of
    /// `settled`, that stored session is returned instead, so a retry that
    /// overlaps the original request still succeeds.
    fn close(
        &mut self,
        session: SleepSession,
        settled: &[SleepStatus],
    ) -> Result<SleepSession, EngineError> {
        match self.store.update_sleep(&session, SleepStatus::InProgress) {
            Ok(()) => Ok(session),
            Err(StoreError::Conflict(message)) => {
                let current = self.load(&session.id)?;
                if settled.contains(&current.status) {
                    debug!(
                        session_id = %session.id,
                        status = %current.status,
                        "sleep session closed by a concurrent request"
                    );
                    Ok(current)
                } else {
                    Err(EngineError::Conflict(message))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    fn ensure_not_future(
        &self,
        start_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        // A skew past the end of the calendar never rejects anything.
        let exceeds = now
            .checked_add_signed(self.config.max_future_skew)
            .is_some_and(|latest| start_time > latest);
        if exceeds {
            return Err(ValidationError::FutureStart {
                start: start_time,
                now,
            });
        }
        Ok(())
    }

    /// Sets the completed-state fields. Callers have checked `end_time >= start_time`.
    fn complete(&self, session: &mut SleepSession, end_time: DateTime<Utc>) {
        session.status = SleepStatus::Completed;
        session.end_time = Some(end_time);
        session.duration_minutes = floor_minutes(session.start_time, end_time);
        session.auto_closed_at = None;
        session.kind = Some(
            self.config
                .night_window
                .classify_in(session.start_time, end_time, &self.tz),
        );
    }
}
