//! Ongoing breastfeeding timer with side switching and pause/resume.
//!
//! # State machine
//!
//! Each baby has at most one [`FeedingTimerState`], whose `current_side` is one
//! of `left`, `right` or `paused`. Every action first credits the segment that
//! is ending:
//!
//! ```text
//! elapsed = now - last_action_time
//! if current_side is left/right: accumulated[current_side] += elapsed
//! current_side = target(action); last_action_time = now
//! ```
//!
//! so paused intervals contribute nothing and the accumulated totals never
//! decrease. Elapsed time is credited in whole seconds.
//!
//! [`FeedingAccumulator::finish`] turns the timer into a [`FeedingRecord`] and
//! [`FeedingAccumulator::resume_from_record`] turns a recent record back into a
//! paused timer. Both swap one row for another in a single store transaction.
//!
//! # Concurrency
//!
//! The timer carries a `revision` that the store checks on every write. Two
//! devices acting on the same timer at once cannot both credit the same
//! segment: the second write fails with a conflict and the client retries
//! against the new state. Repeating an action (e.g. `start_left` twice) is not
//! a no-op: it credits the running segment and restarts it, which leaves the
//! totals correct.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::EngineError;
use crate::store::FeedingStore;
use crate::types::{BabyId, BreastSide, CaregiverId, FeedingActionKind, FeedingSide, RecordId};

/// The ongoing feeding timer for one baby.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedingTimerState {
    pub baby_id: BabyId,
    pub start_time: DateTime<Utc>,
    pub current_side: FeedingSide,
    pub last_action_time: DateTime<Utc>,
    pub accumulated_left_seconds: i64,
    pub accumulated_right_seconds: i64,
    /// Incremented on every write; used for optimistic concurrency.
    pub revision: i64,
    pub updated_at: DateTime<Utc>,
}

impl FeedingTimerState {
    fn started(baby_id: BabyId, side: FeedingSide, now: DateTime<Utc>) -> Self {
        Self {
            baby_id,
            start_time: now,
            current_side: side,
            last_action_time: now,
            accumulated_left_seconds: 0,
            accumulated_right_seconds: 0,
            revision: 0,
            updated_at: now,
        }
    }

    /// Credits the running segment up to `now` and restarts it.
    ///
    /// Returns the seconds credited.
    pub fn credit(&mut self, now: DateTime<Utc>) -> i64 {
        let elapsed = elapsed_seconds(self.last_action_time, now);
        let credited = match self.current_side {
            FeedingSide::Left => {
                self.accumulated_left_seconds += elapsed;
                elapsed
            }
            FeedingSide::Right => {
                self.accumulated_right_seconds += elapsed;
                elapsed
            }
            FeedingSide::Paused => 0,
        };
        self.last_action_time = now;
        credited
    }

    /// Applies a client action at `now`.
    pub fn apply(&mut self, action: FeedingActionKind, now: DateTime<Utc>) -> i64 {
        let credited = self.credit(now);
        self.current_side = action.target_side();
        self.revision += 1;
        self.updated_at = now;
        credited
    }

    /// Per-side totals including the running segment, without mutating.
    #[must_use]
    pub fn totals_at(&self, now: DateTime<Utc>) -> (i64, i64) {
        let mut view = self.clone();
        view.credit(now);
        (view.accumulated_left_seconds, view.accumulated_right_seconds)
    }

    /// One item per side with time on it, both stamped with the feeding start.
    ///
    /// Only totals are tracked, so the sequence is a summary rather than a log
    /// of individual switches.
    fn sequence(&self) -> Vec<FeedingSequenceItem> {
        [
            (BreastSide::Left, self.accumulated_left_seconds),
            (BreastSide::Right, self.accumulated_right_seconds),
        ]
        .into_iter()
        .filter(|&(_, seconds)| seconds > 0)
        .map(|(side, duration_seconds)| FeedingSequenceItem {
            side,
            duration_seconds,
            start_time: self.start_time,
        })
        .collect()
    }
}

/// Whole seconds from `from` to `to`, never negative.
fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let seconds = (to - from).num_seconds();
    if seconds < 0 {
        warn!(%from, %to, "clock moved backwards; crediting no time");
        return 0;
    }
    seconds
}

/// A per-side summary inside a finished feeding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedingSequenceItem {
    pub side: BreastSide,
    pub duration_seconds: i64,
    /// Approximate: the start of the whole feeding.
    pub start_time: DateTime<Utc>,
}

/// A finished breastfeeding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedingRecord {
    pub id: RecordId,
    pub baby_id: BabyId,
    pub caregiver_id: CaregiverId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Seconds on the left side.
    pub duration_left: i64,
    /// Seconds on the right side.
    pub duration_right: i64,
    #[serde(default)]
    pub sequence: Vec<FeedingSequenceItem>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FeedingRecord {
    #[must_use]
    pub const fn total_seconds(&self) -> i64 {
        self.duration_left + self.duration_right
    }
}

/// The timer as shown to a client, with the server clock for calibration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OngoingFeeding {
    #[serde(flatten)]
    pub state: FeedingTimerState,
    pub server_time: DateTime<Utc>,
}

/// Filter for listing a baby's feeding records. Bounds apply to `start_time`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedingQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

/// Tunables for the feeding timer.
#[derive(Debug, Clone)]
pub struct FeedingConfig {
    /// How old (by start time) a record may be and still be resumed.
    pub resume_window: Duration,
}

impl Default for FeedingConfig {
    fn default() -> Self {
        Self {
            resume_window: Duration::minutes(60),
        }
    }
}

/// Owns the ongoing feeding timers.
pub struct FeedingAccumulator<S, C> {
    store: S,
    clock: C,
    config: FeedingConfig,
}

impl<S: FeedingStore, C: Clock> FeedingAccumulator<S, C> {
    pub fn new(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            config: FeedingConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: FeedingConfig) -> Self {
        self.config = config;
        self
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The baby's ongoing timer, if any.
    pub fn current(&self, baby_id: &BabyId) -> Result<Option<OngoingFeeding>, EngineError> {
        let server_time = self.clock.now();
        Ok(self
            .store
            .get_feeding_state(baby_id)?
            .map(|state| OngoingFeeding { state, server_time }))
    }

    /// Starts a side, switches sides or pauses.
    ///
    /// The first action for a baby creates the timer; pausing a timer that does
    /// not exist is a conflict.
    pub fn apply(
        &mut self,
        baby_id: &BabyId,
        action: FeedingActionKind,
    ) -> Result<FeedingTimerState, EngineError> {
        let now = self.clock.now();
        let Some(mut state) = self.store.get_feeding_state(baby_id)? else {
            if action == FeedingActionKind::Pause {
                return Err(EngineError::conflict(format!(
                    "no ongoing feeding for baby {baby_id} to pause"
                )));
            }
            let state = FeedingTimerState::started(baby_id.clone(), action.target_side(), now);
            self.store.insert_feeding_state(&state)?;
            debug!(%baby_id, side = %state.current_side, "feeding started");
            return Ok(state);
        };

        let expected_revision = state.revision;
        let previous_side = state.current_side;
        let credited = state.apply(action, now);
        self.store.update_feeding_state(&state, expected_revision)?;
        debug!(
            %baby_id,
            from = %previous_side,
            to = %state.current_side,
            credited_seconds = credited,
            left = state.accumulated_left_seconds,
            right = state.accumulated_right_seconds,
            "feeding action applied"
        );
        Ok(state)
    }

    /// Ends the ongoing feeding and persists it as a record.
    pub fn finish(
        &mut self,
        baby_id: &BabyId,
        caregiver_id: CaregiverId,
    ) -> Result<FeedingRecord, EngineError> {
        let now = self.clock.now();
        let mut state = self
            .store
            .get_feeding_state(baby_id)?
            .ok_or_else(|| EngineError::not_found("ongoing feeding", baby_id))?;
        let expected_revision = state.revision;
        state.credit(now);

        let record = FeedingRecord {
            id: RecordId::generate(),
            baby_id: baby_id.clone(),
            caregiver_id,
            start_time: state.start_time,
            end_time: now,
            duration_left: state.accumulated_left_seconds,
            duration_right: state.accumulated_right_seconds,
            sequence: state.sequence(),
            notes: None,
            created_at: now,
        };
        self.store.finish_feeding(expected_revision, &record)?;
        debug!(
            %baby_id,
            record_id = %record.id,
            left = record.duration_left,
            right = record.duration_right,
            "feeding finished"
        );
        Ok(record)
    }

    /// Reopens a recently finished feeding as a paused timer and deletes the record.
    pub fn resume_from_record(
        &mut self,
        record_id: &RecordId,
    ) -> Result<FeedingTimerState, EngineError> {
        let now = self.clock.now();
        let record = self
            .store
            .get_feeding_record(record_id)?
            .ok_or_else(|| EngineError::not_found("feeding record", record_id))?;

        let age = now - record.start_time;
        if age > self.config.resume_window {
            return Err(EngineError::conflict(format!(
                "feeding record {record_id} started {} minutes ago; only records from the last {} minutes can be resumed",
                age.num_minutes(),
                self.config.resume_window.num_minutes()
            )));
        }
        if self.store.get_feeding_state(&record.baby_id)?.is_some() {
            return Err(EngineError::conflict(format!(
                "baby {} already has an ongoing feeding; finish it first",
                record.baby_id
            )));
        }

        let state = FeedingTimerState {
            baby_id: record.baby_id.clone(),
            start_time: record.start_time,
            current_side: FeedingSide::Paused,
            last_action_time: now,
            accumulated_left_seconds: record.duration_left.max(0),
            accumulated_right_seconds: record.duration_right.max(0),
            revision: 0,
            updated_at: now,
        };
        self.store.resume_feeding(record_id, &state)?;
        debug!(%record_id, baby_id = %state.baby_id, "feeding resumed from record");
        Ok(state)
    }

    pub fn records(
        &self,
        baby_id: &BabyId,
        query: &FeedingQuery,
    ) -> Result<Vec<FeedingRecord>, EngineError> {
        Ok(self.store.query_feeding_records(baby_id, query)?)
    }

    /// The most recent finished feeding.
    pub fn latest(&self, baby_id: &BabyId) -> Result<Option<FeedingRecord>, EngineError> {
        let query = FeedingQuery {
            limit: Some(1),
            ..FeedingQuery::default()
        };
        Ok(self.records(baby_id, &query)?.into_iter().next())
    }
}
