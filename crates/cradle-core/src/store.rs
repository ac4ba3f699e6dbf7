//! Record store contract and an in-memory implementation.
//!
//! The managers never hold state between requests: every operation loads what
//! it needs from a store, computes the new state and writes it back. The store
//! is therefore the only place where concurrent requests for the same baby can
//! be serialized, and the contract below makes that explicit:
//!
//! - sleep updates are check-and-set on the session's previous status;
//! - at most one `in_progress` sleep session exists per baby;
//! - feeding timer updates are check-and-set on the timer's `revision`;
//! - [`FeedingStore::finish_feeding`] and [`FeedingStore::resume_feeding`] are
//!   all-or-nothing.
//!
//! Query results are ordered by `start_time` descending.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::feeding::{FeedingQuery, FeedingRecord, FeedingTimerState};
use crate::sleep::{SleepQuery, SleepSession};
use crate::types::{BabyId, RecordId, SessionId, SleepStatus};

/// Errors reported by a record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness or check-and-set condition failed.
    #[error("{0}")]
    Conflict(String),

    /// The row to change does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The storage backend failed.
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

/// Persistence for sleep sessions.
pub trait SleepStore {
    /// Inserts a new session.
    ///
    /// Fails with [`StoreError::Conflict`] if the ID exists, or if the session is
    /// `in_progress` and the baby already has an `in_progress` session.
    fn insert_sleep(&mut self, session: &SleepSession) -> Result<(), StoreError>;

    fn get_sleep(&self, id: &SessionId) -> Result<Option<SleepSession>, StoreError>;

    /// Replaces a session, provided its stored status still equals `expected_status`.
    fn update_sleep(
        &mut self,
        session: &SleepSession,
        expected_status: SleepStatus,
    ) -> Result<(), StoreError>;

    /// Deletes a session, returning whether it existed.
    fn delete_sleep(&mut self, id: &SessionId) -> Result<bool, StoreError>;

    fn query_sleep(
        &self,
        baby_id: &BabyId,
        query: &SleepQuery,
    ) -> Result<Vec<SleepSession>, StoreError>;
}

/// Persistence for ongoing feeding timers and finished feeding records.
pub trait FeedingStore {
    fn get_feeding_state(&self, baby_id: &BabyId)
    -> Result<Option<FeedingTimerState>, StoreError>;

    /// Creates the timer for a baby; conflicts if one already exists.
    fn insert_feeding_state(&mut self, state: &FeedingTimerState) -> Result<(), StoreError>;

    /// Replaces the timer, provided its stored revision equals `expected_revision`.
    fn update_feeding_state(
        &mut self,
        state: &FeedingTimerState,
        expected_revision: i64,
    ) -> Result<(), StoreError>;

    fn get_feeding_record(&self, id: &RecordId) -> Result<Option<FeedingRecord>, StoreError>;

    fn query_feeding_records(
        &self,
        baby_id: &BabyId,
        query: &FeedingQuery,
    ) -> Result<Vec<FeedingRecord>, StoreError>;

    /// Deletes a record, returning whether it existed.
    fn delete_feeding_record(&mut self, id: &RecordId) -> Result<bool, StoreError>;

    /// Atomically deletes the baby's timer (at `expected_revision`) and inserts `record`.
    fn finish_feeding(
        &mut self,
        expected_revision: i64,
        record: &FeedingRecord,
    ) -> Result<(), StoreError>;

    /// Atomically deletes record `record_id` and inserts `state`.
    fn resume_feeding(
        &mut self,
        record_id: &RecordId,
        state: &FeedingTimerState,
    ) -> Result<(), StoreError>;
}

impl<T: SleepStore + ?Sized> SleepStore for &mut T {
    fn insert_sleep(&mut self, session: &SleepSession) -> Result<(), StoreError> {
        (**self).insert_sleep(session)
    }

    fn get_sleep(&self, id: &SessionId) -> Result<Option<SleepSession>, StoreError> {
        (**self).get_sleep(id)
    }

    fn update_sleep(
        &mut self,
        session: &SleepSession,
        expected_status: SleepStatus,
    ) -> Result<(), StoreError> {
        (**self).update_sleep(session, expected_status)
    }

    fn delete_sleep(&mut self, id: &SessionId) -> Result<bool, StoreError> {
        (**self).delete_sleep(id)
    }

    fn query_sleep(
        &self,
        baby_id: &BabyId,
        query: &SleepQuery,
    ) -> Result<Vec<SleepSession>, StoreError> {
        (**self).query_sleep(baby_id, query)
    }
}

impl<T: FeedingStore + ?Sized> FeedingStore for &mut T {
    fn get_feeding_state(
        &self,
        baby_id: &BabyId,
    ) -> Result<Option<FeedingTimerState>, StoreError> {
        (**self).get_feeding_state(baby_id)
    }

    fn insert_feeding_state(&mut self, state: &FeedingTimerState) -> Result<(), StoreError> {
        (**self).insert_feeding_state(state)
    }

    fn update_feeding_state(
        &mut self,
        state: &FeedingTimerState,
        expected_revision: i64,
    ) -> Result<(), StoreError> {
        (**self).update_feeding_state(state, expected_revision)
    }

    fn get_feeding_record(&self, id: &RecordId) -> Result<Option<FeedingRecord>, StoreError> {
        (**self).get_feeding_record(id)
    }

    fn query_feeding_records(
        &self,
        baby_id: &BabyId,
        query: &FeedingQuery,
    ) -> Result<Vec<FeedingRecord>, StoreError> {
        (**self).query_feeding_records(baby_id, query)
    }

    fn delete_feeding_record(&mut self, id: &RecordId) -> Result<bool, StoreError> {
        (**self).delete_feeding_record(id)
    }

    fn finish_feeding(
        &mut self,
        expected_revision: i64,
        record: &FeedingRecord,
    ) -> Result<(), StoreError> {
        (**self).finish_feeding(expected_revision, record)
    }

    fn resume_feeding(
        &mut self,
        record_id: &RecordId,
        state: &FeedingTimerState,
    ) -> Result<(), StoreError> {
        (**self).resume_feeding(record_id, state)
    }
}

/// A `HashMap`-backed store.
///
/// Every mutating method checks all of its preconditions before changing any
/// map, so composite operations are all-or-nothing.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    sleep: HashMap<SessionId, SleepSession>,
    feeding_states: HashMap<BabyId, FeedingTimerState>,
    feeding_records: HashMap<RecordId, FeedingRecord>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn has_other_in_progress(&self, session: &SleepSession) -> bool {
        self.sleep.values().any(|other| {
            other.id != session.id
                && other.baby_id == session.baby_id
                && other.status == SleepStatus::InProgress
        })
    }
}

fn in_range(
    start_time: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> bool {
    start.is_none_or(|s| start_time >= s) && end.is_none_or(|e| start_time <= e)
}

impl SleepStore for MemoryStore {
    fn insert_sleep(&mut self, session: &SleepSession) -> Result<(), StoreError> {
        if self.sleep.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!(
                "sleep session {} already exists",
                session.id
            )));
        }
        if session.status == SleepStatus::InProgress && self.has_other_in_progress(session) {
            return Err(StoreError::Conflict(format!(
                "baby {} already has a sleep session in progress",
                session.baby_id
            )));
        }
        self.sleep.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn get_sleep(&self, id: &SessionId) -> Result<Option<SleepSession>, StoreError> {
        Ok(self.sleep.get(id).cloned())
    }

    fn update_sleep(
        &mut self,
        session: &SleepSession,
        expected_status: SleepStatus,
    ) -> Result<(), StoreError> {
        let Some(stored) = self.sleep.get(&session.id) else {
            return Err(StoreError::NotFound {
                entity: "sleep session",
                id: session.id.to_string(),
            });
        };
        if stored.status != expected_status {
            return Err(StoreError::Conflict(format!(
                "sleep session {} changed concurrently (now {})",
                session.id, stored.status
            )));
        }
        if session.status == SleepStatus::InProgress && self.has_other_in_progress(session) {
            return Err(StoreError::Conflict(format!(
                "baby {} already has a sleep session in progress",
                session.baby_id
            )));
        }
        self.sleep.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn delete_sleep(&mut self, id: &SessionId) -> Result<bool, StoreError> {
        Ok(self.sleep.remove(id).is_some())
    }

    fn query_sleep(
        &self,
        baby_id: &BabyId,
        query: &SleepQuery,
    ) -> Result<Vec<SleepSession>, StoreError> {
        let mut sessions: Vec<SleepSession> = self
            .sleep
            .values()
            .filter(|s| &s.baby_id == baby_id)
            .filter(|s| query.status.is_none_or(|status| s.status == status))
            .filter(|s| in_range(s.start_time, query.start, query.end))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = query.limit {
            sessions.truncate(limit);
        }
        Ok(sessions)
    }
}

impl FeedingStore for MemoryStore {
    fn get_feeding_state(
        &self,
        baby_id: &BabyId,
    ) -> Result<Option<FeedingTimerState>, StoreError> {
        Ok(self.feeding_states.get(baby_id).cloned())
    }

    fn insert_feeding_state(&mut self, state: &FeedingTimerState) -> Result<(), StoreError> {
        if self.feeding_states.contains_key(&state.baby_id) {
            return Err(StoreError::Conflict(format!(
                "baby {} already has an ongoing feeding",
                state.baby_id
            )));
        }
        self.feeding_states
            .insert(state.baby_id.clone(), state.clone());
        Ok(())
    }

    fn update_feeding_state(
        &mut self,
        state: &FeedingTimerState,
        expected_revision: i64,
    ) -> Result<(), StoreError> {
        let Some(stored) = self.feeding_states.get_mut(&state.baby_id) else {
            return Err(StoreError::NotFound {
                entity: "ongoing feeding",
                id: state.baby_id.to_string(),
            });
        };
        if stored.revision != expected_revision {
            return Err(StoreError::Conflict(format!(
                "ongoing feeding for baby {} changed concurrently",
                state.baby_id
            )));
        }
        *stored = state.clone();
        Ok(())
    }

    fn get_feeding_record(&self, id: &RecordId) -> Result<Option<FeedingRecord>, StoreError> {
        Ok(self.feeding_records.get(id).cloned())
    }

    fn query_feeding_records(
        &self,
        baby_id: &BabyId,
        query: &FeedingQuery,
    ) -> Result<Vec<FeedingRecord>, StoreError> {
        let mut records: Vec<FeedingRecord> = self
            .feeding_records
            .values()
            .filter(|r| &r.baby_id == baby_id)
            .filter(|r| in_range(r.start_time, query.start, query.end))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    fn delete_feeding_record(&mut self, id: &RecordId) -> Result<bool, StoreError> {
        Ok(self.feeding_records.remove(id).is_some())
    }

    fn finish_feeding(
        &mut self,
        expected_revision: i64,
        record: &FeedingRecord,
    ) -> Result<(), StoreError> {
        match self.feeding_states.get(&record.baby_id) {
            None => {
                return Err(StoreError::NotFound {
                    entity: "ongoing feeding",
                    id: record.baby_id.to_string(),
                });
            }
            Some(state) if state.revision != expected_revision => {
                return Err(StoreError::Conflict(format!(
                    "ongoing feeding for baby {} changed concurrently",
                    record.baby_id
                )));
            }
            Some(_) => {}
        }
        if self.feeding_records.contains_key(&record.id) {
            return Err(StoreError::Conflict(format!(
                "feeding record {} already exists",
                record.id
            )));
        }
        self.feeding_states.remove(&record.baby_id);
        self.feeding_records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn resume_feeding(
        &mut self,
        record_id: &RecordId,
        state: &FeedingTimerState,
    ) -> Result<(), StoreError> {
        if !self.feeding_records.contains_key(record_id) {
            return Err(StoreError::NotFound {
                entity: "feeding record",
                id: record_id.to_string(),
            });
        }
        if self.feeding_states.contains_key(&state.baby_id) {
            return Err(StoreError::Conflict(format!(
                "baby {} already has an ongoing feeding",
                state.baby_id
            )));
        }
        self.feeding_records.remove(record_id);
        self.feeding_states
            .insert(state.baby_id.clone(), state.clone());
        Ok(())
    }
}
