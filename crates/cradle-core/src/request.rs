//! JSON request payloads and a dispatcher over the two managers.
//!
//! A request names its operation in the `op` field:
//!
//! ```json
//! {"op": "start_sleep", "baby_id": "b1", "start_time": "2024-01-01T21:00:00Z"}
//! {"op": "feeding_action", "baby_id": "b1", "action": "start_left"}
//! ```
//!
//! The caregiver is not part of the payload; it comes from whoever
//! authenticated the request.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::EngineError;
use crate::feeding::{
    FeedingAccumulator, FeedingConfig, FeedingRecord, FeedingTimerState, OngoingFeeding,
};
use crate::sleep::{
    ActivePolicy, SleepConfig, SleepSession, SleepSessionManager, SleepSessionUpdate,
};
use crate::store::{FeedingStore, SleepStore};
use crate::types::{
    BabyId, CaregiverId, FeedingActionKind, RecordId, SessionId, SleepPosition, SleepQuality,
    SleepSource,
};

/// Opens a sleep session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSleep {
    pub baby_id: BabyId,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub source: Option<SleepSource>,
    #[serde(default)]
    pub position: Option<SleepPosition>,
}

/// Records a finished sleep after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSleep {
    pub baby_id: BabyId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub position: Option<SleepPosition>,
    #[serde(default)]
    pub quality: Option<SleepQuality>,
    #[serde(default)]
    pub wake_count: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Acts on a baby's feeding timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedingAction {
    pub baby_id: BabyId,
    pub action: FeedingActionKind,
}

/// Any engine request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    StartSleep(StartSleep),
    RecordSleep(RecordSleep),
    StopSleep {
        session_id: SessionId,
        end_time: DateTime<Utc>,
    },
    AutoCloseSleep {
        session_id: SessionId,
        auto_closed_at: DateTime<Utc>,
    },
    CancelSleep {
        session_id: SessionId,
    },
    UpdateSleep {
        session_id: SessionId,
        update: SleepSessionUpdate,
    },
    ActiveSleep {
        baby_id: BabyId,
        #[serde(default)]
        include_auto_closed: bool,
    },
    FeedingAction(FeedingAction),
    ResumeFeeding {
        record_id: RecordId,
    },
    FinishFeeding {
        baby_id: BabyId,
    },
    CurrentFeeding {
        baby_id: BabyId,
    },
}

/// The payload returned for a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Sleep(SleepSession),
    ActiveSleep(Option<SleepSession>),
    Timer(FeedingTimerState),
    Ongoing(Option<OngoingFeeding>),
    Feeding(FeedingRecord),
}

/// Engine tunables shared by every request.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub sleep: SleepConfig,
    pub feeding: FeedingConfig,
}

/// Executes one request against `store`.
pub fn dispatch<S, C, Tz>(
    store: &mut S,
    clock: &C,
    tz: &Tz,
    settings: &Settings,
    caregiver_id: &CaregiverId,
    request: Request,
) -> Result<Response, EngineError>
where
    S: SleepStore + FeedingStore,
    C: Clock,
    Tz: TimeZone,
{
    let response = match request {
        Request::StartSleep(start) => {
            let session = sleep(store, clock, tz, settings).start(caregiver_id.clone(), start)?;
            Response::Sleep(session)
        }
        Request::RecordSleep(record) => {
            let session =
                sleep(store, clock, tz, settings).record_completed(caregiver_id.clone(), record)?;
            Response::Sleep(session)
        }
        Request::StopSleep {
            session_id,
            end_time,
        } => Response::Sleep(sleep(store, clock, tz, settings).stop(&session_id, end_time)?),
        Request::AutoCloseSleep {
            session_id,
            auto_closed_at,
        } => {
            let session =
                sleep(store, clock, tz, settings).auto_close(&session_id, auto_closed_at)?;
            Response::Sleep(session)
        }
        Request::CancelSleep { session_id } => {
            Response::Sleep(sleep(store, clock, tz, settings).cancel(&session_id)?)
        }
        Request::UpdateSleep { session_id, update } => {
            Response::Sleep(sleep(store, clock, tz, settings).update(&session_id, update)?)
        }
        Request::ActiveSleep {
            baby_id,
            include_auto_closed,
        } => {
            let policy = if include_auto_closed {
                ActivePolicy::IncludeAutoClosed
            } else {
                ActivePolicy::InProgressOnly
            };
            Response::ActiveSleep(sleep(store, clock, tz, settings).get_active(&baby_id, policy)?)
        }
        Request::FeedingAction(FeedingAction { baby_id, action }) => {
            Response::Timer(feeding(store, clock, settings).apply(&baby_id, action)?)
        }
        Request::ResumeFeeding { record_id } => {
            Response::Timer(feeding(store, clock, settings).resume_from_record(&record_id)?)
        }
        Request::FinishFeeding { baby_id } => Response::Feeding(
            feeding(store, clock, settings).finish(&baby_id, caregiver_id.clone())?,
        ),
        Request::CurrentFeeding { baby_id } => {
            Response::Ongoing(feeding(store, clock, settings).current(&baby_id)?)
        }
    };
    Ok(response)
}

fn sleep<'a, S: SleepStore, C: Clock, Tz: TimeZone>(
    store: &'a mut S,
    clock: &'a C,
    tz: &Tz,
    settings: &Settings,
) -> SleepSessionManager<&'a mut S, &'a C, Tz> {
    SleepSessionManager::new(store, clock)
        .with_timezone(tz.clone())
        .with_config(settings.sleep.clone())
}

fn feeding<'a, S: FeedingStore, C: Clock>(
    store: &'a mut S,
    clock: &'a C,
    settings: &Settings,
) -> FeedingAccumulator<&'a mut S, &'a C> {
    FeedingAccumulator::new(store, clock).with_config(settings.feeding.clone())
}
