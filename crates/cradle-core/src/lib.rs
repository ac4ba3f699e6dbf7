//! Core domain logic for the cradle infant-care tracker.
//!
//! This crate contains the fundamental types and logic for:
//! - Sleep sessions: start, stop, auto-close, cancel and edit with night/nap classification
//! - Night window: how many minutes of a sleep fall inside the configured night hours
//! - Feeding timer: per-side accumulation across start, switch and pause actions
//!
//! Persistence sits behind the [`SleepStore`] and [`FeedingStore`] traits; time
//! comes from a [`Clock`] so every operation can be driven deterministically.

pub mod clock;
mod error;
pub mod feeding;
pub mod night;
pub mod request;
pub mod sleep;
mod stats;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::EngineError;
pub use feeding::{
    FeedingAccumulator, FeedingConfig, FeedingQuery, FeedingRecord, FeedingSequenceItem,
    FeedingTimerState, OngoingFeeding,
};
pub use night::NightWindow;
pub use request::{FeedingAction, RecordSleep, Request, Response, Settings, StartSleep, dispatch};
pub use sleep::{
    ActivePolicy, SleepConfig, SleepQuery, SleepSession, SleepSessionManager, SleepSessionUpdate,
};
pub use stats::SleepStats;
pub use store::{FeedingStore, MemoryStore, SleepStore, StoreError};
pub use types::{
    BabyId, BreastSide, CaregiverId, FeedingActionKind, FeedingSide, RecordId, SessionId,
    SleepKind, SleepPosition, SleepQuality, SleepSource, SleepStatus, ValidationError,
};
