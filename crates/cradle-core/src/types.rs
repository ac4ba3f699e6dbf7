//! Core type definitions with validation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for client input and core types.
///
/// Every engine operation validates its input before touching any state, so a
/// `ValidationError` always means nothing was written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// A required field was not supplied.
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    /// An end time lies before its start time.
    #[error("{field} ({end}) is before start_time ({start})")]
    NegativeDuration {
        field: &'static str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// A start time lies too far in the future.
    #[error("start_time {start} is in the future (now {now})")]
    FutureStart {
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// An enum field received a value outside its domain.
    #[error("invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    /// The night window hours are out of range or describe an empty window.
    #[error("invalid night window: start hour {start}, end hour {end}")]
    InvalidNightWindow { start: u32, end: u32 },
}

/// Defines a snake_case string enum with `as_str`, `Display`, `FromStr` and serde support.
macro_rules! define_str_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal {
            $($(#[$vmeta:meta])* $variant:ident => $s:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// String representation for database storage.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    _ => Err(ValidationError::InvalidValue {
                        field: $field_name,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

define_str_enum!(
    /// Lifecycle status of a sleep session.
    SleepStatus, "sleep status" {
        /// The baby is asleep and the session is open.
        InProgress => "in_progress",
        /// Closed with a measured end time.
        Completed => "completed",
        /// Closed without a known end time.
        AutoClosed => "auto_closed",
        /// Discarded by a caregiver.
        Cancelled => "cancelled",
    }
);

define_str_enum!(
    /// Where a sleep session came from.
    SleepSource, "sleep source" {
        Manual => "manual",
        Auto => "auto",
    }
);

define_str_enum!(
    /// Sleeping position.
    SleepPosition, "sleep position" {
        Left => "left",
        Middle => "middle",
        Right => "right",
    }
);

define_str_enum!(
    /// Caregiver-assessed sleep quality.
    SleepQuality, "sleep quality" {
        Good => "good",
        Normal => "normal",
        Poor => "poor",
    }
);

define_str_enum!(
    /// Night sleep versus daytime nap.
    SleepKind, "sleep kind" {
        Night => "night",
        Nap => "nap",
    }
);

define_str_enum!(
    /// What the ongoing feeding timer is currently measuring.
    FeedingSide, "feeding side" {
        Left => "left",
        Right => "right",
        Paused => "paused",
    }
);

define_str_enum!(
    /// A breast side in a finished feeding sequence.
    BreastSide, "breast side" {
        Left => "left",
        Right => "right",
    }
);

define_str_enum!(
    /// Client action on the ongoing feeding timer.
    FeedingActionKind, "feeding action" {
        StartLeft => "start_left",
        StartRight => "start_right",
        Pause => "pause",
    }
);

impl FeedingActionKind {
    /// The side the timer moves to after this action.
    #[must_use]
    pub const fn target_side(self) -> FeedingSide {
        match self {
            Self::StartLeft => FeedingSide::Left,
            Self::StartRight => FeedingSide::Right,
            Self::Pause => FeedingSide::Paused,
        }
    }
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

/// Adds a random UUID v4 constructor to an ID type.
macro_rules! impl_generate {
    ($name:ident) => {
        impl $name {
            /// Generates a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }
        }
    };
}

define_string_id!(
    /// A validated baby identifier.
    ///
    /// Babies are owned by the family-management collaborator; the engine only
    /// uses the ID as a partition key.
    BabyId, "baby ID"
);

define_string_id!(
    /// A validated caregiver (user) identifier.
    CaregiverId, "caregiver ID"
);

define_string_id!(
    /// A validated sleep session identifier.
    SessionId, "session ID"
);

define_string_id!(
    /// A validated feeding record identifier.
    RecordId, "record ID"
);

impl_generate!(SessionId);
impl_generate!(RecordId);

/// Whole minutes between two instants, floored.
///
/// Returns `None` when `end` is before `start`.
#[must_use]
pub fn floor_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<i64> {
    let seconds = (end - start).num_seconds();
    (seconds >= 0).then_some(seconds / 60)
}

/// Rejects an interval whose end precedes its start.
pub fn ensure_ordered(
    field: &'static str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if end < start {
        return Err(ValidationError::NegativeDuration { field, start, end });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_baby_id_rejects_empty() {
        assert!(BabyId::new("").is_err());
        assert!(BabyId::new("   ").is_err());
        assert!(BabyId::new("baby-1").is_ok());
    }

    #[test]
    fn test_session_id_serde_rejects_empty() {
        let result: Result<SessionId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
        assert_ne!(RecordId::generate(), RecordId::generate());
    }

    #[test]
    fn test_enums_parse_their_storage_strings() {
        for status in [
            SleepStatus::InProgress,
            SleepStatus::Completed,
            SleepStatus::AutoClosed,
            SleepStatus::Cancelled,
        ] {
            let parsed: SleepStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!(
            "start_right".parse::<FeedingActionKind>().unwrap(),
            FeedingActionKind::StartRight
        );
    }

    #[test]
    fn test_unknown_action_is_a_validation_error() {
        let err = "start_both".parse::<FeedingActionKind>().unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidValue {
                field: "feeding action",
                value: "start_both".to_string(),
            }
        );
        assert_eq!(err.to_string(), "invalid feeding action: start_both");
    }

    #[test]
    fn test_unknown_action_rejected_by_serde() {
        let result: Result<FeedingActionKind, _> = serde_json::from_str("\"stop\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_floor_minutes_truncates_partial_minutes() {
        assert_eq!(floor_minutes(at(1, 0, 0), at(1, 0, 59)), Some(0));
        assert_eq!(floor_minutes(at(1, 0, 0), at(1, 1, 0)), Some(1));
        assert_eq!(floor_minutes(at(1, 0, 0), at(2, 30, 30)), Some(90));
        assert_eq!(floor_minutes(at(2, 0, 0), at(1, 59, 59)), None);
    }

    #[test]
    fn test_ensure_ordered_accepts_zero_length() {
        assert!(ensure_ordered("end_time", at(1, 0, 0), at(1, 0, 0)).is_ok());
        assert!(ensure_ordered("end_time", at(1, 0, 1), at(1, 0, 0)).is_err());
    }
}
