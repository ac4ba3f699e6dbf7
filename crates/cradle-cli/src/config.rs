//! Configuration loading and management.

use std::path::{Path, PathBuf};

use chrono::Duration;
use cradle_core::{
    CaregiverId, FeedingConfig, NightWindow, Settings, SleepConfig, ValidationError,
};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Caregiver recorded on sessions and feedings created from this machine.
    pub caregiver_id: String,
    /// First hour of the night window (local time).
    pub night_start_hour: u32,
    /// Hour the night window ends (local time, exclusive).
    pub night_end_hour: u32,
    /// How long after its start a finished feeding may be resumed.
    pub resume_window_minutes: i64,
    /// How far in the future a sleep start may lie.
    pub max_future_skew_minutes: i64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("cradle.db"),
            caregiver_id: "caregiver".to_string(),
            night_start_hour: 21,
            night_end_hour: 6,
            resume_window_minutes: 60,
            max_future_skew_minutes: 5,
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // CRADLE_DATABASE_PATH, CRADLE_NIGHT_START_HOUR, ...
        figment = figment.merge(Env::prefixed("CRADLE_"));

        figment.extract()
    }

    /// The engine settings described by this configuration.
    pub fn settings(&self) -> Result<Settings, ValidationError> {
        let night_window = NightWindow::new(self.night_start_hour, self.night_end_hour)?;
        let resume_window = minutes_setting("resume_window_minutes", self.resume_window_minutes)?;
        let max_future_skew =
            minutes_setting("max_future_skew_minutes", self.max_future_skew_minutes)?;
        Ok(Settings {
            sleep: SleepConfig {
                night_window,
                max_future_skew,
            },
            feeding: FeedingConfig { resume_window },
        })
    }

    pub fn caregiver(&self) -> Result<CaregiverId, ValidationError> {
        CaregiverId::new(self.caregiver_id.as_str())
    }
}

/// Upper bound for minute-valued settings: one week.
const MAX_SETTING_MINUTES: i64 = 7 * 24 * 60;

fn minutes_setting(field: &'static str, minutes: i64) -> Result<Duration, ValidationError> {
    if !(0..=MAX_SETTING_MINUTES).contains(&minutes) {
        return Err(ValidationError::InvalidValue {
            field,
            value: minutes.to_string(),
        });
    }
    Ok(Duration::minutes(minutes))
}

/// Returns the platform-specific config directory for cradle.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("cradle"))
}

/// Returns the platform-specific data directory for cradle.
///
/// On Linux: `~/.local/share/cradle`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("cradle"))
}
