pub mod feed;
pub mod request;
pub mod sleep;
pub mod status;
pub mod util;

use anyhow::{Context as _, Result};
use chrono::Local;
use cradle_core::{CaregiverId, Settings, SystemClock};

use crate::Config;

/// Everything an engine command needs besides the database.
pub struct Context<C, Tz> {
    pub clock: C,
    /// Caregivers' local time zone, used for the night window and for display.
    pub tz: Tz,
    /// IANA name of `tz`, shown in summaries.
    pub tz_name: String,
    pub settings: Settings,
    pub caregiver: CaregiverId,
    pub json: bool,
}

impl Context<SystemClock, Local> {
    /// Builds the context for the machine the CLI runs on.
    pub fn from_config(config: &Config, json: bool) -> Result<Self> {
        let settings = config.settings().context("invalid configuration")?;
        let caregiver = config.caregiver().context("invalid caregiver_id")?;
        let tz_name = iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string());
        Ok(Self {
            clock: SystemClock,
            tz: Local,
            tz_name,
            settings,
            caregiver,
            json,
        })
    }
}
