//! Engine configuration.
//!
//! Loaded from a JSON file; every key is optional and falls back to the
//! defaults below. Command-line flags override selected keys.

use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::errors::VsMagError;
use crate::site::{SiteEffect, Vs30Grid};

/// Minimum number of past slots the timeline must hold.
const MIN_BACK_SLOTS: usize = 10;

/// Time an event's expiration is counted from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpirationReference {
    /// Processing time of the latest update
    #[default]
    Ct,
    /// Origin time
    Ot,
}

impl std::str::FromStr for ExpirationReference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ct" => Ok(Self::Ct),
            "ot" => Ok(Self::Ot),
            _ => Err(format!("unknown expiration reference: {s} (expected: ct, ot)")),
        }
    }
}

/// Clock driving the processing ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Wall clock, one tick per second
    #[default]
    Realtime,
    /// Latest envelope timestamp
    Playback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Ring buffer seconds before the reference time
    pub back_slots: usize,
    /// Ring buffer seconds after the reference time
    pub head_slots: usize,
    /// Seconds before a maximum in which clipping rejects the record
    pub clip_timeout: usize,
    /// Seconds before the pick included in a station window
    pub tw_start: i64,
    /// Seconds after the pick included in a station window
    pub tw_end: i64,
    /// Seconds an event stays active
    pub expiration_time: i64,
    pub expiration_reference: ExpirationReference,
    pub site_effect: bool,
    pub vs30_file: Option<PathBuf>,
    /// Vs30 used for stations outside the grid (m/s)
    pub vs30_default: f64,
    /// Stations farther away are ignored (km)
    pub max_epicentral_distance: Option<f64>,
    /// Origins with a larger azimuthal gap are not processed (degrees)
    pub max_azimuthal_gap: Option<f64>,
    pub mode: Mode,
    /// Retention of cached objects and retired event IDs (seconds)
    pub cache_timeout: i64,
    pub log_envelopes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            back_slots: 6000,
            head_slots: 60,
            clip_timeout: 30,
            tw_start: 3,
            tw_end: 30,
            expiration_time: 90,
            expiration_reference: ExpirationReference::Ct,
            site_effect: false,
            vs30_file: None,
            vs30_default: 910.0,
            max_epicentral_distance: None,
            max_azimuthal_gap: None,
            mode: Mode::Realtime,
            cache_timeout: 3600,
            log_envelopes: false,
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, VsMagError> {
        let text = std::fs::read_to_string(path).map_err(|source| VsMagError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and cross-key consistency.
    ///
    /// # Errors
    ///
    /// Returns [`VsMagError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<(), VsMagError> {
        let fail = |msg: String| Err(VsMagError::Config(msg));

        if self.back_slots < MIN_BACK_SLOTS {
            return fail(format!(
                "back_slots must be at least {MIN_BACK_SLOTS}, got {}",
                self.back_slots
            ));
        }
        if self.tw_start < 0 || self.tw_end <= 0 {
            return fail(format!(
                "time window must satisfy tw_start >= 0 and tw_end > 0, got {} / {}",
                self.tw_start, self.tw_end
            ));
        }
        if self.expiration_time <= 0 {
            return fail(format!(
                "expiration_time must be positive, got {}",
                self.expiration_time
            ));
        }
        if self.cache_timeout <= 0 {
            return fail(format!(
                "cache_timeout must be positive, got {}",
                self.cache_timeout
            ));
        }
        if self.vs30_default.is_nan() || self.vs30_default <= 0.0 {
            return fail(format!(
                "vs30_default must be positive, got {}",
                self.vs30_default
            ));
        }
        if self.site_effect && self.vs30_file.is_none() {
            return fail("site_effect enabled but vs30_file not given".into());
        }
        for (key, value) in [
            ("max_epicentral_distance", self.max_epicentral_distance),
            ("max_azimuthal_gap", self.max_azimuthal_gap),
        ] {
            if let Some(v) = value.filter(|v| v.is_nan() || *v <= 0.0) {
                return fail(format!("{key} must be positive, got {v}"));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn expiration(&self) -> TimeDelta {
        TimeDelta::seconds(self.expiration_time)
    }

    #[must_use]
    pub fn cache_retention(&self) -> TimeDelta {
        TimeDelta::seconds(self.cache_timeout)
    }

    /// Build the site correction service, loading the Vs30 grid if enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the grid file cannot be read or parsed.
    pub fn site_effect(&self) -> Result<SiteEffect, VsMagError> {
        match (&self.vs30_file, self.site_effect) {
            (Some(path), true) => Ok(SiteEffect::new(
                Vs30Grid::from_file(path)?,
                self.vs30_default,
            )),
            (None, true) => Err(VsMagError::Config(
                "site_effect enabled but vs30_file not given".into(),
            )),
            (_, false) => Ok(SiteEffect::disabled()),
        }
    }
}
