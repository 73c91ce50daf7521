//! Wire models for inbound messages and published magnitudes.
//!
//! Inbound traffic is newline-delimited JSON, one tagged message per line.
//! Outbound magnitude records are serialized with the same `serde` derive.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::VsMagError;

/// Network and station code pair, the key of all per-station structures.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StationId {
    pub network: String,
    pub station: String,
}

impl StationId {
    #[must_use]
    pub fn new(network: impl Into<String>, station: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            station: station.into(),
        }
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.network, self.station)
    }
}

/// Fully qualified stream identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveformStreamId {
    pub network: String,
    pub station: String,
    /// Location code, often empty
    #[serde(default)]
    pub location: String,
    /// Channel code (e.g. "HHZ")
    pub channel: String,
}

impl WaveformStreamId {
    #[must_use]
    pub fn station_id(&self) -> StationId {
        StationId::new(&self.network, &self.station)
    }
}

impl fmt::Display for WaveformStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.network, self.station, self.location, self.channel
        )
    }
}

/// A phase pick from the picker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Pick {
    pub id: String,
    pub time: DateTime<Utc>,
    pub waveform_id: WaveformStreamId,
}

/// Association of a pick with an origin.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Arrival {
    pub pick_id: String,
    /// Epicentral distance in degrees
    pub distance: f64,
}

/// A hypocenter solution from the locator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Origin {
    pub id: String,
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Depth in kilometers (positive down)
    #[serde(default)]
    pub depth: Option<f64>,
    /// When the locator created this solution
    #[serde(default)]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub arrivals: Vec<Arrival>,
    /// Azimuthal gap in degrees
    #[serde(default)]
    pub azimuthal_gap: Option<f64>,
}

impl Origin {
    /// Validate coordinates and arrival distances.
    ///
    /// # Errors
    ///
    /// Returns [`VsMagError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<(), VsMagError> {
        if self.id.is_empty() {
            return Err(VsMagError::Validation("empty origin ID".into()));
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(VsMagError::Validation(format!(
                "origin {}: latitude {} out of range [-90, 90]",
                self.id, self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(VsMagError::Validation(format!(
                "origin {}: longitude {} out of range [-180, 180]",
                self.id, self.longitude
            )));
        }
        if let Some(arr) = self.arrivals.iter().find(|a| a.distance.is_nan() || a.distance < 0.0) {
            return Err(VsMagError::Validation(format!(
                "origin {}: arrival {} has invalid distance {}",
                self.id, arr.pick_id, arr.distance
            )));
        }
        Ok(())
    }
}

/// A candidate earthquake pointing at its preferred origin.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Event {
    pub id: String,
    pub preferred_origin_id: String,
}

/// One peak value of an envelope channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvelopeValue {
    /// Value type tag: "acc", "vel" or "disp"
    #[serde(rename = "type")]
    pub kind: String,
    /// Peak amplitude in SI units (m/s², m/s, m)
    pub value: f64,
    /// Instrument saturation flag
    #[serde(default)]
    pub clipped: bool,
}

/// Peaks of one component of one stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvelopeChannel {
    #[serde(default)]
    pub location: String,
    /// Channel code; the first two letters identify the sensor
    pub channel: String,
    /// Component tag: "Z", "V", "H", "H1" or "H2"
    pub component: String,
    pub values: Vec<EnvelopeValue>,
}

/// Envelope telemetry batch for one station and one timestamp.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvelopeMessage {
    pub network: String,
    pub station: String,
    pub timestamp: DateTime<Utc>,
    pub channels: Vec<EnvelopeChannel>,
}

impl EnvelopeMessage {
    #[must_use]
    pub fn station_id(&self) -> StationId {
        StationId::new(&self.network, &self.station)
    }
}

/// Any message read from the inbound stream.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    Pick(Pick),
    Origin(Origin),
    Event(Event),
    Envelope(EnvelopeMessage),
}

/// Free-text annotation attached to a published magnitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub text: String,
}

/// Contribution of one station to a network magnitude.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationContribution {
    pub waveform_id: WaveformStreamId,
    /// Single-station magnitude
    pub magnitude: f64,
    /// Station magnitude minus network magnitude
    pub residual: f64,
    pub wave_type: String,
    pub soil_class: String,
    pub epicentral_distance_km: f64,
}

/// Network magnitude update as published once per tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MagnitudeRecord {
    pub event_id: String,
    pub origin_id: String,
    pub magnitude: f64,
    #[serde(rename = "type")]
    pub magnitude_type: String,
    pub station_count: usize,
    /// Stations with recent data within the distance threshold
    pub available_stations: usize,
    pub station_magnitudes: Vec<StationContribution>,
    /// Update sequence; repeated on the final record of an event
    pub update: u32,
    pub comments: Vec<Comment>,
    pub likelihood: f64,
    pub is_valid: bool,
    pub delta_mag: f64,
    pub delta_pick: f64,
    pub median_station_magnitude: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub depth_km: Option<f64>,
    pub origin_time: DateTime<Utc>,
    pub creation_time: DateTime<Utc>,
}

impl MagnitudeRecord {
    /// Look up a comment by ID.
    #[must_use]
    pub fn comment(&self, id: &str) -> Option<&str> {
        self.comments
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.text.as_str())
    }
}
