//! Station metadata lookup.
//!
//! The engine only needs two answers from the inventory: the physical unit
//! of a stream and the coordinates of a sensor location. The [`Inventory`]
//! trait is the seam; [`StaticInventory`] serves both from a JSON file.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::errors::VsMagError;
use crate::models::{StationId, WaveformStreamId};

/// Physical unit of a sensor's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalUnit {
    /// Broadband / short-period seismometer (m/s)
    Velocity,
    /// Strong-motion accelerometer (m/s²)
    Acceleration,
}

impl SignalUnit {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Velocity => "M/S",
            Self::Acceleration => "M/S**2",
        }
    }
}

impl std::str::FromStr for SignalUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "M/S" => Ok(Self::Velocity),
            "M/S**2" | "M/S^2" | "M/S/S" => Ok(Self::Acceleration),
            _ => Err(format!("unsupported gain unit: {s}")),
        }
    }
}

/// Geographic position of a sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Metadata source consulted by the timeline and the tracker.
pub trait Inventory {
    /// Gain unit string of a stream valid at `time`, if the stream is known.
    fn gain_unit(&self, stream: &WaveformStreamId, time: DateTime<Utc>) -> Option<String>;

    /// Coordinates of a station's sensor location valid at `time`.
    fn sensor_location(
        &self,
        station: &StationId,
        location_code: &str,
        time: DateTime<Utc>,
    ) -> Option<Location>;
}

/// One stream epoch as stored in the inventory file.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEntry {
    pub network: String,
    pub station: String,
    #[serde(default)]
    pub location: String,
    pub channel: String,
    pub gain_unit: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl StreamEntry {
    fn active_at(&self, time: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| s <= time) && self.end.is_none_or(|e| time < e)
    }
}

#[derive(Debug, Deserialize)]
struct InventoryFile {
    streams: Vec<StreamEntry>,
}

/// In-memory inventory indexed by station.
#[derive(Debug, Default)]
pub struct StaticInventory {
    stations: HashMap<StationId, Vec<StreamEntry>>,
}

impl StaticInventory {
    #[must_use]
    pub fn new(streams: Vec<StreamEntry>) -> Self {
        let mut stations: HashMap<StationId, Vec<StreamEntry>> = HashMap::new();
        for entry in streams {
            stations
                .entry(StationId::new(&entry.network, &entry.station))
                .or_default()
                .push(entry);
        }
        Self { stations }
    }

    /// Load an inventory from a JSON file of the form `{"streams": [...]}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, VsMagError> {
        let text = std::fs::read_to_string(path).map_err(|source| VsMagError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: InventoryFile = serde_json::from_str(&text)?;
        debug!(
            "loaded {} streams from {}",
            file.streams.len(),
            path.display()
        );
        Ok(Self::new(file.streams))
    }

    /// Number of stations with at least one stream.
    #[must_use]
    pub fn station_count(&self) -> usize {
        self.stations.len()
    }
}

impl Inventory for StaticInventory {
    fn gain_unit(&self, stream: &WaveformStreamId, time: DateTime<Utc>) -> Option<String> {
        self.stations
            .get(&stream.station_id())?
            .iter()
            .find(|e| {
                e.location == stream.location && e.channel == stream.channel && e.active_at(time)
            })
            .map(|e| e.gain_unit.clone())
    }

    fn sensor_location(
        &self,
        station: &StationId,
        location_code: &str,
        time: DateTime<Utc>,
    ) -> Option<Location> {
        self.stations
            .get(station)?
            .iter()
            .find(|e| e.location == location_code && e.active_at(time))
            .map(|e| Location {
                latitude: e.latitude,
                longitude: e.longitude,
            })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::TimeZone;

    use super::*;

    fn entry(channel: &str, unit: &str, end: Option<DateTime<Utc>>) -> StreamEntry {
        StreamEntry {
            network: "CH".into(),
            station: "DAVOX".into(),
            location: String::new(),
            channel: channel.into(),
            gain_unit: unit.into(),
            latitude: 46.78,
            longitude: 9.88,
            start: None,
            end,
        }
    }

    #[test]
    fn test_signal_unit_parse() {
        assert_eq!("M/S".parse::<SignalUnit>(), Ok(SignalUnit::Velocity));
        assert_eq!("m/s**2".parse::<SignalUnit>(), Ok(SignalUnit::Acceleration));
        assert!("M".parse::<SignalUnit>().is_err());
    }

    #[test]
    fn test_epoch_lookup() {
        let closed = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let inv = StaticInventory::new(vec![
            entry("HHZ", "M/S", Some(closed)),
            entry("HGZ", "M/S**2", None),
        ]);
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let hh = WaveformStreamId {
            network: "CH".into(),
            station: "DAVOX".into(),
            location: String::new(),
            channel: "HHZ".into(),
        };
        assert!(inv.gain_unit(&hh, now).is_none());
        let hg = WaveformStreamId {
            channel: "HGZ".into(),
            ..hh
        };
        assert_eq!(inv.gain_unit(&hg, now).as_deref(), Some("M/S**2"));

        let loc = inv
            .sensor_location(&StationId::new("CH", "DAVOX"), "", now)
            .expect("location");
        assert!((loc.latitude - 46.78).abs() < 1e-9);
        assert!(inv
            .sensor_location(&StationId::new("CH", "DAVOX"), "01", now)
            .is_none());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"streams":[{{"network":"CH","station":"SIMPL","channel":"HHZ","gain_unit":"M/S","latitude":46.2,"longitude":8.0}}]}}"#
        )
        .unwrap();
        let inv = StaticInventory::from_file(file.path()).unwrap();
        assert_eq!(inv.station_count(), 1);
    }

    #[test]
    fn test_missing_file() {
        let err = StaticInventory::from_file(Path::new("/nonexistent/inventory.json"));
        assert!(matches!(err, Err(VsMagError::Io { .. })));
    }
}
