//! Error types for vsmag.
//!
//! Uses `thiserror` for library-style error definitions. [`VsMagError`] covers
//! startup and message validation; the remaining types are local to one
//! station in one processing cycle.

use thiserror::Error;

/// Errors that can occur while loading inputs or validating messages.
#[derive(Error, Debug)]
pub enum VsMagError {
    /// Reading a file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON parsing failed
    #[error("Failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Configuration value rejected during validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Inbound object failed validation
    #[error("Invalid message: {0}")]
    Validation(String),

    /// Vs30 grid file is malformed
    #[error("Invalid Vs30 grid {path}: {message}")]
    Vs30Grid { path: String, message: String },
}

/// Reasons why [`crate::timeline::Timeline::maximum`] could not produce peaks.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaximumError {
    /// Window lies outside the buffer or the pick is not before the window end
    #[error("time window outside of buffer")]
    IndexError,

    /// Less than one second of data after the pick
    #[error("not enough data after the pick")]
    NotEnoughData,

    /// Clipping defeats every usable sensor
    #[error("clipped data")]
    ClippedData,

    /// Sensor present but without a complete set of maxima
    #[error("no data")]
    NoData,

    /// Station or sensor unknown to the timeline
    #[error("no sensor")]
    NoSensor,
}

/// A timestamp that does not map onto a ring buffer slot.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("slot offset {offset} out of range [0, {capacity})")]
pub struct OutOfRange {
    pub offset: i64,
    pub capacity: usize,
}

/// Station peaks that cannot enter the likelihood computation.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum StationInputError {
    /// Logarithms of zero or negative amplitudes are undefined
    #[error("non-positive amplitude {value} for {channel}")]
    NonPositiveAmplitude { channel: &'static str, value: f64 },
}
