//! Output formatters for magnitude records.
//!
//! Supports human-readable (with colors), JSON, and NDJSON formats.

use std::io::{self, Write};

use crate::models::MagnitudeRecord;

// ANSI color codes
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

// Magnitude-based colors
const RED: &str = "\x1b[91m"; // mag >= 6.0
const YELLOW: &str = "\x1b[93m"; // mag >= 5.0
const CYAN: &str = "\x1b[96m"; // mag >= 4.0
const GREEN: &str = "\x1b[92m"; // mag >= 3.0
const WHITE: &str = "\x1b[97m";

const VALID: &str = "\x1b[42;30m";
const INVALID: &str = "\x1b[41;97m";

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Human-readable terminal output (default)
    #[default]
    Human,
    /// JSON array
    Json,
    /// Newline-delimited JSON (one object per line)
    Ndjson,
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            "ndjson" => Ok(Self::Ndjson),
            _ => Err(format!("unknown format: {s} (expected: human, json, ndjson)")),
        }
    }
}

fn magnitude_color(mag: f64) -> &'static str {
    match mag {
        m if m >= 6.0 => RED,
        m if m >= 5.0 => YELLOW,
        m if m >= 4.0 => CYAN,
        m if m >= 3.0 => GREEN,
        _ => WHITE,
    }
}

fn validity_badge(record: &MagnitudeRecord) -> String {
    if record.is_valid {
        format!("{VALID} VALID {RESET}")
    } else {
        format!("{INVALID} CHECK {RESET}")
    }
}

/// Write records in human-readable format, one line per record.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_human<W: Write>(writer: &mut W, records: &[MagnitudeRecord]) -> io::Result<()> {
    for rec in records {
        let color = magnitude_color(rec.magnitude);
        let depth = rec
            .depth_km
            .map_or_else(|| "  ?".to_string(), |d| format!("{d:>3.0}"));

        writeln!(
            writer,
            "{color}{BOLD}M{:.2}{RESET} {DIM}{}{RESET} │ \
             {} {:.2} │ \
             {} #{:<3} │ \
             {:>3}/{:<3} sta │ \
             {:>7.3},{:>8.3} {depth}km │ \
             {} UTC",
            rec.magnitude,
            rec.magnitude_type,
            validity_badge(rec),
            rec.likelihood,
            rec.event_id,
            rec.update,
            rec.station_count,
            rec.available_stations,
            rec.latitude,
            rec.longitude,
            rec.origin_time.format("%Y-%m-%d %H:%M:%S%.1f"),
        )?;
    }
    Ok(())
}

/// Write records as a JSON array.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_json<W: Write>(writer: &mut W, records: &[MagnitudeRecord]) -> io::Result<()> {
    let json = serde_json::to_string_pretty(records)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{json}")
}

/// Write records as newline-delimited JSON.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_ndjson<W: Write>(writer: &mut W, records: &[MagnitudeRecord]) -> io::Result<()> {
    for rec in records {
        let json = serde_json::to_string(rec)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(writer, "{json}")?;
    }
    Ok(())
}

/// Write records in the specified format.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_records<W: Write>(
    writer: &mut W,
    records: &[MagnitudeRecord],
    format: Format,
) -> io::Result<()> {
    match format {
        Format::Human => write_human(writer, records),
        Format::Json => write_json(writer, records),
        Format::Ndjson => write_ndjson(writer, records),
    }
}
