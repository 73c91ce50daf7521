//! Command-line interface definitions.
//!
//! Uses clap derive API for argument parsing.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};

use crate::config::ExpirationReference;
use crate::output::Format;

/// Envelope-based Virtual Seismologist magnitude engine.
#[derive(Parser, Debug)]
#[command(name = "vsmag")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    pub quiet: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a recorded message stream (clock follows envelope timestamps)
    Replay(ReplayArgs),

    /// Process a live message stream on stdin (wall-clock ticks)
    Live(LiveArgs),
}

/// Options shared by both commands.
#[derive(Args, Debug)]
pub struct EngineArgs {
    /// JSON configuration file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// JSON inventory file with stream units and sensor locations
    #[arg(long, short = 'i')]
    pub inventory: PathBuf,

    /// Start time of the engine clock (ISO 8601)
    #[arg(long, value_parser = parse_time)]
    pub start_time: Option<DateTime<Utc>>,

    /// Expiration reference: `ct` (processing time) or `ot` (origin time)
    #[arg(long, value_parser = parse_reference)]
    pub timeref: Option<ExpirationReference>,

    /// Log every buffered envelope value
    #[arg(long)]
    pub log_envelopes: bool,

    /// Output format
    #[arg(long, short = 'f', default_value = "human", value_parser = parse_format)]
    pub format: Format,
}

/// Arguments for the `replay` command.
#[derive(Args, Debug)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// NDJSON message file, `-` for stdin
    #[arg(long, default_value = "-")]
    pub input: String,
}

/// Arguments for the `live` command.
#[derive(Args, Debug)]
pub struct LiveArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Serve records over HTTP on this port
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Host to bind the HTTP server to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
}

/// Parse an output format from string.
fn parse_format(s: &str) -> Result<Format, String> {
    s.parse()
}

/// Parse an expiration reference from string.
fn parse_reference(s: &str) -> Result<ExpirationReference, String> {
    s.parse()
}

/// Parse an ISO 8601 timestamp, with or without offset.
fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|t| t.and_utc())
        .map_err(|e| format!("invalid time {s}: {e}"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_time() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_time("2024-05-01T12:00:00Z").unwrap(), expected);
        assert_eq!(parse_time("2024-05-01T14:00:00+02:00").unwrap(), expected);
        assert_eq!(parse_time("2024-05-01 12:00:00").unwrap(), expected);
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_replay_args() {
        let cli = Cli::parse_from([
            "vsmag",
            "--verbose",
            "replay",
            "--inventory",
            "inv.json",
            "--input",
            "msgs.ndjson",
            "-f",
            "ndjson",
        ]);
        assert!(cli.verbose);
        let Command::Replay(args) = cli.command else {
            panic!("expected replay");
        };
        assert_eq!(args.input, "msgs.ndjson");
        assert_eq!(args.engine.format, Format::Ndjson);
        assert!(args.engine.config.is_none());
    }

    #[test]
    fn test_live_requires_inventory() {
        assert!(Cli::try_parse_from(["vsmag", "live"]).is_err());
        let cli = Cli::try_parse_from(["vsmag", "live", "-i", "inv.json", "-p", "8080"]).unwrap();
        let Command::Live(args) = cli.command else {
            panic!("expected live");
        };
        assert_eq!(args.port, Some(8080));
        assert_eq!(args.host, "127.0.0.1");
        assert!(args.engine.timeref.is_none());
    }

    #[test]
    fn test_timeref_and_start_time() {
        let cli = Cli::try_parse_from([
            "vsmag",
            "replay",
            "-i",
            "inv.json",
            "--timeref",
            "ot",
            "--start-time",
            "2024-05-01T12:00:00Z",
        ])
        .unwrap();
        let Command::Replay(args) = cli.command else {
            panic!("expected replay");
        };
        assert_eq!(args.engine.timeref, Some(ExpirationReference::Ot));
        assert_eq!(
            args.engine.start_time,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        );
        assert!(
            Cli::try_parse_from(["vsmag", "replay", "-i", "inv.json", "--timeref", "now"]).is_err()
        );
    }
}
