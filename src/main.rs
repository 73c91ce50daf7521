//! vsmag - Virtual Seismologist magnitudes from ground-motion envelopes.
//!
//! Reads picks, origins, events and envelope telemetry as NDJSON, tracks
//! candidate earthquakes and publishes an updated network magnitude once
//! per processing tick.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info, warn};

mod cache;
mod cli;
mod config;
mod dedup;
mod engine;
mod equations;
mod errors;
mod geo;
mod inventory;
mod magnitude;
mod models;
mod output;
mod quality;
mod server;
mod site;
mod timeline;
mod tracker;

use cli::{Cli, Command, EngineArgs};
use config::{Config, Mode};
use engine::Engine;
use inventory::StaticInventory;
use models::{InboundMessage, MagnitudeRecord};
use output::Format;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Command::Replay(args) => cmd_replay(args),
        Command::Live(args) => cmd_live(args),
    }
}

/// Initialize tracing subscriber.
fn init_tracing(verbose: bool, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Load configuration and inventory and build the engine.
fn build_engine(args: &EngineArgs, mode: Option<Mode>) -> Result<Engine<StaticInventory>> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(mode) = mode {
        config.mode = mode;
    }
    if let Some(reference) = args.timeref {
        config.expiration_reference = reference;
    }
    if args.log_envelopes {
        config.log_envelopes = true;
    }
    config.validate().context("invalid configuration")?;

    let inventory = StaticInventory::from_file(&args.inventory)
        .with_context(|| format!("failed to load inventory {}", args.inventory.display()))?;
    info!(
        "inventory: {} stations from {}",
        inventory.station_count(),
        args.inventory.display()
    );

    let mut engine = Engine::from_config(&config, inventory).context("failed to set up engine")?;
    if let Some(t) = args.start_time {
        engine.set_current_time(t);
        info!("engine clock starts at {t}");
    }
    Ok(engine)
}

/// Parse one input line, logging and skipping malformed ones.
fn parse_line(line: &str, lineno: u64) -> Option<InboundMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!("line {lineno}: skipping malformed message: {e}");
            None
        }
    }
}

/// Write a batch of records to stdout.
fn emit(records: &[MagnitudeRecord], format: Format) -> io::Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    output::write_records(&mut handle, records, format)?;
    // Flush after each batch for real-time output
    handle.flush()
}

/// Execute the `replay` command - process a recorded stream in playback mode.
fn cmd_replay(args: cli::ReplayArgs) -> Result<()> {
    let mut engine = build_engine(&args.engine, Some(Mode::Playback))?;
    let format = args.engine.format;

    let reader: Box<dyn BufRead> = if args.input == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(&args.input)
            .with_context(|| format!("failed to open input {}", args.input))?;
        Box::new(BufReader::new(file))
    };

    info!("replaying messages from {}", args.input);

    // A JSON array can only be written once the stream is exhausted
    let mut collected = Vec::new();
    let mut lineno = 0u64;

    for line in reader.lines() {
        lineno += 1;
        let line = line.context("failed to read input")?;
        let Some(msg) = parse_line(&line, lineno) else {
            continue;
        };
        let records = engine.handle_message(msg);
        if format == Format::Json {
            collected.extend(records);
        } else if let Err(e) = emit(&records, format) {
            warn!("failed to write records: {e}");
        }
    }

    if format == Format::Json {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        output::write_json(&mut handle, &collected)?;
    }

    engine.log_summary();
    Ok(())
}

/// Execute the `live` command - process stdin with wall-clock ticks.
fn cmd_live(args: cli::LiveArgs) -> Result<()> {
    tokio::runtime::Runtime::new()
        .context("failed to create tokio runtime")?
        .block_on(live_loop(args))
}

async fn live_loop(args: cli::LiveArgs) -> Result<()> {
    let mut engine = build_engine(&args.engine, None)?;
    let format = args.engine.format;
    let realtime = engine.mode() == Mode::Realtime;

    if realtime && engine.current_time().is_none() {
        engine.set_current_time(Utc::now());
    }

    let state = args.port.map(|port| {
        let state = server::AppState::new();
        let server_state = state.clone();
        let host = args.host.clone();
        tokio::spawn(async move {
            if let Err(e) = server::run_server(&host, port, server_state).await {
                error!("server failed: {e:#}");
            }
        });
        state
    });

    let publish = |records: &[MagnitudeRecord]| {
        if let Some(state) = &state {
            state.publish(records);
        }
        if let Err(e) = emit(records, format) {
            warn!("failed to write records: {e}");
        }
    };

    info!(
        "processing live stream from stdin ({} mode), press Ctrl+C to stop",
        if realtime { "realtime" } else { "playback" }
    );

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut lineno = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(line) => {
                        lineno += 1;
                        if let Some(msg) = parse_line(&line, lineno) {
                            publish(&engine.handle_message(msg));
                        }
                    }
                    None => {
                        info!("end of input");
                        break;
                    }
                }
            }
            _ = interval.tick(), if realtime => {
                publish(&engine.tick(Utc::now()));
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    engine.log_summary();
    Ok(())
}
