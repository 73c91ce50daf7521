//! Message and tick dispatcher.
//!
//! The engine owns the timeline, the object cache and the event tracker and
//! handles one inbound message or one tick at a time. In playback mode the
//! clock follows the newest envelope timestamp; in realtime mode the caller
//! drives it with [`Engine::tick`] once per second.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cache::ObjectCache;
use crate::config::{Config, Mode};
use crate::equations::AttenuationTable;
use crate::errors::VsMagError;
use crate::inventory::{Inventory, SignalUnit};
use crate::models::{
    EnvelopeMessage, Event, InboundMessage, MagnitudeRecord, Origin, Pick, WaveformStreamId,
};
use crate::timeline::{Component, Timeline, ValueType};
use crate::tracker::{EventTracker, HandleOutcome, TrackerSettings};

/// Log target of the per-envelope trace.
const ENVELOPE: &str = "vsmag::envelope";

/// Message counters, reported at shutdown.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub picks: u64,
    pub origins: u64,
    pub rejected_origins: u64,
    pub events: u64,
    pub envelopes: u64,
    /// Envelope values that landed in the timeline
    pub envelope_values: u64,
    pub ticks: u64,
    pub records: u64,
}

/// Single-threaded magnitude engine.
#[derive(Debug)]
pub struct Engine<I> {
    mode: Mode,
    timeline: Timeline,
    cache: ObjectCache,
    tracker: EventTracker,
    inventory: I,
    current: Option<DateTime<Utc>>,
    log_envelopes: bool,
    stats: EngineStats,
}

impl<I: Inventory> Engine<I> {
    /// Build an engine from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the site-effect grid cannot be loaded.
    pub fn from_config(config: &Config, inventory: I) -> Result<Self, VsMagError> {
        let site = config.site_effect()?;
        if site.is_enabled() {
            info!("site effect correction enabled");
        }
        Ok(Self {
            mode: config.mode,
            timeline: Timeline::new(config.back_slots, config.head_slots, config.clip_timeout),
            cache: ObjectCache::new(config.cache_retention()),
            tracker: EventTracker::new(
                TrackerSettings::from(config),
                site,
                AttenuationTable::cua_heaton(),
            ),
            inventory,
            current: None,
            log_envelopes: config.log_envelopes,
            stats: EngineStats::default(),
        })
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn current_time(&self) -> Option<DateTime<Utc>> {
        self.current
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    #[must_use]
    pub fn tracker(&self) -> &EventTracker {
        &self.tracker
    }

    /// Move the engine clock and the timeline reference to `time`.
    ///
    /// Returns `false` if `time` is earlier than the current time, in which
    /// case nothing changes.
    pub fn set_current_time(&mut self, time: DateTime<Utc>) -> bool {
        if self.current.is_some_and(|c| time < c) {
            return false;
        }
        self.current = Some(time);
        self.timeline.set_reference_time(time)
    }

    /// Handle one inbound message.
    ///
    /// Returns the records published as a consequence, which is only ever
    /// non-empty for envelopes in playback mode.
    pub fn handle_message(&mut self, message: InboundMessage) -> Vec<MagnitudeRecord> {
        match message {
            InboundMessage::Pick(pick) => {
                self.handle_pick(pick);
                Vec::new()
            }
            InboundMessage::Origin(origin) => {
                self.handle_origin(origin);
                Vec::new()
            }
            InboundMessage::Event(event) => {
                self.handle_event(event);
                Vec::new()
            }
            InboundMessage::Envelope(env) => self.handle_envelope(&env),
        }
    }

    fn handle_pick(&mut self, pick: Pick) {
        self.stats.picks += 1;
        let stamp = self.current.unwrap_or(pick.time);
        debug!("pick {} at {}", pick.id, pick.waveform_id);
        self.cache.insert_pick(pick, stamp);
    }

    fn handle_origin(&mut self, origin: Origin) {
        if let Err(e) = origin.validate() {
            self.stats.rejected_origins += 1;
            warn!("rejecting origin: {e}");
            return;
        }
        self.stats.origins += 1;
        let stamp = self.current.unwrap_or(origin.time);
        self.cache.insert_origin(origin, stamp);
    }

    fn handle_event(&mut self, event: Event) {
        self.stats.events += 1;
        let stamp = self.current.unwrap_or_else(Utc::now);
        let outcome = self.tracker.handle_event(&event, &self.cache, self.current);
        match outcome {
            HandleOutcome::Created => info!("tracking event {}", event.id),
            HandleOutcome::Updated => debug!("updated event {}", event.id),
            HandleOutcome::Stale | HandleOutcome::MissingOrigin | HandleOutcome::Expired => {}
        }
        self.cache.insert_event(event, stamp);
    }

    fn handle_envelope(&mut self, env: &EnvelopeMessage) -> Vec<MagnitudeRecord> {
        self.stats.envelopes += 1;

        let mut dirty = false;
        if self.mode == Mode::Playback && self.current.is_none_or(|c| env.timestamp > c) {
            dirty = self.set_current_time(env.timestamp);
        }

        let written = self.timeline.feed(env, &self.inventory);
        self.stats.envelope_values += written as u64;
        if written == 0 {
            dirty = false;
        } else if self.log_envelopes {
            self.log_envelope(env);
        }

        if dirty {
            self.process()
        } else {
            Vec::new()
        }
    }

    /// Trace the buffered values of every channel of `env`.
    fn log_envelope(&self, env: &EnvelopeMessage) {
        let id = env.station_id();
        let now = self
            .current
            .map_or_else(|| "-".to_string(), |c| c.format("%FT%T%.3fZ").to_string());

        for cha in &env.channels {
            let stream = WaveformStreamId {
                network: env.network.clone(),
                station: env.station.clone(),
                location: cha.location.clone(),
                channel: cha.channel.clone(),
            };
            let Some(unit) = self
                .inventory
                .gain_unit(&stream, env.timestamp)
                .and_then(|u| u.parse::<SignalUnit>().ok())
            else {
                continue;
            };
            let Ok(component) = cha.component.parse::<Component>() else {
                continue;
            };
            let Ok(Some(cell)) = self.timeline.cell_at(&id, unit, env.timestamp) else {
                continue;
            };

            let stored = cell.envelope(component);
            let values = ValueType::ALL
                .iter()
                .filter_map(|&vt| stored.get(vt).map(|v| format!("{}: {v:.6e}", vt.as_str())))
                .collect::<Vec<_>>()
                .join(" ");
            info!(
                target: ENVELOPE,
                "Current time: {now}; Envelope: timestamp: {} waveformID: {stream} {values}{}",
                env.timestamp.format("%FT%T%.3fZ"),
                if cell.is_clipped() { " clipped" } else { "" }
            );
        }
    }

    /// Realtime tick: move the clock to `now` and process all events.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<MagnitudeRecord> {
        if !self.set_current_time(now) {
            debug!("clock went backwards, skipping tick");
            return Vec::new();
        }
        self.process()
    }

    fn process(&mut self) -> Vec<MagnitudeRecord> {
        let Some(now) = self.current else {
            return Vec::new();
        };
        self.stats.ticks += 1;

        let records = self
            .tracker
            .process_events(now, &self.cache, &self.timeline, &self.inventory);
        self.stats.records += records.len() as u64;

        let pruned = self.cache.prune(now);
        if pruned > 0 {
            debug!(
                "pruned {pruned} cached objects, {} left",
                self.cache.object_count()
            );
        }
        records
    }

    /// Log the message counters and the deduplication statistics.
    pub fn log_summary(&self) {
        let s = &self.stats;
        let published = self.tracker.published();
        info!(
            "processed {} picks, {} origins ({} rejected), {} events, {} envelopes ({} values)",
            s.picks, s.origins, s.rejected_origins, s.events, s.envelopes, s.envelope_values
        );
        info!(
            "{} ticks, {} records published, {} events active, {} retired",
            s.ticks,
            s.records,
            self.tracker.active_count(),
            published.len()
        );
        if !published.is_empty() {
            info!(
                "{} notifications for retired events ignored ({:.1}%)",
                published.total_stale(),
                published.stale_rate() * 100.0
            );
        }
    }
}
