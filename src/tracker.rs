//! Event tracking and magnitude processing.
//!
//! Every candidate event from the locator becomes a [`VsEvent`] holding one
//! time window per picked station. On each tick the tracker pulls the peak
//! envelopes inside those windows from the [`Timeline`], estimates the
//! network magnitude and evaluates its quality. Expired events publish one
//! final record and are retired into the [`PublishedEvents`] set.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::cache::ObjectCache;
use crate::config::{Config, ExpirationReference};
use crate::dedup::PublishedEvents;
use crate::equations::{AttenuationTable, StationInput};
use crate::errors::MaximumError;
use crate::geo;
use crate::inventory::Inventory;
use crate::magnitude;
use crate::models::{
    Comment, Event, MagnitudeRecord, Origin, StationContribution, StationId, WaveformStreamId,
};
use crate::quality::{self, Quality};
use crate::site::{SiteCorrection, SiteEffect};
use crate::timeline::{Amplitudes, Timeline, ValueType};

/// Log target of the per-event processing summaries.
const PROCESSING: &str = "vsmag::processing";

/// Magnitude type tag of published records.
pub const MAGNITUDE_TYPE: &str = "MVS";

/// Data window of one station for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VsTimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub pick: DateTime<Utc>,
}

/// Result of one successful processing pass.
#[derive(Debug, Clone)]
pub struct Estimate {
    pub magnitude: f64,
    pub median: f64,
    pub contributions: Vec<StationContribution>,
    /// Stations that delivered data within the distance threshold
    pub available: usize,
    pub quality: Quality,
    pub computed_at: DateTime<Utc>,
}

/// A candidate earthquake under magnitude tracking.
#[derive(Debug, Clone)]
pub struct VsEvent {
    pub origin_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub depth: Option<f64>,
    pub origin_time: DateTime<Utc>,
    pub expiration: DateTime<Utc>,
    pub windows: BTreeMap<StationId, VsTimeWindow>,
    pub picked_stations: BTreeSet<StationId>,
    pub picked_within_threshold: usize,
    /// Distance threshold for the station counts (degrees)
    pub dthresh: f64,
    pub azimuthal_gap: Option<f64>,
    pub estimate: Option<Estimate>,
    /// Sequence of the last published update
    pub update: Option<u32>,
    /// Wall-clock arrival of the first origin (latency diagnostics)
    pub origin_arrival_time: DateTime<Utc>,
    pub origin_creation_time: Option<DateTime<Utc>>,
}

impl VsEvent {
    fn new(origin: &Origin, expiration: DateTime<Utc>) -> Self {
        Self {
            origin_id: origin.id.clone(),
            latitude: origin.latitude,
            longitude: origin.longitude,
            depth: origin.depth,
            origin_time: origin.time,
            expiration,
            windows: BTreeMap::new(),
            picked_stations: BTreeSet::new(),
            picked_within_threshold: 0,
            dthresh: 0.0,
            azimuthal_gap: origin.azimuthal_gap,
            estimate: None,
            update: None,
            origin_arrival_time: Utc::now(),
            origin_creation_time: origin.creation_time,
        }
    }

    fn refresh_location(&mut self, origin: &Origin) {
        self.origin_id.clone_from(&origin.id);
        self.latitude = origin.latitude;
        self.longitude = origin.longitude;
        self.depth = origin.depth;
        self.origin_time = origin.time;
        self.azimuthal_gap = origin.azimuthal_gap;
    }

    /// Rebuild windows, picked stations and the distance threshold from
    /// the origin's arrivals.
    fn rebuild_windows(&mut self, origin: &Origin, cache: &ObjectCache, settings: &TrackerSettings) {
        self.windows.clear();
        self.picked_stations.clear();

        let mut dmax: f64 = 0.0;
        let mut dsum = 0.0;
        let mut resolved = Vec::with_capacity(origin.arrivals.len());

        for arrival in &origin.arrivals {
            let Some(pick) = cache.pick(&arrival.pick_id) else {
                debug!("pick {} not in cache", arrival.pick_id);
                continue;
            };
            let id = pick.waveform_id.station_id();
            resolved.push((id.clone(), arrival.distance));

            // First arrival per station counts for the threshold
            if self.picked_stations.insert(id.clone()) {
                dmax = dmax.max(arrival.distance);
                dsum += arrival.distance;
            }

            self.windows.entry(id).or_insert(VsTimeWindow {
                start: pick.time - settings.tw_start,
                end: pick.time + settings.tw_end,
                pick: pick.time,
            });
        }

        #[allow(clippy::cast_precision_loss)]
        let davg = if self.picked_stations.is_empty() {
            0.0
        } else {
            dsum / self.picked_stations.len() as f64
        };
        self.dthresh = 0.5 * (dmax + davg);

        let dthresh = self.dthresh;
        self.picked_within_threshold = resolved
            .iter()
            .filter(|(_, distance)| *distance <= dthresh)
            .map(|(id, _)| id)
            .collect::<BTreeSet<_>>()
            .len();

        debug!(
            "dmax: {dmax:.3}, davg: {davg:.3}, dthresh: {:.3}",
            self.dthresh
        );
    }

    fn record(&self, event_id: &str, update: u32) -> Option<MagnitudeRecord> {
        let estimate = self.estimate.as_ref()?;
        Some(MagnitudeRecord {
            event_id: event_id.to_string(),
            origin_id: self.origin_id.clone(),
            magnitude: estimate.magnitude,
            magnitude_type: MAGNITUDE_TYPE.to_string(),
            station_count: estimate.contributions.len(),
            available_stations: estimate.available,
            station_magnitudes: estimate.contributions.clone(),
            update,
            comments: vec![
                Comment {
                    id: "update".into(),
                    text: update.to_string(),
                },
                Comment {
                    id: "likelihood".into(),
                    text: format!("{:.2}", estimate.quality.likelihood),
                },
            ],
            likelihood: estimate.quality.likelihood,
            is_valid: estimate.quality.is_valid,
            delta_mag: estimate.quality.delta_mag,
            delta_pick: estimate.quality.delta_pick,
            median_station_magnitude: estimate.median,
            latitude: self.latitude,
            longitude: self.longitude,
            depth_km: self.depth,
            origin_time: self.origin_time,
            creation_time: estimate.computed_at,
        })
    }
}

/// What happened to an incoming event notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Created,
    Updated,
    /// Already published and retired
    Stale,
    /// Preferred origin not in the cache
    MissingOrigin,
    /// Origin-time expiration already passed
    Expired,
}

/// Tracker-related subset of the configuration.
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub tw_start: TimeDelta,
    pub tw_end: TimeDelta,
    pub expiration: TimeDelta,
    pub reference: ExpirationReference,
    pub max_epicentral_distance: Option<f64>,
    pub max_azimuthal_gap: Option<f64>,
    pub retention: TimeDelta,
}

impl From<&Config> for TrackerSettings {
    fn from(config: &Config) -> Self {
        Self {
            tw_start: TimeDelta::seconds(config.tw_start),
            tw_end: TimeDelta::seconds(config.tw_end),
            expiration: config.expiration(),
            reference: config.expiration_reference,
            max_epicentral_distance: config.max_epicentral_distance,
            max_azimuthal_gap: config.max_azimuthal_gap,
            retention: config.cache_retention(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Processed {
    Estimated,
    NoInput,
    Skipped,
}

/// Per-event magnitude computation.
#[derive(Debug)]
struct Processor {
    settings: TrackerSettings,
    table: AttenuationTable,
    site: SiteEffect,
}

/// Convert peaks from m-based to cm-based units and remove the site term.
fn corrected(peaks: &Amplitudes, correction: &SiteCorrection) -> Amplitudes {
    let cm = |vt: ValueType| peaks.get(vt) / correction.factor(vt) * 100.0;
    Amplitudes {
        acceleration: cm(ValueType::Acceleration),
        velocity: cm(ValueType::Velocity),
        displacement: cm(ValueType::Displacement),
    }
}

impl Processor {
    #[allow(clippy::too_many_lines)]
    fn process(
        &self,
        id: &str,
        evt: &mut VsEvent,
        now: DateTime<Utc>,
        timeline: &Timeline,
        inventory: &dyn Inventory,
    ) -> Processed {
        if evt.windows.is_empty() {
            return Processed::Skipped;
        }
        if let Some((gap, max)) = evt
            .azimuthal_gap
            .zip(self.settings.max_azimuthal_gap)
            .filter(|(gap, max)| gap > max)
        {
            debug!("{id}: azimuthal gap {gap:.1} exceeds {max:.1}, skipping");
            return Processed::Skipped;
        }

        info!(target: PROCESSING, "Start logging for event: {id}");
        info!(
            target: PROCESSING,
            "update number: {}",
            evt.update.map_or(-1, i64::from)
        );

        let mut inputs = Vec::new();
        let mut contributions = Vec::new();
        let mut unused = BTreeSet::new();

        for (sid, tw) in &evt.windows {
            let peak = match timeline.maximum(sid, tw.start, tw.end, tw.pick) {
                Ok(p) => p,
                Err(MaximumError::IndexError) => {
                    debug!("{sid}: time window outside of buffer");
                    continue;
                }
                Err(e) => {
                    warn!("{sid}: {e}");
                    unused.insert(sid.clone());
                    continue;
                }
            };

            let Some(loc) = inventory.sensor_location(sid, &peak.location_code, tw.pick) else {
                warn!(
                    "{sid}.{}: sensor location not in inventory: ignoring",
                    peak.location_code
                );
                continue;
            };

            let epicdist =
                geo::distance_km(evt.latitude, evt.longitude, loc.latitude, loc.longitude);
            if self
                .settings
                .max_epicentral_distance
                .is_some_and(|max| epicdist > max)
            {
                continue;
            }

            let pga = peak.vertical.acceleration.max(peak.horizontal.acceleration);
            let correction = self.site.correction(loc.latitude, loc.longitude, pga);
            let input = match StationInput::new(
                corrected(&peak.vertical, &correction),
                corrected(&peak.horizontal, &correction),
                correction.soil,
                epicdist,
                &self.table,
            ) {
                Ok(input) => input,
                Err(e) => {
                    warn!("{sid}: {e}");
                    unused.insert(sid.clone());
                    continue;
                }
            };

            info!(
                target: PROCESSING,
                "Sensor: {sid}.{}.{}; Wavetype: {}; Soil class: {}; Magnitude: {:.2}",
                peak.location_code,
                peak.stream_code,
                input.wave,
                input.soil,
                input.mest
            );
            info!(
                target: PROCESSING,
                "station lat: {:.2}; station lon: {:.2}; epicentral distance: {epicdist:.2};",
                loc.latitude,
                loc.longitude
            );
            info!(
                target: PROCESSING,
                "PGA(Z): {:.2e}; PGV(Z): {:.2e}; PGD(Z): {:.2e}",
                input.vertical.acceleration / 100.0,
                input.vertical.velocity / 100.0,
                input.vertical.displacement / 100.0
            );
            info!(
                target: PROCESSING,
                "PGA(H): {:.2e}; PGV(H): {:.2e}; PGD(H): {:.2e}",
                input.horizontal.acceleration / 100.0,
                input.horizontal.velocity / 100.0,
                input.horizontal.displacement / 100.0
            );

            contributions.push(StationContribution {
                waveform_id: WaveformStreamId {
                    network: sid.network.clone(),
                    station: sid.station.clone(),
                    location: peak.location_code.clone(),
                    channel: peak.stream_code.clone(),
                },
                magnitude: input.mest,
                residual: 0.0,
                wave_type: input.wave.to_string(),
                soil_class: input.soil.to_string(),
                epicentral_distance_km: epicdist,
            });
            inputs.push(input);
        }

        let Some(magnitude) = magnitude::grid_search(&inputs, &self.table) else {
            info!(target: PROCESSING, "End logging for event: {id}");
            return Processed::NoInput;
        };
        let mests: Vec<f64> = inputs.iter().map(|i| i.mest).collect();
        let median = magnitude::median(&mests).unwrap_or(magnitude);

        for c in &mut contributions {
            c.residual = c.magnitude - magnitude;
        }

        let available = timeline.poll_buffer(evt.latitude, evt.longitude, evt.dthresh, inventory);
        let quality = quality::evaluate(magnitude, median, evt.picked_within_threshold, available);

        info!(
            target: PROCESSING,
            "VS-mag: {magnitude:.2}; median single-station-mag: {median:.2}; lat: {:.2}; lon: {:.2}; depth : {} km",
            evt.latitude,
            evt.longitude,
            evt.depth.map_or_else(|| "-".to_string(), |d| format!("{d:.2}"))
        );
        let wall = Utc::now();
        info!(
            target: PROCESSING,
            "creation time: {}; origin time: {}; t-diff: {:.2}; time since origin arrival: {:.3}; time since origin creation: {}",
            now.format("%FT%T%.2fZ"),
            evt.origin_time.format("%FT%T%.2fZ"),
            seconds(now - evt.origin_time),
            seconds(wall - evt.origin_arrival_time),
            evt.origin_creation_time
                .map_or_else(|| "-".to_string(), |t| format!("{:.3}", seconds(wall - t)))
        );
        info!(
            target: PROCESSING,
            "# picked stations: {}; # envelope streams: {}",
            evt.picked_stations.len(),
            timeline.stream_count()
        );
        info!(
            target: PROCESSING,
            "Distance threshold (dt): {:.2} km; # picked stations < dt: {}; # envelope streams < dt: {available}",
            geo::deg_to_km(evt.dthresh),
            evt.picked_within_threshold
        );
        if !unused.is_empty() {
            info!(
                target: PROCESSING,
                "Stations not used for VS-mag: {}",
                unused
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ")
            );
        }
        info!(
            target: PROCESSING,
            "Magnitude check: {:.3}; Arrivals check: {:.3}; Azimuthal gap: {}",
            quality.delta_mag,
            quality.delta_pick,
            evt.azimuthal_gap
                .map_or_else(|| "-".to_string(), |g| format!("{g:.3}"))
        );
        info!(
            target: PROCESSING,
            "likelihood: {:.2}; valid: {}",
            quality.likelihood,
            quality.is_valid
        );
        info!(target: PROCESSING, "End logging for event: {id}");

        evt.estimate = Some(Estimate {
            magnitude,
            median,
            contributions,
            available,
            quality,
            computed_at: now,
        });
        Processed::Estimated
    }
}

#[allow(clippy::cast_precision_loss)]
fn seconds(delta: TimeDelta) -> f64 {
    delta.num_milliseconds() as f64 / 1000.0
}

/// Owner of all tracked events and the retired set.
#[derive(Debug)]
pub struct EventTracker {
    events: BTreeMap<String, VsEvent>,
    published: PublishedEvents,
    processor: Processor,
}

impl EventTracker {
    #[must_use]
    pub fn new(settings: TrackerSettings, site: SiteEffect, table: AttenuationTable) -> Self {
        Self {
            events: BTreeMap::new(),
            published: PublishedEvents::default(),
            processor: Processor {
                settings,
                table,
                site,
            },
        }
    }

    /// Number of events under tracking.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn event(&self, id: &str) -> Option<&VsEvent> {
        self.events.get(id)
    }

    #[must_use]
    pub fn published(&self) -> &PublishedEvents {
        &self.published
    }

    fn expiration_for(&self, origin: &Origin, now: DateTime<Utc>) -> DateTime<Utc> {
        let settings = &self.processor.settings;
        match settings.reference {
            ExpirationReference::Ct => now + settings.expiration,
            ExpirationReference::Ot => origin.time + settings.expiration,
        }
    }

    /// Create or update the tracked state of an event from its preferred
    /// origin. `now` is the engine's current time, if known.
    ///
    /// A preferred origin without arrivals only moves the expiration. The
    /// location, depth, origin time and windows keep the values of the last
    /// origin that had arrivals.
    pub fn handle_event(
        &mut self,
        event: &Event,
        cache: &ObjectCache,
        now: Option<DateTime<Utc>>,
    ) -> HandleOutcome {
        if self.published.check(&event.id).is_stale() {
            debug!("Event {} has already been published", event.id);
            return HandleOutcome::Stale;
        }

        let Some(origin) = cache.origin(&event.preferred_origin_id) else {
            warn!(
                "Object {} not found in cache, is the cache timeout long enough?",
                event.preferred_origin_id
            );
            return HandleOutcome::MissingOrigin;
        };

        let now = now.unwrap_or(origin.time);
        let expiration = self.expiration_for(origin, now);

        let outcome = if let Some(evt) = self.events.get_mut(&event.id) {
            evt.expiration = expiration;
            HandleOutcome::Updated
        } else {
            if expiration <= now {
                debug!(
                    "Event {} expired at creation ({expiration}), not tracking",
                    event.id
                );
                return HandleOutcome::Expired;
            }
            self.events
                .insert(event.id.clone(), VsEvent::new(origin, expiration));
            HandleOutcome::Created
        };

        if origin.arrivals.is_empty() {
            debug!(
                "Ignoring current preferred origin {} (it has no arrival), but expiration time updated",
                origin.id
            );
            return outcome;
        }

        let settings = &self.processor.settings;
        if let Some(evt) = self.events.get_mut(&event.id) {
            evt.refresh_location(origin);
            evt.rebuild_windows(origin, cache, settings);
            debug!(
                "Number of arrivals in origin {}: {}",
                origin.id,
                origin.arrivals.len()
            );
        }
        outcome
    }

    /// Process every tracked event at time `now`.
    ///
    /// Returns the magnitude records to publish. Expired events yield their
    /// final record and are retired. Active events whose event object has
    /// dropped out of the cache are skipped for this tick.
    pub fn process_events(
        &mut self,
        now: DateTime<Utc>,
        cache: &ObjectCache,
        timeline: &Timeline,
        inventory: &dyn Inventory,
    ) -> Vec<MagnitudeRecord> {
        let mut records = Vec::new();
        let mut retired = Vec::new();

        for (id, evt) in &mut self.events {
            let expired = now >= evt.expiration;
            if !expired && cache.event(id).is_none() {
                warn!("{id}: event not found");
                continue;
            }
            let processed = self.processor.process(id, evt, now, timeline, inventory);
            if processed == Processed::NoInput {
                debug!("{id}: no usable station input");
            }

            if !expired {
                // Only publish if the event has a magnitude
                if evt.estimate.is_some() {
                    let update = evt.update.map_or(0, |u| u + 1);
                    evt.update = Some(update);
                    records.extend(evt.record(id, update));
                }
            } else {
                records.extend(evt.record(id, evt.update.unwrap_or(0)));
                retired.push(id.clone());
            }
        }

        for id in retired {
            self.events.remove(&id);
            let pruned = self
                .published
                .prune(now, self.processor.settings.retention);
            if pruned > 0 {
                debug!("pruned {pruned} retired event IDs");
            }
            if let Some(evicted) = self.published.retire(&id, now) {
                warn!("retired set full, evicted {evicted} before its retention expired");
            }
            info!(target: PROCESSING, "Processing of event {id} is finished.");
        }

        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Arrival, Pick};
    use crate::timeline::tests::{LAT, LON, envelope, inventory_for, secs, t0};

    fn settings(reference: ExpirationReference) -> TrackerSettings {
        TrackerSettings {
            reference,
            ..TrackerSettings::from(&Config::default())
        }
    }

    fn tracker(reference: ExpirationReference) -> EventTracker {
        EventTracker::new(
            settings(reference),
            SiteEffect::disabled(),
            AttenuationTable::cua_heaton(),
        )
    }

    fn pick(id: &str, station: &str, time: DateTime<Utc>) -> Pick {
        Pick {
            id: id.into(),
            time,
            waveform_id: WaveformStreamId {
                network: "CH".into(),
                station: station.into(),
                location: String::new(),
                channel: "HHZ".into(),
            },
        }
    }

    fn origin(id: &str, time: DateTime<Utc>, arrivals: Vec<Arrival>) -> Origin {
        Origin {
            id: id.into(),
            time,
            latitude: LAT,
            longitude: LON,
            depth: Some(8.0),
            creation_time: None,
            arrivals,
            azimuthal_gap: None,
        }
    }

    fn event(id: &str, origin_id: &str) -> Event {
        Event {
            id: id.into(),
            preferred_origin_id: origin_id.into(),
        }
    }

    /// Single station 0.1 degrees north of the epicenter with a pick at
    /// t0 - 8 s and complete envelopes up to t0 - 2 s.
    fn single_station() -> (ObjectCache, Timeline, crate::inventory::StaticInventory) {
        let sta_lat = LAT + 0.1;
        let inv = inventory_for(&[("AAA", sta_lat)]);
        let mut tl = Timeline::new(60, 10, 5);
        tl.set_reference_time(t0());
        for s in -8..=-2 {
            tl.feed(
                &envelope("AAA", "HH", secs(s), [0.5, 0.05, 0.005], [0.8, 0.08, 0.008], false),
                &inv,
            );
        }

        let mut cache = ObjectCache::new(TimeDelta::seconds(3600));
        cache.insert_pick(pick("p1", "AAA", secs(-8)), t0());
        cache.insert_origin(
            origin(
                "o1",
                secs(-10),
                vec![Arrival {
                    pick_id: "p1".into(),
                    distance: geo::distance_deg(LAT, LON, sta_lat, LON),
                }],
            ),
            t0(),
        );
        cache.insert_event(event("e1", "o1"), t0());
        (cache, tl, inv)
    }

    #[test]
    fn test_single_station_end_to_end() {
        let (cache, tl, inv) = single_station();
        let mut tracker = tracker(ExpirationReference::Ct);

        assert_eq!(
            tracker.handle_event(&event("e1", "o1"), &cache, Some(t0())),
            HandleOutcome::Created
        );
        let evt = tracker.event("e1").unwrap();
        assert_eq!(evt.windows.len(), 1);
        assert_eq!(evt.picked_within_threshold, 1);

        let records = tracker.process_events(t0(), &cache, &tl, &inv);
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.event_id, "e1");
        assert_eq!(rec.origin_id, "o1");
        assert_eq!(rec.magnitude_type, "MVS");
        assert_eq!(rec.station_count, 1);
        assert!(rec.magnitude >= magnitude::MIN_MAGNITUDE && rec.magnitude <= magnitude::MAX_MAGNITUDE);
        assert!(rec.delta_pick.abs() < f64::EPSILON);
        assert_eq!(rec.update, 0);
        assert_eq!(rec.comment("update"), Some("0"));
        assert!(rec.comment("likelihood").is_some());

        let sta = &rec.station_magnitudes[0];
        assert_eq!(sta.soil_class, "rock");
        assert!((sta.residual - (sta.magnitude - rec.magnitude)).abs() < 1e-12);
        assert!((sta.epicentral_distance_km - 11.12).abs() < 0.05);
    }

    #[test]
    fn test_update_sequence_and_final_record() {
        let (cache, tl, inv) = single_station();
        let mut tracker = tracker(ExpirationReference::Ct);
        tracker.handle_event(&event("e1", "o1"), &cache, Some(t0()));

        let updates: Vec<u32> = (0..3)
            .flat_map(|_| tracker.process_events(t0(), &cache, &tl, &inv))
            .map(|r| r.update)
            .collect();
        assert_eq!(updates, vec![0, 1, 2]);

        // Final pass repeats the last sequence number and retires the event
        let expiry = t0() + TimeDelta::seconds(90);
        let last = tracker.process_events(expiry, &cache, &tl, &inv);
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].update, 2);
        assert_eq!(tracker.active_count(), 0);
        assert!(tracker.published().contains("e1"));
    }

    #[test]
    fn test_origin_time_expired_at_creation() {
        let (mut cache, tl, inv) = single_station();
        cache.insert_origin(origin("o-old", secs(-95), Vec::new()), t0());
        let mut tracker = EventTracker::new(
            TrackerSettings {
                expiration: TimeDelta::seconds(90),
                ..settings(ExpirationReference::Ot)
            },
            SiteEffect::disabled(),
            AttenuationTable::cua_heaton(),
        );

        assert_eq!(
            tracker.handle_event(&event("e-old", "o-old"), &cache, Some(t0())),
            HandleOutcome::Expired
        );
        assert_eq!(tracker.active_count(), 0);
        assert!(tracker.process_events(t0(), &cache, &tl, &inv).is_empty());
    }

    #[test]
    fn test_duplicate_after_retirement() {
        let (cache, tl, inv) = single_station();
        let mut tracker = tracker(ExpirationReference::Ct);
        tracker.handle_event(&event("e1", "o1"), &cache, Some(t0()));
        let expiry = t0() + TimeDelta::seconds(90);
        assert_eq!(tracker.process_events(expiry, &cache, &tl, &inv).len(), 1);

        assert_eq!(
            tracker.handle_event(&event("e1", "o1"), &cache, Some(expiry)),
            HandleOutcome::Stale
        );
        assert!(tracker.event("e1").is_none());
        assert!(tracker.process_events(expiry, &cache, &tl, &inv).is_empty());
    }

    #[test]
    fn test_no_arrivals_updates_expiration_but_keeps_location() {
        let (mut cache, tl, inv) = single_station();
        let mut tracker = tracker(ExpirationReference::Ct);
        tracker.handle_event(&event("e1", "o1"), &cache, Some(t0()));

        let mut moved = origin("o2", secs(-9), Vec::new());
        moved.latitude = LAT + 1.0;
        cache.insert_origin(moved, t0());
        assert_eq!(
            tracker.handle_event(&event("e1", "o2"), &cache, Some(secs(20))),
            HandleOutcome::Updated
        );
        let evt = tracker.event("e1").unwrap();
        assert_eq!(evt.expiration, secs(110));
        assert_eq!(evt.origin_id, "o1");
        assert!((evt.latitude - LAT).abs() < f64::EPSILON);
        assert_eq!(evt.windows.len(), 1);
        assert_eq!(tracker.process_events(t0(), &cache, &tl, &inv).len(), 1);
    }

    #[test]
    fn test_creation_time_expiration_rederived_on_update() {
        let (mut cache, _, _) = single_station();
        let mut tracker = tracker(ExpirationReference::Ct);
        tracker.handle_event(&event("e1", "o1"), &cache, Some(t0()));
        assert_eq!(tracker.event("e1").unwrap().expiration, secs(90));

        let mut relocated = cache.origin("o1").unwrap().clone();
        relocated.id = "o2".into();
        relocated.latitude = LAT + 0.01;
        cache.insert_origin(relocated, t0());
        assert_eq!(
            tracker.handle_event(&event("e1", "o2"), &cache, Some(secs(20))),
            HandleOutcome::Updated
        );
        let evt = tracker.event("e1").unwrap();
        assert_eq!(evt.expiration, secs(110));
        assert_eq!(evt.origin_id, "o2");
        assert!((evt.latitude - (LAT + 0.01)).abs() < 1e-12);
        assert_eq!(evt.windows.len(), 1);
    }

    #[test]
    fn test_event_missing_from_cache_is_skipped() {
        let (mut cache, tl, inv) = single_station();
        let mut tracker = tracker(ExpirationReference::Ct);
        tracker.handle_event(&event("e1", "o1"), &cache, Some(t0()));
        cache.prune(t0() + TimeDelta::seconds(3601));
        assert_eq!(cache.object_count(), 0);

        assert!(tracker.process_events(t0(), &cache, &tl, &inv).is_empty());
        assert_eq!(tracker.active_count(), 1);
        assert!(tracker.event("e1").unwrap().estimate.is_none());

        // The final pass at expiration does not need the cached event
        let expiry = t0() + TimeDelta::seconds(90);
        let last = tracker.process_events(expiry, &cache, &tl, &inv);
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].update, 0);
        assert_eq!(tracker.active_count(), 0);
        assert!(tracker.published().contains("e1"));
    }

    #[test]
    fn test_missing_origin() {
        let (cache, _, _) = single_station();
        let mut tracker = tracker(ExpirationReference::Ct);
        assert_eq!(
            tracker.handle_event(&event("e1", "nope"), &cache, Some(t0())),
            HandleOutcome::MissingOrigin
        );
    }

    #[test]
    fn test_azimuthal_gap_gate() {
        let (mut cache, tl, inv) = single_station();
        let mut gapped = cache.origin("o1").unwrap().clone();
        gapped.azimuthal_gap = Some(300.0);
        cache.insert_origin(gapped, t0());

        let mut tracker = EventTracker::new(
            TrackerSettings {
                max_azimuthal_gap: Some(270.0),
                ..settings(ExpirationReference::Ct)
            },
            SiteEffect::disabled(),
            AttenuationTable::cua_heaton(),
        );
        tracker.handle_event(&event("e1", "o1"), &cache, Some(t0()));
        assert!(tracker.process_events(t0(), &cache, &tl, &inv).is_empty());
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn test_max_epicentral_distance() {
        let (cache, tl, inv) = single_station();
        let mut tracker = EventTracker::new(
            TrackerSettings {
                max_epicentral_distance: Some(5.0),
                ..settings(ExpirationReference::Ct)
            },
            SiteEffect::disabled(),
            AttenuationTable::cua_heaton(),
        );
        tracker.handle_event(&event("e1", "o1"), &cache, Some(t0()));
        assert!(tracker.process_events(t0(), &cache, &tl, &inv).is_empty());
    }

    #[test]
    fn test_distance_threshold() {
        let mut cache = ObjectCache::new(TimeDelta::seconds(3600));
        let mut arrivals = Vec::new();
        for (i, (sta, dist)) in [("AAA", 1.0), ("BBB", 2.0), ("CCC", 3.0), ("AAA", 4.0)]
            .into_iter()
            .enumerate()
        {
            let pid = format!("p{i}");
            cache.insert_pick(pick(&pid, sta, secs(-5)), t0());
            arrivals.push(Arrival {
                pick_id: pid,
                distance: dist,
            });
        }
        arrivals.push(Arrival {
            pick_id: "missing".into(),
            distance: 0.5,
        });
        cache.insert_origin(origin("o1", secs(-10), arrivals), t0());

        let mut tracker = tracker(ExpirationReference::Ct);
        tracker.handle_event(&event("e1", "o1"), &cache, Some(t0()));
        let evt = tracker.event("e1").unwrap();

        // Second AAA arrival is ignored for the threshold
        assert!((evt.dthresh - 2.5).abs() < 1e-12);
        assert_eq!(evt.picked_stations.len(), 3);
        assert_eq!(evt.picked_within_threshold, 2);
        assert_eq!(evt.windows.len(), 3);
        let w = evt.windows[&StationId::new("CH", "AAA")];
        assert_eq!(w.start, secs(-8));
        assert_eq!(w.end, secs(25));
    }

    #[test]
    fn test_origin_time_expiration_follows_updates() {
        let (mut cache, _, _) = single_station();
        let mut tracker = tracker(ExpirationReference::Ot);
        tracker.handle_event(&event("e1", "o1"), &cache, Some(t0()));
        assert_eq!(tracker.event("e1").unwrap().expiration, secs(80));

        let mut later = cache.origin("o1").unwrap().clone();
        later.id = "o2".into();
        later.time = secs(-4);
        cache.insert_origin(later, t0());
        tracker.handle_event(&event("e1", "o2"), &cache, Some(t0()));
        assert_eq!(tracker.event("e1").unwrap().expiration, secs(86));
    }
}
