//! Envelope timeline.
//!
//! Caches incoming envelope peaks per station in ring buffers with a time
//! resolution of one second. Slot `back_slots` of every buffer represents
//! the reference time; slots below it hold the past, slots above it the
//! near future. Advancing the reference time shifts every buffer by the
//! same number of whole seconds.

use std::collections::{BTreeSet, HashMap, VecDeque};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, error, warn};

use crate::errors::{MaximumError, OutOfRange};
use crate::geo;
use crate::inventory::{Inventory, SignalUnit};
use crate::models::{EnvelopeChannel, EnvelopeMessage, StationId, WaveformStreamId};

/// Seconds of history inspected by [`Timeline::poll_buffer`].
const POLL_WINDOW_SECS: usize = 30;

/// Envelope value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Acceleration,
    Velocity,
    Displacement,
}

impl ValueType {
    pub const ALL: [Self; 3] = [Self::Acceleration, Self::Velocity, Self::Displacement];

    const fn index(self) -> usize {
        match self {
            Self::Acceleration => 0,
            Self::Velocity => 1,
            Self::Displacement => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Acceleration => "acc",
            Self::Velocity => "vel",
            Self::Displacement => "disp",
        }
    }
}

impl std::str::FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acc" => Ok(Self::Acceleration),
            "vel" => Ok(Self::Velocity),
            "disp" => Ok(Self::Displacement),
            _ => Err(format!("unknown envelope value type: {s}")),
        }
    }
}

/// Sensor components stored per cell. `H` is the vector sum of `H1` and `H2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Z,
    H1,
    H2,
    H,
}

impl Component {
    const fn index(self) -> usize {
        match self {
            Self::Z => 0,
            Self::H1 => 1,
            Self::H2 => 2,
            Self::H => 3,
        }
    }
}

impl std::str::FromStr for Component {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Z" | "V" => Ok(Self::Z),
            "H" => Ok(Self::H),
            "H1" => Ok(Self::H1),
            "H2" => Ok(Self::H2),
            _ => Err(format!("unknown envelope channel: {s}")),
        }
    }
}

/// Peak values of one component in one slot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Envelope {
    values: [Option<f64>; 3],
    pub clipped: bool,
}

impl Envelope {
    #[must_use]
    pub fn get(&self, value_type: ValueType) -> Option<f64> {
        self.values[value_type.index()]
    }

    /// Store a value; negative values mean "unset".
    pub fn set(&mut self, value_type: ValueType, value: f64) {
        self.values[value_type.index()] = (value >= 0.0).then_some(value);
    }

    fn raise(&mut self, value_type: ValueType, value: f64) -> bool {
        let slot = &mut self.values[value_type.index()];
        if slot.is_none_or(|current| value > current) {
            *slot = Some(value);
            true
        } else {
            false
        }
    }
}

/// One second of envelope data for one sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cell {
    envelopes: [Envelope; 4],
}

impl Cell {
    #[must_use]
    pub fn envelope(&self, component: Component) -> &Envelope {
        &self.envelopes[component.index()]
    }

    fn envelope_mut(&mut self, component: Component) -> &mut Envelope {
        &mut self.envelopes[component.index()]
    }

    /// Clipping on the vertical or the composite horizontal invalidates the cell.
    #[must_use]
    pub fn is_clipped(&self) -> bool {
        self.envelope(Component::Z).clipped || self.envelope(Component::H).clipped
    }

    /// Recompute the horizontal composite from H1 and H2.
    fn update_horizontal(&mut self) {
        let h1 = self.envelopes[Component::H1.index()];
        let h2 = self.envelopes[Component::H2.index()];
        let h = &mut self.envelopes[Component::H.index()];
        for vt in ValueType::ALL {
            if let (Some(a), Some(b)) = (h1.get(vt), h2.get(vt)) {
                h.set(vt, a.hypot(b));
            }
        }
        if h1.clipped || h2.clipped {
            h.clipped = true;
        }
    }
}

/// Fixed-capacity circular sequence addressed by slot offset.
///
/// Offsets are bounds-checked; advancing drops the oldest slots and appends
/// fresh default ones so the capacity never changes.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: VecDeque<T>,
    capacity: usize,
}

impl<T: Default + Clone> RingBuffer<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: std::iter::repeat_n(T::default(), capacity).collect(),
            capacity,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn index(&self, offset: i64) -> Result<usize, OutOfRange> {
        usize::try_from(offset)
            .ok()
            .filter(|&i| i < self.capacity)
            .ok_or(OutOfRange {
                offset,
                capacity: self.capacity,
            })
    }

    /// Slot at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] if `offset` is negative or not below the capacity.
    pub fn at(&self, offset: i64) -> Result<&T, OutOfRange> {
        let i = self.index(offset)?;
        Ok(&self.slots[i])
    }

    /// Mutable slot at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] if `offset` is negative or not below the capacity.
    pub fn at_mut(&mut self, offset: i64) -> Result<&mut T, OutOfRange> {
        let i = self.index(offset)?;
        Ok(&mut self.slots[i])
    }

    /// Shift the buffer `n` slots towards the past.
    pub fn advance(&mut self, n: usize) {
        let n = n.min(self.capacity);
        self.slots.drain(..n);
        self.slots.extend(std::iter::repeat_n(T::default(), n));

        // NASA Power of 10: assert postcondition
        debug_assert_eq!(self.slots.len(), self.capacity);
    }

    fn iter_range(&self, start: usize, end: usize) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .skip(start)
            .take(end.saturating_sub(start) + 1)
    }
}

/// Ring buffer of one physical sensor.
#[derive(Debug, Clone)]
pub struct SensorBuffer {
    pub location_code: String,
    /// First two letters of the channel code (band and instrument)
    pub stream_code: String,
    pub unit: SignalUnit,
    cells: RingBuffer<Cell>,
}

impl SensorBuffer {
    fn new(location_code: &str, stream_code: &str, unit: SignalUnit, capacity: usize) -> Self {
        Self {
            location_code: location_code.to_string(),
            stream_code: stream_code.to_string(),
            unit,
            cells: RingBuffer::new(capacity),
        }
    }

    fn matches(&self, location_code: &str, stream_code: &str) -> bool {
        self.location_code == location_code && self.stream_code == stream_code
    }

    /// Cell at a slot offset.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] for offsets outside the buffer.
    pub fn cell(&self, offset: i64) -> Result<&Cell, OutOfRange> {
        self.cells.at(offset)
    }

    fn has_vertical_velocity(&self, start: usize, end: usize) -> bool {
        self.cells.iter_range(start, end).any(|(_, cell)| {
            cell.envelope(Component::Z)
                .get(ValueType::Velocity)
                .is_some()
        })
    }
}

/// The sensors of one station, resolved by unit at ingestion time.
#[derive(Debug, Clone)]
pub enum StationSensors {
    Velocity(SensorBuffer),
    Acceleration(SensorBuffer),
    Both {
        velocity: SensorBuffer,
        acceleration: SensorBuffer,
    },
}

impl From<SensorBuffer> for StationSensors {
    fn from(sensor: SensorBuffer) -> Self {
        match sensor.unit {
            SignalUnit::Velocity => Self::Velocity(sensor),
            SignalUnit::Acceleration => Self::Acceleration(sensor),
        }
    }
}

impl StationSensors {
    #[must_use]
    pub fn velocity(&self) -> Option<&SensorBuffer> {
        match self {
            Self::Velocity(v) | Self::Both { velocity: v, .. } => Some(v),
            Self::Acceleration(_) => None,
        }
    }

    #[must_use]
    pub fn acceleration(&self) -> Option<&SensorBuffer> {
        match self {
            Self::Acceleration(a) | Self::Both { acceleration: a, .. } => Some(a),
            Self::Velocity(_) => None,
        }
    }

    /// Add a sensor for the unit not yet present; hands `self` back if taken.
    fn attach(self, sensor: SensorBuffer) -> Result<Self, Self> {
        match (self, sensor.unit) {
            (Self::Velocity(velocity), SignalUnit::Acceleration) => Ok(Self::Both {
                velocity,
                acceleration: sensor,
            }),
            (Self::Acceleration(acceleration), SignalUnit::Velocity) => Ok(Self::Both {
                velocity: sensor,
                acceleration,
            }),
            (occupied, _) => Err(occupied),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &SensorBuffer> {
        self.velocity().into_iter().chain(self.acceleration())
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut SensorBuffer> {
        let (first, second) = match self {
            Self::Velocity(v) => (Some(v), None),
            Self::Acceleration(a) => (Some(a), None),
            Self::Both {
                velocity,
                acceleration,
            } => (Some(velocity), Some(acceleration)),
        };
        first.into_iter().chain(second)
    }

    fn find_mut(&mut self, location_code: &str, stream_code: &str) -> Option<&mut SensorBuffer> {
        self.iter_mut()
            .find(|s| s.matches(location_code, stream_code))
    }

    fn contains(&self, location_code: &str, stream_code: &str) -> bool {
        self.iter().any(|s| s.matches(location_code, stream_code))
    }

    fn by_unit(&self, unit: SignalUnit) -> Option<&SensorBuffer> {
        match unit {
            SignalUnit::Velocity => self.velocity(),
            SignalUnit::Acceleration => self.acceleration(),
        }
    }
}

/// Peak amplitudes of one component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Amplitudes {
    pub acceleration: f64,
    pub velocity: f64,
    pub displacement: f64,
}

impl Amplitudes {
    fn from_envelope(envelope: &Envelope) -> Option<Self> {
        Some(Self {
            acceleration: envelope.get(ValueType::Acceleration)?,
            velocity: envelope.get(ValueType::Velocity)?,
            displacement: envelope.get(ValueType::Displacement)?,
        })
    }

    #[must_use]
    pub fn get(&self, value_type: ValueType) -> f64 {
        match value_type {
            ValueType::Acceleration => self.acceleration,
            ValueType::Velocity => self.velocity,
            ValueType::Displacement => self.displacement,
        }
    }
}

/// Result of a successful [`Timeline::maximum`] query.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakEnvelope {
    pub vertical: Amplitudes,
    pub horizontal: Amplitudes,
    pub unit: SignalUnit,
    pub location_code: String,
    pub stream_code: String,
    /// Time of the latest slot holding one of the maxima
    pub time: DateTime<Utc>,
}

/// Clipped query window in slot indices.
#[derive(Debug, Clone, Copy)]
struct Window {
    start: usize,
    end: usize,
    pick: i64,
}

/// Outcome of scanning one sensor over a window.
#[derive(Debug, Clone, Copy)]
struct ScanResult {
    vertical: Envelope,
    horizontal: Envelope,
    /// Slot range spanned by the final maxima
    peak_range: Option<(usize, usize)>,
    /// Latest unclipped slot with any vertical value
    latest_vertical: Option<usize>,
    /// A clipped slot lies within `clip_timeout` before the first raised
    /// maximum or between it and the latest maximum
    clipped_near_peak: bool,
}

/// Pure scan of one sensor; clipped cells never contribute maxima.
fn scan(sensor: &SensorBuffer, window: Window, clip_timeout: usize) -> ScanResult {
    let mut vertical = Envelope::default();
    let mut horizontal = Envelope::default();
    let mut argmax = [[None::<usize>; 3]; 2];
    let mut latest_vertical = None;
    let mut first_raise = None;

    for (i, cell) in sensor.cells.iter_range(window.start, window.end) {
        if cell.is_clipped() {
            continue;
        }
        let z = cell.envelope(Component::Z);
        let h = cell.envelope(Component::H);
        for vt in ValueType::ALL {
            if let Some(v) = z.get(vt) {
                latest_vertical = Some(i);
                if vertical.raise(vt, v) {
                    argmax[0][vt.index()] = Some(i);
                    first_raise.get_or_insert(i);
                }
            }
            if let Some(v) = h.get(vt) {
                if horizontal.raise(vt, v) {
                    argmax[1][vt.index()] = Some(i);
                    first_raise.get_or_insert(i);
                }
            }
        }
    }

    let found = argmax.iter().flatten().flatten().copied();
    let peak_range = found
        .clone()
        .min()
        .zip(found.max());

    // Clipping from `clip_timeout` before the first raised maximum up to
    // the latest maximum rejects the sensor
    let clipped_near_peak = first_raise
        .zip(peak_range)
        .is_some_and(|(first, (_, max_idx))| {
            sensor
                .cells
                .iter_range(first.saturating_sub(clip_timeout), max_idx)
                .any(|(_, cell)| cell.is_clipped())
        });

    ScanResult {
        vertical,
        horizontal,
        peak_range,
        latest_vertical,
        clipped_near_peak,
    }
}

/// Per-station ring buffers plus the shared reference time.
#[derive(Debug)]
pub struct Timeline {
    reference: Option<DateTime<Utc>>,
    back_slots: usize,
    head_slots: usize,
    clip_timeout: usize,
    stations: HashMap<StationId, StationSensors>,
}

impl Timeline {
    /// Create an empty timeline. The reference time is unset until the
    /// first [`Timeline::set_reference_time`].
    #[must_use]
    pub fn new(back_slots: usize, head_slots: usize, clip_timeout: usize) -> Self {
        Self {
            reference: None,
            back_slots,
            head_slots,
            clip_timeout,
            stations: HashMap::new(),
        }
    }

    fn capacity(&self) -> usize {
        self.back_slots + self.head_slots
    }

    #[must_use]
    pub fn reference_time(&self) -> Option<DateTime<Utc>> {
        self.reference
    }

    /// Number of stations with at least one sensor buffer.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.stations.len()
    }

    /// Slot offset of `time` relative to the reference, not range-checked.
    #[must_use]
    pub fn offset_of(&self, time: DateTime<Utc>) -> Option<i64> {
        let reference = self.reference?;
        Some((time - reference).num_milliseconds().div_euclid(1000) + self.back_slots as i64)
    }

    /// Move the reference time to `time`.
    ///
    /// Returns `false` without changing anything if `time` is earlier than
    /// the current reference.
    pub fn set_reference_time(&mut self, time: DateTime<Utc>) -> bool {
        let Some(reference) = self.reference else {
            self.reference = Some(time);
            return true;
        };
        let diff = time - reference;
        if diff < TimeDelta::zero() {
            return false;
        }
        self.step(usize::try_from(diff.num_seconds()).unwrap_or(usize::MAX));
        true
    }

    /// Move `secs` seconds forward on the timeline.
    pub fn step(&mut self, secs: usize) {
        if let Some(reference) = self.reference {
            let delta = i64::try_from(secs)
                .ok()
                .and_then(TimeDelta::try_seconds)
                .unwrap_or(TimeDelta::MAX);
            self.reference = Some(reference.checked_add_signed(delta).unwrap_or(reference));
        }
        for sensors in self.stations.values_mut() {
            for sensor in sensors.iter_mut() {
                sensor.cells.advance(secs);
            }
        }
    }

    /// Sensor buffer of a station by unit.
    #[must_use]
    pub fn sensor(&self, id: &StationId, unit: SignalUnit) -> Option<&SensorBuffer> {
        self.stations.get(id)?.by_unit(unit)
    }

    /// Cell of a station's sensor at `time`; `Ok(None)` if no such sensor.
    ///
    /// # Errors
    ///
    /// Returns [`OutOfRange`] if `time` does not map onto a slot.
    pub fn cell_at(
        &self,
        id: &StationId,
        unit: SignalUnit,
        time: DateTime<Utc>,
    ) -> Result<Option<&Cell>, OutOfRange> {
        let capacity = self.capacity();
        let offset = self.offset_of(time).ok_or(OutOfRange {
            offset: i64::MIN,
            capacity,
        })?;
        match self.sensor(id, unit) {
            Some(sensor) => sensor.cell(offset).map(Some),
            None if (0..capacity as i64).contains(&offset) => Ok(None),
            None => Err(OutOfRange { offset, capacity }),
        }
    }

    /// Add an incoming envelope message to the timeline.
    ///
    /// Returns the number of values written. Samples outside the buffer,
    /// channels without inventory metadata and unknown tags are skipped.
    pub fn feed(&mut self, env: &EnvelopeMessage, inventory: &dyn Inventory) -> usize {
        let Some(offset) = self.offset_of(env.timestamp) else {
            debug!("ignoring received envelope (reference time not set)");
            return 0;
        };
        if offset < 0 {
            debug!(
                "ignoring received envelope (too old, current time = {:?})",
                self.reference
            );
            return 0;
        }
        if offset >= self.capacity() as i64 {
            debug!(
                "ignoring received envelope (too far in the future, current time = {:?}, idx = {}, size = {})",
                self.reference,
                offset,
                self.capacity()
            );
            return 0;
        }

        let id = env.station_id();
        let mut count = 0;

        for cha in &env.channels {
            let component = match cha.component.parse::<Component>() {
                Ok(c) => c,
                Err(e) => {
                    warn!("{id}: {e}");
                    continue;
                }
            };
            let Some(sensor) = self.resolve_sensor(&id, cha, env.timestamp, inventory) else {
                continue;
            };
            let Ok(cell) = sensor.cells.at_mut(offset) else {
                continue;
            };

            for value in &cha.values {
                match value.kind.parse::<ValueType>() {
                    Ok(vt) => {
                        cell.envelope_mut(component).set(vt, value.value);
                        count += 1;
                    }
                    Err(e) => warn!("{id}: {e}"),
                }
                if value.clipped {
                    cell.envelope_mut(component).clipped = true;
                }
            }

            cell.update_horizontal();
        }

        count
    }

    /// Find the sensor buffer for a channel, creating it from inventory
    /// metadata on first sight.
    fn resolve_sensor(
        &mut self,
        id: &StationId,
        cha: &EnvelopeChannel,
        time: DateTime<Utc>,
        inventory: &dyn Inventory,
    ) -> Option<&mut SensorBuffer> {
        let stream_code: String = cha.channel.chars().take(2).collect();
        let known = self
            .stations
            .get(id)
            .is_some_and(|s| s.contains(&cha.location, &stream_code));

        if !known {
            let wid = WaveformStreamId {
                network: id.network.clone(),
                station: id.station.clone(),
                location: cha.location.clone(),
                channel: cha.channel.clone(),
            };
            let Some(gain_unit) = inventory.gain_unit(&wid, time) else {
                error!("{wid}: unable to retrieve stream from inventory");
                return None;
            };
            let unit = match gain_unit.parse::<SignalUnit>() {
                Ok(u) => u,
                Err(e) => {
                    error!("{wid}: unable to retrieve gain unit ({e})");
                    return None;
                }
            };

            let sensor = SensorBuffer::new(&cha.location, &stream_code, unit, self.capacity());
            let sensors = match self.stations.remove(id) {
                None => StationSensors::from(sensor),
                Some(existing) => match existing.attach(sensor) {
                    Ok(both) => both,
                    Err(existing) => {
                        debug!(
                            "{wid}: station already has a {} sensor, ignoring stream",
                            unit.as_str()
                        );
                        self.stations.insert(id.clone(), existing);
                        return None;
                    }
                },
            };
            debug!(
                "create new buffer for {}.{}.{} with size {}",
                id,
                cha.location,
                stream_code,
                self.capacity()
            );
            self.stations.insert(id.clone(), sensors);
        }

        self.stations
            .get_mut(id)?
            .find_mut(&cha.location, &stream_code)
    }

    /// Peak vertical and horizontal envelopes of a station within
    /// `[start, end]`, requiring at least one second of data after `pick`.
    ///
    /// The velocity sensor is preferred; if it is clipped or lacks data the
    /// acceleration sensor is tried once. Results never mix both sensors.
    ///
    /// # Errors
    ///
    /// Returns the [`MaximumError`] of the last sensor tried.
    pub fn maximum(
        &self,
        id: &StationId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        pick: DateTime<Utc>,
    ) -> Result<PeakEnvelope, MaximumError> {
        let (Some(start_idx), Some(end_idx), Some(pick_idx)) =
            (self.offset_of(start), self.offset_of(end), self.offset_of(pick))
        else {
            return Err(MaximumError::IndexError);
        };
        let size = self.capacity() as i64;

        // Check if time window is completely outside the buffer
        if start_idx >= size || end_idx < 0 {
            return Err(MaximumError::IndexError);
        }
        let start_idx = start_idx.max(0);
        let end_idx = end_idx.min(size - 1);
        if start_idx > end_idx || pick_idx >= end_idx {
            return Err(MaximumError::IndexError);
        }

        let sensors = self.stations.get(id).ok_or(MaximumError::NoSensor)?;
        let window = Window {
            start: usize::try_from(start_idx).map_err(|_| MaximumError::IndexError)?,
            end: usize::try_from(end_idx).map_err(|_| MaximumError::IndexError)?,
            pick: pick_idx,
        };

        match (sensors.velocity(), sensors.acceleration()) {
            (Some(vel), acc) => match self.evaluate(id, vel, window) {
                Err(e @ (MaximumError::ClippedData | MaximumError::NoData)) => match acc {
                    Some(acc) => {
                        debug!("{id}.{}: {e}, using {} instead", vel.stream_code, acc.stream_code);
                        self.evaluate(id, acc, window)
                    }
                    None => Err(e),
                },
                result => result,
            },
            (None, Some(acc)) => self.evaluate(id, acc, window),
            (None, None) => Err(MaximumError::NoSensor),
        }
    }

    fn evaluate(
        &self,
        id: &StationId,
        sensor: &SensorBuffer,
        window: Window,
    ) -> Result<PeakEnvelope, MaximumError> {
        let result = scan(sensor, window, self.clip_timeout);

        if result.clipped_near_peak {
            debug!("record {id}.{} has been clipped", sensor.stream_code);
            return Err(MaximumError::ClippedData);
        }
        let Some((_, max_idx)) = result.peak_range else {
            debug!("no maximum found for {id}.{}", sensor.stream_code);
            return Err(MaximumError::NoData);
        };
        // At least one second between the pick and the latest entry
        if result
            .latest_vertical
            .is_none_or(|latest| (latest as i64) - window.pick < 1)
        {
            return Err(MaximumError::NotEnoughData);
        }

        let (Some(vertical), Some(horizontal)) = (
            Amplitudes::from_envelope(&result.vertical),
            Amplitudes::from_envelope(&result.horizontal),
        ) else {
            debug!("incomplete maxima for {id}.{}", sensor.stream_code);
            return Err(MaximumError::NoData);
        };

        let reference = self.reference.ok_or(MaximumError::IndexError)?;
        let time = reference + TimeDelta::seconds(max_idx as i64 - self.back_slots as i64);

        Ok(PeakEnvelope {
            vertical,
            horizontal,
            unit: sensor.unit,
            location_code: sensor.location_code.clone(),
            stream_code: sensor.stream_code.clone(),
            time,
        })
    }

    /// Count stations that delivered vertical data during the last 30
    /// seconds and lie within `threshold_deg` of the epicenter.
    #[must_use]
    pub fn poll_buffer(
        &self,
        lat: f64,
        lon: f64,
        threshold_deg: f64,
        inventory: &dyn Inventory,
    ) -> usize {
        let Some(reference) = self.reference else {
            return 0;
        };
        let Some(last) = self.capacity().checked_sub(1) else {
            return 0;
        };
        let start = self.back_slots.saturating_sub(POLL_WINDOW_SECS);
        let end = self.back_slots.min(last);

        let mut counted = BTreeSet::new();
        for (id, sensors) in &self.stations {
            let Some(sensor) = sensors
                .iter()
                .find(|s| s.has_vertical_velocity(start, end))
            else {
                continue;
            };

            let Some(loc) = inventory.sensor_location(id, &sensor.location_code, reference) else {
                warn!(
                    "{id}.{}: sensor location not in inventory: ignoring",
                    sensor.location_code
                );
                continue;
            };
            if geo::distance_deg(lat, lon, loc.latitude, loc.longitude) <= threshold_deg {
                counted.insert(id);
            }
        }

        debug!(
            "stations within dt: {}",
            counted
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ")
        );
        counted.len()
    }
}
