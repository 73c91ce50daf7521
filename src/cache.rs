//! In-memory object cache for picks, origins and events.
//!
//! Objects are kept for a configurable time span after their last insert
//! and pruned lazily.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};

use crate::models::{Event, Origin, Pick};

#[derive(Debug)]
struct Store<T> {
    entries: HashMap<String, (T, DateTime<Utc>)>,
}

impl<T> Default for Store<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> Store<T> {
    fn insert(&mut self, id: String, value: T, now: DateTime<Utc>) {
        self.entries.insert(id, (value, now));
    }

    fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id).map(|(v, _)| v)
    }

    fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (_, stored)| *stored >= cutoff);
        before - self.entries.len()
    }
}

/// Time-span-bounded store keyed by public ID.
#[derive(Debug)]
pub struct ObjectCache {
    picks: Store<Pick>,
    origins: Store<Origin>,
    events: Store<Event>,
    time_span: TimeDelta,
}

impl ObjectCache {
    #[must_use]
    pub fn new(time_span: TimeDelta) -> Self {
        Self {
            picks: Store::default(),
            origins: Store::default(),
            events: Store::default(),
            time_span,
        }
    }

    pub fn insert_pick(&mut self, pick: Pick, now: DateTime<Utc>) {
        self.picks.insert(pick.id.clone(), pick, now);
    }

    pub fn insert_origin(&mut self, origin: Origin, now: DateTime<Utc>) {
        self.origins.insert(origin.id.clone(), origin, now);
    }

    pub fn insert_event(&mut self, event: Event, now: DateTime<Utc>) {
        self.events.insert(event.id.clone(), event, now);
    }

    #[must_use]
    pub fn pick(&self, id: &str) -> Option<&Pick> {
        self.picks.get(id)
    }

    #[must_use]
    pub fn origin(&self, id: &str) -> Option<&Origin> {
        self.origins.get(id)
    }

    #[must_use]
    pub fn event(&self, id: &str) -> Option<&Event> {
        self.events.get(id)
    }

    /// Remove objects stored more than the time span before `now`.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.time_span;
        self.picks.prune(cutoff) + self.origins.prune(cutoff) + self.events.prune(cutoff)
    }

    /// Total number of cached objects.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.picks.entries.len() + self.origins.entries.len() + self.events.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::WaveformStreamId;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    fn pick(id: &str) -> Pick {
        Pick {
            id: id.into(),
            time: at(0),
            waveform_id: WaveformStreamId {
                network: "CH".into(),
                station: "SIMPL".into(),
                location: String::new(),
                channel: "HHZ".into(),
            },
        }
    }

    #[test]
    fn test_lookup() {
        let mut cache = ObjectCache::new(TimeDelta::seconds(3600));
        cache.insert_pick(pick("p1"), at(0));
        cache.insert_event(
            Event {
                id: "e1".into(),
                preferred_origin_id: "o1".into(),
            },
            at(0),
        );
        assert!(cache.pick("p1").is_some());
        assert!(cache.pick("p2").is_none());
        assert_eq!(cache.event("e1").map(|e| e.preferred_origin_id.as_str()), Some("o1"));
        assert!(cache.origin("o1").is_none());
        assert_eq!(cache.object_count(), 2);
    }

    #[test]
    fn test_time_span_pruning() {
        let mut cache = ObjectCache::new(TimeDelta::seconds(60));
        cache.insert_pick(pick("old"), at(0));
        cache.insert_pick(pick("new"), at(50));

        assert_eq!(cache.prune(at(100)), 1);
        assert!(cache.pick("old").is_none());
        assert!(cache.pick("new").is_some());
    }

    #[test]
    fn test_reinsert_refreshes() {
        let mut cache = ObjectCache::new(TimeDelta::seconds(60));
        cache.insert_pick(pick("p1"), at(0));
        cache.insert_pick(pick("p1"), at(90));
        assert_eq!(cache.prune(at(100)), 0);
        assert_eq!(cache.object_count(), 1);
    }
}
