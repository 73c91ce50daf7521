//! Set of recently retired event IDs.
//!
//! Once an event has expired and its final magnitude has been published, any
//! further notification for the same ID is stale. Entries are pruned by age
//! and the set is capped in size.
//! Follows NASA Power of 10: bounded resources.

use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};

/// Default capacity of the retired set.
///
/// The cap applies before age pruning: when more IDs retire within one
/// retention span, the oldest are evicted early and a late duplicate of
/// an evicted event is tracked again. `retire` reports such evictions.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Retired event IDs with their retirement time.
#[derive(Debug)]
pub struct PublishedEvents {
    /// Oldest at front, newest at back
    retired: VecDeque<RetiredEntry>,
    capacity: usize,
    /// Total lookups (for stats)
    total_checked: u64,
    /// Lookups that hit a retired ID
    total_stale: u64,
}

#[derive(Debug, Clone)]
struct RetiredEntry {
    id: String,
    retired: DateTime<Utc>,
}

/// Result of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeResult {
    /// ID not retired, may be tracked
    Fresh,
    /// ID already published and retired
    Stale,
}

impl DedupeResult {
    #[must_use]
    pub fn is_stale(self) -> bool {
        matches!(self, Self::Stale)
    }
}

impl PublishedEvents {
    /// Create an empty set holding at most `capacity` IDs.
    ///
    /// # Panics
    ///
    /// Panics if capacity is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be positive");

        Self {
            retired: VecDeque::new(),
            capacity,
            total_checked: 0,
            total_stale: 0,
        }
    }

    fn find_position(&self, id: &str) -> Option<usize> {
        self.retired.iter().position(|e| e.id == id)
    }

    /// Look up an event ID.
    pub fn check(&mut self, id: &str) -> DedupeResult {
        self.total_checked += 1;
        if self.find_position(id).is_some() {
            self.total_stale += 1;
            DedupeResult::Stale
        } else {
            DedupeResult::Fresh
        }
    }

    /// Look up without touching the counters.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.find_position(id).is_some()
    }

    /// Record an event as published and retired at `now`.
    ///
    /// Returns the ID evicted to stay within capacity, if any.
    pub fn retire(&mut self, id: &str, now: DateTime<Utc>) -> Option<String> {
        if let Some(pos) = self.find_position(id) {
            self.retired.remove(pos);
        }
        // Evict oldest if at capacity (FIFO)
        let evicted = if self.retired.len() >= self.capacity {
            self.retired.pop_front().map(|e| e.id)
        } else {
            None
        };
        self.retired.push_back(RetiredEntry {
            id: id.to_string(),
            retired: now,
        });

        // NASA Power of 10: assert postcondition
        debug_assert!(self.retired.len() <= self.capacity);
        evicted
    }

    /// Drop entries retired more than `retention` before `now`.
    ///
    /// Returns the number of entries removed.
    pub fn prune(&mut self, now: DateTime<Utc>, retention: TimeDelta) -> usize {
        let cutoff = now - retention;
        let before = self.retired.len();
        self.retired.retain(|e| e.retired >= cutoff);
        before - self.retired.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.retired.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.retired.is_empty()
    }

    #[must_use]
    pub fn total_stale(&self) -> u64 {
        self.total_stale
    }

    /// Share of lookups that hit a retired ID (0.0 to 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stale_rate(&self) -> f64 {
        if self.total_checked == 0 {
            0.0
        } else {
            self.total_stale as f64 / self.total_checked as f64
        }
    }
}

impl Default for PublishedEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    #[test]
    fn test_retire_and_check() {
        let mut set = PublishedEvents::default();
        assert_eq!(set.check("ev1"), DedupeResult::Fresh);

        set.retire("ev1", at(0));
        assert_eq!(set.check("ev1"), DedupeResult::Stale);
        assert_eq!(set.check("ev2"), DedupeResult::Fresh);

        assert_eq!(set.len(), 1);
        assert_eq!(set.total_stale(), 1);
        assert!((set.stale_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_prune_by_age() {
        let mut set = PublishedEvents::default();
        set.retire("ev1", at(0));
        set.retire("ev2", at(100));
        set.retire("ev3", at(200));

        assert_eq!(set.prune(at(250), TimeDelta::seconds(100)), 2);
        assert!(!set.contains("ev1"));
        assert!(!set.contains("ev2"));
        assert!(set.contains("ev3"));

        // Nothing else is old enough
        assert_eq!(set.prune(at(250), TimeDelta::seconds(100)), 0);
    }

    #[test]
    fn test_retire_twice_refreshes_time() {
        let mut set = PublishedEvents::default();
        set.retire("ev1", at(0));
        set.retire("ev1", at(500));
        assert_eq!(set.len(), 1);
        assert_eq!(set.prune(at(550), TimeDelta::seconds(100)), 0);
    }

    #[test]
    fn test_bounded_capacity() {
        let mut set = PublishedEvents::new(3);

        assert_eq!(set.retire("ev1", at(1)), None);
        assert_eq!(set.retire("ev2", at(2)), None);
        assert_eq!(set.retire("ev3", at(3)), None);
        assert_eq!(set.len(), 3);

        // Fourth retirement evicts the oldest
        assert_eq!(set.retire("ev4", at(4)).as_deref(), Some("ev1"));
        assert_eq!(set.len(), 3);
        assert!(!set.contains("ev1"));
        assert!(set.contains("ev4"));
    }

    #[test]
    fn test_prune_before_retire_avoids_eviction() {
        let mut set = PublishedEvents::new(2);
        set.retire("ev1", at(0));
        set.retire("ev2", at(10));

        // ev1 has aged out, so pruning first makes room
        assert_eq!(set.prune(at(120), TimeDelta::seconds(100)), 1);
        assert_eq!(set.retire("ev3", at(120)), None);
        assert!(set.contains("ev2"));
        assert!(set.contains("ev3"));

        // Within the span the cap evicts a live entry
        assert_eq!(set.retire("ev4", at(121)).as_deref(), Some("ev2"));
        assert_eq!(set.check("ev2"), DedupeResult::Fresh);
    }

    #[test]
    fn test_empty() {
        let set = PublishedEvents::new(1);
        assert!(set.is_empty());
        assert!(set.stale_rate().abs() < f64::EPSILON);
    }
}
