//! Timer ordered set (spec.md §4.2): an ordered set of events keyed by
//! absolute deadline, supporting `min`, `insert`, `remove` in O(log n).

use crate::event::{EventId, TimerKey};
use std::collections::BTreeMap;
use std::time::Instant;

/// Ordered set of pending deadlines.
///
/// Keyed by `(deadline, insertion sequence)` so two events with an identical
/// deadline still order deterministically by insertion order, per spec.md's
/// tiebreak requirement. Each `EventRecord` stores the key it was inserted
/// under (`EventRecord::deadline`), so `remove` is a direct map removal
/// rather than a scan.
#[derive(Default)]
pub struct TimerSet {
    entries: BTreeMap<TimerKey, EventId>,
    next_seq: u64,
}

impl TimerSet {
    pub fn new() -> TimerSet {
        TimerSet::default()
    }

    /// Inserts `id` with the given absolute `deadline`, returning the key
    /// the caller must store on the record for later removal.
    pub fn insert(&mut self, deadline: Instant, id: EventId) -> TimerKey {
        let key = (deadline, self.next_seq);
        self.next_seq += 1;
        self.entries.insert(key, id);
        key
    }

    /// Removes the entry previously inserted under `key`, if still present.
    pub fn remove(&mut self, key: TimerKey) -> Option<EventId> {
        self.entries.remove(&key)
    }

    /// The earliest pending deadline, if any.
    pub fn min_deadline(&self) -> Option<Instant> {
        self.entries.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Removes and returns the earliest entry if its deadline is `<= now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<(TimerKey, EventId)> {
        let key = *self.entries.keys().next()?;
        if key.0 <= now {
            let id = self.entries.remove(&key)?;
            Some((key, id))
        } else {
            None
        }
    }

    /// Shifts every pending deadline backward by `delta` — used to correct
    /// for wallclock drift when the system clock jumps.
    pub fn shift_all(&mut self, delta: std::time::Duration) {
        if self.entries.is_empty() {
            return;
        }
        let shifted: Vec<_> = std::mem::take(&mut self.entries)
            .into_iter()
            .map(|((deadline, seq), id)| ((deadline - delta, seq), id))
            .collect();
        self.entries.extend(shifted);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id(n: usize) -> EventId {
        // `EventId` is constructed by the arena in normal use; tests reach
        // into the crate to build bare handles for comparison.
        EventId(n)
    }

    #[test]
    fn min_is_monotone_as_entries_expire() {
        let base = Instant::now();
        let mut set = TimerSet::new();
        let k1 = set.insert(base + Duration::from_millis(10), id(1));
        let k2 = set.insert(base + Duration::from_millis(5), id(2));
        let _ = k1;
        assert_eq!(set.min_deadline(), Some(base + Duration::from_millis(5)));
        let (popped_key, popped_id) = set
            .pop_expired(base + Duration::from_millis(5))
            .expect("entry at 5ms should be expired");
        assert_eq!(popped_key, k2);
        assert_eq!(popped_id, id(2));
        assert_eq!(set.min_deadline(), Some(base + Duration::from_millis(10)));
    }

    #[test]
    fn remove_is_a_direct_key_lookup() {
        let base = Instant::now();
        let mut set = TimerSet::new();
        let k1 = set.insert(base + Duration::from_millis(10), id(1));
        let k2 = set.insert(base + Duration::from_millis(10), id(2));
        assert_ne!(k1, k2, "identical deadlines must tiebreak by insertion order");
        assert_eq!(set.remove(k1), Some(id(1)));
        assert_eq!(set.len(), 1);
        assert_eq!(set.remove(k1), None, "removing twice is a no-op");
    }

    #[test]
    fn event_add_twice_replaces_not_duplicates() {
        let base = Instant::now();
        let mut set = TimerSet::new();
        let k1 = set.insert(base + Duration::from_millis(10), id(1));
        set.remove(k1);
        let _k2 = set.insert(base + Duration::from_millis(20), id(1));
        assert_eq!(set.len(), 1);
    }
}
