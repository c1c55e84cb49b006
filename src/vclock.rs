// Vector clocks - causal versioning of per-key values
// Comparison, merging, staleness detection and sibling identification

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Wall-clock nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Per-client clock entry: a logical counter plus the wall-clock time of the
/// last increment. Timestamps are carried for presentation (`Last-Modified`)
/// and merged alongside counters, but they never participate in equality.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClockEntry {
    pub counter: u64,
    pub timestamp_ns: i64,
}

/// Mapping from client id to clock entry. The empty map is the "fresh" clock.
///
/// Equality compares counters only: timestamps come from different machines'
/// wall clocks and drift makes them useless for deciding whether two clocks
/// describe the same history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<String, ClockEntry>,
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.entries.iter().all(|(id, entry)| {
            other
                .entries
                .get(id)
                .is_some_and(|o| o.counter == entry.counter)
        })
    }
}

impl Eq for VectorClock {}

impl VectorClock {
    /// The empty clock.
    pub fn fresh() -> Self {
        Self::default()
    }

    /// A clock with a single entry for `client`, counter 1.
    pub fn new(client: &str) -> Self {
        let mut vc = Self::fresh();
        vc.increment(client);
        vc
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn counter(&self, client: &str) -> u64 {
        self.entries.get(client).map(|e| e.counter).unwrap_or(0)
    }

    /// Advance this clock for `client`: prior counter (or 0) plus one,
    /// stamped with the current wall clock.
    pub fn increment(&mut self, client: &str) {
        let entry = self.entries.entry(client.to_string()).or_insert(ClockEntry {
            counter: 0,
            timestamp_ns: 0,
        });
        entry.counter += 1;
        entry.timestamp_ns = now_nanos();
    }

    /// Merge a set of clocks: per client, max counter and max timestamp.
    /// Associative, commutative and idempotent.
    pub fn merge(clocks: &[VectorClock]) -> VectorClock {
        let mut merged = VectorClock::fresh();
        for vc in clocks {
            for (id, entry) in &vc.entries {
                let slot = merged
                    .entries
                    .entry(id.clone())
                    .or_insert(ClockEntry {
                        counter: 0,
                        timestamp_ns: 0,
                    });
                slot.counter = slot.counter.max(entry.counter);
                slot.timestamp_ns = slot.timestamp_ns.max(entry.timestamp_ns);
            }
        }
        merged
    }

    /// Merge then advance for `client`. Used when a client reconciles
    /// siblings and writes a descendant of all of them.
    pub fn merge_self(clocks: &[VectorClock], client: &str) -> VectorClock {
        let mut merged = Self::merge(clocks);
        merged.increment(client);
        merged
    }

    /// Compare two clocks.
    ///
    /// `Greater`: self strictly descends other. `Less`: other strictly
    /// descends self. `Equal`: identical counters, or split histories
    /// (siblings) - callers that need to tell those apart also check `==`.
    pub fn compare(&self, other: &VectorClock) -> Ordering {
        let ahead = |a: &VectorClock, b: &VectorClock| {
            a.entries
                .iter()
                .any(|(id, entry)| entry.counter > b.counter(id))
        };
        match (ahead(self, other), ahead(other, self)) {
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            _ => Ordering::Equal,
        }
    }

    /// True when self is a descendant of other (inclusive: equal clocks
    /// descend each other).
    pub fn descends(&self, other: &VectorClock) -> bool {
        match self.compare(other) {
            Ordering::Greater => true,
            Ordering::Equal => self == other,
            Ordering::Less => false,
        }
    }

    /// Max entry timestamp; 0 for the fresh clock.
    pub fn max_timestamp(&self) -> i64 {
        self.entries
            .values()
            .map(|e| e.timestamp_ns)
            .max()
            .unwrap_or(0)
    }

    /// A clock is valid when every entry has a non-empty client id, a
    /// positive counter and a positive timestamp. The empty clock is valid.
    pub fn is_valid(&self) -> bool {
        self.entries
            .iter()
            .all(|(id, e)| !id.is_empty() && e.counter > 0 && e.timestamp_ns > 0)
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // BTreeMap iterates in client-id order, so the rendering is stable.
        write!(f, "[")?;
        for (i, (id, entry)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "({}, {})", id, entry.counter)?;
        }
        write!(f, "]")
    }
}

/// Subset of `clocks` whose clock is not strictly dominated by any other
/// clock in the input. A totally ordered input yields one entry; concurrent
/// updates yield several (the sibling case).
pub fn latest(clocks: &BTreeMap<String, VectorClock>) -> BTreeMap<String, VectorClock> {
    clocks
        .iter()
        .filter(|(peer, vc)| {
            !clocks
                .iter()
                .any(|(other, ovc)| other != *peer && ovc.compare(vc) == Ordering::Greater)
        })
        .map(|(peer, vc)| (peer.clone(), vc.clone()))
        .collect()
}

/// Peers whose clock is strictly dominated by at least one other clock in
/// the input. These are the read-repair targets.
pub fn map_outdated(clocks: &BTreeMap<String, VectorClock>) -> Vec<String> {
    clocks
        .iter()
        .filter(|(peer, vc)| {
            clocks
                .iter()
                .any(|(other, ovc)| other != *peer && ovc.compare(vc) == Ordering::Greater)
        })
        .map(|(peer, _)| peer.clone())
        .collect()
}

/// True when every pair of clocks is equal (counters only).
pub fn all_equal(clocks: &[VectorClock]) -> bool {
    clocks.windows(2).all(|pair| pair[0] == pair[1])
}
