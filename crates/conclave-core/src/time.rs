//! Lamport time and the freshness window used by the role resolver.
//!
//! The gossip layer stamps every query, response, and user event with a
//! cluster-wide logical timestamp. The coordinator never generates these
//! itself; it only records and compares them.

use std::fmt;
use std::str::FromStr;

/// A logical timestamp supplied by the gossip layer.
///
/// Zero is the uninitialised value: no protocol event has been witnessed
/// yet. Transports start their clocks at one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LamportTime(pub u64);

impl fmt::Display for LamportTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for LamportTime {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(LamportTime)
    }
}

/// An interval of Lamport times.
///
/// Grows to cover every timestamp it witnesses. The zero state (`latest`
/// still zero) is treated as empty: the first witness initialises both
/// endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct LamportWindow {
    earliest: LamportTime,
    latest: LamportTime,
}

impl LamportWindow {
    /// Creates an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grows the window to encompass `t`.
    ///
    /// The first witness sets both endpoints; without this, `earliest`
    /// would stay pinned at zero and `before` could never hold.
    pub fn witness(&mut self, t: LamportTime) {
        if self.latest.0 == 0 {
            self.earliest = t;
            self.latest = t;
            return;
        }
        if self.earliest > t {
            self.earliest = t;
        }
        if self.latest < t {
            self.latest = t;
        }
    }

    /// Tests whether `t` falls before everything witnessed so far.
    pub fn before(&self, t: LamportTime) -> bool {
        t < self.earliest
    }

    /// Tests whether `t` falls after everything witnessed so far.
    pub fn after(&self, t: LamportTime) -> bool {
        t > self.latest
    }
}
