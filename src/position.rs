//! Position algebra: totally ordered identifiers of an event's location in
//! the log, shared by both addressing schemes (single stream, all-streams).

use std::fmt::Debug;

/// A totally ordered identifier of an event's location in the log.
///
/// Each addressing scheme has its own concrete position type; both are
/// dense-enough linear orders with a distinguished [`FIRST`](LogPosition::FIRST)
/// value less than every position a store will ever hand out.
pub trait LogPosition: Copy + Eq + Ord + Debug + Send + Sync + 'static {
    /// The position immediately preceding the very first event in the log.
    const FIRST: Self;
}

/// Per-stream monotonic position. `EventNumber(0)` is [`LogPosition::FIRST`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventNumber(pub u64);

impl LogPosition for EventNumber {
    const FIRST: Self = EventNumber(0);
}

impl EventNumber {
    /// Returns the position immediately following this one.
    #[inline]
    #[must_use]
    pub fn next(self) -> Self {
        EventNumber(self.0 + 1)
    }
}

/// Commit/prepare pair identifying an event's location in the all-streams
/// log, ordered lexicographically by `(commit, prepare)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub commit: u64,
    pub prepare: u64,
}

impl Position {
    #[inline]
    #[must_use]
    pub fn new(commit: u64, prepare: u64) -> Self {
        Self { commit, prepare }
    }
}

impl LogPosition for Position {
    const FIRST: Self = Position {
        commit: 0,
        prepare: 0,
    };
}

/// Where a newly constructed subscription should begin relative to the log.
///
/// Mirrors `from_exclusive: Option<P>` from the data model: `None` maps to
/// [`Beginning`](StartPosition::Beginning), `Some(Exact(p))` maps to
/// [`After`](StartPosition::After), `Some(Last)` maps to
/// [`End`](StartPosition::End).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition<P> {
    /// Start at [`LogPosition::FIRST`], reading the whole log.
    Beginning,
    /// Start strictly after the given position, filtering it out.
    After(P),
    /// Subscribe to live events only; no historical read is ever issued.
    End,
}

impl<P> Default for StartPosition<P> {
    #[inline]
    fn default() -> Self {
        StartPosition::Beginning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_number_first_is_zero() {
        assert_eq!(EventNumber::FIRST, EventNumber(0));
        assert!(EventNumber::FIRST < EventNumber(1));
    }

    #[test]
    fn position_orders_by_commit_then_prepare() {
        let a = Position::new(1, 5);
        let b = Position::new(1, 6);
        let c = Position::new(2, 0);

        assert!(a < b);
        assert!(b < c);
        assert_eq!(Position::FIRST, Position::new(0, 0));
    }
}
