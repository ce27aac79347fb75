//! The monotone-gate delivery filter (spec §4.3): the single `enqueue`
//! primitive every path handing events to the consumer goes through.

use crate::backpressure::BackpressureGate;
use crate::kind::Positioned;
use crate::position::LogPosition;

/// Tracks the greatest position already handed to the [`BackpressureGate`]
/// and drops anything at or below it, regardless of where it came from
/// (read page overlap, stash replay, server resend): this is what gives
/// "ignore wrong events while subscribed" (spec §4.3).
#[derive(Debug, Clone)]
pub struct DeliveryFilter<P> {
    last: Option<P>,
}

impl<P: LogPosition> DeliveryFilter<P> {
    #[must_use]
    pub fn new(last: Option<P>) -> Self {
        Self { last }
    }

    /// The greatest position delivered so far, or the configured start.
    #[must_use]
    pub fn last(&self) -> Option<P> {
        self.last
    }

    /// Filters `events` in order, pushing survivors into `gate` and
    /// advancing `last` past every one of them (spec I1).
    pub fn enqueue<E>(&mut self, events: impl IntoIterator<Item = E>, gate: &mut BackpressureGate<E>)
    where
        E: Positioned<P>,
    {
        for event in events {
            let position = event.position();
            let passes = match self.last {
                None => true,
                Some(last) => position > last,
            };

            if passes {
                self.last = Some(position);
                gate.enqueue(event);
            }
        }
    }
}
