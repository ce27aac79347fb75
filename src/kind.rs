//! Parameterization of the shared control skeleton over the two addressing
//! schemes (single stream, all-streams) described in spec §4.2.

use std::marker::PhantomData;

use crate::position::{EventNumber, LogPosition, Position};

/// An event, opaque to the core, carrying a position accessor.
pub trait Positioned<P> {
    /// Returns the position of this event in the log.
    fn position(&self) -> P;
}

/// Parameterizes the subscription control skeleton (§4.1) over a position
/// type and an event type, instead of an inheritance hierarchy.
///
/// `StreamSubscription` and `AllSubscription` are the two instantiations
/// named in spec §4.2; both reuse the exact same [`crate::engine::Engine`].
pub trait SubscriptionKind: Send + Sync + 'static {
    /// The position type for this addressing scheme.
    type Position: LogPosition;

    /// The event type streamed by this addressing scheme.
    type Event: Positioned<Self::Position> + Send + Sync + 'static;
}

/// Stream subscription: positions are [`EventNumber`].
#[derive(Debug)]
pub struct StreamSubscription<E>(PhantomData<E>);

impl<E> SubscriptionKind for StreamSubscription<E>
where
    E: Positioned<EventNumber> + Send + Sync + 'static,
{
    type Position = EventNumber;
    type Event = E;
}

/// All-streams subscription: positions are [`Position`].
#[derive(Debug)]
pub struct AllSubscription<E>(PhantomData<E>);

impl<E> SubscriptionKind for AllSubscription<E>
where
    E: Positioned<Position> + Send + Sync + 'static,
{
    type Position = Position;
    type Event = E;
}
