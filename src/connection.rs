//! Connection port contract (spec §4.4): outbound requests the core issues
//! to the transport, and inbound replies it expects back.
//!
//! The connection actor itself (the thing that frames these messages over
//! a socket) is out of scope for the core (spec §1); this module only
//! specifies the interface the core drives against.

use async_trait::async_trait;

use crate::settings::Credentials;

/// Outbound messages the core can send through a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound<P> {
    /// Requests the next page of history, forward only, starting at `from`.
    Read {
        from: P,
        count: u32,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    },
    /// Requests a live push subscription.
    SubscribeTo {
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    },
    /// Tears down an active live push subscription.
    Unsubscribe { credentials: Option<Credentials> },
}

/// Inbound messages the core reacts to, as described in spec §4.4.
#[derive(Debug, Clone)]
pub enum Inbound<P, E> {
    /// Reply to a [`Outbound::Read`]. `next` is the position to resume
    /// reading from on the following page; `end_of_stream` is set once the
    /// log has no further events past the ones returned here.
    ReadCompleted {
        events: Vec<E>,
        next: P,
        end_of_stream: bool,
    },
    /// Reply to a [`Outbound::SubscribeTo`], carrying the position that was
    /// current in the log at the moment the subscription was confirmed.
    SubscribeCompleted { at: P },
    /// A single live event pushed by the server.
    EventAppeared(E),
    /// Server-initiated or requested teardown of the push channel.
    Unsubscribed,
    /// A request failed.
    Failure(Failure),
    /// The transport peer died. Distinct from [`Inbound::Unsubscribed`]:
    /// this is an ungraceful disconnection, not a confirmed teardown.
    ConnectionClosed,
}

/// Error taxonomy for [`Inbound::Failure`] (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Failure {
    /// Recoverable-to-empty: absorbed by the core as an empty read.
    #[error("stream not found")]
    StreamNotFound,
    /// Terminal: propagated as `OnError` (see `SPEC_FULL.md` §9 open
    /// question resolution: no test fixes this one's behavior, so it
    /// follows the terminal-error default rather than `StreamNotFound`'s).
    #[error("stream deleted")]
    StreamDeleted,
    /// Terminal server-side failure.
    #[error("server error")]
    ServerError,
    /// Terminal: credentials were missing or invalid.
    #[error("not authenticated")]
    NotAuthenticated,
    /// Terminal: credentials were valid but insufficient.
    #[error("access denied")]
    AccessDenied,
}

/// Sends outbound requests to the transport. Implementations own the
/// socket/actor and are expected to feed replies back as an [`Inbound`]
/// stream supplied separately to [`crate::subscription::run`].
#[async_trait]
pub trait Connection<P>: Send + Sync {
    /// Sends a single outbound message. Fire-and-forget: the reply (if any)
    /// arrives later on the inbound stream, not as this call's return value.
    async fn send(&self, request: Outbound<P>);
}
