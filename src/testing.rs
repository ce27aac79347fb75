//! In-memory test doubles for [`Connection`] and [`Subscriber`], for use in
//! integration tests that exercise the full [`crate::subscription`] driver
//! without a real event store on the other end of the wire.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::connection::{Connection, Failure, Inbound, Outbound};
use crate::consumer::Subscriber;

/// One scripted answer to a `Read` request.
#[derive(Debug, Clone)]
pub struct PreparedPage<P, E> {
    pub events: Vec<E>,
    pub next: P,
    pub end_of_stream: bool,
}

/// A scripted in-memory log plus a live-push channel, standing in for a
/// real event store connection.
///
/// [`FakeConnection::send`] inspects the outbound request and answers from
/// the queues set up beforehand, pushing the reply onto the inbound stream
/// returned by [`FakeConnection::new`]. Unscripted `Read`s answer with an
/// empty, end-of-stream page rather than panicking, so tests only need to
/// prepare the pages that matter to them.
pub struct FakeConnection<P, E> {
    pages: Mutex<VecDeque<Result<PreparedPage<P, E>, Failure>>>,
    subscribe_at: Mutex<Option<P>>,
    live_after_subscribe: Mutex<VecDeque<E>>,
    replies: mpsc::UnboundedSender<Inbound<P, E>>,
}

impl<P, E> FakeConnection<P, E>
where
    P: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Builds a fresh connection and the inbound stream to hand to
    /// [`crate::subscription::start`].
    #[must_use]
    pub fn new() -> (Arc<Self>, UnboundedReceiverStream<Inbound<P, E>>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let this = Arc::new(Self {
            pages: Mutex::new(VecDeque::new()),
            subscribe_at: Mutex::new(None),
            live_after_subscribe: Mutex::new(VecDeque::new()),
            replies: tx,
        });

        (this, UnboundedReceiverStream::new(rx))
    }

    /// Queues the next answer to a `Read` request, in call order.
    pub fn push_page(&self, page: PreparedPage<P, E>) {
        self.pages.lock().push_back(Ok(page));
    }

    /// Queues the next `Read` request to fail with `failure` instead of
    /// returning a page (queued alongside `push_page` so ordering between
    /// successful and failing reads stays deterministic).
    pub fn fail_next_read(&self, failure: Failure) {
        self.pages.lock().push_back(Err(failure));
    }

    /// Sets the position a `SubscribeTo` request will be confirmed at.
    pub fn set_subscribe_at(&self, at: P) {
        *self.subscribe_at.lock() = Some(at);
    }

    /// Pushes a live event directly onto the inbound stream, as if the
    /// server had pushed it down an already-open subscription. Only safe to
    /// call once the subscription is known to already be live; prefer
    /// [`FakeConnection::push_live_after_subscribe`] otherwise.
    pub fn push_live(&self, event: E) {
        let _ = self.replies.send(Inbound::EventAppeared(event));
    }

    /// Queues a live event to be emitted immediately after the next
    /// `SubscribeTo` is confirmed, in the same reply burst as
    /// `SubscribeCompleted`: the deterministic way to land an event inside
    /// the narrow window the real store's push channel races with catch-up.
    pub fn push_live_after_subscribe(&self, event: E) {
        self.live_after_subscribe.lock().push_back(event);
    }

    /// Simulates the transport peer disappearing.
    pub fn close(&self) {
        let _ = self.replies.send(Inbound::ConnectionClosed);
    }
}

#[async_trait]
impl<P, E> Connection<P> for FakeConnection<P, E>
where
    P: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    async fn send(&self, request: Outbound<P>) {
        match request {
            Outbound::Read { from, .. } => {
                let reply = match self.pages.lock().pop_front() {
                    Some(Ok(page)) => Inbound::ReadCompleted {
                        events: page.events,
                        next: page.next,
                        end_of_stream: page.end_of_stream,
                    },
                    Some(Err(failure)) => Inbound::Failure(failure),
                    None => Inbound::ReadCompleted {
                        events: Vec::new(),
                        next: from,
                        end_of_stream: true,
                    },
                };

                let _ = self.replies.send(reply);
            }
            Outbound::SubscribeTo { .. } => {
                let at = self
                    .subscribe_at
                    .lock()
                    .clone()
                    .expect("test must call set_subscribe_at before subscribing");

                let _ = self.replies.send(Inbound::SubscribeCompleted { at });

                let queued: VecDeque<E> = std::mem::take(&mut self.live_after_subscribe.lock());
                for event in queued {
                    let _ = self.replies.send(Inbound::EventAppeared(event));
                }
            }
            Outbound::Unsubscribe { .. } => {
                let _ = self.replies.send(Inbound::Unsubscribed);
            }
        }
    }
}

/// The terminal signal a [`RecordingSubscriber`] observed, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Complete,
    Error(Failure),
}

/// A recording [`Subscriber`], collecting every delivery and the terminal
/// signal for assertion in tests.
pub struct RecordingSubscriber<E> {
    delivered: Mutex<Vec<E>>,
    terminal: Mutex<Option<Terminal>>,
}

impl<E: Clone> RecordingSubscriber<E> {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            delivered: Mutex::new(Vec::new()),
            terminal: Mutex::new(None),
        })
    }

    /// Snapshots every event delivered so far, in delivery order.
    #[must_use]
    pub fn delivered(&self) -> Vec<E> {
        self.delivered.lock().clone()
    }

    /// The terminal signal observed, if the subscription has ended.
    #[must_use]
    pub fn terminal(&self) -> Option<Terminal> {
        self.terminal.lock().clone()
    }
}

impl<P, E> Subscriber<P, E> for RecordingSubscriber<E>
where
    E: Clone + Send + Sync,
{
    fn on_next(&self, event: E) {
        self.delivered.lock().push(event);
    }

    fn on_complete(&self) {
        *self.terminal.lock() = Some(Terminal::Complete);
    }

    fn on_error(&self, error: Failure) {
        *self.terminal.lock() = Some(Terminal::Error(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::Positioned;
    use crate::position::EventNumber;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Ev(u64);

    impl Positioned<EventNumber> for Ev {
        fn position(&self) -> EventNumber {
            EventNumber(self.0)
        }
    }

    #[tokio::test]
    async fn fake_connection_answers_scripted_reads_then_defaults_to_empty() {
        let (connection, mut inbound): (_, UnboundedReceiverStream<Inbound<EventNumber, Ev>>) =
            FakeConnection::new();

        connection.push_page(PreparedPage {
            events: vec![Ev(1)],
            next: EventNumber(1),
            end_of_stream: false,
        });

        connection
            .send(Outbound::Read {
                from: EventNumber(0),
                count: 10,
                resolve_link_tos: false,
                credentials: None,
            })
            .await;
        connection
            .send(Outbound::Read {
                from: EventNumber(1),
                count: 10,
                resolve_link_tos: false,
                credentials: None,
            })
            .await;

        use futures::StreamExt;
        let first = inbound.next().await.unwrap();
        assert!(matches!(
            first,
            Inbound::ReadCompleted { end_of_stream: false, .. }
        ));

        let second = inbound.next().await.unwrap();
        assert!(matches!(
            second,
            Inbound::ReadCompleted { end_of_stream: true, .. }
        ));
    }

    #[tokio::test]
    async fn fake_connection_answers_a_queued_read_failure_in_order() {
        let (connection, mut inbound): (_, UnboundedReceiverStream<Inbound<EventNumber, Ev>>) =
            FakeConnection::new();

        connection.push_page(PreparedPage {
            events: vec![Ev(1)],
            next: EventNumber(1),
            end_of_stream: false,
        });
        connection.fail_next_read(Failure::StreamNotFound);

        let read = Outbound::Read {
            from: EventNumber(0),
            count: 10,
            resolve_link_tos: false,
            credentials: None,
        };
        connection.send(read.clone()).await;
        connection.send(read).await;

        use futures::StreamExt;
        assert!(matches!(
            inbound.next().await.unwrap(),
            Inbound::ReadCompleted { end_of_stream: false, .. }
        ));
        assert!(matches!(
            inbound.next().await.unwrap(),
            Inbound::Failure(Failure::StreamNotFound)
        ));
    }

    #[test]
    fn recording_subscriber_collects_deliveries_and_terminal_signal() {
        let subscriber = RecordingSubscriber::<Ev>::new();
        Subscriber::<EventNumber, Ev>::on_next(&*subscriber, Ev(1));
        Subscriber::<EventNumber, Ev>::on_next(&*subscriber, Ev(2));
        Subscriber::<EventNumber, Ev>::on_complete(&*subscriber);

        assert_eq!(subscriber.delivered(), vec![Ev(1), Ev(2)]);
        assert_eq!(subscriber.terminal(), Some(Terminal::Complete));
    }
}
