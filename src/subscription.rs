//! The async driver (spec §2 "Control flow"): wires the pure [`Engine`] up
//! to a real [`Connection`] and [`Subscriber`], merging the inbound
//! connection stream with consumer demand/cancel signals into a single
//! mailbox loop, one `tokio::select!` arm per source.

use std::sync::Arc;

use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::connection::{Connection, Inbound};
use crate::consumer::{ConsumerSignal, Subscriber};
use crate::engine::{Effect, Engine, Input};
use crate::kind::SubscriptionKind;
use crate::settings::SubscriptionSettings;

/// A handle to a running subscription, held by the consumer to issue demand
/// and cancellation (spec §6 "Consumer sink protocol").
///
/// Dropping the handle closes the signal channel, which the mailbox loop
/// reads the same way it would read an explicit [`Subscription::cancel`]:
/// the subscription unsubscribes (if live) and terminates with
/// `on_complete`. Call `cancel` explicitly when the intent matters, but an
/// unreachable handle is not a leak.
pub struct Subscription<K: SubscriptionKind> {
    signals: mpsc::UnboundedSender<ConsumerSignal>,
    task: tokio::task::JoinHandle<()>,
    _kind: std::marker::PhantomData<K>,
}

impl<K: SubscriptionKind> Subscription<K> {
    /// Requests `n` further deliveries, additive to any outstanding demand
    /// (spec I5, P2). A no-op once the subscription has terminated.
    pub fn request(&self, n: u64) {
        let _ = self.signals.send(ConsumerSignal::Request(n));
    }

    /// Withdraws demand permanently; in-flight effects still drain before
    /// the terminal `on_complete` fires (spec §6, P6).
    pub fn cancel(&self) {
        let _ = self.signals.send(ConsumerSignal::Cancel);
    }

    /// Waits for the driver task to finish, e.g. in tests.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Starts a subscription: builds the engine, executes its initial effects,
/// then spawns the mailbox loop. `inbound` is the reply stream the caller's
/// [`Connection`] implementation feeds from the wire.
///
/// Returns immediately with a handle; all engine work happens on the
/// spawned task, so the FSM itself never blocks the caller (spec §5).
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(name = "subscription::start", skip_all)
)]
pub fn start<K, C, S, In>(
    settings: SubscriptionSettings<K::Position>,
    connection: Arc<C>,
    subscriber: Arc<S>,
    inbound: In,
) -> Subscription<K>
where
    K: SubscriptionKind,
    C: Connection<K::Position> + 'static,
    S: Subscriber<K::Position, K::Event> + 'static,
    In: Stream<Item = Inbound<K::Position, K::Event>> + Unpin + Send + 'static,
{
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let (engine, init_effects) = Engine::<K>::new(settings);

    let task = tokio::spawn(run(
        engine,
        connection,
        subscriber,
        inbound,
        signal_rx,
        init_effects,
    ));

    Subscription {
        signals: signal_tx,
        task,
        _kind: std::marker::PhantomData,
    }
}

#[cfg_attr(
    feature = "tracing",
    tracing::instrument(name = "subscription::run", skip_all)
)]
async fn run<K, C, S, In>(
    mut engine: Engine<K>,
    connection: Arc<C>,
    subscriber: Arc<S>,
    mut inbound: In,
    mut signals: mpsc::UnboundedReceiver<ConsumerSignal>,
    init_effects: Vec<Effect<K>>,
) where
    K: SubscriptionKind,
    C: Connection<K::Position> + 'static,
    S: Subscriber<K::Position, K::Event> + 'static,
    In: Stream<Item = Inbound<K::Position, K::Event>> + Unpin + Send + 'static,
{
    if apply(init_effects, &connection, &subscriber).await {
        return;
    }

    loop {
        let input = tokio::select! {
            biased;

            signal = signals.recv() => match signal {
                Some(signal) => Input::Consumer(signal),
                None => Input::Consumer(ConsumerSignal::Cancel),
            },
            message = inbound.next() => match message {
                Some(message) => Input::Connection(message),
                None => Input::Connection(Inbound::ConnectionClosed),
            },
        };

        let effects = engine.handle(input);

        if apply(effects, &connection, &subscriber).await {
            return;
        }
    }
}

/// Executes effects in order, forwarding requests to the connection and
/// deliveries/terminal signals to the subscriber. Returns `true` once a
/// terminal effect (`Complete`/`Error`) has been executed.
async fn apply<K, C, S>(effects: Vec<Effect<K>>, connection: &Arc<C>, subscriber: &Arc<S>) -> bool
where
    K: SubscriptionKind,
    C: Connection<K::Position> + 'static,
    S: Subscriber<K::Position, K::Event> + 'static,
{
    for effect in effects {
        match effect {
            Effect::Send(request) => connection.send(request).await,
            Effect::Deliver(event) => subscriber.on_next(event),
            Effect::Complete => {
                #[cfg(feature = "tracing")]
                tracing::info!("subscription completed");
                subscriber.on_complete();
                return true;
            }
            Effect::Error(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%error, "subscription failed");
                subscriber.on_error(error);
                return true;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio_stream::wrappers::UnboundedReceiverStream;

    use super::*;
    use crate::kind::{Positioned, StreamSubscription};
    use crate::position::{EventNumber, StartPosition};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Ev(u64);

    impl Positioned<EventNumber> for Ev {
        fn position(&self) -> EventNumber {
            EventNumber(self.0)
        }
    }

    type Kind = StreamSubscription<Ev>;

    struct RecordingConnection {
        sent: Mutex<Vec<crate::connection::Outbound<EventNumber>>>,
    }

    #[async_trait::async_trait]
    impl Connection<EventNumber> for RecordingConnection {
        async fn send(&self, request: crate::connection::Outbound<EventNumber>) {
            self.sent.lock().unwrap().push(request);
        }
    }

    struct RecordingSubscriber {
        delivered: Mutex<Vec<Ev>>,
        completed: Mutex<bool>,
    }

    impl Subscriber<EventNumber, Ev> for RecordingSubscriber {
        fn on_next(&self, event: Ev) {
            self.delivered.lock().unwrap().push(event);
        }

        fn on_complete(&self) {
            *self.completed.lock().unwrap() = true;
        }

        fn on_error(&self, _error: crate::connection::Failure) {
            *self.completed.lock().unwrap() = true;
        }
    }

    #[tokio::test]
    async fn drives_a_finite_subscription_to_completion() {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(RecordingConnection {
            sent: Mutex::new(Vec::new()),
        });
        let subscriber = Arc::new(RecordingSubscriber {
            delivered: Mutex::new(Vec::new()),
            completed: Mutex::new(false),
        });

        let settings = SubscriptionSettings::new(StartPosition::Beginning).infinite(false);
        let handle = start::<Kind, _, _, _>(
            settings,
            Arc::clone(&connection),
            Arc::clone(&subscriber),
            UnboundedReceiverStream::new(inbound_rx),
        );
        handle.request(10);

        inbound_tx
            .send(Inbound::ReadCompleted {
                events: vec![Ev(1), Ev(2)],
                next: EventNumber(2),
                end_of_stream: true,
            })
            .unwrap();
        drop(inbound_tx);

        handle.join().await;

        assert_eq!(*subscriber.delivered.lock().unwrap(), vec![Ev(1), Ev(2)]);
        assert!(*subscriber.completed.lock().unwrap());
        assert!(matches!(
            connection.sent.lock().unwrap().first(),
            Some(crate::connection::Outbound::Read { .. })
        ));
    }
}
