//! The subscription state machine (spec §2 component 5, §4.1): a pure
//! `handle(state, input) -> effects` step function, exhaustively matched,
//! independently testable without any I/O.

use std::collections::VecDeque;

use crate::backpressure::BackpressureGate;
use crate::connection::{Failure, Inbound, Outbound};
use crate::consumer::ConsumerSignal;
use crate::kind::SubscriptionKind;
use crate::position::{LogPosition, StartPosition};
use crate::reconciler::{self, Stash};
use crate::settings::SubscriptionSettings;

/// The four-phase FSM plus its `Unsubscribing`/`Terminal` bookends (spec
/// §4.1). `in_flight` tracks invariant I4: at most one outstanding `Read`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase<P> {
    Reading { next: P, in_flight: bool },
    Subscribing { next: P },
    SubscribingFromLast,
    CatchingUp {
        next: P,
        sub_num: P,
        in_flight: bool,
    },
    Subscribed,
    Unsubscribing,
    Terminal,
}

/// A message arriving in the FSM's mailbox (spec §2 "Control flow").
#[derive(Debug, Clone)]
pub enum Input<K: SubscriptionKind> {
    Connection(Inbound<K::Position, K::Event>),
    Consumer(ConsumerSignal),
}

/// An effect the engine wants performed by the I/O driver. The engine never
/// performs I/O itself (spec §5 "no synchronous blocking call appears
/// inside a transition").
pub enum Effect<K: SubscriptionKind> {
    Send(Outbound<K::Position>),
    Deliver(K::Event),
    Complete,
    Error(Failure),
}

/// Owns every piece of mutable runtime state from spec §3: `last`, `next`
/// (folded into `phase`), `stash`, `demand`/buffer (the gate).
pub struct Engine<K: SubscriptionKind> {
    phase: Phase<K::Position>,
    last: Option<K::Position>,
    stash: Stash<K::Event>,
    gate: BackpressureGate<K::Event>,
    settings: SubscriptionSettings<K::Position>,
}

impl<K: SubscriptionKind> Engine<K> {
    /// Builds the engine and returns the effects of the initial transition
    /// (spec §4.1 "Initial transition table").
    #[must_use]
    pub fn new(settings: SubscriptionSettings<K::Position>) -> (Self, Vec<Effect<K>>) {
        let buffer_capacity = settings.read_batch_size as usize * 2;

        let mut engine = Self {
            phase: Phase::Terminal,
            last: None,
            stash: Stash::new(),
            gate: BackpressureGate::new(buffer_capacity.max(1)),
            settings,
        };

        let effects = match engine.settings.from {
            StartPosition::Beginning => {
                engine.last = None;
                engine.start_reading(K::Position::FIRST)
            }
            StartPosition::After(p) => {
                engine.last = Some(p);
                engine.start_reading(p)
            }
            StartPosition::End if engine.settings.infinite => {
                engine.last = None;
                engine.phase = Phase::SubscribingFromLast;
                vec![engine.subscribe_effect()]
            }
            StartPosition::End => {
                engine.phase = Phase::Terminal;
                vec![Effect::Complete]
            }
        };

        (engine, effects)
    }

    /// Adds to cumulative demand (spec I5), for callers that want to seed
    /// demand before the first mailbox message is processed.
    pub fn add_demand(&mut self, n: u64) {
        self.gate.add_demand(n);
    }

    fn read_effect(&self, from: K::Position) -> Effect<K> {
        Effect::Send(Outbound::Read {
            from,
            count: self.settings.read_batch_size,
            resolve_link_tos: self.settings.resolve_link_tos,
            credentials: self.settings.credentials.clone(),
        })
    }

    fn subscribe_effect(&self) -> Effect<K> {
        Effect::Send(Outbound::SubscribeTo {
            resolve_link_tos: self.settings.resolve_link_tos,
            credentials: self.settings.credentials.clone(),
        })
    }

    fn unsubscribe_effect(&self) -> Effect<K> {
        Effect::Send(Outbound::Unsubscribe {
            credentials: self.settings.credentials.clone(),
        })
    }

    /// Enters `Reading(next)`, issuing the read immediately unless the gate
    /// is already blocked, in which case the read is deferred until demand
    /// frees it up (see `resume_if_unblocked`).
    fn start_reading(&mut self, next: K::Position) -> Vec<Effect<K>> {
        if self.gate.is_blocked() {
            self.phase = Phase::Reading {
                next,
                in_flight: false,
            };
            Vec::new()
        } else {
            self.phase = Phase::Reading {
                next,
                in_flight: true,
            };
            vec![self.read_effect(next)]
        }
    }

    fn start_catching_up(&mut self, next: K::Position, sub_num: K::Position) -> Vec<Effect<K>> {
        if self.gate.is_blocked() {
            self.phase = Phase::CatchingUp {
                next,
                sub_num,
                in_flight: false,
            };
            Vec::new()
        } else {
            self.phase = Phase::CatchingUp {
                next,
                sub_num,
                in_flight: true,
            };
            vec![self.read_effect(next)]
        }
    }

    /// Filters and buffers `events`, returning the `Deliver` effects demand
    /// currently allows (spec §4.3).
    fn enqueue(&mut self, events: impl IntoIterator<Item = K::Event>) -> Vec<Effect<K>> {
        let mut filter = crate::filter::DeliveryFilter::new(self.last);
        filter.enqueue(events, &mut self.gate);
        self.last = filter.last();

        self.gate
            .drain_deliverable()
            .into_iter()
            .map(Effect::Deliver)
            .collect()
    }

    fn flush_stash(&mut self) -> Vec<Effect<K>> {
        let stashed: VecDeque<K::Event> = self.stash.drain();
        self.enqueue(stashed)
    }

    fn terminate_complete(&mut self) -> Vec<Effect<K>> {
        self.phase = Phase::Terminal;
        self.gate.clear();
        vec![Effect::Complete]
    }

    fn terminate_error(&mut self, error: Failure) -> Vec<Effect<K>> {
        self.phase = Phase::Terminal;
        self.gate.clear();
        vec![Effect::Error(error)]
    }

    /// Processes a single mailbox message, possibly mutating state, and
    /// returns the effects the driver must carry out in order.
    pub fn handle(&mut self, input: Input<K>) -> Vec<Effect<K>> {
        match input {
            Input::Consumer(ConsumerSignal::Cancel) => self.handle_cancel(),
            Input::Consumer(ConsumerSignal::Request(n)) => self.handle_request(n),
            Input::Connection(Inbound::ConnectionClosed) => {
                if matches!(self.phase, Phase::Terminal) {
                    Vec::new()
                } else {
                    self.terminate_complete()
                }
            }
            Input::Connection(Inbound::Failure(failure)) => self.handle_failure(failure),
            Input::Connection(Inbound::ReadCompleted {
                events,
                next,
                end_of_stream,
            }) => self.handle_read_completed(events, next, end_of_stream),
            Input::Connection(Inbound::SubscribeCompleted { at }) => {
                self.handle_subscribe_completed(at)
            }
            Input::Connection(Inbound::EventAppeared(event)) => self.handle_event_appeared(event),
            Input::Connection(Inbound::Unsubscribed) => self.handle_unsubscribed(),
        }
    }

    fn handle_cancel(&mut self) -> Vec<Effect<K>> {
        let was_subscribed = matches!(
            self.phase,
            Phase::Subscribing { .. }
                | Phase::SubscribingFromLast
                | Phase::CatchingUp { .. }
                | Phase::Subscribed
                | Phase::Unsubscribing
        );

        self.phase = Phase::Terminal;
        self.gate.clear();
        self.stash.drain();

        let mut effects = Vec::new();
        if was_subscribed {
            effects.push(self.unsubscribe_effect());
        }
        effects.push(Effect::Complete);
        effects
    }

    fn handle_request(&mut self, n: u64) -> Vec<Effect<K>> {
        self.gate.add_demand(n);

        let mut effects: Vec<Effect<K>> = self
            .gate
            .drain_deliverable()
            .into_iter()
            .map(Effect::Deliver)
            .collect();

        effects.extend(self.resume_if_unblocked());
        effects
    }

    /// Resumes a read paused by backpressure, once demand makes room again.
    fn resume_if_unblocked(&mut self) -> Vec<Effect<K>> {
        match self.phase {
            Phase::Reading { next, in_flight } if !in_flight && !self.gate.is_blocked() => {
                self.phase = Phase::Reading {
                    next,
                    in_flight: true,
                };
                vec![self.read_effect(next)]
            }
            Phase::CatchingUp {
                next,
                sub_num,
                in_flight,
            } if !in_flight && !self.gate.is_blocked() => {
                self.phase = Phase::CatchingUp {
                    next,
                    sub_num,
                    in_flight: true,
                };
                vec![self.read_effect(next)]
            }
            _ => Vec::new(),
        }
    }

    fn handle_failure(&mut self, failure: Failure) -> Vec<Effect<K>> {
        if failure == Failure::StreamNotFound {
            match self.phase {
                Phase::Reading { next, .. } => {
                    return self.handle_read_completed(Vec::new(), next, true)
                }
                Phase::CatchingUp { next, .. } => {
                    return self.handle_read_completed(Vec::new(), next, true)
                }
                _ => {}
            }
        }

        self.terminate_error(failure)
    }

    fn handle_read_completed(
        &mut self,
        events: Vec<K::Event>,
        next: K::Position,
        end_of_stream: bool,
    ) -> Vec<Effect<K>> {
        match self.phase {
            Phase::Reading { .. } => {
                let mut effects = self.enqueue(events);

                if end_of_stream {
                    if self.settings.infinite {
                        self.phase = Phase::Subscribing { next };
                        effects.push(self.subscribe_effect());
                    } else {
                        effects.extend(self.terminate_complete());
                    }
                } else {
                    effects.extend(self.start_reading(next));
                }

                effects
            }
            Phase::CatchingUp { sub_num, .. } => {
                let mut effects = self.enqueue(events.clone());
                let met = reconciler::meeting_condition(&events, sub_num);

                if met {
                    effects.extend(self.flush_stash());
                    self.phase = Phase::Subscribed;
                } else if self.gate.is_blocked() {
                    self.phase = Phase::Unsubscribing;
                    effects.push(self.unsubscribe_effect());
                } else {
                    effects.extend(self.start_catching_up(next, sub_num));
                }

                effects
            }
            _ => Vec::new(),
        }
    }

    fn handle_subscribe_completed(&mut self, at: K::Position) -> Vec<Effect<K>> {
        match self.phase {
            Phase::Subscribing { next } => {
                let must_catch_up = self.last.map(|last| last < at).unwrap_or(true);

                if must_catch_up {
                    self.start_catching_up(next, at)
                } else {
                    self.phase = Phase::Subscribed;
                    Vec::new()
                }
            }
            Phase::SubscribingFromLast => {
                self.phase = Phase::Subscribed;
                Vec::new()
            }
            // Duplicate SubscribeCompleted while already catching up or
            // subscribed must be a no-op (spec "Resubscription edge case").
            Phase::CatchingUp { .. } | Phase::Subscribed => Vec::new(),
            _ => Vec::new(),
        }
    }

    fn handle_event_appeared(&mut self, event: K::Event) -> Vec<Effect<K>> {
        match self.phase {
            Phase::CatchingUp { .. } => {
                self.stash.push(event);
                Vec::new()
            }
            Phase::Subscribed => {
                let effects = self.enqueue(std::iter::once(event));

                if self.gate.is_blocked() {
                    self.phase = Phase::Unsubscribing;
                    let mut effects = effects;
                    effects.push(self.unsubscribe_effect());
                    effects
                } else {
                    effects
                }
            }
            // Unsubscribing absorbs further live events until the
            // teardown is confirmed.
            Phase::Unsubscribing => Vec::new(),
            _ => Vec::new(),
        }
    }

    fn handle_unsubscribed(&mut self) -> Vec<Effect<K>> {
        match self.phase {
            Phase::Reading { .. } => Vec::new(),
            _ => self.terminate_complete(),
        }
    }
}
