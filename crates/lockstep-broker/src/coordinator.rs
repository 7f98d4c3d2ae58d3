//! The time coordinator: a pure state machine over broker events.
//!
//! Events are **passive data** — they describe a message that arrived. The
//! coordinator mutates registry state and returns the actions the event
//! loop must perform (sends, pacing, tracing, shutdown), in order. It does
//! no I/O itself, which keeps the whole protocol testable as plain state
//! transitions.
//!
//! # Phases
//!
//! **Registration**: HELLOs create records until `expected_sims` have been
//! admitted, at which point every simulator is ACKed and marked processing.
//!
//! **Running**: each simulator completes its outstanding grant with a
//! TIME_REQUEST (or leaves with BYE). When the last one completes, the
//! round closes: the next global time is the minimum **actionable time**
//! over all records —
//!
//! ```text
//! actionable(r) = r.time_last_processed + r.time_delta   if r.messages_pending
//!               = r.time_requested                       otherwise
//! ```
//!
//! — and exactly the records whose actionable time equals that minimum are
//! granted it. Every other record's `time_last_processed` is fast-forwarded
//! to the largest multiple of its own `time_delta` not exceeding the grant,
//! keeping its clock base on its delta grid for the next time it receives
//! messages.

use std::collections::HashSet;

use lockstep_messages::{HelloConfig, Message};
use lockstep_types::{SimId, SimTime};
use tracing::{debug, info, trace, warn};

use crate::error::BrokerError;
use crate::registry::Registry;

/// An inbound protocol event, with the sender already identified and
/// payload frames already parsed.
#[derive(Debug, Clone)]
pub enum Event {
    Hello { sim: SimId, config: HelloConfig },
    TimeRequest { sim: SimId, time: SimTime },
    TimeDelta { sim: SimId, delta: SimTime },
    Publish { sim: SimId, topic: String, value: Vec<u8> },
    Bye { sim: SimId },
    Die { sim: SimId },
}

/// An effect for the event loop to perform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send `message` to the simulator whose identity is `dest`.
    Send { dest: SimId, message: Message },
    /// Registration just closed: capture the wall-clock start and begin
    /// real-time pacing if configured.
    StartClock,
    /// Wait until real time has caught up to `until` before continuing.
    /// No-op when pacing is disabled.
    Pace { until: SimTime },
    /// Record one forwarded publish in the trace sink.
    Trace {
        time: SimTime,
        topic: String,
        value: Vec<u8>,
    },
    /// Graceful end of session: every simulator has said BYE.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Registration,
    Running,
}

/// Single-owner coordination state. The event loop is the sole mutator.
#[derive(Debug)]
pub struct Coordinator {
    expected_sims: usize,
    registry: Registry,
    departed: HashSet<SimId>,
    time_granted: SimTime,
    n_processing: usize,
    phase: Phase,
}

impl Coordinator {
    /// `expected_sims` must be at least 1.
    pub fn new(expected_sims: usize) -> Coordinator {
        assert!(expected_sims > 0, "expected_sims must be positive");
        Coordinator {
            expected_sims,
            registry: Registry::new(expected_sims),
            departed: HashSet::new(),
            time_granted: SimTime::ZERO,
            n_processing: 0,
            phase: Phase::Registration,
        }
    }

    pub fn expected_sims(&self) -> usize {
        self.expected_sims
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The most recently announced global simulated time.
    pub fn time_granted(&self) -> SimTime {
        self.time_granted
    }

    /// Simulators holding an outstanding grant.
    pub fn n_processing(&self) -> usize {
        self.n_processing
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    /// Process one event, returning the actions to perform in order.
    pub fn handle(&mut self, event: Event) -> Result<Vec<Action>, BrokerError> {
        match event {
            Event::Hello { sim, config } => self.on_hello(sim, config),
            Event::TimeRequest { sim, time } => self.on_completion(&sim, time),
            Event::TimeDelta { sim, delta } => self.on_time_delta(&sim, delta),
            Event::Publish { sim, topic, value } => self.on_publish(&sim, topic, value),
            Event::Bye { sim } => self.on_bye(sim),
            Event::Die { sim } => self.on_die(&sim),
        }
    }

    /// The DIE fan-out for fatal exits: every registered simulator, in
    /// ordinal order.
    pub fn abort_broadcast(&self) -> Vec<Action> {
        self.registry
            .names()
            .map(|name| Action::Send {
                dest: name.clone(),
                message: Message::Die,
            })
            .collect()
    }

    // ─── Registration ───────────────────────────────────────────────────

    fn on_hello(&mut self, sim: SimId, config: HelloConfig) -> Result<Vec<Action>, BrokerError> {
        let time_delta = match config.time_delta {
            Some(delta) => delta,
            None => {
                warn!(sim = %sim, "config does not contain 'time_delta', defaulting to 1s");
                SimTime::ONE_SECOND
            }
        };

        let ordinal = self
            .registry
            .register(sim.clone(), time_delta, config.subscriptions)?;
        debug!(
            sim = %sim,
            ordinal,
            time_delta = %time_delta,
            "registered simulator"
        );

        if !self.registry.is_full() {
            return Ok(Vec::new());
        }

        // All simulators admitted: close registration for good, hand every
        // peer its ordinal, and put the whole set into the first round.
        self.phase = Phase::Running;
        self.n_processing = self.expected_sims;
        let total = self.expected_sims as u64;

        let mut actions = vec![Action::StartClock];
        for (ordinal, state) in self.registry.iter_mut().enumerate() {
            state.processing = true;
            actions.push(Action::Send {
                dest: state.name.clone(),
                message: Message::Ack {
                    ordinal: ordinal as u64,
                    total,
                },
            });
        }
        info!(sims = self.expected_sims, "all simulators connected");
        Ok(actions)
    }

    // ─── Round accounting ───────────────────────────────────────────────

    /// Shared bookkeeping for TIME_REQUEST and (first) BYE: the simulator
    /// has finished the current grant and names its next target.
    fn on_completion(
        &mut self,
        sim: &SimId,
        requested: SimTime,
    ) -> Result<Vec<Action>, BrokerError> {
        let time_granted = self.time_granted;
        let state = self.registry.get_mut(sim)?;
        state.time_requested = requested;
        state.time_last_processed = time_granted;
        // The counter tracks true->false transitions only, so a stray
        // completion from an idle simulator cannot drive it negative.
        if state.processing {
            state.processing = false;
            self.n_processing -= 1;
        }
        trace!(
            sim = %sim,
            requested = %requested,
            n_processing = self.n_processing,
            "completion"
        );

        if self.phase == Phase::Running && self.n_processing == 0 {
            Ok(self.close_round())
        } else {
            Ok(Vec::new())
        }
    }

    /// Every simulator has completed: pick the next global time and grant
    /// it to the simulators that are actionable then.
    fn close_round(&mut self) -> Vec<Action> {
        let actionable: Vec<SimTime> = self
            .registry
            .iter()
            .map(|s| {
                if s.messages_pending {
                    s.time_last_processed.saturating_add(s.time_delta)
                } else {
                    s.time_requested
                }
            })
            .collect();

        let granted = actionable
            .iter()
            .copied()
            .min()
            .expect("running phase implies a non-empty registry");
        self.time_granted = granted;
        debug!(time_granted = %granted, "round closed");

        let mut actions = vec![Action::Pace { until: granted }];
        for (state, actionable) in self.registry.iter_mut().zip(actionable) {
            if actionable == granted {
                state.processing = true;
                state.messages_pending = false;
                self.n_processing += 1;
                trace!(sim = %state.name, time = %granted, "granting");
                actions.push(Action::Send {
                    dest: state.name.clone(),
                    message: Message::TimeRequest { time: granted },
                });
            } else {
                state.time_last_processed = state
                    .time_last_processed
                    .fast_forward_to(granted, state.time_delta);
            }
        }
        actions
    }

    fn on_time_delta(&mut self, sim: &SimId, delta: SimTime) -> Result<Vec<Action>, BrokerError> {
        self.registry.set_delta(sim, delta)?;
        debug!(sim = %sim, delta = %delta, "time delta updated");
        Ok(Vec::new())
    }

    // ─── Publish fan-out ────────────────────────────────────────────────

    fn on_publish(
        &mut self,
        sim: &SimId,
        topic: String,
        value: Vec<u8>,
    ) -> Result<Vec<Action>, BrokerError> {
        // Only registered simulators may publish.
        self.registry.get(sim)?;

        // The trace line goes out before the fan-out, whether or not
        // anyone subscribes.
        let mut actions = vec![Action::Trace {
            time: self.time_granted,
            topic: topic.clone(),
            value: value.clone(),
        }];

        let mut matched = 0usize;
        for state in self.registry.subscribers_mut(&topic) {
            state.messages_pending = true;
            matched += 1;
            actions.push(Action::Send {
                dest: state.name.clone(),
                message: Message::Publish {
                    topic: topic.clone(),
                    value: value.clone(),
                },
            });
        }

        if matched == 0 {
            trace!(topic, "dropping publish with no subscribers");
        } else {
            trace!(topic, subscribers = matched, "forwarded publish");
        }
        Ok(actions)
    }

    // ─── Termination ────────────────────────────────────────────────────

    fn on_bye(&mut self, sim: SimId) -> Result<Vec<Action>, BrokerError> {
        self.registry.get(&sim)?;

        if self.departed.contains(&sim) {
            warn!(sim = %sim, "duplicate BYE");
            return Ok(Vec::new());
        }
        self.departed.insert(sim.clone());
        debug!(sim = %sim, departed = self.departed.len(), "simulator leaving");

        if self.departed.len() == self.expected_sims {
            let mut actions: Vec<Action> = self
                .registry
                .names()
                .map(|name| Action::Send {
                    dest: name.clone(),
                    message: Message::Bye,
                })
                .collect();
            actions.push(Action::Shutdown);
            return Ok(actions);
        }

        // A departed simulator never requests time again.
        self.on_completion(&sim, SimTime::MAX)
    }

    fn on_die(&mut self, sim: &SimId) -> Result<Vec<Action>, BrokerError> {
        self.registry.get(sim)?;
        Err(BrokerError::AbortRequested(sim.clone()))
    }
}

/// Build a `HelloConfig` without going through the text parser. Test-only.
#[cfg(test)]
pub(crate) fn hello_config(delta: Option<SimTime>, topics: &[&str]) -> HelloConfig {
    HelloConfig {
        time_delta: delta,
        subscriptions: topics.iter().map(|t| t.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryError;

    const SEC: u64 = 1_000_000_000;

    fn sim(name: &str) -> SimId {
        SimId::from(name)
    }

    fn t(secs: u64) -> SimTime {
        SimTime::from_nanos(secs * SEC)
    }

    /// Registers `sims` as (name, delta_secs, topics) and asserts the ACKs.
    fn start_session(sims: &[(&str, u64, &[&str])]) -> Coordinator {
        let mut coord = Coordinator::new(sims.len());
        for (i, &(name, delta, topics)) in sims.iter().enumerate() {
            let actions = coord
                .handle(Event::Hello {
                    sim: sim(name),
                    config: hello_config(Some(t(delta)), topics),
                })
                .unwrap();
            if i + 1 < sims.len() {
                assert!(actions.is_empty());
            } else {
                let expected: Vec<Action> = std::iter::once(Action::StartClock)
                    .chain(sims.iter().enumerate().map(|(ord, &(name, _, _))| {
                        Action::Send {
                            dest: sim(name),
                            message: Message::Ack {
                                ordinal: ord as u64,
                                total: sims.len() as u64,
                            },
                        }
                    }))
                    .collect();
                assert_eq!(actions, expected);
            }
        }
        assert!(coord.is_running());
        assert_eq!(coord.n_processing(), sims.len());
        coord
    }

    /// The invariants that must hold at every loop iteration boundary.
    fn assert_invariants(coord: &Coordinator) {
        let processing = coord.registry().iter().filter(|s| s.processing).count();
        assert_eq!(coord.n_processing(), processing, "I3");
        for s in coord.registry().iter() {
            assert!(s.time_last_processed <= coord.time_granted(), "I4");
            assert_eq!(
                s.time_last_processed.as_nanos() % s.time_delta.as_nanos(),
                0,
                "I5: {} not aligned to {}",
                s.time_last_processed,
                s.time_delta
            );
        }
    }

    fn grants(actions: &[Action]) -> Vec<(&str, SimTime)> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send {
                    dest,
                    message: Message::TimeRequest { time },
                } => Some((dest.as_str(), *time)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn two_peer_lockstep() {
        let mut coord = start_session(&[("a", 1, &[]), ("b", 2, &[])]);

        let actions = coord
            .handle(Event::TimeRequest { sim: sim("a"), time: t(100) })
            .unwrap();
        assert!(actions.is_empty());
        assert_eq!(coord.n_processing(), 1);

        let actions = coord
            .handle(Event::TimeRequest { sim: sim("b"), time: t(100) })
            .unwrap();
        assert_eq!(actions[0], Action::Pace { until: t(100) });
        assert_eq!(grants(&actions), vec![("a", t(100)), ("b", t(100))]);
        assert_eq!(coord.time_granted(), t(100));
        assert_eq!(coord.n_processing(), 2);
        assert_invariants(&coord);
    }

    #[test]
    fn asymmetric_request_grants_only_the_minimum() {
        let mut coord = start_session(&[("a", 1, &[]), ("b", 2, &[])]);
        coord.handle(Event::TimeRequest { sim: sim("a"), time: t(100) }).unwrap();
        coord.handle(Event::TimeRequest { sim: sim("b"), time: t(100) }).unwrap();

        coord.handle(Event::TimeRequest { sim: sim("a"), time: t(101) }).unwrap();
        let actions = coord
            .handle(Event::TimeRequest { sim: sim("b"), time: t(102) })
            .unwrap();

        assert_eq!(grants(&actions), vec![("a", t(101))]);
        assert_eq!(coord.time_granted(), t(101));
        // b was skipped; its clock base fast-forwards by zero whole deltas:
        // (101 - 100) / 2 = 0.
        let b = coord.registry().get(&sim("b")).unwrap();
        assert_eq!(b.time_last_processed, t(100));
        assert!(!b.processing);
        assert_invariants(&coord);
    }

    #[test]
    fn fast_forward_lands_skipped_peer_on_its_own_grid() {
        let mut coord = start_session(&[("a", 1, &[]), ("b", 3, &[])]);
        coord.handle(Event::TimeRequest { sim: sim("a"), time: t(1) }).unwrap();
        coord.handle(Event::TimeRequest { sim: sim("b"), time: t(30) }).unwrap();

        // Rounds at 2s..7s, granted to a only; b's base must track the
        // largest multiple of 3s not exceeding each grant.
        for secs in 2..=7 {
            let actions = coord
                .handle(Event::TimeRequest { sim: sim("a"), time: t(secs) })
                .unwrap();
            assert_eq!(grants(&actions), vec![("a", t(secs))]);
            let b = coord.registry().get(&sim("b")).unwrap();
            assert_eq!(b.time_last_processed, t((secs / 3) * 3));
            assert_invariants(&coord);
        }
    }

    #[test]
    fn publish_forces_subscriber_tick() {
        let mut coord = start_session(&[("a", 1, &["x"]), ("b", 2, &[])]);
        coord.handle(Event::TimeRequest { sim: sim("a"), time: t(100) }).unwrap();
        coord.handle(Event::TimeRequest { sim: sim("b"), time: t(100) }).unwrap();

        let actions = coord
            .handle(Event::Publish {
                sim: sim("b"),
                topic: "x".into(),
                value: b"42".to_vec(),
            })
            .unwrap();
        assert_eq!(
            actions,
            vec![
                Action::Trace {
                    time: t(100),
                    topic: "x".into(),
                    value: b"42".to_vec(),
                },
                Action::Send {
                    dest: sim("a"),
                    message: Message::Publish {
                        topic: "x".into(),
                        value: b"42".to_vec(),
                    },
                },
            ]
        );
        assert!(coord.registry().get(&sim("a")).unwrap().messages_pending);

        // a asks for a far-future time, but its pending input makes it
        // actionable at its next natural tick instead.
        coord.handle(Event::TimeRequest { sim: sim("a"), time: t(1000) }).unwrap();
        let actions = coord
            .handle(Event::TimeRequest {
                sim: sim("b"),
                time: SimTime::from_nanos(u64::MAX - 1),
            })
            .unwrap();
        assert_eq!(grants(&actions), vec![("a", t(101))]);
        assert!(!coord.registry().get(&sim("a")).unwrap().messages_pending);
        assert_invariants(&coord);
    }

    #[test]
    fn unmatched_publish_traces_and_drops() {
        let mut coord = start_session(&[("a", 1, &[]), ("b", 2, &[])]);
        let actions = coord
            .handle(Event::Publish {
                sim: sim("a"),
                topic: "y".into(),
                value: b"v".to_vec(),
            })
            .unwrap();
        assert_eq!(
            actions,
            vec![Action::Trace {
                time: SimTime::ZERO,
                topic: "y".into(),
                value: b"v".to_vec(),
            }]
        );
        assert!(coord.registry().iter().all(|s| !s.messages_pending));
    }

    #[test]
    fn publish_from_unregistered_is_fatal() {
        let mut coord = start_session(&[("a", 1, &[])]);
        let err = coord
            .handle(Event::Publish {
                sim: sim("ghost"),
                topic: "x".into(),
                value: vec![],
            })
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Registry(RegistryError::UnknownSimulator(_))
        ));
    }

    #[test]
    fn duplicate_hello_is_fatal() {
        let mut coord = Coordinator::new(2);
        coord
            .handle(Event::Hello {
                sim: sim("a"),
                config: hello_config(Some(t(1)), &[]),
            })
            .unwrap();
        let err = coord
            .handle(Event::Hello {
                sim: sim("a"),
                config: hello_config(Some(t(1)), &[]),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Registry(RegistryError::DuplicateSimulator(_))
        ));
        // The abort fan-out covers the already-registered peer.
        assert_eq!(
            coord.abort_broadcast(),
            vec![Action::Send {
                dest: sim("a"),
                message: Message::Die,
            }]
        );
    }

    #[test]
    fn hello_after_registration_closes_is_fatal() {
        let mut coord = start_session(&[("a", 1, &[])]);
        let err = coord
            .handle(Event::Hello {
                sim: sim("late"),
                config: hello_config(Some(t(1)), &[]),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            BrokerError::Registry(RegistryError::RegistrationClosed(1))
        ));
    }

    #[test]
    fn missing_time_delta_defaults_to_one_second() {
        let mut coord = Coordinator::new(1);
        coord
            .handle(Event::Hello {
                sim: sim("a"),
                config: hello_config(None, &[]),
            })
            .unwrap();
        assert_eq!(
            coord.registry().get(&sim("a")).unwrap().time_delta,
            SimTime::ONE_SECOND
        );
    }

    #[test]
    fn clean_shutdown_after_all_byes() {
        let mut coord = start_session(&[("a", 1, &[]), ("b", 2, &[])]);

        let actions = coord.handle(Event::Bye { sim: sim("a") }).unwrap();
        assert!(actions.is_empty());
        let a = coord.registry().get(&sim("a")).unwrap();
        assert_eq!(a.time_requested, SimTime::MAX);
        assert!(!a.processing);

        let actions = coord.handle(Event::Bye { sim: sim("b") }).unwrap();
        assert_eq!(
            actions,
            vec![
                Action::Send { dest: sim("a"), message: Message::Bye },
                Action::Send { dest: sim("b"), message: Message::Bye },
                Action::Shutdown,
            ]
        );
    }

    #[test]
    fn rounds_continue_after_partial_departure() {
        let mut coord = start_session(&[("a", 1, &[]), ("b", 2, &[])]);
        coord.handle(Event::Bye { sim: sim("a") }).unwrap();

        let actions = coord
            .handle(Event::TimeRequest { sim: sim("b"), time: t(10) })
            .unwrap();
        assert_eq!(grants(&actions), vec![("b", t(10))]);
        assert_invariants(&coord);
    }

    #[test]
    fn duplicate_bye_warns_without_state_change() {
        let mut coord = start_session(&[("a", 1, &[]), ("b", 2, &[])]);
        coord.handle(Event::Bye { sim: sim("a") }).unwrap();
        let n_before = coord.n_processing();

        let actions = coord.handle(Event::Bye { sim: sim("a") }).unwrap();
        assert!(actions.is_empty());
        assert_eq!(coord.n_processing(), n_before);
        assert_invariants(&coord);

        // The second BYE from a does not count toward termination.
        let actions = coord.handle(Event::Bye { sim: sim("b") }).unwrap();
        assert!(actions.iter().any(|a| *a == Action::Shutdown));
    }

    #[test]
    fn repeated_time_delta_is_a_noop() {
        let mut coord = start_session(&[("a", 1, &[])]);
        coord
            .handle(Event::TimeDelta { sim: sim("a"), delta: t(5) })
            .unwrap();
        coord
            .handle(Event::TimeDelta { sim: sim("a"), delta: t(5) })
            .unwrap();
        assert_eq!(coord.registry().get(&sim("a")).unwrap().time_delta, t(5));
    }

    #[test]
    fn time_granted_is_non_decreasing() {
        let mut coord = start_session(&[("a", 1, &[]), ("b", 2, &[])]);
        let mut last = SimTime::ZERO;
        for (ta, tb) in [(2, 4), (4, 4), (5, 6), (8, 8)] {
            coord.handle(Event::TimeRequest { sim: sim("a"), time: t(ta) }).unwrap();
            coord.handle(Event::TimeRequest { sim: sim("b"), time: t(tb) }).unwrap();
            assert!(coord.time_granted() >= last);
            last = coord.time_granted();
            assert_invariants(&coord);
        }
    }

    #[test]
    fn premature_time_request_does_not_close_a_round() {
        let mut coord = Coordinator::new(2);
        coord
            .handle(Event::Hello {
                sim: sim("a"),
                config: hello_config(Some(t(1)), &[]),
            })
            .unwrap();
        let actions = coord
            .handle(Event::TimeRequest { sim: sim("a"), time: t(5) })
            .unwrap();
        assert!(actions.is_empty());
        assert!(!coord.is_running());
        assert_eq!(coord.n_processing(), 0);
    }

    #[test]
    fn die_from_registered_peer_aborts() {
        let mut coord = start_session(&[("a", 1, &[]), ("b", 2, &[])]);
        let err = coord.handle(Event::Die { sim: sim("b") }).unwrap_err();
        assert!(matches!(err, BrokerError::AbortRequested(s) if s.as_str() == "b"));
        let dies = coord.abort_broadcast();
        assert_eq!(
            dies,
            vec![
                Action::Send { dest: sim("a"), message: Message::Die },
                Action::Send { dest: sim("b"), message: Message::Die },
            ]
        );
    }

    #[test]
    fn unknown_sender_is_fatal_for_every_running_message() {
        let mut coord = start_session(&[("a", 1, &[])]);
        let events = [
            Event::TimeRequest { sim: sim("ghost"), time: t(1) },
            Event::TimeDelta { sim: sim("ghost"), delta: t(1) },
            Event::Bye { sim: sim("ghost") },
            Event::Die { sim: sim("ghost") },
        ];
        for event in events {
            let err = coord.handle(event).unwrap_err();
            assert!(
                matches!(
                    err,
                    BrokerError::Registry(RegistryError::UnknownSimulator(_))
                ),
                "expected UnknownSimulator, got {err:?}"
            );
        }
    }

    #[test]
    fn publish_to_departed_subscriber_still_marks_pending() {
        let mut coord = start_session(&[("a", 1, &["x"]), ("b", 2, &[])]);
        coord.handle(Event::Bye { sim: sim("a") }).unwrap();
        coord
            .handle(Event::Publish {
                sim: sim("b"),
                topic: "x".into(),
                value: b"1".to_vec(),
            })
            .unwrap();
        assert!(coord.registry().get(&sim("a")).unwrap().messages_pending);
    }
}
