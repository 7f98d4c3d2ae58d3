//! The lockstep co-simulation broker.
//!
//! A fixed set of simulator processes connects to one router socket, each
//! declaring a local time step and a set of subscription topics. The broker
//! admits them all, then repeatedly computes the next global simulated time
//! at which at least one simulator has real work, grants exactly that time,
//! and forwards published values to their subscribers between rounds.
//!
//! # Structure
//!
//! - [`registry`] — per-simulator state, ordinal-ordered, with the
//!   subscription matcher.
//! - [`coordinator`] — the pure time-coordination state machine: events in,
//!   actions out, no I/O.
//! - [`pacing`] — optional wall-clock throttle for simulated time.
//! - [`trace`] — the append-only publish trace sink.
//! - [`event_loop`] — the socket-driving loop that owns everything above.
//!
//! The coordinator is deliberately free of sockets and clocks so the whole
//! protocol — registration, rounds, fan-out, termination — is unit-testable
//! as plain state transitions; the event loop is a thin driver around it.

pub mod coordinator;
pub mod error;
pub mod event_loop;
pub mod pacing;
pub mod registry;
pub mod trace;

pub use coordinator::{Action, Coordinator, Event};
pub use error::BrokerError;
pub use event_loop::{Broker, BrokerConfig};
pub use registry::{Registry, RegistryError, SimulatorState};
pub use trace::TraceSink;
