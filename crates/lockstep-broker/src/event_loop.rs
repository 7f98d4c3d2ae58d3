//! The socket-driving event loop.
//!
//! Single-threaded: block on the router socket, decode one message, feed
//! the coordinator, execute the returned actions, repeat. No message is
//! ever handled concurrently with another. On any fatal error the loop
//! broadcasts DIE to every registered simulator before returning.

use std::time::Duration;

use lockstep_messages::{HelloConfig, Message, MessageError};
use lockstep_transport::RouterSocket;
use lockstep_types::SimId;
use tracing::{error, info, trace, warn};

use crate::coordinator::{Action, Coordinator, Event};
use crate::error::BrokerError;
use crate::pacing::Pacer;
use crate::trace::TraceSink;

/// Startup parameters for a broker session.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// How many simulators will connect. Fixed for the session.
    pub expected_sims: usize,
    /// Router bind endpoint, e.g. `tcp://*:5570`.
    pub endpoint: String,
    /// When set, simulated time is throttled to wall clock, with the
    /// shared clock updated every interval.
    pub realtime_interval: Option<Duration>,
}

/// One broker session: socket, coordinator, and the session-scoped
/// resources (pacer, trace sink). Everything is released on both exit
/// paths when the session value drops.
pub struct Broker {
    socket: RouterSocket,
    coordinator: Coordinator,
    trace: TraceSink,
    realtime_interval: Option<Duration>,
    pacer: Option<Pacer>,
}

impl Broker {
    /// Bind the router socket and prepare the session.
    pub fn bind(config: &BrokerConfig, trace: TraceSink) -> Result<Broker, BrokerError> {
        let socket = RouterSocket::bind(&config.endpoint)?;
        info!(
            endpoint = socket.endpoint(),
            expected_sims = config.expected_sims,
            tracing = trace.is_enabled(),
            "broker listening"
        );
        Ok(Broker {
            socket,
            coordinator: Coordinator::new(config.expected_sims),
            trace,
            realtime_interval: config.realtime_interval,
            pacer: None,
        })
    }

    /// The resolved bind address (wildcard ports resolved).
    pub fn endpoint(&self) -> &str {
        self.socket.endpoint()
    }

    /// Run the session to completion. `Ok(())` only on the graceful
    /// termination handshake; every other exit broadcasts DIE first.
    pub fn run(mut self) -> Result<(), BrokerError> {
        let result = self.serve();
        match &result {
            Ok(()) => info!("all simulators departed, session complete"),
            Err(e) => {
                error!(error = %e, "fatal broker error, aborting session");
                self.broadcast_die();
            }
        }
        result
    }

    fn serve(&mut self) -> Result<(), BrokerError> {
        loop {
            self.socket.poll_in(-1)?;
            let (sender, frames) = self.socket.recv()?;
            let sender = SimId::try_from(sender).map_err(|_| BrokerError::BadIdentity)?;
            let message = Message::decode(&frames)?;
            trace!(sender = %sender, tag = message.tag_name(), "dispatching");

            let event = to_event(sender, message)?;
            let actions = self.coordinator.handle(event)?;
            if self.execute(actions)? {
                return Ok(());
            }
        }
    }

    /// Perform the coordinator's actions in order. Returns true on
    /// graceful shutdown.
    fn execute(&mut self, actions: Vec<Action>) -> Result<bool, BrokerError> {
        for action in actions {
            match action {
                Action::Send { dest, message } => {
                    self.socket.send(dest.as_bytes(), message.encode())?;
                }
                Action::StartClock => {
                    if let Some(interval) = self.realtime_interval {
                        self.pacer = Some(Pacer::start(interval));
                    }
                }
                Action::Pace { until } => {
                    if let Some(pacer) = &self.pacer {
                        pacer.pace_until(until);
                    }
                }
                Action::Trace { time, topic, value } => {
                    self.trace.record(time, &topic, &value);
                }
                Action::Shutdown => return Ok(true),
            }
        }
        Ok(false)
    }

    /// Best-effort DIE to everyone already registered; send failures while
    /// aborting are only logged.
    fn broadcast_die(&mut self) {
        for action in self.coordinator.abort_broadcast() {
            if let Action::Send { dest, message } = action {
                if let Err(e) = self.socket.send(dest.as_bytes(), message.encode()) {
                    warn!(dest = %dest, error = %e, "failed to send DIE during abort");
                }
            }
        }
    }
}

/// Turn a decoded message into a coordinator event, parsing the payload
/// pieces the coordinator should not have to know about (the HELLO config
/// text, frame-level validity).
fn to_event(sender: SimId, message: Message) -> Result<Event, BrokerError> {
    Ok(match message {
        Message::Hello { config } => Event::Hello {
            sim: sender,
            config: HelloConfig::parse(&config)?,
        },
        Message::TimeRequest { time } => Event::TimeRequest { sim: sender, time },
        Message::TimeDelta { delta } => {
            if delta.is_zero() {
                return Err(MessageError::InvalidFrame {
                    frame: "delta",
                    reason: "time_delta must be nonzero".to_string(),
                }
                .into());
            }
            Event::TimeDelta { sim: sender, delta }
        }
        Message::Publish { topic, value } => Event::Publish {
            sim: sender,
            topic,
            value,
        },
        Message::Bye => Event::Bye { sim: sender },
        Message::Die => Event::Die { sim: sender },
        // Only the broker emits ACKs; receiving one is a protocol error.
        Message::Ack { .. } => {
            return Err(MessageError::UnknownTag("ack".to_string()).into());
        }
    })
}
