//! Wire protocol for the lockstep broker.
//!
//! Every message on the router socket is a sequence of opaque byte frames.
//! Inbound, the transport strips the peer identity frame; what remains is an
//! ASCII type tag followed by type-specific frames, modeled here as the
//! [`Message`] enum with a frame codec.
//!
//! The HELLO payload — a small text configuration carrying `time_delta` and
//! the subscription topics — is parsed by [`hello_config`].

pub mod hello_config;
mod message;

pub use hello_config::{ConfigError, HelloConfig};
pub use message::{tag, Message, MessageError};
