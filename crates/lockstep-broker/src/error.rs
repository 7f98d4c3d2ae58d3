//! Top-level broker error.

use lockstep_messages::{ConfigError, MessageError};
use lockstep_transport::TransportError;
use lockstep_types::SimId;
use thiserror::Error;

use crate::registry::RegistryError;

/// Any fatal condition in the broker.
///
/// Every variant takes the same disposition at the event loop: broadcast
/// DIE to all registered simulators and exit nonzero. The broker is
/// intentionally fail-fast — peers rely on the coordinator to make
/// progress, so partial degradation is worse than a clean abort.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("message sender identity is not UTF-8")]
    BadIdentity,

    #[error("abort requested by simulator '{0}'")]
    AbortRequested(SimId),
}
