//! Router socket adapter.
//!
//! Wraps a ZeroMQ ROUTER socket: every inbound message carries the peer's
//! identity as its first frame, and prepending that identity to an outbound
//! message routes it back to the peer. This gives the broker per-peer
//! addressing for free — no connection bookkeeping of its own.

use thiserror::Error;
use tracing::{debug, trace};

/// Errors from socket creation, polling, or frame transfer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The blocking wait was interrupted (e.g. by a termination signal).
    #[error("interrupted while waiting on the socket")]
    Interrupted,

    /// A message arrived with no frames at all.
    #[error("received message with no identity frame")]
    EmptyMessage,

    #[error("socket error: {0}")]
    Socket(#[from] zmq::Error),
}

fn map_err(e: zmq::Error) -> TransportError {
    match e {
        zmq::Error::EINTR => TransportError::Interrupted,
        e => TransportError::Socket(e),
    }
}

/// A bound ROUTER socket speaking identity-addressed multipart messages.
pub struct RouterSocket {
    socket: zmq::Socket,
    endpoint: String,
    // Sockets must not outlive their context; keep it alongside.
    _context: zmq::Context,
}

impl RouterSocket {
    /// Create and bind. Wildcard ports (`tcp://127.0.0.1:*`) are resolved,
    /// so [`endpoint`](Self::endpoint) always names the actual address.
    pub fn bind(endpoint: &str) -> Result<RouterSocket, TransportError> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::ROUTER)?;
        socket.bind(endpoint)?;
        let resolved = socket
            .get_last_endpoint()?
            .unwrap_or_else(|_| endpoint.to_string());
        debug!(endpoint = %resolved, "router socket bound");
        Ok(RouterSocket {
            socket,
            endpoint: resolved,
            _context: context,
        })
    }

    /// The resolved bind address.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Block until an inbound message is ready, or `timeout_ms` elapses
    /// (`-1` waits forever). Returns whether a message is readable.
    pub fn poll_in(&self, timeout_ms: i64) -> Result<bool, TransportError> {
        let mut items = [self.socket.as_poll_item(zmq::POLLIN)];
        zmq::poll(&mut items, timeout_ms).map_err(map_err)?;
        Ok(items[0].is_readable())
    }

    /// Receive one message, blocking. Returns the sender identity frame and
    /// the application frames that follow it.
    pub fn recv(&self) -> Result<(Vec<u8>, Vec<Vec<u8>>), TransportError> {
        let mut parts = self.socket.recv_multipart(0).map_err(map_err)?;
        if parts.is_empty() {
            return Err(TransportError::EmptyMessage);
        }
        let frames = parts.split_off(1);
        let sender = parts.pop().expect("checked non-empty");
        trace!(
            sender = %String::from_utf8_lossy(&sender),
            frames = frames.len(),
            "received message"
        );
        Ok((sender, frames))
    }

    /// Send `frames` to the peer whose identity is `dest`. The identity
    /// frame is prepended here; callers pass application frames only.
    pub fn send(&self, dest: &[u8], frames: Vec<Vec<u8>>) -> Result<(), TransportError> {
        let mut parts = Vec::with_capacity(frames.len() + 1);
        parts.push(dest.to_vec());
        parts.extend(frames);
        self.socket.send_multipart(parts, 0).map_err(map_err)
    }
}
