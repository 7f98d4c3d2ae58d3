//! Simulator identity.

use std::fmt;

/// A simulator's name, as carried in the transport sender frame.
///
/// The router socket addresses peers by this identity, so the broker uses
/// the same value both as registry key and as destination for outbound
/// messages. Identities must be UTF-8; the event loop rejects anything else
/// as a malformed message before it reaches the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimId(String);

impl SimId {
    pub fn new(name: impl Into<String>) -> SimId {
        SimId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for SimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SimId {
    fn from(s: &str) -> SimId {
        SimId(s.to_string())
    }
}

impl From<String> for SimId {
    fn from(s: String) -> SimId {
        SimId(s)
    }
}

impl TryFrom<Vec<u8>> for SimId {
    type Error = std::string::FromUtf8Error;

    fn try_from(bytes: Vec<u8>) -> Result<SimId, Self::Error> {
        String::from_utf8(bytes).map(SimId)
    }
}
