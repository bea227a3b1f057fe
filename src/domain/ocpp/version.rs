//! OCPP protocol version
//!
//! Defines the protocol versions this server negotiates over the
//! `Sec-WebSocket-Protocol` header. Both map onto the OCPP-J 1.x framing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Supported OCPP protocol versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OcppVersion {
    /// OCPP 1.5 (JSON)
    V15,
    /// OCPP 1.6 (JSON / OCPP-J)
    V16,
}

impl OcppVersion {
    /// WebSocket subprotocol identifier for this OCPP version.
    ///
    /// Used in the `Sec-WebSocket-Protocol` header during handshake.
    pub fn subprotocol(&self) -> &'static str {
        match self {
            Self::V15 => "ocpp1.5",
            Self::V16 => "ocpp1.6",
        }
    }

    /// Parse an OCPP version from a WebSocket subprotocol string.
    pub fn from_subprotocol(s: &str) -> Option<Self> {
        match s.trim() {
            "ocpp1.5" => Some(Self::V15),
            "ocpp1.6" => Some(Self::V16),
            _ => None,
        }
    }

    /// All supported OCPP versions, ordered from most to least preferred.
    pub const ALL: &'static [OcppVersion] = &[Self::V16, Self::V15];

    /// Human-readable version string.
    pub fn version_string(&self) -> &'static str {
        match self {
            Self::V15 => "1.5",
            Self::V16 => "1.6",
        }
    }
}

impl fmt::Display for OcppVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OCPP {}", self.version_string())
    }
}
