//! OCPP protocol version negotiation
//!
//! During the WebSocket handshake the charge point advertises which OCPP
//! sub-protocols it supports via the `Sec-WebSocket-Protocol` header.
//! The negotiator picks the best mutually-supported version; a station
//! that offers protocols but none we speak is rejected, while a station
//! that offers nothing at all is assumed to speak the configured default.

use tracing::warn;

use crate::config::OcppConfig;
use crate::domain::ocpp::OcppVersion;

/// Outcome of subprotocol negotiation for one handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    /// A mutually-supported subprotocol; echo it back in the response.
    Agreed(OcppVersion),
    /// The station sent no `Sec-WebSocket-Protocol` header. Proceed with
    /// the default version, without echoing a subprotocol.
    Assumed(OcppVersion),
    /// The station offered only protocols we do not speak.
    NoMatch,
}

/// Negotiates the OCPP version during the WebSocket handshake.
pub struct ProtocolNegotiator {
    /// Versions the central system supports, most preferred first.
    supported: Vec<OcppVersion>,
    /// Version assumed when the station offers no subprotocol.
    default: OcppVersion,
}

impl ProtocolNegotiator {
    pub fn new(supported: Vec<OcppVersion>, default: OcppVersion) -> Self {
        Self { supported, default }
    }

    /// Build a negotiator from the configured subprotocol strings.
    /// Unrecognized entries are dropped with a warning; an empty list
    /// falls back to every supported version in preference order.
    pub fn from_config(config: &OcppConfig) -> Self {
        let mut supported: Vec<OcppVersion> = config
            .supported_protocols
            .iter()
            .filter_map(|name| {
                let version = OcppVersion::from_subprotocol(name);
                if version.is_none() {
                    warn!(protocol = name.as_str(), "Ignoring unknown subprotocol in config");
                }
                version
            })
            .collect();
        if supported.is_empty() {
            supported = OcppVersion::ALL.to_vec();
        }
        let default = OcppVersion::from_subprotocol(&config.default_protocol)
            .unwrap_or(OcppVersion::V16);
        Self::new(supported, default)
    }

    /// Negotiate against the raw `Sec-WebSocket-Protocol` header value,
    /// or its absence.
    pub fn negotiate(&self, header: Option<&str>) -> Negotiation {
        let Some(header) = header else {
            return Negotiation::Assumed(self.default);
        };
        let offered: Vec<&str> = header
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if offered.is_empty() {
            return Negotiation::Assumed(self.default);
        }
        for version in &self.supported {
            if offered.iter().any(|p| *p == version.subprotocol()) {
                return Negotiation::Agreed(*version);
            }
        }
        Negotiation::NoMatch
    }

    /// Subprotocols to advertise, for server info and logging.
    pub fn supported_subprotocols(&self) -> Vec<&'static str> {
        self.supported.iter().map(|v| v.subprotocol()).collect()
    }
}
