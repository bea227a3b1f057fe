//! WebSocket interface
//!
//! - `ocpp_server`: listener, handshake, and per-connection pumps
//! - `negotiator`: OCPP subprotocol negotiation

pub mod negotiator;
pub mod ocpp_server;

pub use negotiator::{Negotiation, ProtocolNegotiator};
pub use ocpp_server::OcppServer;