//! OCPP protocol shared types
//!
//! Value objects related to the OCPP protocol that don't belong
//! to a single aggregate: protocol versions and the action registry.

pub mod actions;
pub mod version;

pub use actions::Action;
pub use version::OcppVersion;
