//! Domain layer: protocol vocabulary and cached state models.

pub mod ocpp;
pub mod state;

// Re-export commonly used types
pub use ocpp::{Action, OcppVersion};
pub use state::{
    BatteryStatus, ChargePointInfo, ChargePointState, ConfigurationItem, ConnectorState,
    Reservation, Transaction,
};
