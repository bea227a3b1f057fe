pub mod connection;
pub mod registry;

pub use connection::{Session, SessionInfo, SessionState};
pub use registry::{
    create_session_registry, AddOutcome, ConnectionMetrics, RegistryError, SessionRegistry,
    SharedSessionRegistry,
};
