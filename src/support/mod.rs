//! Cross-cutting support: protocol framing and shutdown plumbing.

pub mod ocpp_frame;
pub mod shutdown;

pub use ocpp_frame::{OcppFrame, OcppFrameError};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
