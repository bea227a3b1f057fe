//! Inbound message handling: the per-connection router, the per-action
//! handlers, and the business hooks they consult.

pub mod dispatcher;
pub mod ocpp;
mod ocpp_handler;

pub use dispatcher::{
    create_request_dispatcher, Hook, HookCall, HookError, Hooks, RequestDispatcher,
    SharedRequestDispatcher,
};
pub use ocpp_handler::OcppHandler;
