//! # OCPP CSMS Engine
//!
//! Server-side OCPP 1.6-J engine for managing EV charge points over
//! persistent WebSocket connections.
//!
//! ## Architecture
//!
//! - **support**: OCPP-J frame codec and shutdown plumbing
//! - **domain**: protocol vocabulary (versions, actions) and cached state models
//! - **application**: the engine proper — sessions, correlation, state
//!   cache, inbound routing and outbound commands
//! - **notifications**: domain events broadcast to embedding code
//! - **interfaces**: the WebSocket surface charge points connect to

pub mod application;
pub mod config;
pub mod domain;
pub mod interfaces;
pub mod notifications;
pub mod support;

pub use config::{default_config_path, AppConfig, OcppConfig};

// Re-export the engine surface for embedding code
pub use application::call_matcher::{create_call_matcher, CallMatcher, SharedCallMatcher};
pub use application::commands::{
    create_command_sender, CommandError, CommandSender, SharedCommandSender,
};
pub use application::handlers::{create_request_dispatcher, SharedRequestDispatcher};
pub use application::session::{create_session_registry, SessionRegistry, SharedSessionRegistry};
pub use application::state_cache::{create_state_cache, SharedStateCache, StateCache};
pub use interfaces::ws::OcppServer;
pub use notifications::{create_event_bus, Event, EventBus, SharedEventBus};
