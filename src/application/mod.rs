//! Application layer: the engine that sits between the WebSocket
//! transport and embedding business code.

pub mod call_matcher;
pub mod commands;
pub mod handlers;
pub mod services;
pub mod session;
pub mod state_cache;

// Re-export key types for convenience
pub use call_matcher::{CallMatcher, CallOutcome, MatchError, PendingCall, SharedCallMatcher};
pub use commands::{CommandError, CommandSender, SharedCommandSender};
pub use handlers::{Hook, HookCall, Hooks, OcppHandler, RequestDispatcher, SharedRequestDispatcher};
pub use services::{Interrogator, SharedInterrogator};
pub use session::{Session, SessionRegistry, SessionState, SharedSessionRegistry};
pub use state_cache::{SharedStateCache, StateCache};
