//! Interface layer: the WebSocket surface charge points connect to.

pub mod ws;
