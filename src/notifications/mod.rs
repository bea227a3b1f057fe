//! Notifications module
//!
//! Real-time domain events published by the engine: session lifecycle,
//! station notifications, transactions and errors.
//!
//! # Usage
//! ```ignore
//! use ocpp_csms::notifications::{create_event_bus, Event, ChargePointConnectedEvent};
//! use chrono::Utc;
//!
//! let event_bus = create_event_bus();
//!
//! event_bus.publish(Event::ChargePointConnected(ChargePointConnectedEvent {
//!     charge_point_id: "CP001".to_string(),
//!     timestamp: Utc::now(),
//!     remote_addr: Some("192.168.1.100".to_string()),
//! }));
//! ```

pub mod event_bus;
pub mod events;

pub use event_bus::{create_event_bus, EventBus, EventSubscriber, SharedEventBus};
pub use events::*;
