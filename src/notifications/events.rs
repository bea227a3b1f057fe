//! Notification events
//!
//! Everything the engine announces to embedding code: session lifecycle,
//! station notifications, and protocol errors. Consumers subscribe through
//! the [`EventBus`](super::event_bus::EventBus).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event types for notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// A brand-new session was admitted to the registry
    SessionCreated(SessionCreatedEvent),
    /// A session was purged from the registry
    SessionClosed(SessionClosedEvent),
    /// Charge point connected via WebSocket (fresh or resumed)
    ChargePointConnected(ChargePointConnectedEvent),
    /// Charge point disconnected
    ChargePointDisconnected(ChargePointDisconnectedEvent),
    /// Boot notification processed
    BootNotification(BootNotificationEvent),
    /// Heartbeat received
    HeartbeatReceived(HeartbeatEvent),
    /// Authorization resolved
    AuthorizationResult(AuthorizationEvent),
    /// Transaction started
    TransactionStarted(TransactionStartedEvent),
    /// Transaction stopped
    TransactionStopped(TransactionStoppedEvent),
    /// Meter values received
    MeterValuesReceived(MeterValuesEvent),
    /// Connector status changed
    ConnectorStatusChanged(ConnectorStatusChangedEvent),
    /// Diagnostics upload status reported
    DiagnosticsStatusUpdated(DiagnosticsStatusEvent),
    /// Firmware update status reported
    FirmwareStatusUpdated(FirmwareStatusEvent),
    /// Protocol or internal error surfaced
    Error(ErrorEvent),
}

impl Event {
    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::SessionCreated(_) => "session_created",
            Event::SessionClosed(_) => "session_closed",
            Event::ChargePointConnected(_) => "charge_point_connected",
            Event::ChargePointDisconnected(_) => "charge_point_disconnected",
            Event::BootNotification(_) => "boot_notification",
            Event::HeartbeatReceived(_) => "heartbeat_received",
            Event::AuthorizationResult(_) => "authorization_result",
            Event::TransactionStarted(_) => "transaction_started",
            Event::TransactionStopped(_) => "transaction_stopped",
            Event::MeterValuesReceived(_) => "meter_values_received",
            Event::ConnectorStatusChanged(_) => "connector_status_changed",
            Event::DiagnosticsStatusUpdated(_) => "diagnostics_status_updated",
            Event::FirmwareStatusUpdated(_) => "firmware_status_updated",
            Event::Error(_) => "error",
        }
    }

    /// Get the charge point ID if applicable
    pub fn charge_point_id(&self) -> Option<&str> {
        match self {
            Event::SessionCreated(e) => Some(&e.charge_point_id),
            Event::SessionClosed(e) => Some(&e.charge_point_id),
            Event::ChargePointConnected(e) => Some(&e.charge_point_id),
            Event::ChargePointDisconnected(e) => Some(&e.charge_point_id),
            Event::BootNotification(e) => Some(&e.charge_point_id),
            Event::HeartbeatReceived(e) => Some(&e.charge_point_id),
            Event::AuthorizationResult(e) => Some(&e.charge_point_id),
            Event::TransactionStarted(e) => Some(&e.charge_point_id),
            Event::TransactionStopped(e) => Some(&e.charge_point_id),
            Event::MeterValuesReceived(e) => Some(&e.charge_point_id),
            Event::ConnectorStatusChanged(e) => Some(&e.charge_point_id),
            Event::DiagnosticsStatusUpdated(e) => Some(&e.charge_point_id),
            Event::FirmwareStatusUpdated(e) => Some(&e.charge_point_id),
            Event::Error(e) => e.charge_point_id.as_deref(),
        }
    }
}

/// Session created event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreatedEvent {
    pub charge_point_id: String,
    pub session_id: String,
    pub protocol: String,
    pub timestamp: DateTime<Utc>,
}

/// Session closed event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClosedEvent {
    pub charge_point_id: String,
    pub session_id: String,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Charge point connected event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargePointConnectedEvent {
    pub charge_point_id: String,
    pub timestamp: DateTime<Utc>,
    pub remote_addr: Option<String>,
}

/// Charge point disconnected event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargePointDisconnectedEvent {
    pub charge_point_id: String,
    pub timestamp: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Boot notification event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootNotificationEvent {
    pub charge_point_id: String,
    pub vendor: String,
    pub model: String,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    /// Registration outcome: Accepted, Pending or Rejected.
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Heartbeat event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    pub charge_point_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Authorization event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationEvent {
    pub charge_point_id: String,
    pub id_tag: String,
    pub status: String, // Accepted, Blocked, Expired, Invalid, ConcurrentTx
    pub timestamp: DateTime<Utc>,
}

/// Transaction started event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStartedEvent {
    pub charge_point_id: String,
    pub connector_id: u32,
    pub transaction_id: i32,
    pub id_tag: String,
    pub meter_start: i32,
    pub timestamp: DateTime<Utc>,
}

/// Transaction stopped event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStoppedEvent {
    pub charge_point_id: String,
    pub transaction_id: i32,
    pub id_tag: Option<String>,
    pub meter_stop: i32,
    /// Energy consumed over the transaction in Wh, as accounted by the
    /// state cache. Absent when no readings were seen.
    pub energy_consumed_wh: Option<i64>,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Meter values event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterValuesEvent {
    pub charge_point_id: String,
    pub connector_id: u32,
    pub transaction_id: Option<i32>,
    /// Current energy meter reading in Wh
    pub energy_wh: Option<f64>,
    /// Energy consumed since start of transaction in Wh
    pub energy_consumed_wh: Option<f64>,
    /// Current charging power in W
    pub power_w: Option<f64>,
    /// Current State of Charge in %
    pub soc: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Connector status changed event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorStatusChangedEvent {
    pub charge_point_id: String,
    pub connector_id: u32,
    pub status: String,
    pub error_code: Option<String>,
    pub info: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Diagnostics status event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsStatusEvent {
    pub charge_point_id: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Firmware status event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareStatusEvent {
    pub charge_point_id: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// Error event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub charge_point_id: Option<String>,
    pub error_type: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Wrapper for sending events with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventMessage {
    pub fn new(event: Event) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        }
    }
}
