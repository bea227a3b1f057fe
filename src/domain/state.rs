//! Cached charge point state
//!
//! Plain data held by the state cache: identity reported at boot,
//! per-connector telemetry, active transactions, reservations, and the
//! mirrored configuration of each charge point.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::types::RegistrationStatus;
use serde::Serialize;

/// Identity and firmware details from the last BootNotification.
#[derive(Debug, Clone, Serialize)]
pub struct ChargePointInfo {
    pub charge_point_id: String,
    /// Registration outcome of the most recent BootNotification.
    pub status: RegistrationStatus,
    pub vendor: String,
    pub model: String,
    pub serial_number: Option<String>,
    pub charge_box_serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub iccid: Option<String>,
    pub imsi: Option<String>,
    pub meter_type: Option<String>,
    pub meter_serial_number: Option<String>,
    /// Negotiated protocol version string, e.g. "1.6".
    pub protocol_version: String,
}

/// Liveness and station-level notification state of one charge point.
#[derive(Debug, Clone, Serialize)]
pub struct ChargePointState {
    pub charge_point_id: String,
    pub online: bool,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_communication_at: Option<DateTime<Utc>>,
    /// Last FirmwareStatusNotification status, wire form.
    pub firmware_status: Option<String>,
    /// Last DiagnosticsStatusNotification status, wire form.
    pub diagnostics_status: Option<String>,
    /// Local authorization list version, as reported by the station.
    pub local_auth_list_version: Option<i32>,
}

impl ChargePointState {
    pub fn new(charge_point_id: impl Into<String>) -> Self {
        Self {
            charge_point_id: charge_point_id.into(),
            online: false,
            connected_at: None,
            last_communication_at: None,
            firmware_status: None,
            diagnostics_status: None,
            local_auth_list_version: None,
        }
    }
}

/// Instantaneous battery readings for one connector.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BatteryStatus {
    /// State of charge, percent.
    pub soc: Option<f64>,
    /// Volts.
    pub voltage: Option<f64>,
    /// Amperes.
    pub current: Option<f64>,
    /// Watts.
    pub power: Option<f64>,
    /// Degrees Celsius.
    pub temperature: Option<f64>,
}

/// Status and telemetry of a single connector.
///
/// Connector 0 represents the charge point as a whole (OCPP 1.6 convention).
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorState {
    pub connector_id: u32,
    /// Last StatusNotification status, wire form ("Available", "Charging", ...).
    pub status: String,
    pub error_code: String,
    pub info: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub vendor_id: Option<String>,
    pub vendor_error_code: Option<String>,
    /// Transaction currently running on this connector, if any.
    pub current_transaction_id: Option<i32>,
    /// Instantaneous voltage, volts.
    pub instant_voltage: Option<f64>,
    /// Instantaneous current, amperes.
    pub instant_current: Option<f64>,
    /// Instantaneous power, watts.
    pub instant_power: Option<f64>,
    /// Most recent cumulative meter reading, Wh.
    pub last_meter_value: Option<i32>,
    pub battery: Option<BatteryStatus>,
}

impl ConnectorState {
    pub fn new(connector_id: u32) -> Self {
        Self {
            connector_id,
            status: String::new(),
            error_code: "NoError".to_string(),
            info: None,
            timestamp: Utc::now(),
            vendor_id: None,
            vendor_error_code: None,
            current_transaction_id: None,
            instant_voltage: None,
            instant_current: None,
            instant_power: None,
            last_meter_value: None,
            battery: None,
        }
    }
}

/// An active charging transaction.
///
/// A transaction may span several connectors; per-connector meter starts
/// are tracked separately so the consumed total can be summed across them.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub transaction_id: i32,
    pub charge_point_id: String,
    pub connector_ids: Vec<u32>,
    pub id_tag: String,
    pub start_time: DateTime<Utc>,
    /// Charging start reading per connector, Wh.
    pub meter_start_values: HashMap<u32, i32>,
    /// Whether the official start reading has been fixed for a connector.
    /// Until it is, the next reported reading becomes the start.
    pub official_meter_start: HashMap<u32, bool>,
    /// Consumed energy across all connectors, Wh.
    pub total_consumed_energy: Option<i64>,
    pub reservation_id: Option<i32>,
    pub last_meter_update_at: Option<DateTime<Utc>>,
    /// Most recent sampled charging power, watts.
    pub current_power: Option<f64>,
    pub last_updated: DateTime<Utc>,
}

impl Transaction {
    /// Transaction on a single connector, as created by StartTransaction.
    ///
    /// `meter_start` seeds the start reading but deliberately does not fix
    /// it as official; stations often report a stale value there, so the
    /// first in-transaction reading wins instead.
    pub fn new(
        transaction_id: i32,
        charge_point_id: impl Into<String>,
        connector_id: u32,
        id_tag: impl Into<String>,
        meter_start: i32,
        start_time: DateTime<Utc>,
    ) -> Self {
        let mut meter_start_values = HashMap::new();
        meter_start_values.insert(connector_id, meter_start);
        Self {
            transaction_id,
            charge_point_id: charge_point_id.into(),
            connector_ids: vec![connector_id],
            id_tag: id_tag.into(),
            start_time,
            meter_start_values,
            official_meter_start: HashMap::new(),
            total_consumed_energy: None,
            reservation_id: None,
            last_meter_update_at: None,
            current_power: None,
            last_updated: Utc::now(),
        }
    }

    /// True once the official start reading is fixed for the connector.
    pub fn official_start_set(&self, connector_id: u32) -> bool {
        self.official_meter_start
            .get(&connector_id)
            .copied()
            .unwrap_or(false)
    }

    /// Fix the official start reading for a connector.
    pub fn set_official_start(&mut self, connector_id: u32, meter_value: i32) {
        self.meter_start_values.insert(connector_id, meter_value);
        self.official_meter_start.insert(connector_id, true);
    }

    pub fn meter_start(&self, connector_id: u32) -> Option<i32> {
        self.meter_start_values.get(&connector_id).copied()
    }
}

/// A reservation held on a connector.
#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub reservation_id: i32,
    pub charge_point_id: String,
    pub connector_id: u32,
    pub id_tag: String,
    pub expiry_date: DateTime<Utc>,
    pub parent_id_tag: Option<String>,
}

/// One configuration key as reported by GetConfiguration.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigurationItem {
    pub key: String,
    pub value: Option<String>,
    pub readonly: bool,
}
