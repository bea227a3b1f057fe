//! OCPP 1.6 command implementations
//!
//! Each function builds a typed `rust_ocpp` request, sends it through
//! [`CommandSender`](super::CommandSender), decodes the typed response
//! and applies any state-cache bookkeeping the response implies.

pub mod cancel_reservation;
pub mod change_availability;
pub mod change_configuration;
pub mod clear_cache;
pub mod clear_charging_profile;
pub mod data_transfer;
pub mod get_composite_schedule;
pub mod get_configuration;
pub mod get_diagnostics;
pub mod get_local_list_version;
pub mod remote_start;
pub mod remote_stop;
pub mod reserve_now;
pub mod reset;
pub mod send_local_list;
pub mod set_charging_profile;
pub mod trigger_message;
pub mod unlock_connector;
pub mod update_firmware;
