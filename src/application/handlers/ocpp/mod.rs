//! OCPP 1.6 action handlers
//!
//! One module per charge-point-initiated action. Each handler gets the
//! typed request, updates the state cache, consults its business hook,
//! publishes the matching event, and returns the typed response.

use serde_json::Value;

use crate::application::handlers::ocpp_handler::OcppHandler;
use crate::domain::ocpp::Action;
use crate::support::ocpp_frame::{error_code, OcppFrame};

mod handle_authorize;
mod handle_boot_notification;
mod handle_data_transfer;
mod handle_diagnostics_status_notification;
mod handle_firmware_status_notification;
mod handle_heartbeat;
mod handle_meter_values;
mod handle_start_transaction;
mod handle_status_notification;
mod handle_stop_transaction;

pub use handle_authorize::handle_authorize;
pub use handle_boot_notification::handle_boot_notification;
pub use handle_data_transfer::handle_data_transfer;
pub use handle_diagnostics_status_notification::handle_diagnostics_status_notification;
pub use handle_firmware_status_notification::handle_firmware_status_notification;
pub use handle_heartbeat::handle_heartbeat;
pub use handle_meter_values::handle_meter_values;
pub use handle_start_transaction::handle_start_transaction;
pub use handle_status_notification::handle_status_notification;
pub use handle_stop_transaction::handle_stop_transaction;

/// Decode, handle, and encode one inbound Call. Direction and
/// verification gates have already passed in the router.
pub(crate) async fn dispatch_action(
    handler: &OcppHandler,
    action: Action,
    message_id: String,
    payload: Value,
) -> OcppFrame {
    match action {
        Action::Authorize => {
            let request = match handler.decode_payload(&message_id, action, payload) {
                Ok(request) => request,
                Err(frame) => return frame,
            };
            let response = handle_authorize(handler, request).await;
            handler.encode_response(message_id, &response)
        }
        Action::BootNotification => {
            let request = match handler.decode_payload(&message_id, action, payload) {
                Ok(request) => request,
                Err(frame) => return frame,
            };
            let response = handle_boot_notification(handler, request).await;
            handler.encode_response(message_id, &response)
        }
        Action::DataTransfer => {
            let request = match handler.decode_payload(&message_id, action, payload) {
                Ok(request) => request,
                Err(frame) => return frame,
            };
            let response = handle_data_transfer(handler, request).await;
            handler.encode_response(message_id, &response)
        }
        Action::DiagnosticsStatusNotification => {
            let request = match handler.decode_payload(&message_id, action, payload) {
                Ok(request) => request,
                Err(frame) => return frame,
            };
            let response = handle_diagnostics_status_notification(handler, request).await;
            handler.encode_response(message_id, &response)
        }
        Action::FirmwareStatusNotification => {
            let request = match handler.decode_payload(&message_id, action, payload) {
                Ok(request) => request,
                Err(frame) => return frame,
            };
            let response = handle_firmware_status_notification(handler, request).await;
            handler.encode_response(message_id, &response)
        }
        Action::Heartbeat => {
            let request = match handler.decode_payload(&message_id, action, payload) {
                Ok(request) => request,
                Err(frame) => return frame,
            };
            let response = handle_heartbeat(handler, request).await;
            handler.encode_response(message_id, &response)
        }
        Action::MeterValues => {
            let request = match handler.decode_payload(&message_id, action, payload) {
                Ok(request) => request,
                Err(frame) => return frame,
            };
            let response = handle_meter_values(handler, request).await;
            handler.encode_response(message_id, &response)
        }
        Action::StartTransaction => {
            let request = match handler.decode_payload(&message_id, action, payload) {
                Ok(request) => request,
                Err(frame) => return frame,
            };
            let response = handle_start_transaction(handler, request).await;
            handler.encode_response(message_id, &response)
        }
        Action::StatusNotification => {
            let request = match handler.decode_payload(&message_id, action, payload) {
                Ok(request) => request,
                Err(frame) => return frame,
            };
            let response = handle_status_notification(handler, request).await;
            handler.encode_response(message_id, &response)
        }
        Action::StopTransaction => {
            let request = match handler.decode_payload(&message_id, action, payload) {
                Ok(request) => request,
                Err(frame) => return frame,
            };
            let response = handle_stop_transaction(handler, request).await;
            handler.encode_response(message_id, &response)
        }
        // Unreachable through the router; kept for match exhaustiveness.
        other => OcppFrame::error_response(
            message_id,
            error_code::NOT_IMPLEMENTED,
            format!("{other} is not accepted from a charge point"),
        ),
    }
}
