//! CancelReservation command

use rust_ocpp::v1_6::messages::cancel_reservation::{
    CancelReservationRequest, CancelReservationResponse,
};
use tracing::{info, warn};

use crate::application::commands::{CommandError, SharedCommandSender};
use crate::domain::ocpp::Action;

/// Cancel a reservation by its ID. An accepted cancellation drops the
/// cached reservation too.
pub async fn cancel_reservation(
    command_sender: &SharedCommandSender,
    charge_point_id: &str,
    reservation_id: i32,
) -> Result<String, CommandError> {
    info!(charge_point_id, reservation_id, "CancelReservation");

    let request = CancelReservationRequest { reservation_id };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CommandError::SendFailed(format!("Serialization failed: {}", e)))?;

    let result = command_sender
        .send_command(charge_point_id, Action::CancelReservation, payload)
        .await?;

    let response: CancelReservationResponse = serde_json::from_value(result)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    let status = format!("{:?}", response.status);
    if status == "Accepted"
        && !command_sender
            .state_cache()
            .cancel_reservation(charge_point_id, reservation_id)
    {
        warn!(
            charge_point_id,
            reservation_id, "Cancelled a reservation the cache did not know"
        );
    }

    Ok(status)
}
