//! ReserveNow command

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::messages::reserve_now::{ReserveNowRequest, ReserveNowResponse};
use tracing::info;

use crate::application::commands::{CommandError, SharedCommandSender};
use crate::domain::ocpp::Action;
use crate::domain::state::Reservation;

/// Reserve a connector for `id_tag` until `expiry_date`. An accepted
/// reservation is recorded in the state cache.
pub async fn reserve_now(
    command_sender: &SharedCommandSender,
    charge_point_id: &str,
    reservation_id: i32,
    connector_id: u32,
    id_tag: &str,
    parent_id_tag: Option<&str>,
    expiry_date: DateTime<Utc>,
) -> Result<String, CommandError> {
    info!(
        charge_point_id,
        reservation_id,
        connector_id,
        id_tag,
        "ReserveNow"
    );

    let request = ReserveNowRequest {
        connector_id,
        expiry_date,
        id_tag: id_tag.to_string(),
        parent_id_tag: parent_id_tag.map(|s| s.to_string()),
        reservation_id,
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CommandError::SendFailed(format!("Serialization failed: {}", e)))?;

    let result = command_sender
        .send_command(charge_point_id, Action::ReserveNow, payload)
        .await?;

    let response: ReserveNowResponse = serde_json::from_value(result)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    let status = format!("{:?}", response.status);
    if status == "Accepted" {
        command_sender.state_cache().create_reservation(Reservation {
            reservation_id,
            charge_point_id: charge_point_id.to_string(),
            connector_id,
            id_tag: id_tag.to_string(),
            expiry_date,
            parent_id_tag: parent_id_tag.map(|s| s.to_string()),
        });
    }

    Ok(status)
}
