//! UpdateFirmware command

use chrono::{DateTime, Utc};
use rust_ocpp::v1_6::messages::update_firmware::{UpdateFirmwareRequest, UpdateFirmwareResponse};
use tracing::info;

use crate::application::commands::{CommandError, SharedCommandSender};
use crate::domain::ocpp::Action;

/// Schedule a firmware download from `location` at `retrieve_date`.
///
/// The response carries no status; the acknowledgement itself means the
/// station took the order. Progress arrives later via
/// FirmwareStatusNotification.
pub async fn update_firmware(
    command_sender: &SharedCommandSender,
    charge_point_id: &str,
    location: &str,
    retrieve_date: DateTime<Utc>,
    retries: Option<i32>,
    retry_interval: Option<i32>,
) -> Result<(), CommandError> {
    info!(charge_point_id, location, %retrieve_date, "UpdateFirmware");

    let request = UpdateFirmwareRequest {
        location: location.to_string(),
        retries,
        retrieve_date,
        retry_interval,
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CommandError::SendFailed(format!("Serialization failed: {}", e)))?;

    let result = command_sender
        .send_command(charge_point_id, Action::UpdateFirmware, payload)
        .await?;

    let _response: UpdateFirmwareResponse = serde_json::from_value(result)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    Ok(())
}
