//! GetLocalListVersion command

use rust_ocpp::v1_6::messages::get_local_list_version::{
    GetLocalListVersionRequest, GetLocalListVersionResponse,
};
use tracing::info;

use crate::application::commands::{CommandError, SharedCommandSender};
use crate::domain::ocpp::Action;

/// Read the version of the station's local authorization list.
///
/// `-1` means local lists are unsupported, `0` means the list is empty;
/// only real versions are mirrored into the state cache.
pub async fn get_local_list_version(
    command_sender: &SharedCommandSender,
    charge_point_id: &str,
) -> Result<i32, CommandError> {
    info!(charge_point_id, "GetLocalListVersion");

    let request = GetLocalListVersionRequest {};
    let payload = serde_json::to_value(&request)
        .map_err(|e| CommandError::SendFailed(format!("Serialization failed: {}", e)))?;

    let result = command_sender
        .send_command(charge_point_id, Action::GetLocalListVersion, payload)
        .await?;

    let response: GetLocalListVersionResponse = serde_json::from_value(result)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    if response.list_version >= 0 {
        command_sender
            .state_cache()
            .update_local_auth_list_version(charge_point_id, response.list_version);
    }

    Ok(response.list_version)
}
