//! SetChargingProfile command

use rust_ocpp::v1_6::messages::set_charging_profile::{
    SetChargingProfileRequest, SetChargingProfileResponse,
};
use rust_ocpp::v1_6::types::ChargingProfile;
use tracing::info;

use crate::application::commands::{CommandError, SharedCommandSender};
use crate::domain::ocpp::Action;

/// Install a charging profile on a connector. `connector_id` 0 applies
/// the profile to the whole charge point.
pub async fn set_charging_profile(
    command_sender: &SharedCommandSender,
    charge_point_id: &str,
    connector_id: u32,
    charging_profile: ChargingProfile,
) -> Result<String, CommandError> {
    info!(
        charge_point_id,
        connector_id,
        profile_id = charging_profile.charging_profile_id,
        "SetChargingProfile"
    );

    let request = SetChargingProfileRequest {
        connector_id: connector_id as i32,
        cs_charging_profiles: charging_profile,
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CommandError::SendFailed(format!("Serialization failed: {}", e)))?;

    let result = command_sender
        .send_command(charge_point_id, Action::SetChargingProfile, payload)
        .await?;

    let response: SetChargingProfileResponse = serde_json::from_value(result)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    Ok(format!("{:?}", response.status))
}
