//! ChangeConfiguration command

use rust_ocpp::v1_6::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse,
};
use tracing::info;

use crate::application::commands::{CommandError, SharedCommandSender};
use crate::domain::ocpp::Action;
use crate::domain::state::ConfigurationItem;

/// Write one configuration key. An accepted change (including one that
/// needs a reboot to apply) updates the cached view of the key.
pub async fn change_configuration(
    command_sender: &SharedCommandSender,
    charge_point_id: &str,
    key: String,
    value: String,
) -> Result<String, CommandError> {
    info!(
        charge_point_id,
        key = key.as_str(),
        value = value.as_str(),
        "ChangeConfiguration"
    );

    let request = ChangeConfigurationRequest {
        key: key.clone(),
        value: value.clone(),
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CommandError::SendFailed(format!("Serialization failed: {}", e)))?;

    let result = command_sender
        .send_command(charge_point_id, Action::ChangeConfiguration, payload)
        .await?;

    let response: ChangeConfigurationResponse = serde_json::from_value(result)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    let status = format!("{:?}", response.status);
    if matches!(status.as_str(), "Accepted" | "RebootRequired") {
        command_sender.state_cache().update_configuration(
            charge_point_id,
            ConfigurationItem {
                key,
                value: Some(value),
                readonly: false,
            },
        );
    }

    Ok(status)
}
