//! RemoteStartTransaction command

use rust_ocpp::v1_6::messages::remote_start_transaction::{
    RemoteStartTransactionRequest, RemoteStartTransactionResponse,
};
use rust_ocpp::v1_6::types::ChargingProfile;
use tracing::info;

use crate::application::commands::{CommandError, SharedCommandSender};
use crate::domain::ocpp::Action;

/// Ask the charge point to start a transaction for `id_tag`.
///
/// `connector_id` of `None` lets the station pick a connector. An
/// optional `charging_profile` caps the transaction from its first
/// second.
pub async fn remote_start_transaction(
    command_sender: &SharedCommandSender,
    charge_point_id: &str,
    id_tag: &str,
    connector_id: Option<u32>,
    charging_profile: Option<ChargingProfile>,
) -> Result<String, CommandError> {
    info!(
        charge_point_id,
        id_tag,
        ?connector_id,
        "RemoteStartTransaction"
    );

    let request = RemoteStartTransactionRequest {
        connector_id,
        id_tag: id_tag.to_string(),
        charging_profile,
    };
    let payload = serde_json::to_value(&request)
        .map_err(|e| CommandError::SendFailed(format!("Serialization failed: {}", e)))?;

    let result = command_sender
        .send_command(charge_point_id, Action::RemoteStartTransaction, payload)
        .await?;

    let response: RemoteStartTransactionResponse = serde_json::from_value(result)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    Ok(format!("{:?}", response.status))
}
