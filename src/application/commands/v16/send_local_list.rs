//! SendLocalList command

use chrono::DateTime;
use rust_ocpp::v1_6::messages::send_local_list::{SendLocalListRequest, SendLocalListResponse};
use rust_ocpp::v1_6::types::{AuthorizationData, AuthorizationStatus, IdTagInfo, UpdateType};
use tracing::info;

use crate::application::commands::{CommandError, LocalAuthEntry, SharedCommandSender};
use crate::domain::ocpp::Action;

/// Push a local authorization list to the charge point.
///
/// `update_type`: `"Full"` or `"Differential"`. An accepted update
/// mirrors `list_version` into the state cache.
pub async fn send_local_list(
    command_sender: &SharedCommandSender,
    charge_point_id: &str,
    list_version: i32,
    update_type: &str,
    entries: Option<Vec<LocalAuthEntry>>,
) -> Result<String, CommandError> {
    info!(charge_point_id, list_version, update_type, "SendLocalList");

    let ocpp_update_type = match update_type.to_lowercase().as_str() {
        "differential" => UpdateType::Differential,
        _ => UpdateType::Full,
    };

    let local_authorization_list = entries.map(|list| {
        list.into_iter()
            .map(|e| AuthorizationData {
                id_tag: e.id_tag,
                id_tag_info: e.status.map(|s| {
                    let auth_status = match s.to_lowercase().as_str() {
                        "blocked" => AuthorizationStatus::Blocked,
                        "expired" => AuthorizationStatus::Expired,
                        "invalid" => AuthorizationStatus::Invalid,
                        "concurrenttx" | "concurrent_tx" => AuthorizationStatus::ConcurrentTx,
                        _ => AuthorizationStatus::Accepted,
                    };
                    IdTagInfo {
                        status: auth_status,
                        expiry_date: e.expiry_date.and_then(|s| {
                            DateTime::parse_from_rfc3339(&s)
                                .ok()
                                .map(|dt| dt.with_timezone(&chrono::Utc))
                        }),
                        parent_id_tag: e.parent_id_tag,
                    }
                }),
            })
            .collect()
    });

    let request = SendLocalListRequest {
        list_version,
        local_authorization_list,
        update_type: ocpp_update_type,
    };

    let payload = serde_json::to_value(&request)
        .map_err(|e| CommandError::SendFailed(format!("Serialization failed: {}", e)))?;

    let result = command_sender
        .send_command(charge_point_id, Action::SendLocalList, payload)
        .await?;

    let response: SendLocalListResponse = serde_json::from_value(result)
        .map_err(|e| CommandError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    let status = format!("{:?}", response.status);
    if status == "Accepted" {
        command_sender
            .state_cache()
            .update_local_auth_list_version(charge_point_id, list_version);
    }

    Ok(status)
}
