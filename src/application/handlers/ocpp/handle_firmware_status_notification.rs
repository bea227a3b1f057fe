//! FirmwareStatusNotification handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::firmware_status_notification::{
    FirmwareStatusNotificationRequest, FirmwareStatusNotificationResponse,
};
use tracing::info;

use crate::application::handlers::ocpp_handler::OcppHandler;
use crate::notifications::{Event, FirmwareStatusEvent};

pub async fn handle_firmware_status_notification(
    handler: &OcppHandler,
    payload: FirmwareStatusNotificationRequest,
) -> FirmwareStatusNotificationResponse {
    info!(
        charge_point_id = handler.charge_point_id(),
        status = ?payload.status,
        "FirmwareStatusNotification"
    );

    let dispatcher = &handler.dispatcher;
    let charge_point_id = handler.charge_point_id().to_string();
    let status = format!("{:?}", payload.status);

    dispatcher
        .state_cache
        .update_firmware_status(&charge_point_id, &status);

    let response = dispatcher
        .hooks
        .firmware_status
        .dispatch(
            &charge_point_id,
            payload,
            dispatcher.config.business_timeout(),
            || FirmwareStatusNotificationResponse {},
        )
        .await;

    dispatcher
        .event_bus
        .publish(Event::FirmwareStatusUpdated(FirmwareStatusEvent {
            charge_point_id,
            status,
            timestamp: Utc::now(),
        }));

    response
}
