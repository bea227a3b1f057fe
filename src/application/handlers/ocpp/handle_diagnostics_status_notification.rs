//! DiagnosticsStatusNotification handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::diagnostics_status_notification::{
    DiagnosticsStatusNotificationRequest, DiagnosticsStatusNotificationResponse,
};
use tracing::info;

use crate::application::handlers::ocpp_handler::OcppHandler;
use crate::notifications::{DiagnosticsStatusEvent, Event};

pub async fn handle_diagnostics_status_notification(
    handler: &OcppHandler,
    payload: DiagnosticsStatusNotificationRequest,
) -> DiagnosticsStatusNotificationResponse {
    info!(
        charge_point_id = handler.charge_point_id(),
        status = ?payload.status,
        "DiagnosticsStatusNotification"
    );

    let dispatcher = &handler.dispatcher;
    let charge_point_id = handler.charge_point_id().to_string();
    let status = format!("{:?}", payload.status);

    dispatcher
        .state_cache
        .update_diagnostics_status(&charge_point_id, &status);

    let response = dispatcher
        .hooks
        .diagnostics_status
        .dispatch(
            &charge_point_id,
            payload,
            dispatcher.config.business_timeout(),
            || DiagnosticsStatusNotificationResponse {},
        )
        .await;

    dispatcher
        .event_bus
        .publish(Event::DiagnosticsStatusUpdated(DiagnosticsStatusEvent {
            charge_point_id,
            status,
            timestamp: Utc::now(),
        }));

    response
}
