//! StatusNotification handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use tracing::info;

use crate::application::handlers::ocpp_handler::OcppHandler;
use crate::domain::ConnectorState;
use crate::notifications::{ConnectorStatusChangedEvent, Event};

pub async fn handle_status_notification(
    handler: &OcppHandler,
    payload: StatusNotificationRequest,
) -> StatusNotificationResponse {
    info!(
        charge_point_id = handler.charge_point_id(),
        connector_id = payload.connector_id,
        status = ?payload.status,
        error_code = ?payload.error_code,
        "StatusNotification"
    );

    let dispatcher = &handler.dispatcher;
    let charge_point_id = handler.charge_point_id().to_string();

    let mut state = ConnectorState::new(payload.connector_id);
    state.status = format!("{:?}", payload.status);
    state.error_code = format!("{:?}", payload.error_code);
    state.info = payload.info.clone();
    state.timestamp = payload.timestamp.unwrap_or_else(Utc::now);
    state.vendor_id = payload.vendor_id.clone();
    state.vendor_error_code = payload.vendor_error_code.clone();
    dispatcher
        .state_cache
        .update_connector_status(&charge_point_id, state);

    let response = dispatcher
        .hooks
        .status_notification
        .dispatch(
            &charge_point_id,
            payload.clone(),
            dispatcher.config.business_timeout(),
            || StatusNotificationResponse {},
        )
        .await;

    dispatcher
        .event_bus
        .publish(Event::ConnectorStatusChanged(ConnectorStatusChangedEvent {
            charge_point_id,
            connector_id: payload.connector_id,
            status: format!("{:?}", payload.status),
            error_code: Some(format!("{:?}", payload.error_code)),
            info: payload.info,
            timestamp: payload.timestamp.unwrap_or_else(Utc::now),
        }));

    response
}
