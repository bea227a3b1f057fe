//! Authorize handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use tracing::info;

use crate::application::handlers::ocpp_handler::OcppHandler;
use crate::notifications::{AuthorizationEvent, Event};

pub async fn handle_authorize(
    handler: &OcppHandler,
    payload: AuthorizeRequest,
) -> AuthorizeResponse {
    info!(
        charge_point_id = handler.charge_point_id(),
        id_tag = payload.id_tag.as_str(),
        "Authorize"
    );

    let dispatcher = &handler.dispatcher;
    let response = dispatcher
        .hooks
        .authorize
        .dispatch(
            handler.charge_point_id(),
            payload.clone(),
            dispatcher.config.business_timeout(),
            || AuthorizeResponse {
                id_tag_info: IdTagInfo {
                    status: AuthorizationStatus::Accepted,
                    expiry_date: None,
                    parent_id_tag: None,
                },
            },
        )
        .await;

    dispatcher
        .event_bus
        .publish(Event::AuthorizationResult(AuthorizationEvent {
            charge_point_id: handler.charge_point_id().to_string(),
            id_tag: payload.id_tag,
            status: format!("{:?}", response.id_tag_info.status),
            timestamp: Utc::now(),
        }));

    response
}
