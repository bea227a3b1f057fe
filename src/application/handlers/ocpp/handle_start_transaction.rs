//! StartTransaction handler

use rand::Rng;
use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use tracing::{info, warn};

use crate::application::handlers::ocpp_handler::OcppHandler;
use crate::domain::Transaction;
use crate::notifications::{Event, TransactionStartedEvent};

pub async fn handle_start_transaction(
    handler: &OcppHandler,
    payload: StartTransactionRequest,
) -> StartTransactionResponse {
    info!(
        charge_point_id = handler.charge_point_id(),
        connector_id = payload.connector_id,
        id_tag = payload.id_tag.as_str(),
        meter_start = payload.meter_start,
        "StartTransaction"
    );

    let dispatcher = &handler.dispatcher;
    let charge_point_id = handler.charge_point_id().to_string();

    // Transaction IDs come from the business layer; without one, a random
    // ID keeps the station going.
    let fallback_id = rand::thread_rng().gen_range(1..1_000_000);
    let response = dispatcher
        .hooks
        .start_transaction
        .dispatch(
            &charge_point_id,
            payload.clone(),
            dispatcher.config.business_timeout(),
            || StartTransactionResponse {
                transaction_id: fallback_id,
                id_tag_info: IdTagInfo {
                    status: AuthorizationStatus::Accepted,
                    expiry_date: None,
                    parent_id_tag: None,
                },
            },
        )
        .await;

    if response.id_tag_info.status == AuthorizationStatus::Accepted {
        dispatcher.state_cache.create_transaction(Transaction::new(
            response.transaction_id,
            charge_point_id.clone(),
            payload.connector_id,
            payload.id_tag.clone(),
            payload.meter_start,
            payload.timestamp,
        ));

        dispatcher
            .event_bus
            .publish(Event::TransactionStarted(TransactionStartedEvent {
                charge_point_id,
                connector_id: payload.connector_id,
                transaction_id: response.transaction_id,
                id_tag: payload.id_tag,
                meter_start: payload.meter_start,
                timestamp: payload.timestamp,
            }));
    } else {
        warn!(
            charge_point_id = charge_point_id.as_str(),
            id_tag = payload.id_tag.as_str(),
            status = ?response.id_tag_info.status,
            "StartTransaction not authorized"
        );
    }

    response
}
