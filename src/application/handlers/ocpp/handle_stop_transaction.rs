//! StopTransaction handler

use rust_ocpp::v1_6::messages::stop_transaction::{
    StopTransactionRequest, StopTransactionResponse,
};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use tracing::{info, warn};

use crate::application::handlers::ocpp_handler::OcppHandler;
use crate::notifications::{Event, TransactionStoppedEvent};

pub async fn handle_stop_transaction(
    handler: &OcppHandler,
    payload: StopTransactionRequest,
) -> StopTransactionResponse {
    info!(
        charge_point_id = handler.charge_point_id(),
        transaction_id = payload.transaction_id,
        meter_stop = payload.meter_stop,
        reason = ?payload.reason,
        "StopTransaction"
    );

    let dispatcher = &handler.dispatcher;
    let charge_point_id = handler.charge_point_id().to_string();

    // The cache entry goes first; its final consumed total feeds the event
    // regardless of the hook's decision.
    let ended = dispatcher
        .state_cache
        .end_transaction(&charge_point_id, payload.transaction_id);
    let energy_consumed_wh = ended.as_ref().and_then(|tx| tx.total_consumed_energy);
    if ended.is_none() {
        warn!(
            charge_point_id = charge_point_id.as_str(),
            transaction_id = payload.transaction_id,
            "StopTransaction for a transaction not in the cache"
        );
    }

    let response = dispatcher
        .hooks
        .stop_transaction
        .dispatch(
            &charge_point_id,
            payload.clone(),
            dispatcher.config.business_timeout(),
            || StopTransactionResponse {
                id_tag_info: Some(IdTagInfo {
                    status: AuthorizationStatus::Accepted,
                    expiry_date: None,
                    parent_id_tag: None,
                }),
            },
        )
        .await;

    dispatcher
        .event_bus
        .publish(Event::TransactionStopped(TransactionStoppedEvent {
            charge_point_id,
            transaction_id: payload.transaction_id,
            id_tag: payload.id_tag,
            meter_stop: payload.meter_stop,
            energy_consumed_wh,
            reason: payload.reason.map(|r| format!("{:?}", r)),
            timestamp: payload.timestamp,
        }));

    response
}
