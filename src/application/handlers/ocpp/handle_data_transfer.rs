//! DataTransfer handler
//!
//! Vendor-specific payloads are meaningless to the engine; without a
//! business subscriber they are rejected.

use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
use rust_ocpp::v1_6::types::DataTransferStatus;
use tracing::info;

use crate::application::handlers::ocpp_handler::OcppHandler;

pub async fn handle_data_transfer(
    handler: &OcppHandler,
    payload: DataTransferRequest,
) -> DataTransferResponse {
    info!(
        charge_point_id = handler.charge_point_id(),
        vendor_id = payload.vendor_string.as_str(),
        message_id = ?payload.message_id,
        "DataTransfer"
    );

    let dispatcher = &handler.dispatcher;
    dispatcher
        .hooks
        .data_transfer
        .dispatch(
            handler.charge_point_id(),
            payload,
            dispatcher.config.business_timeout(),
            || DataTransferResponse {
                status: DataTransferStatus::Rejected,
                data: None,
            },
        )
        .await
}
