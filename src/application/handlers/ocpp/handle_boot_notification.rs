//! BootNotification handler

use std::time::Duration;

use chrono::Utc;
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::types::RegistrationStatus;
use tracing::{info, warn};

use crate::application::handlers::ocpp_handler::OcppHandler;
use crate::domain::ChargePointInfo;
use crate::notifications::{BootNotificationEvent, Event};

/// Delay before a rejected station is disconnected, long enough for the
/// CallResult to flush to the wire first.
const REJECTED_CLOSE_DELAY: Duration = Duration::from_secs(1);

pub async fn handle_boot_notification(
    handler: &OcppHandler,
    payload: BootNotificationRequest,
) -> BootNotificationResponse {
    info!(
        charge_point_id = handler.charge_point_id(),
        vendor = payload.charge_point_vendor.as_str(),
        model = payload.charge_point_model.as_str(),
        firmware = ?payload.firmware_version,
        "BootNotification"
    );

    let dispatcher = &handler.dispatcher;
    let charge_point_id = handler.charge_point_id().to_string();

    // Reconnect pre-verification reads this; cache it before the hook runs.
    let info = ChargePointInfo {
        charge_point_id: charge_point_id.clone(),
        status: RegistrationStatus::Accepted,
        vendor: payload.charge_point_vendor.clone(),
        model: payload.charge_point_model.clone(),
        serial_number: payload.charge_point_serial_number.clone(),
        charge_box_serial_number: payload.charge_box_serial_number.clone(),
        firmware_version: payload.firmware_version.clone(),
        iccid: payload.iccid.clone(),
        imsi: payload.imsi.clone(),
        meter_type: payload.meter_type.clone(),
        meter_serial_number: payload.meter_serial_number.clone(),
        protocol_version: handler.session.protocol.version_string().to_string(),
    };
    dispatcher.state_cache.update_charge_point_info(info.clone());
    dispatcher.state_cache.mark_online(&charge_point_id);

    let heartbeat_interval = dispatcher.config.heartbeat_interval;
    let response = dispatcher
        .hooks
        .boot_notification
        .dispatch(
            &charge_point_id,
            payload.clone(),
            dispatcher.config.boot_timeout(),
            || BootNotificationResponse {
                current_time: Utc::now(),
                interval: heartbeat_interval,
                status: RegistrationStatus::Accepted,
            },
        )
        .await;

    if response.status == RegistrationStatus::Accepted {
        handler.session.mark_verified();
    } else {
        warn!(
            charge_point_id = charge_point_id.as_str(),
            status = ?response.status,
            "BootNotification not accepted, scheduling disconnect"
        );
        let mut rejected = info;
        rejected.status = response.status.clone();
        dispatcher.state_cache.update_charge_point_info(rejected);

        let session = handler.session.clone();
        tokio::spawn(async move {
            tokio::time::sleep(REJECTED_CLOSE_DELAY).await;
            session.close("BootNotification rejected");
        });
    }

    dispatcher
        .event_bus
        .publish(Event::BootNotification(BootNotificationEvent {
            charge_point_id,
            vendor: payload.charge_point_vendor,
            model: payload.charge_point_model,
            serial_number: payload.charge_point_serial_number,
            firmware_version: payload.firmware_version,
            status: format!("{:?}", response.status),
            timestamp: Utc::now(),
        }));

    response
}
