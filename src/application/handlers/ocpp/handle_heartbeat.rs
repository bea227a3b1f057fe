//! Heartbeat handler
//!
//! No business hook: the response is fixed by the protocol. Observers
//! get the event.

use chrono::Utc;
use rust_ocpp::v1_6::messages::heart_beat::{HeartbeatRequest, HeartbeatResponse};
use tracing::debug;

use crate::application::handlers::ocpp_handler::OcppHandler;
use crate::notifications::{Event, HeartbeatEvent};

pub async fn handle_heartbeat(
    handler: &OcppHandler,
    _payload: HeartbeatRequest,
) -> HeartbeatResponse {
    debug!(charge_point_id = handler.charge_point_id(), "Heartbeat");

    let dispatcher = &handler.dispatcher;
    dispatcher
        .state_cache
        .touch_communication(handler.charge_point_id());

    dispatcher
        .event_bus
        .publish(Event::HeartbeatReceived(HeartbeatEvent {
            charge_point_id: handler.charge_point_id().to_string(),
            timestamp: Utc::now(),
        }));

    HeartbeatResponse {
        current_time: Utc::now(),
    }
}
