//! MeterValues handler
//!
//! Sampled values are folded into the connector telemetry and, when a
//! transaction is running, into its consumed-energy accounting. Readings
//! located at the EV describe the vehicle battery; everything else is
//! supply-side telemetry.

use chrono::Utc;
use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
use rust_ocpp::v1_6::types::{Location, Measurand, ReadingContext, UnitOfMeasure};
use tracing::{debug, info};

use crate::application::handlers::ocpp_handler::OcppHandler;
use crate::domain::BatteryStatus;
use crate::notifications::{Event, MeterValuesEvent};

pub async fn handle_meter_values(
    handler: &OcppHandler,
    payload: MeterValuesRequest,
) -> MeterValuesResponse {
    info!(
        charge_point_id = handler.charge_point_id(),
        connector_id = payload.connector_id,
        transaction_id = ?payload.transaction_id,
        samples = payload.meter_value.len(),
        "MeterValues"
    );

    let dispatcher = &handler.dispatcher;
    let charge_point_id = handler.charge_point_id().to_string();
    let connector_id = payload.connector_id;
    let transaction_id = payload.transaction_id;

    dispatcher.state_cache.touch_communication(&charge_point_id);

    let mut energy_wh: Option<f64> = None;
    let mut power_w: Option<f64> = None;
    let mut soc: Option<f64> = None;
    let mut instant_voltage: Option<f64> = None;
    let mut instant_current: Option<f64> = None;
    let mut instant_power: Option<f64> = None;
    let mut battery = BatteryStatus::default();
    let mut battery_seen = false;

    for meter_value in &payload.meter_value {
        for sampled in &meter_value.sampled_value {
            let value: f64 = match sampled.value.parse() {
                Ok(v) => v,
                Err(_) => continue,
            };

            let measurand = sampled
                .measurand
                .clone()
                .unwrap_or(Measurand::EnergyActiveImportRegister);
            let at_ev = matches!(sampled.location, Some(Location::Ev));

            match measurand {
                Measurand::EnergyActiveImportRegister => {
                    let wh = match sampled.unit.as_ref() {
                        Some(UnitOfMeasure::KWh) => value * 1000.0,
                        _ => value,
                    };
                    energy_wh = Some(wh);
                    if transaction_id.is_some() {
                        let context = sampled
                            .context
                            .clone()
                            .unwrap_or(ReadingContext::SamplePeriodic);
                        dispatcher.state_cache.update_transaction_meter(
                            &charge_point_id,
                            connector_id,
                            wh as i32,
                            context,
                        );
                    }
                }
                Measurand::PowerActiveImport => {
                    let w = match sampled.unit.as_ref() {
                        Some(UnitOfMeasure::Kw) => value * 1000.0,
                        _ => value,
                    };
                    power_w = Some(w);
                    if at_ev {
                        battery.power = Some(w);
                        battery_seen = true;
                    } else {
                        instant_power = Some(w);
                    }
                }
                Measurand::SoC => {
                    soc = Some(value);
                    battery.soc = Some(value);
                    battery_seen = true;
                }
                Measurand::Voltage => {
                    if at_ev {
                        battery.voltage = Some(value);
                        battery_seen = true;
                    } else {
                        instant_voltage = Some(value);
                    }
                }
                Measurand::CurrentImport | Measurand::CurrentOffered => {
                    if at_ev {
                        battery.current = Some(value);
                        battery_seen = true;
                    } else {
                        instant_current = Some(value);
                    }
                }
                Measurand::Temperature => {
                    battery.temperature = Some(value);
                    battery_seen = true;
                }
                _ => {
                    debug!(
                        charge_point_id = charge_point_id.as_str(),
                        ?measurand,
                        value,
                        "Unhandled measurand"
                    );
                }
            }
        }
    }

    if battery_seen {
        dispatcher
            .state_cache
            .update_battery_status(&charge_point_id, connector_id, battery);
    }
    dispatcher.state_cache.update_connector_snapshot(
        &charge_point_id,
        connector_id,
        instant_voltage,
        instant_current,
        instant_power,
    );
    if transaction_id.is_some() {
        dispatcher
            .state_cache
            .update_transaction_snapshot(&charge_point_id, connector_id, power_w);
    }

    // Consumed total after this batch, as accounted by the cache.
    let energy_consumed_wh = transaction_id.and_then(|_| {
        dispatcher
            .state_cache
            .active_transaction(&charge_point_id, connector_id)
            .and_then(|tx| tx.total_consumed_energy)
            .map(|wh| wh as f64)
    });

    let response = dispatcher
        .hooks
        .meter_values
        .dispatch(
            &charge_point_id,
            payload.clone(),
            dispatcher.config.business_timeout(),
            || MeterValuesResponse {},
        )
        .await;

    dispatcher
        .event_bus
        .publish(Event::MeterValuesReceived(MeterValuesEvent {
            charge_point_id,
            connector_id,
            transaction_id,
            energy_wh,
            energy_consumed_wh,
            power_w,
            soc,
            timestamp: payload
                .meter_value
                .first()
                .map(|mv| mv.timestamp)
                .unwrap_or_else(Utc::now),
        }));

    response
}
