//! Post-boot station interrogation
//!
//! Listens for accepted BootNotifications and reads the station's full
//! configuration and local list version shortly after, so the state
//! cache starts warm without any operator action.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::application::commands::{
    get_configuration, get_local_list_version, SharedCommandSender,
};
use crate::application::state_cache::SharedStateCache;
use crate::notifications::{Event, SharedEventBus};
use crate::support::ShutdownSignal;

/// Pause between the BootNotification response going out and the first
/// query, so the station can finish its own boot sequence.
const SETTLE_DELAY: Duration = Duration::from_secs(2);

pub struct Interrogator {
    command_sender: SharedCommandSender,
    state_cache: SharedStateCache,
    event_bus: SharedEventBus,
    settle_delay: Duration,
}

impl Interrogator {
    pub fn new(
        command_sender: SharedCommandSender,
        state_cache: SharedStateCache,
        event_bus: SharedEventBus,
    ) -> Self {
        Self {
            command_sender,
            state_cache,
            event_bus,
            settle_delay: SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Spawn the event loop. Each accepted boot is interrogated on its
    /// own task so a silent station cannot hold up the next one.
    pub fn start(self: &Arc<Self>, shutdown: ShutdownSignal) {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            let mut subscriber = service.event_bus.subscribe();
            info!("Interrogator started");
            loop {
                tokio::select! {
                    maybe = subscriber.recv() => {
                        let Some(message) = maybe else { break };
                        if let Event::BootNotification(boot) = message.event {
                            if boot.status == "Accepted" {
                                let service = Arc::clone(&service);
                                tokio::spawn(async move {
                                    service.interrogate(&boot.charge_point_id).await;
                                });
                            }
                        }
                    }
                    _ = shutdown.wait() => {
                        info!("Interrogator stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Read the configuration keys and local list version of one freshly
    /// accepted station. Both commands cache their results as a side
    /// effect; failures are logged and the station is left alone.
    async fn interrogate(&self, charge_point_id: &str) {
        tokio::time::sleep(self.settle_delay).await;

        if !self.state_cache.is_online(charge_point_id) {
            debug!(charge_point_id, "Station went away before interrogation");
            return;
        }

        info!(charge_point_id, "Interrogating station after boot");

        match get_configuration(&self.command_sender, charge_point_id, None).await {
            Ok(result) => debug!(
                charge_point_id,
                keys = result.configuration_key.len(),
                "Configuration read"
            ),
            Err(err) => warn!(
                charge_point_id,
                error = %err,
                "GetConfiguration after boot failed"
            ),
        }

        match get_local_list_version(&self.command_sender, charge_point_id).await {
            Ok(version) => debug!(charge_point_id, version, "Local list version read"),
            // Stations without local list support answer NotSupported;
            // not worth a warning.
            Err(err) => debug!(
                charge_point_id,
                error = %err,
                "GetLocalListVersion after boot failed"
            ),
        }
    }
}

/// Shared interrogator type
pub type SharedInterrogator = Arc<Interrogator>;

pub fn create_interrogator(
    command_sender: SharedCommandSender,
    state_cache: SharedStateCache,
    event_bus: SharedEventBus,
) -> SharedInterrogator {
    Arc::new(Interrogator::new(command_sender, state_cache, event_bus))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    use crate::application::call_matcher::{create_call_matcher, CallOutcome, SharedCallMatcher};
    use crate::application::commands::create_command_sender;
    use crate::application::session::create_session_registry;
    use crate::application::state_cache::create_state_cache;
    use crate::config::OcppConfig;
    use crate::domain::ocpp::OcppVersion;
    use crate::notifications::{create_event_bus, BootNotificationEvent};
    use crate::support::ocpp_frame::OcppFrame;

    struct Harness {
        state_cache: SharedStateCache,
        event_bus: SharedEventBus,
        matcher: SharedCallMatcher,
        outbound: mpsc::UnboundedReceiver<Message>,
        shutdown: ShutdownSignal,
    }

    fn start_interrogator() -> Harness {
        let config = OcppConfig::default();
        let event_bus = create_event_bus();
        let registry = create_session_registry(config.clone(), Arc::clone(&event_bus));
        let matcher = create_call_matcher();
        let state_cache = create_state_cache();
        let (tx, outbound) = mpsc::unbounded_channel();
        registry
            .add_session("CP001", OcppVersion::V16, tx, None, true)
            .expect("admission failed");
        state_cache.mark_online("CP001");

        let sender = create_command_sender(
            registry,
            Arc::clone(&matcher),
            Arc::clone(&state_cache),
            config,
        );
        let interrogator = Arc::new(
            Interrogator::new(sender, Arc::clone(&state_cache), Arc::clone(&event_bus))
                .with_settle_delay(Duration::ZERO),
        );
        let shutdown = ShutdownSignal::new();
        interrogator.start(shutdown.clone());

        Harness {
            state_cache,
            event_bus,
            matcher,
            outbound,
            shutdown,
        }
    }

    fn accepted_boot(charge_point_id: &str) -> Event {
        Event::BootNotification(BootNotificationEvent {
            charge_point_id: charge_point_id.to_string(),
            vendor: "VendorX".to_string(),
            model: "ModelY".to_string(),
            serial_number: None,
            firmware_version: None,
            status: "Accepted".to_string(),
            timestamp: Utc::now(),
        })
    }

    async fn next_call(outbound: &mut mpsc::UnboundedReceiver<Message>) -> OcppFrame {
        let message = tokio::time::timeout(Duration::from_secs(2), outbound.recv())
            .await
            .expect("no frame within deadline")
            .expect("transport closed");
        let text = match message {
            Message::Text(text) => text,
            other => panic!("expected text frame, got {:?}", other),
        };
        OcppFrame::parse(&text).expect("sent frame must parse")
    }

    #[tokio::test]
    async fn accepted_boot_triggers_config_and_list_version_reads() {
        let mut h = start_interrogator();
        // Give the event loop a chance to subscribe before publishing.
        tokio::task::yield_now().await;

        h.event_bus.publish(accepted_boot("CP001"));

        let config_call = next_call(&mut h.outbound).await;
        assert!(config_call.is_call());
        h.matcher.match_response(
            config_call.message_id(),
            CallOutcome::Result(json!({
                "configurationKey": [
                    {"key": "HeartbeatInterval", "readonly": false, "value": "300"}
                ],
                "unknownKey": []
            })),
        );

        let list_call = next_call(&mut h.outbound).await;
        assert!(list_call.is_call());
        h.matcher.match_response(
            list_call.message_id(),
            CallOutcome::Result(json!({"listVersion": 7})),
        );

        // The command side effects land once the task finishes.
        let mut cached = false;
        for _ in 0..50 {
            let config_ok = h
                .state_cache
                .configuration("CP001", "HeartbeatInterval")
                .map(|item| item.value.as_deref() == Some("300"))
                .unwrap_or(false);
            let version_ok = h
                .state_cache
                .charge_point_state("CP001")
                .map(|s| s.local_auth_list_version == Some(7))
                .unwrap_or(false);
            if config_ok && version_ok {
                cached = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(cached, "interrogation results never reached the cache");

        h.shutdown.trigger();
    }

    #[tokio::test]
    async fn rejected_boot_is_left_alone() {
        let mut h = start_interrogator();
        tokio::task::yield_now().await;

        h.event_bus.publish(Event::BootNotification(BootNotificationEvent {
            charge_point_id: "CP001".to_string(),
            vendor: "VendorX".to_string(),
            model: "ModelY".to_string(),
            serial_number: None,
            firmware_version: None,
            status: "Rejected".to_string(),
            timestamp: Utc::now(),
        }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.outbound.try_recv().is_err(), "rejected boot must not be queried");

        h.shutdown.trigger();
    }

    #[tokio::test]
    async fn offline_station_is_skipped() {
        let mut h = start_interrogator();
        tokio::task::yield_now().await;

        h.state_cache.mark_offline("CP001");
        h.event_bus.publish(accepted_boot("CP001"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.outbound.try_recv().is_err(), "offline station must not be queried");

        h.shutdown.trigger();
    }
}
