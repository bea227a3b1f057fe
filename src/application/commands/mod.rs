//! Outbound commands from the central system to charge points
//!
//! ```text
//! caller ──► v16::* (typed request/response)
//!                │
//!                ▼
//!          CommandSender ──► SessionRegistry (frame out)
//!                │
//!                └──► CallMatcher (awaits the CallResult routed
//!                     back by the message router)
//! ```
//!
//! [`CommandSender`] owns message ID generation and the send/await cycle;
//! the `v16` module wraps it with one function per OCPP 1.6 command,
//! including the state-cache bookkeeping that some responses imply.

pub mod v16;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::application::call_matcher::{CallOutcome, MatchError, PendingCall, SharedCallMatcher};
use crate::application::session::{RegistryError, SharedSessionRegistry};
use crate::application::state_cache::SharedStateCache;
use crate::config::OcppConfig;
use crate::domain::ocpp::Action;
use crate::support::ocpp_frame::OcppFrame;

// ── Common types used by the v16 command wrappers ──────────────────

/// Availability state for ChangeAvailability.
#[derive(Debug, Clone, Copy)]
pub enum Availability {
    Operative,
    Inoperative,
}

/// Reset kind for Reset.
#[derive(Debug, Clone, Copy)]
pub enum ResetKind {
    Soft,
    Hard,
}

/// Message type for TriggerMessage.
#[derive(Debug, Clone, Copy)]
pub enum TriggerType {
    BootNotification,
    DiagnosticsStatusNotification,
    FirmwareStatusNotification,
    Heartbeat,
    MeterValues,
    StatusNotification,
}

/// Result of a DataTransfer command.
#[derive(Debug)]
pub struct DataTransferResult {
    pub status: String,
    pub data: Option<String>,
}

/// A configuration key-value pair returned by GetConfiguration.
#[derive(Debug, Clone)]
pub struct KeyValue {
    pub key: String,
    pub readonly: bool,
    pub value: Option<String>,
}

/// GetConfiguration result.
#[derive(Debug)]
pub struct ConfigurationResult {
    pub configuration_key: Vec<KeyValue>,
    pub unknown_key: Vec<String>,
}

/// A single authorization entry for SendLocalList.
#[derive(Debug, Clone)]
pub struct LocalAuthEntry {
    pub id_tag: String,
    /// Authorization status: "Accepted", "Blocked", "Expired", "Invalid", etc.
    pub status: Option<String>,
    /// ISO 8601 expiry date.
    pub expiry_date: Option<String>,
    pub parent_id_tag: Option<String>,
}

/// Selection criteria for ClearChargingProfile. Empty criteria clear
/// every profile on the charge point.
#[derive(Debug, Clone, Default)]
pub struct ClearChargingProfileCriteria {
    pub charging_profile_id: Option<i32>,
    pub connector_id: Option<i32>,
    /// "ChargePointMaxProfile", "TxDefaultProfile" or "TxProfile".
    pub charging_profile_purpose: Option<String>,
    pub stack_level: Option<i32>,
}

/// Result of a GetCompositeSchedule command.
#[derive(Debug)]
pub struct CompositeScheduleResult {
    /// Status: "Accepted" or "Rejected".
    pub status: String,
    /// The composite schedule as raw JSON.
    pub schedule: Option<Value>,
    pub connector_id: Option<i32>,
    /// Schedule start as ISO 8601.
    pub schedule_start: Option<String>,
}

// ── Re-exports ─────────────────────────────────────────────────────

pub use v16::cancel_reservation::cancel_reservation;
pub use v16::change_availability::change_availability;
pub use v16::change_configuration::change_configuration;
pub use v16::clear_cache::clear_cache;
pub use v16::clear_charging_profile::clear_charging_profile;
pub use v16::data_transfer::data_transfer;
pub use v16::get_composite_schedule::get_composite_schedule;
pub use v16::get_configuration::get_configuration;
pub use v16::get_diagnostics::get_diagnostics;
pub use v16::get_local_list_version::get_local_list_version;
pub use v16::remote_start::remote_start_transaction;
pub use v16::remote_stop::remote_stop_transaction;
pub use v16::reserve_now::reserve_now;
pub use v16::reset::reset;
pub use v16::send_local_list::send_local_list;
pub use v16::set_charging_profile::set_charging_profile;
pub use v16::trigger_message::trigger_message;
pub use v16::unlock_connector::unlock_connector;
pub use v16::update_firmware::update_firmware;

/// Command sender errors
#[derive(Debug, Clone)]
pub enum CommandError {
    /// Charge point not connected
    NotConnected(String),
    /// Failed to send message
    SendFailed(String),
    /// Response timeout
    Timeout,
    /// Invalid response
    InvalidResponse(String),
    /// Charge point returned a CallError
    CallError { code: String, description: String },
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected(id) => write!(f, "Charge point not connected: {}", id),
            Self::SendFailed(msg) => write!(f, "Failed to send: {}", msg),
            Self::Timeout => write!(f, "Response timeout"),
            Self::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            Self::CallError { code, description } => {
                write!(f, "CallError {}: {}", code, description)
            }
        }
    }
}

impl std::error::Error for CommandError {}

/// Sends OCPP Calls to charge points and awaits their responses.
pub struct CommandSender {
    registry: SharedSessionRegistry,
    call_matcher: SharedCallMatcher,
    state_cache: SharedStateCache,
    config: OcppConfig,
    message_counter: AtomicU64,
}

impl CommandSender {
    pub fn new(
        registry: SharedSessionRegistry,
        call_matcher: SharedCallMatcher,
        state_cache: SharedStateCache,
        config: OcppConfig,
    ) -> Self {
        Self {
            registry,
            call_matcher,
            state_cache,
            config,
            message_counter: AtomicU64::new(1),
        }
    }

    fn generate_message_id(&self) -> String {
        let id = self.message_counter.fetch_add(1, Ordering::SeqCst);
        format!("CS-{}", id)
    }

    pub(crate) fn state_cache(&self) -> &SharedStateCache {
        &self.state_cache
    }

    /// Send one Call to a charge point and wait for the matching
    /// CallResult payload.
    ///
    /// The frame is registered with the call matcher before it goes out,
    /// so a response racing the send still finds its waiter. A send
    /// failure unregisters the call immediately.
    pub async fn send_command(
        &self,
        charge_point_id: &str,
        action: Action,
        payload: Value,
    ) -> Result<Value, CommandError> {
        let message_id = self.generate_message_id();
        let frame = OcppFrame::call(message_id.clone(), action.name(), payload);

        let pending = PendingCall::new(
            message_id.clone(),
            charge_point_id,
            action.name(),
            self.config.command_timeout(),
        );
        let handle = self
            .call_matcher
            .register(pending)
            .map_err(|err| CommandError::SendFailed(err.to_string()))?;

        info!(
            charge_point_id,
            action = action.name(),
            message_id = message_id.as_str(),
            "Sending command"
        );
        metrics::counter!("ocpp_commands_sent_total", "action" => action.name()).increment(1);

        if let Err(err) = self.registry.send_to(charge_point_id, frame.serialize()) {
            self.call_matcher
                .match_response(&message_id, CallOutcome::Cancelled);
            drop(handle);
            return Err(match err {
                RegistryError::SendFailed(id) => CommandError::SendFailed(id),
                other => CommandError::NotConnected(other.to_string()),
            });
        }

        match self.call_matcher.wait(handle).await {
            Ok(payload) => Ok(payload),
            Err(MatchError::Timeout { .. }) => Err(CommandError::Timeout),
            Err(MatchError::Cancelled) => {
                warn!(
                    charge_point_id,
                    action = action.name(),
                    message_id = message_id.as_str(),
                    "Command cancelled, connection lost"
                );
                Err(CommandError::NotConnected(charge_point_id.to_string()))
            }
            Err(MatchError::PeerError {
                code,
                description,
                details,
            }) => {
                warn!(
                    charge_point_id,
                    action = action.name(),
                    code = code.as_str(),
                    description = description.as_str(),
                    details = %details,
                    "Command rejected by charge point"
                );
                Err(CommandError::CallError { code, description })
            }
            Err(other) => Err(CommandError::InvalidResponse(other.to_string())),
        }
    }
}

/// Thread-safe command sender
pub type SharedCommandSender = Arc<CommandSender>;

pub fn create_command_sender(
    registry: SharedSessionRegistry,
    call_matcher: SharedCallMatcher,
    state_cache: SharedStateCache,
    config: OcppConfig,
) -> SharedCommandSender {
    Arc::new(CommandSender::new(
        registry,
        call_matcher,
        state_cache,
        config,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    use crate::application::call_matcher::create_call_matcher;
    use crate::application::session::create_session_registry;
    use crate::application::state_cache::create_state_cache;
    use crate::domain::ocpp::OcppVersion;
    use crate::notifications::create_event_bus;

    struct Harness {
        sender: SharedCommandSender,
        matcher: SharedCallMatcher,
        outbound: mpsc::UnboundedReceiver<Message>,
    }

    fn harness(config: OcppConfig) -> Harness {
        let registry = create_session_registry(config.clone(), create_event_bus());
        let matcher = create_call_matcher();
        let (tx, outbound) = mpsc::unbounded_channel();
        registry
            .add_session("CP001", OcppVersion::V16, tx, None, true)
            .expect("admission failed");
        let sender = create_command_sender(
            registry,
            Arc::clone(&matcher),
            create_state_cache(),
            config,
        );
        Harness {
            sender,
            matcher,
            outbound,
        }
    }

    fn sent_frame(outbound: &mut mpsc::UnboundedReceiver<Message>) -> OcppFrame {
        let message = outbound.try_recv().expect("no frame sent");
        let text = match message {
            Message::Text(text) => text,
            other => panic!("expected text frame, got {:?}", other),
        };
        OcppFrame::parse(&text).expect("sent frame must parse")
    }

    #[tokio::test]
    async fn command_round_trip_delivers_response_payload() {
        let mut h = harness(OcppConfig::default());

        let send = tokio::spawn({
            let sender = Arc::clone(&h.sender);
            async move {
                sender
                    .send_command("CP001", Action::Reset, json!({"type": "Soft"}))
                    .await
            }
        });

        // The frame goes out before the waiter resolves.
        tokio::task::yield_now().await;
        let frame = sent_frame(&mut h.outbound);
        assert!(frame.is_call());
        let message_id = frame.message_id().to_string();
        assert!(message_id.starts_with("CS-"));

        assert!(h
            .matcher
            .match_response(&message_id, CallOutcome::Result(json!({"status": "Accepted"}))));

        let payload = send.await.unwrap().unwrap();
        assert_eq!(payload["status"], "Accepted");
    }

    #[tokio::test]
    async fn message_ids_increment_per_command() {
        let mut h = harness(OcppConfig::default());

        for expected in ["CS-1", "CS-2"] {
            let send = tokio::spawn({
                let sender = Arc::clone(&h.sender);
                async move { sender.send_command("CP001", Action::ClearCache, json!({})).await }
            });
            tokio::task::yield_now().await;
            let frame = sent_frame(&mut h.outbound);
            assert_eq!(frame.message_id(), expected);
            h.matcher
                .match_response(frame.message_id(), CallOutcome::Result(json!({})));
            send.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn unknown_charge_point_fails_without_waiting() {
        let h = harness(OcppConfig::default());
        let result = h
            .sender
            .send_command("CP-ghost", Action::ClearCache, json!({}))
            .await;
        assert!(matches!(result, Err(CommandError::NotConnected(_))));
        // The registered call was unwound.
        assert_eq!(h.matcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn peer_call_error_surfaces_code_and_description() {
        let mut h = harness(OcppConfig::default());

        let send = tokio::spawn({
            let sender = Arc::clone(&h.sender);
            async move {
                sender
                    .send_command("CP001", Action::UnlockConnector, json!({"connectorId": 1}))
                    .await
            }
        });
        tokio::task::yield_now().await;
        let frame = sent_frame(&mut h.outbound);

        h.matcher.match_response(
            frame.message_id(),
            CallOutcome::PeerError {
                code: "NotSupported".to_string(),
                description: "no unlock hardware".to_string(),
                details: json!({}),
            },
        );

        match send.await.unwrap() {
            Err(CommandError::CallError { code, description }) => {
                assert_eq!(code, "NotSupported");
                assert_eq!(description, "no unlock hardware");
            }
            other => panic!("expected CallError, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn silent_charge_point_times_out() {
        let config = OcppConfig {
            command_response_timeout: 0,
            ..OcppConfig::default()
        };
        let mut h = harness(config);

        let result = h
            .sender
            .send_command("CP001", Action::ClearCache, json!({}))
            .await;
        assert!(matches!(result, Err(CommandError::Timeout)));
        // The frame did go out; nobody answered.
        assert!(sent_frame(&mut h.outbound).is_call());
        assert_eq!(h.matcher.pending_count(), 0);
    }
}
