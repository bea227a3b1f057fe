//! OCPP 1.6 message router
//!
//! One handler per connection. Text frames from the socket pump land here:
//! Calls are decoded, gated, and dispatched to the per-action handlers,
//! CallResult/CallError frames are matched against pending outbound
//! commands. Malformed frames get a structured CallError back instead of
//! silently dropping the session.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::application::call_matcher::{CallOutcome, SharedCallMatcher};
use crate::application::handlers::dispatcher::SharedRequestDispatcher;
use crate::application::handlers::ocpp::dispatch_action;
use crate::application::session::Session;
use crate::domain::ocpp::Action;
use crate::support::ocpp_frame::{error_code, OcppFrame};

/// Handler for OCPP 1.6 messages on one session.
pub struct OcppHandler {
    pub session: Arc<Session>,
    pub dispatcher: SharedRequestDispatcher,
    pub call_matcher: SharedCallMatcher,
}

impl OcppHandler {
    pub fn new(
        session: Arc<Session>,
        dispatcher: SharedRequestDispatcher,
        call_matcher: SharedCallMatcher,
    ) -> Self {
        Self {
            session,
            dispatcher,
            call_matcher,
        }
    }

    pub fn charge_point_id(&self) -> &str {
        &self.session.charge_point_id
    }

    /// Process one inbound text frame. Returns the JSON to send back, if
    /// the frame warrants a response.
    pub async fn handle(&self, text: &str) -> Option<String> {
        self.session.record_received();
        metrics::counter!("ocpp_messages_received_total").increment(1);
        debug!(
            charge_point_id = self.charge_point_id(),
            "Received raw message: {}", text
        );

        let frame = match OcppFrame::parse(text) {
            Ok(frame) => frame,
            Err(parse_err) => {
                warn!(
                    charge_point_id = self.charge_point_id(),
                    error = %parse_err,
                    "Standard parser failed, trying fallback sanitizer..."
                );
                match sanitize_and_parse(text) {
                    Some(frame) => {
                        info!(
                            charge_point_id = self.charge_point_id(),
                            "Fallback parser succeeded"
                        );
                        frame
                    }
                    None => {
                        error!(
                            charge_point_id = self.charge_point_id(),
                            error = %parse_err,
                            raw = text,
                            "Failed to parse OCPP message even after sanitization"
                        );
                        let message_id = recover_message_id(text).unwrap_or_default();
                        let response = OcppFrame::error_response(
                            message_id,
                            error_code::PROTOCOL_ERROR,
                            parse_err.to_string(),
                        );
                        return Some(response.serialize());
                    }
                }
            }
        };

        if self.dispatcher.config.schema_validation {
            if let Err(shape_err) = frame.validate_shape() {
                warn!(
                    charge_point_id = self.charge_point_id(),
                    error = %shape_err,
                    "Frame failed shape validation"
                );
                // Only Calls are answered; a sloppy response still feeds
                // the matcher below.
                if frame.is_call() {
                    let response = OcppFrame::error_response(
                        frame.message_id(),
                        error_code::FORMATION_VIOLATION,
                        shape_err.to_string(),
                    );
                    return Some(response.serialize());
                }
            }
        }

        match frame {
            OcppFrame::Call {
                message_id,
                action,
                payload,
            } => {
                let response = self.handle_call(message_id, &action, payload).await;
                Some(response.serialize())
            }
            OcppFrame::CallResult {
                message_id,
                payload,
            } => {
                debug!(
                    charge_point_id = self.charge_point_id(),
                    message_id = message_id.as_str(),
                    "Received CallResult"
                );
                let payload = if payload.is_null() {
                    serde_json::json!({})
                } else {
                    payload
                };
                if !self
                    .call_matcher
                    .match_response(&message_id, CallOutcome::Result(payload))
                {
                    debug!(
                        charge_point_id = self.charge_point_id(),
                        message_id = message_id.as_str(),
                        "CallResult matched no pending call"
                    );
                }
                None
            }
            OcppFrame::CallError {
                message_id,
                error_code,
                error_description,
                error_details,
            } => {
                warn!(
                    charge_point_id = self.charge_point_id(),
                    message_id = message_id.as_str(),
                    error_code = error_code.as_str(),
                    error_description = error_description.as_str(),
                    "Received CallError"
                );
                self.call_matcher.match_response(
                    &message_id,
                    CallOutcome::PeerError {
                        code: error_code,
                        description: error_description,
                        details: error_details,
                    },
                );
                None
            }
        }
    }

    async fn handle_call(&self, message_id: String, action_name: &str, payload: Value) -> OcppFrame {
        info!(
            charge_point_id = self.charge_point_id(),
            message_id = message_id.as_str(),
            action = action_name,
            "Received Call"
        );

        let Some(action) = Action::from_name(action_name) else {
            warn!(
                charge_point_id = self.charge_point_id(),
                action = action_name,
                "Unknown action"
            );
            metrics::counter!("ocpp_unknown_actions_total").increment(1);
            return OcppFrame::error_response(
                message_id,
                error_code::NOT_SUPPORTED,
                format!("Action {action_name} is not supported"),
            );
        };

        // Nothing but BootNotification passes before the station verifies.
        if !self.session.is_verified() && action != Action::BootNotification {
            warn!(
                charge_point_id = self.charge_point_id(),
                action = %action,
                "Rejected request from unverified charge point"
            );
            return OcppFrame::error_response(
                message_id,
                error_code::SECURITY_ERROR,
                "BootNotification required",
            );
        }

        if !action.charge_point_initiated() {
            warn!(
                charge_point_id = self.charge_point_id(),
                action = %action,
                "Central-system action sent by a charge point"
            );
            return OcppFrame::error_response(
                message_id,
                error_code::NOT_IMPLEMENTED,
                format!("{action} is not accepted from a charge point"),
            );
        }

        metrics::counter!("ocpp_calls_total", "action" => action.name()).increment(1);
        dispatch_action(self, action, message_id, payload).await
    }

    /// Decode a Call payload into its typed request. Null integer fields
    /// from sloppy firmware get one defaulted retry; anything else is the
    /// station's fault and maps to FormationViolation.
    pub(super) fn decode_payload<T: DeserializeOwned>(
        &self,
        message_id: &str,
        action: Action,
        mut payload: Value,
    ) -> Result<T, OcppFrame> {
        let err = match serde_json::from_value(payload.clone()) {
            Ok(request) => return Ok(request),
            Err(err) => err,
        };

        if sanitize_payload_nulls(action, &mut payload) {
            if let Ok(request) = serde_json::from_value(payload) {
                info!(
                    charge_point_id = self.charge_point_id(),
                    action = %action,
                    "Recovered malformed payload by defaulting null fields"
                );
                return Ok(request);
            }
        }

        warn!(
            charge_point_id = self.charge_point_id(),
            action = %action,
            error = %err,
            "Malformed payload"
        );
        Err(OcppFrame::error_response(
            message_id,
            error_code::FORMATION_VIOLATION,
            format!("Invalid {action} payload: {err}"),
        ))
    }

    pub(super) fn encode_response<T: Serialize>(
        &self,
        message_id: String,
        response: &T,
    ) -> OcppFrame {
        match serde_json::to_value(response) {
            Ok(payload) => OcppFrame::call_result(message_id, payload),
            Err(err) => {
                error!(
                    charge_point_id = self.charge_point_id(),
                    error = %err,
                    "Failed to serialize response"
                );
                OcppFrame::error_response(
                    message_id,
                    error_code::INTERNAL_ERROR,
                    "Error serializing response",
                )
            }
        }
    }
}

/// Best-effort repair of frames from non-conformant firmware: pad short
/// CallResult/CallError arrays and replace nulls in fields the decoder
/// requires. Anything still broken afterwards is rejected.
fn sanitize_and_parse(text: &str) -> Option<OcppFrame> {
    let mut value: Value = serde_json::from_str(text).ok()?;
    let arr = value.as_array_mut()?;
    let msg_type = arr.first()?.as_u64()?;

    if msg_type == 3 {
        while arr.len() < 3 {
            arr.push(serde_json::json!({}));
        }
        if arr.get(2).map_or(false, |v| v.is_null()) {
            arr[2] = serde_json::json!({});
        }
    }

    if msg_type == 4 {
        let unique_id = arr.get(1).cloned().unwrap_or(serde_json::json!("unknown"));
        while arr.len() < 5 {
            match arr.len() {
                2 => {
                    warn!(
                        "Sanitizer: CallError missing errorCode for {}, defaulting to NotImplemented",
                        unique_id
                    );
                    arr.push(serde_json::json!(error_code::NOT_IMPLEMENTED));
                }
                3 => arr.push(serde_json::json!("")),
                4 => arr.push(serde_json::json!({})),
                _ => break,
            }
        }
    }

    if msg_type == 2 && arr.len() >= 4 {
        let action = arr.get(2).and_then(|a| a.as_str()).and_then(Action::from_name);
        let payload = arr.get_mut(3)?;
        if payload.is_null() {
            *payload = serde_json::json!({});
        }
        if let Some(action) = action {
            sanitize_payload_nulls(action, payload);
        }
    }

    let sanitized = serde_json::to_string(&value).ok()?;
    OcppFrame::parse(&sanitized).ok()
}

/// Replace null integer fields some firmwares send where the schema
/// requires a number. Returns true when a default was substituted.
fn sanitize_payload_nulls(action: Action, payload: &mut Value) -> bool {
    let Some(obj) = payload.as_object_mut() else {
        return false;
    };
    let fields: &[&str] = match action {
        Action::StopTransaction => &["transactionId", "meterStop"],
        Action::StartTransaction => &["meterStart", "connectorId"],
        Action::MeterValues | Action::StatusNotification => &["connectorId"],
        _ => return false,
    };
    let mut repaired = false;
    for field in fields {
        if obj.get(*field).map_or(false, |v| v.is_null()) {
            obj.insert((*field).to_string(), Value::Number(0.into()));
            repaired = true;
        }
    }
    repaired
}

/// Pull the message ID out of an otherwise unparseable frame so the error
/// response still correlates.
fn recover_message_id(text: &str) -> Option<String> {
    let value: Value = serde_json::from_str(text).ok()?;
    value
        .as_array()?
        .get(1)?
        .as_str()
        .map(|id| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::call_matcher::{create_call_matcher, MatchError, PendingCall};
    use crate::application::handlers::dispatcher::create_request_dispatcher;
    use crate::application::state_cache::create_state_cache;
    use crate::config::OcppConfig;
    use crate::domain::ocpp::OcppVersion;
    use crate::notifications::create_event_bus;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn test_handler(verified: bool) -> OcppHandler {
        let (tx, _rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new("CP001", OcppVersion::V16, tx, None, verified));
        let state_cache = create_state_cache();
        let event_bus = create_event_bus();
        let dispatcher = create_request_dispatcher(state_cache, event_bus, OcppConfig::default());
        let call_matcher = create_call_matcher();
        OcppHandler::new(session, dispatcher, call_matcher)
    }

    fn parse_response(json: &str) -> Value {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn boot_notification_is_processed_before_verification() {
        let handler = test_handler(false);
        let request = r#"[2,"1","BootNotification",{"chargePointVendor":"ACME","chargePointModel":"X1"}]"#;

        let response = handler.handle(request).await.unwrap();
        let value = parse_response(&response);

        assert_eq!(value[0], 3);
        assert_eq!(value[1], "1");
        assert_eq!(value[2]["status"], "Accepted");
        assert!(handler.session.is_verified());
    }

    #[tokio::test]
    async fn unverified_heartbeat_is_rejected_with_security_error() {
        let handler = test_handler(false);

        let response = handler.handle(r#"[2,"7","Heartbeat",{}]"#).await.unwrap();
        let value = parse_response(&response);

        assert_eq!(value[0], 4);
        assert_eq!(value[1], "7");
        assert_eq!(value[2], error_code::SECURITY_ERROR);
        assert_eq!(value[3], "BootNotification required");
    }

    #[tokio::test]
    async fn verified_heartbeat_returns_current_time() {
        let handler = test_handler(true);

        let response = handler.handle(r#"[2,"8","Heartbeat",{}]"#).await.unwrap();
        let value = parse_response(&response);

        assert_eq!(value[0], 3);
        assert!(value[2]["currentTime"].is_string());
    }

    #[tokio::test]
    async fn unknown_action_yields_not_supported() {
        let handler = test_handler(true);

        let response = handler
            .handle(r#"[2,"9","FluxCapacitorNotification",{}]"#)
            .await
            .unwrap();
        let value = parse_response(&response);

        assert_eq!(value[0], 4);
        assert_eq!(value[2], error_code::NOT_SUPPORTED);
    }

    #[tokio::test]
    async fn central_system_action_from_charge_point_yields_not_implemented() {
        let handler = test_handler(true);

        let response = handler
            .handle(r#"[2,"10","RemoteStartTransaction",{"idTag":"TAG1"}]"#)
            .await
            .unwrap();
        let value = parse_response(&response);

        assert_eq!(value[0], 4);
        assert_eq!(value[2], error_code::NOT_IMPLEMENTED);
    }

    #[tokio::test]
    async fn malformed_payload_yields_formation_violation() {
        let handler = test_handler(true);

        // connectorId must be an integer
        let response = handler
            .handle(r#"[2,"11","StatusNotification",{"connectorId":"one","errorCode":"NoError","status":"Available"}]"#)
            .await
            .unwrap();
        let value = parse_response(&response);

        assert_eq!(value[0], 4);
        assert_eq!(value[2], error_code::FORMATION_VIOLATION);
    }

    #[tokio::test]
    async fn unparseable_message_yields_protocol_error() {
        let handler = test_handler(true);

        let response = handler.handle("not even json").await.unwrap();
        let value = parse_response(&response);

        assert_eq!(value[0], 4);
        assert_eq!(value[1], "");
        assert_eq!(value[2], error_code::PROTOCOL_ERROR);
    }

    #[tokio::test]
    async fn sanitizer_recovers_null_meter_stop() {
        let handler = test_handler(true);

        let request = r#"[2,"12","StopTransaction",{"transactionId":null,"meterStop":null,"timestamp":"2024-01-01T12:00:00Z"}]"#;
        let response = handler.handle(request).await.unwrap();
        let value = parse_response(&response);

        assert_eq!(value[0], 3);
        assert_eq!(value[1], "12");
    }

    #[tokio::test]
    async fn call_result_is_routed_to_the_call_matcher() {
        let handler = test_handler(true);
        let pending = PendingCall::new("CS-1", "CP001", "Reset", Duration::from_secs(1));
        let handle = handler.call_matcher.register(pending).unwrap();

        let response = handler.handle(r#"[3,"CS-1",{"status":"Accepted"}]"#).await;
        assert!(response.is_none());

        let payload = handler.call_matcher.wait(handle).await.unwrap();
        assert_eq!(payload["status"], "Accepted");
    }

    #[tokio::test]
    async fn call_error_is_routed_to_the_call_matcher() {
        let handler = test_handler(true);
        let pending = PendingCall::new("CS-2", "CP001", "Reset", Duration::from_secs(1));
        let handle = handler.call_matcher.register(pending).unwrap();

        let response = handler
            .handle(r#"[4,"CS-2","InternalError","station fault",{}]"#)
            .await;
        assert!(response.is_none());

        match handler.call_matcher.wait(handle).await {
            Err(MatchError::PeerError { code, description, .. }) => {
                assert_eq!(code, "InternalError");
                assert_eq!(description, "station fault");
            }
            other => panic!("Expected PeerError, got {:?}", other.map(|_| ())),
        }
    }
}
