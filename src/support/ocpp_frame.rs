//! OCPP-J message framing
//!
//! Implements the OCPP-J (JSON over WebSocket) transport framing used by
//! OCPP 1.6. Every frame is a JSON array whose first element selects the
//! shape, and each shape has a fixed element count:
//!
//! - **Call**       `[2, "<messageId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<messageId>", {<payload>}]`
//! - **CallError**  `[4, "<messageId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`
//!
//! Arrays with a different element count are rejected outright; the peer
//! gets a `ProtocolError` CallError from the router rather than a
//! best-effort interpretation.

use serde_json::Value;
use thiserror::Error;

// ── Message-type constants ─────────────────────────────────────

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

/// Standard OCPP-J error codes for the third element of a CallError.
pub mod error_code {
    pub const NOT_IMPLEMENTED: &str = "NotImplemented";
    pub const NOT_SUPPORTED: &str = "NotSupported";
    pub const INTERNAL_ERROR: &str = "InternalError";
    pub const PROTOCOL_ERROR: &str = "ProtocolError";
    pub const SECURITY_ERROR: &str = "SecurityError";
    pub const FORMATION_VIOLATION: &str = "FormationViolation";
    pub const PROPERTY_CONSTRAINT_VIOLATION: &str = "PropertyConstraintViolation";
    pub const OCCURRENCE_CONSTRAINT_VIOLATION: &str = "OccurrenceConstraintViolation";
    pub const TYPE_CONSTRAINT_VIOLATION: &str = "TypeConstraintViolation";
    pub const GENERIC_ERROR: &str = "GenericError";
}

// ── OcppFrame ──────────────────────────────────────────────────

/// A parsed OCPP-J frame (transport envelope, payload left as raw JSON).
#[derive(Debug, Clone)]
pub enum OcppFrame {
    /// `[2, messageId, action, payload]`
    Call {
        message_id: String,
        action: String,
        payload: Value,
    },
    /// `[3, messageId, payload]`
    CallResult {
        message_id: String,
        payload: Value,
    },
    /// `[4, messageId, errorCode, errorDescription, errorDetails]`
    CallError {
        message_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    // ── Parsing ────────────────────────────────────────────

    /// Parse a raw JSON text into an `OcppFrame`.
    pub fn parse(text: &str) -> Result<Self, OcppFrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| OcppFrameError::InvalidJson(e.to_string()))?;

        let arr = value.as_array().ok_or(OcppFrameError::NotAnArray)?;
        if arr.is_empty() {
            return Err(OcppFrameError::EmptyArray);
        }

        let msg_type = arr[0]
            .as_u64()
            .ok_or(OcppFrameError::InvalidMessageType)?;

        match msg_type {
            MSG_TYPE_CALL => Self::parse_call(arr),
            MSG_TYPE_CALL_RESULT => Self::parse_call_result(arr),
            MSG_TYPE_CALL_ERROR => Self::parse_call_error(arr),
            _ => Err(OcppFrameError::UnknownMessageType(msg_type)),
        }
    }

    fn parse_call(arr: &[Value]) -> Result<Self, OcppFrameError> {
        if arr.len() != 4 {
            return Err(OcppFrameError::ElementCount {
                kind: "Call",
                expected: 4,
                got: arr.len(),
            });
        }

        let message_id = arr[1]
            .as_str()
            .ok_or(OcppFrameError::FieldType("messageId must be a string"))?
            .to_string();
        let action = arr[2]
            .as_str()
            .ok_or(OcppFrameError::FieldType("action must be a string"))?
            .to_string();
        let payload = arr[3].clone();

        Ok(Self::Call {
            message_id,
            action,
            payload,
        })
    }

    fn parse_call_result(arr: &[Value]) -> Result<Self, OcppFrameError> {
        if arr.len() != 3 {
            return Err(OcppFrameError::ElementCount {
                kind: "CallResult",
                expected: 3,
                got: arr.len(),
            });
        }

        let message_id = arr[1]
            .as_str()
            .ok_or(OcppFrameError::FieldType("messageId must be a string"))?
            .to_string();
        let payload = arr[2].clone();

        Ok(Self::CallResult {
            message_id,
            payload,
        })
    }

    fn parse_call_error(arr: &[Value]) -> Result<Self, OcppFrameError> {
        if arr.len() != 5 {
            return Err(OcppFrameError::ElementCount {
                kind: "CallError",
                expected: 5,
                got: arr.len(),
            });
        }

        let message_id = arr[1]
            .as_str()
            .ok_or(OcppFrameError::FieldType("messageId must be a string"))?
            .to_string();
        let error_code = arr[2]
            .as_str()
            .ok_or(OcppFrameError::FieldType("errorCode must be a string"))?
            .to_string();
        let error_description = arr[3]
            .as_str()
            .ok_or(OcppFrameError::FieldType("errorDescription must be a string"))?
            .to_string();
        let error_details = arr[4].clone();

        Ok(Self::CallError {
            message_id,
            error_code,
            error_description,
            error_details,
        })
    }

    // ── Shape validation ───────────────────────────────────

    /// Structural checks beyond the array shape: non-empty identifiers and
    /// object payloads. Applied to inbound frames when `schema_validation`
    /// is enabled in the config.
    pub fn validate_shape(&self) -> Result<(), OcppFrameError> {
        match self {
            Self::Call {
                message_id,
                action,
                payload,
            } => {
                if message_id.is_empty() {
                    return Err(OcppFrameError::FieldType("messageId must not be empty"));
                }
                if action.is_empty() {
                    return Err(OcppFrameError::FieldType("action must not be empty"));
                }
                if !payload.is_object() {
                    return Err(OcppFrameError::PayloadNotObject);
                }
                Ok(())
            }
            Self::CallResult {
                message_id,
                payload,
            } => {
                if message_id.is_empty() {
                    return Err(OcppFrameError::FieldType("messageId must not be empty"));
                }
                if !payload.is_object() {
                    return Err(OcppFrameError::PayloadNotObject);
                }
                Ok(())
            }
            Self::CallError {
                message_id,
                error_code,
                error_details,
                ..
            } => {
                if message_id.is_empty() {
                    return Err(OcppFrameError::FieldType("messageId must not be empty"));
                }
                if error_code.is_empty() {
                    return Err(OcppFrameError::FieldType("errorCode must not be empty"));
                }
                if !error_details.is_object() {
                    return Err(OcppFrameError::PayloadNotObject);
                }
                Ok(())
            }
        }
    }

    // ── Serialization ──────────────────────────────────────

    /// Serialize this frame to a JSON string.
    pub fn serialize(&self) -> String {
        let arr: Value = match self {
            Self::Call {
                message_id,
                action,
                payload,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL.into()),
                Value::String(message_id.clone()),
                Value::String(action.clone()),
                payload.clone(),
            ]),

            Self::CallResult {
                message_id,
                payload,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_RESULT.into()),
                Value::String(message_id.clone()),
                payload.clone(),
            ]),

            Self::CallError {
                message_id,
                error_code,
                error_description,
                error_details,
            } => Value::Array(vec![
                Value::Number(MSG_TYPE_CALL_ERROR.into()),
                Value::String(message_id.clone()),
                Value::String(error_code.clone()),
                Value::String(error_description.clone()),
                error_details.clone(),
            ]),
        };

        // serde_json::to_string on a Value never fails
        serde_json::to_string(&arr).unwrap()
    }

    // ── Constructors / helpers ─────────────────────────────

    /// Create a `Call` frame.
    pub fn call(
        message_id: impl Into<String>,
        action: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self::Call {
            message_id: message_id.into(),
            action: action.into(),
            payload,
        }
    }

    /// Create a `CallResult` answering the given message ID.
    pub fn call_result(message_id: impl Into<String>, payload: Value) -> Self {
        Self::CallResult {
            message_id: message_id.into(),
            payload,
        }
    }

    /// Create a `CallError` answering the given message ID, with empty details.
    pub fn error_response(
        message_id: impl Into<String>,
        error_code: impl Into<String>,
        error_description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            message_id: message_id.into(),
            error_code: error_code.into(),
            error_description: error_description.into(),
            error_details: Value::Object(Default::default()),
        }
    }

    /// Get the unique message ID.
    pub fn message_id(&self) -> &str {
        match self {
            Self::Call { message_id, .. }
            | Self::CallResult { message_id, .. }
            | Self::CallError { message_id, .. } => message_id,
        }
    }

    /// Returns `true` if this is a `Call` frame.
    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }

    /// Returns `true` if this is a `CallResult` frame.
    pub fn is_call_result(&self) -> bool {
        matches!(self, Self::CallResult { .. })
    }

    /// Returns `true` if this is a `CallError` frame.
    pub fn is_call_error(&self) -> bool {
        matches!(self, Self::CallError { .. })
    }
}

// ── Errors ─────────────────────────────────────────────────────

/// Errors that can occur when parsing an OCPP-J frame.
#[derive(Debug, Error)]
pub enum OcppFrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("OCPP message must be a JSON array")]
    NotAnArray,
    #[error("Empty OCPP message array")]
    EmptyArray,
    #[error("Message type is not an integer")]
    InvalidMessageType,
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),
    #[error("{kind} must have exactly {expected} elements, got {got}")]
    ElementCount {
        kind: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("Field type mismatch: {0}")]
    FieldType(&'static str),
    #[error("Payload must be a JSON object")]
    PayloadNotObject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_call() {
        let text = r#"[2,"abc123","BootNotification",{"chargePointVendor":"Vendor","chargePointModel":"Model"}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::Call {
                message_id,
                action,
                payload,
            } => {
                assert_eq!(message_id, "abc123");
                assert_eq!(action, "BootNotification");
                assert_eq!(payload["chargePointVendor"], "Vendor");
            }
            _ => panic!("Expected Call frame"),
        }
    }

    #[test]
    fn parse_call_result() {
        let text = r#"[3,"abc123",{"status":"Accepted","currentTime":"2024-01-01T00:00:00Z","interval":300}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::CallResult { message_id, payload } => {
                assert_eq!(message_id, "abc123");
                assert_eq!(payload["status"], "Accepted");
            }
            _ => panic!("Expected CallResult frame"),
        }
    }

    #[test]
    fn parse_call_error() {
        let text = r#"[4,"abc123","NotImplemented","Action not supported",{}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::CallError {
                message_id,
                error_code,
                error_description,
                ..
            } => {
                assert_eq!(message_id, "abc123");
                assert_eq!(error_code, "NotImplemented");
                assert_eq!(error_description, "Action not supported");
            }
            _ => panic!("Expected CallError frame"),
        }
    }

    #[test]
    fn call_with_wrong_element_count_rejected() {
        // Three elements is a CallResult shape, five is past a Call.
        let short = r#"[2,"id1","Heartbeat"]"#;
        assert!(matches!(
            OcppFrame::parse(short),
            Err(OcppFrameError::ElementCount { expected: 4, got: 3, .. })
        ));

        let long = r#"[2,"id1","Heartbeat",{},{}]"#;
        assert!(matches!(
            OcppFrame::parse(long),
            Err(OcppFrameError::ElementCount { expected: 4, got: 5, .. })
        ));
    }

    #[test]
    fn call_result_with_wrong_element_count_rejected() {
        let long = r#"[3,"id1",{},{}]"#;
        assert!(matches!(
            OcppFrame::parse(long),
            Err(OcppFrameError::ElementCount { expected: 3, got: 4, .. })
        ));
    }

    #[test]
    fn call_error_with_wrong_element_count_rejected() {
        let short = r#"[4,"id1","GenericError","oops"]"#;
        assert!(matches!(
            OcppFrame::parse(short),
            Err(OcppFrameError::ElementCount { expected: 5, got: 4, .. })
        ));
    }

    #[test]
    fn unknown_message_type_rejected() {
        let text = r#"[5,"id1",{}]"#;
        assert!(matches!(
            OcppFrame::parse(text),
            Err(OcppFrameError::UnknownMessageType(5))
        ));
    }

    #[test]
    fn non_array_rejected() {
        assert!(matches!(
            OcppFrame::parse(r#"{"messageType":2}"#),
            Err(OcppFrameError::NotAnArray)
        ));
        assert!(matches!(
            OcppFrame::parse("not json at all"),
            Err(OcppFrameError::InvalidJson(_))
        ));
    }

    #[test]
    fn non_string_message_id_rejected() {
        let text = r#"[2,42,"Heartbeat",{}]"#;
        assert!(matches!(
            OcppFrame::parse(text),
            Err(OcppFrameError::FieldType(_))
        ));
    }

    #[test]
    fn shape_validation_requires_object_payload() {
        let frame = OcppFrame::call("id1", "Heartbeat", serde_json::json!([1, 2]));
        assert!(matches!(
            frame.validate_shape(),
            Err(OcppFrameError::PayloadNotObject)
        ));

        let frame = OcppFrame::call("id1", "Heartbeat", serde_json::json!({}));
        assert!(frame.validate_shape().is_ok());
    }

    #[test]
    fn shape_validation_rejects_empty_identifiers() {
        let frame = OcppFrame::call("", "Heartbeat", serde_json::json!({}));
        assert!(frame.validate_shape().is_err());

        let frame = OcppFrame::call("id1", "", serde_json::json!({}));
        assert!(frame.validate_shape().is_err());
    }

    #[test]
    fn roundtrip_call() {
        let frame = OcppFrame::call("id1", "Heartbeat", serde_json::json!({}));
        let json = frame.serialize();
        let parsed = OcppFrame::parse(&json).unwrap();
        assert!(parsed.is_call());
        assert_eq!(parsed.message_id(), "id1");
    }

    #[test]
    fn roundtrip_call_result() {
        let frame = OcppFrame::call_result(
            "id2",
            serde_json::json!({"currentTime": "2024-01-01T00:00:00Z"}),
        );
        let json = frame.serialize();
        let parsed = OcppFrame::parse(&json).unwrap();
        assert!(parsed.is_call_result());
        assert_eq!(parsed.message_id(), "id2");
    }

    #[test]
    fn roundtrip_call_error() {
        let frame =
            OcppFrame::error_response("id3", error_code::GENERIC_ERROR, "Something went wrong");
        let json = frame.serialize();
        let parsed = OcppFrame::parse(&json).unwrap();
        assert!(parsed.is_call_error());
        assert_eq!(parsed.message_id(), "id3");
        match parsed {
            OcppFrame::CallError { error_details, .. } => {
                assert!(error_details.as_object().map(|m| m.is_empty()).unwrap_or(false));
            }
            _ => unreachable!(),
        }
    }
}
