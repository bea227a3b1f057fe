//! Request/response correlation for outbound Calls
//!
//! Every Call sent to a charge point is registered here under its message
//! ID. The matching CallResult or CallError resolves the waiting sender
//! exactly once; anything arriving after resolution is logged and dropped.
//! A background sweep evicts entries whose waiters are gone.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::support::shutdown::ShutdownSignal;

/// Metadata of an outbound Call awaiting its response.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub message_id: String,
    pub charge_point_id: String,
    pub action: String,
    pub created_at: DateTime<Utc>,
    pub timeout: Duration,
}

impl PendingCall {
    pub fn new(
        message_id: impl Into<String>,
        charge_point_id: impl Into<String>,
        action: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            charge_point_id: charge_point_id.into(),
            action: action.into(),
            created_at: Utc::now(),
            timeout,
        }
    }
}

/// Terminal outcome delivered to a waiting sender.
#[derive(Debug)]
pub enum CallOutcome {
    /// CallResult payload.
    Result(Value),
    /// CallError from the charge point.
    PeerError {
        code: String,
        description: String,
        details: Value,
    },
    /// The device disconnected or the call was cancelled.
    Cancelled,
    /// Evicted by the expiry sweep.
    Expired,
}

/// Failures surfaced to the caller of [`CallMatcher::wait`].
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Message ID {0} already registered")]
    DuplicateMessageId(String),
    #[error("No response within {timeout:?} for {action}")]
    Timeout { action: String, timeout: Duration },
    #[error("Call cancelled before a response arrived")]
    Cancelled,
    #[error("Received CallError: {code} - {description}")]
    PeerError {
        code: String,
        description: String,
        details: Value,
    },
}

struct PendingEntry {
    info: PendingCall,
    responder: oneshot::Sender<CallOutcome>,
}

/// A registered call the sender can wait on.
pub struct ResponseHandle {
    info: PendingCall,
    receiver: oneshot::Receiver<CallOutcome>,
}

/// Correlates outbound Calls with inbound CallResult/CallError frames.
pub struct CallMatcher {
    pending: DashMap<String, PendingEntry>,
}

impl CallMatcher {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Register a call before its frame is sent. Fails fast when the
    /// message ID is already in flight.
    pub fn register(&self, call: PendingCall) -> Result<ResponseHandle, MatchError> {
        let (tx, rx) = oneshot::channel();
        let entry = PendingEntry {
            info: call.clone(),
            responder: tx,
        };

        use dashmap::mapref::entry::Entry;
        match self.pending.entry(call.message_id.clone()) {
            Entry::Occupied(_) => {
                warn!(
                    message_id = call.message_id.as_str(),
                    "Failed to register call, message ID already exists"
                );
                Err(MatchError::DuplicateMessageId(call.message_id))
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
                debug!(
                    charge_point_id = call.charge_point_id.as_str(),
                    action = call.action.as_str(),
                    message_id = call.message_id.as_str(),
                    timeout = ?call.timeout,
                    "Registered call"
                );
                Ok(ResponseHandle {
                    info: call,
                    receiver: rx,
                })
            }
        }
    }

    /// Await the outcome of a registered call, bounded by its timeout.
    /// On timeout the pending entry is removed so a late response cannot
    /// resolve anything.
    pub async fn wait(&self, handle: ResponseHandle) -> Result<Value, MatchError> {
        let ResponseHandle { info, receiver } = handle;

        match tokio::time::timeout(info.timeout, receiver).await {
            Ok(Ok(CallOutcome::Result(payload))) => Ok(payload),
            Ok(Ok(CallOutcome::PeerError {
                code,
                description,
                details,
            })) => Err(MatchError::PeerError {
                code,
                description,
                details,
            }),
            Ok(Ok(CallOutcome::Cancelled)) | Ok(Err(_)) => Err(MatchError::Cancelled),
            Ok(Ok(CallOutcome::Expired)) => Err(MatchError::Timeout {
                action: info.action,
                timeout: info.timeout,
            }),
            Err(_elapsed) => {
                self.pending.remove(&info.message_id);
                warn!(
                    charge_point_id = info.charge_point_id.as_str(),
                    action = info.action.as_str(),
                    message_id = info.message_id.as_str(),
                    "Call timeout"
                );
                metrics::counter!("ocpp_call_timeouts_total").increment(1);
                Err(MatchError::Timeout {
                    action: info.action,
                    timeout: info.timeout,
                })
            }
        }
    }

    /// Deliver a response to whoever registered `message_id`.
    ///
    /// Returns `false` when nothing (or no one) is waiting; the response
    /// is logged and dropped in that case.
    pub fn match_response(&self, message_id: &str, outcome: CallOutcome) -> bool {
        let Some((_, entry)) = self.pending.remove(message_id) else {
            warn!(message_id, "Received response for unknown message ID");
            return false;
        };

        debug!(
            charge_point_id = entry.info.charge_point_id.as_str(),
            message_id,
            "Matched response"
        );

        if entry.responder.send(outcome).is_err() {
            debug!(message_id, "Response matched but caller stopped waiting");
            return false;
        }
        true
    }

    /// Fail every pending call of one charge point. Used on disconnect.
    pub fn cancel_device(&self, charge_point_id: &str) -> usize {
        let message_ids: Vec<String> = self
            .pending
            .iter()
            .filter(|e| e.value().info.charge_point_id == charge_point_id)
            .map(|e| e.key().clone())
            .collect();

        if message_ids.is_empty() {
            return 0;
        }

        info!(
            charge_point_id,
            count = message_ids.len(),
            "Cancelling pending calls"
        );

        let mut cancelled = 0;
        for message_id in message_ids {
            if let Some((_, entry)) = self.pending.remove(&message_id) {
                let _ = entry.responder.send(CallOutcome::Cancelled);
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Remove calls whose timeout has long passed. The waiting side
    /// normally cleans up after itself; this catches entries whose waiter
    /// died without doing so.
    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|e| {
                let age = now - e.value().info.created_at;
                age.to_std().map(|a| a > e.value().info.timeout).unwrap_or(false)
            })
            .map(|e| e.key().clone())
            .collect();

        metrics::gauge!("ocpp_pending_calls").set(self.pending.len() as f64);

        if expired.is_empty() {
            return;
        }

        info!(count = expired.len(), "Cleaning up expired calls");
        for message_id in expired {
            if let Some((_, entry)) = self.pending.remove(&message_id) {
                warn!(
                    charge_point_id = entry.info.charge_point_id.as_str(),
                    action = entry.info.action.as_str(),
                    message_id = message_id.as_str(),
                    "Expired call evicted"
                );
                let _ = entry.responder.send(CallOutcome::Expired);
            }
        }
    }

    /// Spawn the periodic expiry sweep.
    pub fn start(self: &Arc<Self>, interval: Duration, shutdown: ShutdownSignal) {
        let matcher = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        matcher.cleanup_expired();
                    }
                    _ = shutdown.wait() => {
                        info!("Call matcher sweep stopped");
                        break;
                    }
                }
            }
        });
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for CallMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared call matcher type
pub type SharedCallMatcher = Arc<CallMatcher>;

/// Create a shared call matcher
pub fn create_call_matcher() -> SharedCallMatcher {
    Arc::new(CallMatcher::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(message_id: &str, cp: &str, timeout_ms: u64) -> PendingCall {
        PendingCall::new(
            message_id,
            cp,
            "Reset",
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn response_resolves_waiter_exactly_once() {
        let matcher = CallMatcher::new();
        let handle = matcher.register(call("m1", "CP001", 1000)).unwrap();

        assert!(matcher.match_response("m1", CallOutcome::Result(json!({"status": "Accepted"}))));

        let payload = matcher.wait(handle).await.unwrap();
        assert_eq!(payload["status"], "Accepted");

        // Entry is gone; a second response finds nothing.
        assert!(!matcher.match_response("m1", CallOutcome::Result(json!({}))));
        assert_eq!(matcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_message_id_rejected() {
        let matcher = CallMatcher::new();
        let _handle = matcher.register(call("m1", "CP001", 1000)).unwrap();
        let dup = matcher.register(call("m1", "CP001", 1000));
        assert!(matches!(dup, Err(MatchError::DuplicateMessageId(_))));
    }

    #[tokio::test]
    async fn timeout_fails_no_earlier_than_configured_and_removes_entry() {
        let matcher = CallMatcher::new();
        let timeout = Duration::from_millis(50);
        let handle = matcher
            .register(PendingCall::new("m1", "CP001", "Reset", timeout))
            .unwrap();

        let started = tokio::time::Instant::now();
        let result = matcher.wait(handle).await;
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(MatchError::Timeout { .. })));
        assert!(elapsed >= timeout, "timed out early: {:?}", elapsed);
        assert_eq!(matcher.pending_count(), 0);

        // A response arriving after the timeout is dropped.
        assert!(!matcher.match_response("m1", CallOutcome::Result(json!({}))));
    }

    #[tokio::test]
    async fn call_error_surfaces_peer_code_and_description() {
        let matcher = CallMatcher::new();
        let handle = matcher.register(call("m1", "CP001", 1000)).unwrap();

        matcher.match_response(
            "m1",
            CallOutcome::PeerError {
                code: "NotSupported".to_string(),
                description: "no can do".to_string(),
                details: json!({}),
            },
        );

        match matcher.wait(handle).await {
            Err(MatchError::PeerError { code, description, .. }) => {
                assert_eq!(code, "NotSupported");
                assert_eq!(description, "no can do");
            }
            other => panic!("Expected PeerError, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn cancel_device_fails_only_that_devices_calls() {
        let matcher = CallMatcher::new();
        let h1 = matcher.register(call("m1", "CP001", 1000)).unwrap();
        let h2 = matcher.register(call("m2", "CP001", 1000)).unwrap();
        let h3 = matcher.register(call("m3", "CP002", 1000)).unwrap();

        assert_eq!(matcher.cancel_device("CP001"), 2);
        assert!(matches!(matcher.wait(h1).await, Err(MatchError::Cancelled)));
        assert!(matches!(matcher.wait(h2).await, Err(MatchError::Cancelled)));
        assert_eq!(matcher.pending_count(), 1);

        // CP002's call still resolves normally.
        matcher.match_response("m3", CallOutcome::Result(json!({})));
        assert!(matcher.wait(h3).await.is_ok());
    }

    #[tokio::test]
    async fn sweep_evicts_abandoned_entries() {
        let matcher = CallMatcher::new();
        // Register, then drop the handle: nobody will ever wait.
        let handle = matcher.register(call("m1", "CP001", 10)).unwrap();
        drop(handle);

        tokio::time::sleep(Duration::from_millis(30)).await;
        matcher.cleanup_expired();
        assert_eq!(matcher.pending_count(), 0);
    }
}
