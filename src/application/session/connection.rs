//! Per-charge-point session lifecycle
//!
//! A [`Session`] outlives the socket it was created with: on a network drop
//! the registry keeps the session in `Disconnected` state for a retention
//! window, and a reconnecting station gets the same session back with a
//! fresh transport swapped in. Identity (session ID, protocol, connect
//! time) never changes across a resume.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::ocpp::OcppVersion;

/// Session lifecycle states.
///
/// `Disconnected` is distinct from `Closed`: the socket is gone but the
/// session is retained for resumption. `Closing`/`Closed` mean the session
/// is ending deliberately and will be purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Connecting,
    Connected,
    Closing,
    Closed,
    Disconnected,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Connected,
            2 => Self::Closing,
            3 => Self::Closed,
            _ => Self::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Connected => 1,
            Self::Closing => 2,
            Self::Closed => 3,
            Self::Disconnected => 4,
        }
    }
}

/// Point-in-time view of a session, for operator surfaces and logs.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub charge_point_id: String,
    pub protocol_version: String,
    pub state: SessionState,
    pub verified: bool,
    pub connected_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub remote_addr: Option<String>,
}

/// The transport channel is closed; the outbound pump is gone.
#[derive(Debug, thiserror::Error)]
#[error("session transport closed for {charge_point_id}")]
pub struct TransportClosed {
    pub charge_point_id: String,
}

/// One charge point connection, shared behind `Arc` between the socket
/// tasks, the registry, and the dispatcher.
pub struct Session {
    pub session_id: String,
    pub charge_point_id: String,
    pub protocol: OcppVersion,
    pub connected_at: DateTime<Utc>,
    pub remote_addr: Option<String>,

    state: AtomicU8,
    verified: AtomicBool,
    verified_notify: Notify,
    /// Outbound frames for the socket pump. Swapped on resumption.
    transport: Mutex<mpsc::UnboundedSender<Message>>,
    last_activity_ms: AtomicI64,
    last_disconnected_ms: AtomicI64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl Session {
    pub fn new(
        charge_point_id: impl Into<String>,
        protocol: OcppVersion,
        sender: mpsc::UnboundedSender<Message>,
        remote_addr: Option<String>,
        verified: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            charge_point_id: charge_point_id.into(),
            protocol,
            connected_at: now,
            remote_addr,
            state: AtomicU8::new(SessionState::Connecting.as_u8()),
            verified: AtomicBool::new(verified),
            verified_notify: Notify::new(),
            transport: Mutex::new(sender),
            last_activity_ms: AtomicI64::new(now.timestamp_millis()),
            last_disconnected_ms: AtomicI64::new(0),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SessionState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub fn is_verified(&self) -> bool {
        self.verified.load(Ordering::SeqCst)
    }

    /// A valid BootNotification went through; the verification watchdog
    /// stands down permanently.
    pub fn mark_verified(&self) {
        if !self.verified.swap(true, Ordering::SeqCst) {
            info!(
                charge_point_id = %self.charge_point_id,
                session_id = %self.session_id,
                "Session verified"
            );
        }
        self.verified_notify.notify_one();
    }

    /// Admitted by the registry; messages may now flow.
    pub(crate) fn mark_connected(&self) {
        self.set_state(SessionState::Connected);
    }

    /// The socket dropped without a deliberate close. The session sticks
    /// around for resumption.
    pub(crate) fn mark_disconnected(&self) {
        self.set_state(SessionState::Disconnected);
        self.last_disconnected_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    pub(crate) fn mark_closed(&self) {
        self.set_state(SessionState::Closed);
    }

    /// Begin a deliberate close: flip to `Closing` and push a close frame
    /// through the outbound pump. Returns false if the session is already
    /// on its way out.
    pub fn close(&self, reason: &str) -> bool {
        match self.state() {
            SessionState::Closing | SessionState::Closed => return false,
            _ => {}
        }
        self.set_state(SessionState::Closing);
        info!(
            charge_point_id = %self.charge_point_id,
            session_id = %self.session_id,
            reason = reason,
            "Closing session"
        );
        let frame = Message::Close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: reason.to_string().into(),
        }));
        // Best effort: the pump may already be gone.
        let _ = self.sender().send(frame);
        true
    }

    /// Send one text frame to the station. Refused unless the session is
    /// `Connected`; a closing or dropped session must not queue frames.
    pub fn send_text(&self, text: String) -> Result<(), TransportClosed> {
        if self.state() != SessionState::Connected {
            return Err(TransportClosed {
                charge_point_id: self.charge_point_id.clone(),
            });
        }
        self.sender()
            .send(Message::Text(text))
            .map_err(|_| TransportClosed {
                charge_point_id: self.charge_point_id.clone(),
            })?;
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.touch();
        Ok(())
    }

    /// Station reconnected: swap in the new socket's outbound channel and
    /// go back to `Connected`.
    pub fn replace_transport(&self, sender: mpsc::UnboundedSender<Message>) {
        {
            let mut guard = match self.transport.lock() {
                Ok(guard) => guard,
                // A poisoned lock still holds a swappable sender.
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = sender;
        }
        self.last_disconnected_ms.store(0, Ordering::SeqCst);
        self.set_state(SessionState::Connected);
        self.touch();
        debug!(
            charge_point_id = %self.charge_point_id,
            session_id = %self.session_id,
            "Transport replaced after reconnect"
        );
    }

    fn sender(&self) -> mpsc::UnboundedSender<Message> {
        match self.transport.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        millis_to_datetime(self.last_activity_ms.load(Ordering::Relaxed))
    }

    pub fn last_disconnected_at(&self) -> Option<DateTime<Utc>> {
        match self.last_disconnected_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => Some(millis_to_datetime(ms)),
        }
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        let idle_ms = Utc::now().timestamp_millis()
            - self.last_activity_ms.load(Ordering::Relaxed);
        idle_ms > timeout.as_millis() as i64
    }

    /// Stations must send BootNotification shortly after connecting; a
    /// session that never does gets force-closed. Pre-verified sessions
    /// (reconnects of accepted stations) skip the watchdog.
    pub fn start_verification_watchdog(self: &Arc<Self>, timeout: Duration) {
        if self.is_verified() {
            return;
        }
        debug!(
            charge_point_id = %self.charge_point_id,
            timeout_secs = timeout.as_secs(),
            "Verification watchdog armed"
        );
        let session = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if !session.is_verified() && session.state() == SessionState::Connected {
                        warn!(
                            charge_point_id = %session.charge_point_id,
                            timeout_secs = timeout.as_secs(),
                            "No BootNotification within the verification window, closing"
                        );
                        metrics::counter!("ocpp_verification_timeouts_total").increment(1);
                        session.close("BootNotification timeout");
                    }
                }
                _ = session.verified_notify.notified() => {}
            }
        });
    }

    pub fn snapshot(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            charge_point_id: self.charge_point_id.clone(),
            protocol_version: self.protocol.version_string().to_string(),
            state: self.state(),
            verified: self.is_verified(),
            connected_at: self.connected_at,
            last_activity_at: self.last_activity_at(),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            remote_addr: self.remote_addr.clone(),
        }
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(verified: bool) -> (Arc<Session>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session::new(
            "CP-1",
            OcppVersion::V16,
            tx,
            Some("127.0.0.1:50000".to_string()),
            verified,
        ));
        session.mark_connected();
        (session, rx)
    }

    #[tokio::test]
    async fn watchdog_closes_unverified_session() {
        let (session, mut rx) = session(false);
        session.start_verification_watchdog(Duration::from_millis(30));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(session.state(), SessionState::Closing);
        match rx.try_recv() {
            Ok(Message::Close(Some(frame))) => {
                assert_eq!(frame.reason, "BootNotification timeout")
            }
            other => panic!("expected close frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn mark_verified_disarms_watchdog() {
        let (session, mut rx) = session(false);
        session.start_verification_watchdog(Duration::from_millis(30));
        session.mark_verified();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(session.state(), SessionState::Connected);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn preverified_session_never_arms_watchdog() {
        let (session, mut rx) = session(true);
        session.start_verification_watchdog(Duration::from_millis(30));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(session.state(), SessionState::Connected);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn replace_transport_routes_to_new_channel() {
        let (session, _old_rx) = session(true);
        session.mark_disconnected();
        assert!(session.last_disconnected_at().is_some());

        let (tx, mut new_rx) = mpsc::unbounded_channel();
        session.replace_transport(tx);
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.last_disconnected_at().is_none());

        session.send_text("[2,\"1\",\"Heartbeat\",{}]".to_string()).unwrap();
        assert!(matches!(new_rx.try_recv(), Ok(Message::Text(_))));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (session, _rx) = session(true);
        assert!(session.close("test"));
        assert!(!session.close("test"));
        assert_eq!(session.state(), SessionState::Closing);
    }

    #[tokio::test]
    async fn send_text_refused_unless_connected() {
        let (session, mut rx) = session(true);
        session.close("test");
        assert!(session.send_text("[3,\"1\",{}]".to_string()).is_err());

        // Only the close frame reached the transport.
        assert!(matches!(rx.try_recv(), Ok(Message::Close(_))));
        assert!(rx.try_recv().is_err());

        session.mark_disconnected();
        assert!(session.send_text("x".to_string()).is_err());
    }
}
