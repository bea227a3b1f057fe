//! Session registry with resumption and duplicate handling
//!
//! One entry per charge point ID. Network drops keep the entry around in
//! `Disconnected` state for the configured retention window so the station
//! can resume; deliberate closes purge it. A background sweep closes idle
//! sessions and expires retained ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::application::session::connection::{Session, SessionInfo, SessionState};
use crate::config::{DuplicateConnectionStrategy, OcppConfig};
use crate::domain::ocpp::OcppVersion;
use crate::notifications::events::{
    ChargePointConnectedEvent, ChargePointDisconnectedEvent, Event, SessionClosedEvent,
    SessionCreatedEvent,
};
use crate::notifications::SharedEventBus;

/// Sessions with activity inside this window count as active.
const ACTIVE_SESSION_WINDOW: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("connection limit reached ({limit})")]
    LimitExceeded { limit: usize },
    #[error("charge point {0} is already connected")]
    DuplicateRejected(String),
    #[error("charge point {0} is not connected")]
    NotConnected(String),
    #[error("failed to send to {0}: transport closed")]
    SendFailed(String),
}

/// How an accepted connection entered the registry.
pub enum AddOutcome {
    /// Fresh session.
    Created(Arc<Session>),
    /// The retained session from a recent network drop, with the new
    /// socket's transport swapped in.
    Resumed(Arc<Session>),
}

impl AddOutcome {
    pub fn session(&self) -> &Arc<Session> {
        match self {
            Self::Created(session) | Self::Resumed(session) => session,
        }
    }
}

/// Aggregate connection counters for the metrics surface.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub current_connections: usize,
    pub active_sessions: usize,
    pub total_connections_ever: u64,
    pub failed_connections: u64,
    pub average_connection_duration_secs: f64,
}

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    config: OcppConfig,
    event_bus: SharedEventBus,
    total_connections_ever: AtomicU64,
    failed_connections: AtomicU64,
}

impl SessionRegistry {
    pub fn new(config: OcppConfig, event_bus: SharedEventBus) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            event_bus,
            total_connections_ever: AtomicU64::new(0),
            failed_connections: AtomicU64::new(0),
        }
    }

    /// Admit a new connection for `charge_point_id`.
    ///
    /// Evaluated in order: connection limit, resumption of a retained
    /// session, the duplicate-connection strategy, then a fresh insert.
    pub fn add_session(
        &self,
        charge_point_id: &str,
        protocol: OcppVersion,
        sender: mpsc::UnboundedSender<Message>,
        remote_addr: Option<String>,
        verified: bool,
    ) -> Result<AddOutcome, RegistryError> {
        let limit = self.config.max_concurrent_connections;
        if self.sessions.len() >= limit {
            warn!(
                charge_point_id = charge_point_id,
                limit = limit,
                "Connection limit reached, rejecting"
            );
            self.failed_connections.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("ocpp_connections_rejected_total").increment(1);
            return Err(RegistryError::LimitExceeded { limit });
        }

        let existing = self
            .sessions
            .get(charge_point_id)
            .map(|entry| Arc::clone(entry.value()));

        if let Some(existing) = existing {
            if existing.state() == SessionState::Disconnected {
                let within_retention = existing
                    .last_disconnected_at()
                    .map(|at| {
                        Utc::now().signed_duration_since(at).num_milliseconds()
                            < self.config.state_retention().as_millis() as i64
                    })
                    .unwrap_or(false);

                if within_retention {
                    info!(
                        charge_point_id = charge_point_id,
                        session_id = %existing.session_id,
                        "Resuming retained session"
                    );
                    existing.replace_transport(sender);
                    self.publish_connected(&existing);
                    self.update_connection_gauge();
                    return Ok(AddOutcome::Resumed(existing));
                }

                info!(
                    charge_point_id = charge_point_id,
                    "Retained session expired, starting fresh"
                );
                self.purge(&existing, "Session expired before reconnect");
            } else {
                warn!(
                    charge_point_id = charge_point_id,
                    strategy = ?self.config.duplicate_connection_strategy,
                    "Duplicate connection"
                );
                match self.config.duplicate_connection_strategy {
                    DuplicateConnectionStrategy::Replace => {
                        existing.close("Replaced by new connection");
                        self.purge(&existing, "Replaced by new connection");
                    }
                    DuplicateConnectionStrategy::Reject => {
                        self.failed_connections.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!("ocpp_connections_rejected_total").increment(1);
                        return Err(RegistryError::DuplicateRejected(
                            charge_point_id.to_string(),
                        ));
                    }
                    DuplicateConnectionStrategy::Duplicate => {
                        // The old session stays alive but unroutable; its
                        // socket winds down on its own.
                        warn!(
                            charge_point_id = charge_point_id,
                            "Allowing duplicate, old session becomes unroutable"
                        );
                    }
                }
            }
        }

        let session = Arc::new(Session::new(
            charge_point_id,
            protocol,
            sender,
            remote_addr,
            verified,
        ));
        session.mark_connected();
        self.sessions
            .insert(charge_point_id.to_string(), Arc::clone(&session));
        self.total_connections_ever.fetch_add(1, Ordering::Relaxed);
        info!(
            charge_point_id = charge_point_id,
            session_id = %session.session_id,
            protocol = %session.protocol,
            "Session added"
        );

        self.event_bus.publish(Event::SessionCreated(SessionCreatedEvent {
            charge_point_id: session.charge_point_id.clone(),
            session_id: session.session_id.clone(),
            protocol: session.protocol.version_string().to_string(),
            timestamp: Utc::now(),
        }));
        self.publish_connected(&session);
        self.update_connection_gauge();

        Ok(AddOutcome::Created(session))
    }

    /// Handle the end of a session's socket.
    ///
    /// Deliberate closes (`Closing`/`Closed`) purge the entry; anything
    /// else is a network drop and the entry is retained for resumption.
    /// Ignored if `session` has already been superseded in the registry.
    pub fn remove_session(&self, session: &Arc<Session>, reason: &str) {
        let current = self
            .sessions
            .get(&session.charge_point_id)
            .map(|entry| Arc::clone(entry.value()));
        match current {
            Some(current) if Arc::ptr_eq(&current, session) => {}
            _ => {
                debug!(
                    charge_point_id = %session.charge_point_id,
                    session_id = %session.session_id,
                    "Stale session teardown ignored"
                );
                return;
            }
        }

        match session.state() {
            SessionState::Closing | SessionState::Closed => {
                session.mark_closed();
                self.purge(session, reason);
            }
            _ => {
                session.mark_disconnected();
                info!(
                    charge_point_id = %session.charge_point_id,
                    session_id = %session.session_id,
                    reason = reason,
                    "Network drop, retaining session"
                );
                self.publish_disconnected(session, reason);
            }
        }
        self.update_connection_gauge();
    }

    /// Remove the entry and announce the end of the session.
    fn purge(&self, session: &Arc<Session>, reason: &str) {
        let removed = self
            .sessions
            .remove_if(&session.charge_point_id, |_, current| {
                Arc::ptr_eq(current, session)
            });
        if removed.is_none() {
            return;
        }
        info!(
            charge_point_id = %session.charge_point_id,
            session_id = %session.session_id,
            reason = reason,
            "Session removed"
        );
        self.publish_disconnected(session, reason);
        self.event_bus.publish(Event::SessionClosed(SessionClosedEvent {
            charge_point_id: session.charge_point_id.clone(),
            session_id: session.session_id.clone(),
            reason: Some(reason.to_string()),
            timestamp: Utc::now(),
        }));
    }

    fn publish_connected(&self, session: &Arc<Session>) {
        self.event_bus
            .publish(Event::ChargePointConnected(ChargePointConnectedEvent {
                charge_point_id: session.charge_point_id.clone(),
                timestamp: Utc::now(),
                remote_addr: session.remote_addr.clone(),
            }));
    }

    fn publish_disconnected(&self, session: &Arc<Session>, reason: &str) {
        self.event_bus
            .publish(Event::ChargePointDisconnected(ChargePointDisconnectedEvent {
                charge_point_id: session.charge_point_id.clone(),
                timestamp: Utc::now(),
                reason: Some(reason.to_string()),
            }));
    }

    fn update_connection_gauge(&self) {
        metrics::gauge!("ocpp_connected_charge_points").set(self.sessions.len() as f64);
    }

    pub fn get_session(&self, charge_point_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(charge_point_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Connected means an admitted session with a live transport, not a
    /// retained `Disconnected` one.
    pub fn is_connected(&self, charge_point_id: &str) -> bool {
        self.get_session(charge_point_id)
            .map(|session| session.state() == SessionState::Connected)
            .unwrap_or(false)
    }

    pub fn send_to(&self, charge_point_id: &str, text: String) -> Result<(), RegistryError> {
        let session = self
            .get_session(charge_point_id)
            .ok_or_else(|| RegistryError::NotConnected(charge_point_id.to_string()))?;
        if session.state() != SessionState::Connected {
            return Err(RegistryError::NotConnected(charge_point_id.to_string()));
        }
        session
            .send_text(text)
            .map_err(|_| RegistryError::SendFailed(charge_point_id.to_string()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().state() == SessionState::Connected)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn session_infos(&self) -> Vec<SessionInfo> {
        self.sessions
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }

    pub fn connection_metrics(&self) -> ConnectionMetrics {
        let now = Utc::now();
        let mut current = 0usize;
        let mut active = 0usize;
        let mut duration_sum = 0f64;
        for entry in self.sessions.iter() {
            let session = entry.value();
            current += 1;
            duration_sum += now
                .signed_duration_since(session.connected_at)
                .num_milliseconds() as f64
                / 1000.0;
            let idle = now
                .signed_duration_since(session.last_activity_at())
                .num_seconds();
            if idle >= 0 && (idle as u64) < ACTIVE_SESSION_WINDOW.as_secs() {
                active += 1;
            }
        }
        ConnectionMetrics {
            current_connections: current,
            active_sessions: active,
            total_connections_ever: self.total_connections_ever.load(Ordering::Relaxed),
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
            average_connection_duration_secs: if current > 0 {
                duration_sum / current as f64
            } else {
                0.0
            },
        }
    }

    /// One sweep pass: expire retained sessions past the retention window
    /// and close sessions idle past the inactivity timeout. Closed sessions
    /// are purged by their socket teardown.
    pub fn cleanup_stale_sessions(&self) {
        let retention = self.config.state_retention();
        let inactivity = self.config.inactivity_timeout();
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for session in sessions {
            match session.state() {
                SessionState::Disconnected => {
                    let expired = session
                        .last_disconnected_at()
                        .map(|at| {
                            Utc::now().signed_duration_since(at).num_milliseconds()
                                > retention.as_millis() as i64
                        })
                        .unwrap_or(true);
                    if expired {
                        self.purge(&session, "Session retention timeout");
                    }
                }
                SessionState::Connected => {
                    if session.is_idle(inactivity) {
                        warn!(
                            charge_point_id = %session.charge_point_id,
                            "Closing idle session"
                        );
                        session.close("Session inactivity timeout");
                    }
                }
                _ => {}
            }
        }
        self.update_connection_gauge();
    }

    /// Periodic sweep driven by the shutdown signal.
    pub fn start(
        self: &Arc<Self>,
        period: Duration,
        shutdown: crate::support::ShutdownSignal,
    ) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => registry.cleanup_stale_sessions(),
                    _ = shutdown.wait() => {
                        debug!("Session sweep stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Close every session, for server shutdown.
    pub fn close_all(&self, reason: &str) {
        info!(count = self.sessions.len(), reason = reason, "Closing all sessions");
        for entry in self.sessions.iter() {
            entry.value().close(reason);
        }
        self.sessions.clear();
        self.update_connection_gauge();
    }
}

/// Shared session registry type
pub type SharedSessionRegistry = Arc<SessionRegistry>;

/// Create a shared session registry
pub fn create_session_registry(
    config: OcppConfig,
    event_bus: SharedEventBus,
) -> SharedSessionRegistry {
    Arc::new(SessionRegistry::new(config, event_bus))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::create_event_bus;

    fn registry_with(config: OcppConfig) -> SessionRegistry {
        SessionRegistry::new(config, create_event_bus())
    }

    fn channel() -> (
        mpsc::UnboundedSender<Message>,
        mpsc::UnboundedReceiver<Message>,
    ) {
        mpsc::unbounded_channel()
    }

    // The receiver rides along so the transport channel stays open for
    // the test's lifetime.
    fn admit(
        registry: &SessionRegistry,
        id: &str,
    ) -> (Arc<Session>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = channel();
        match registry.add_session(id, OcppVersion::V16, tx, None, false) {
            Ok(outcome) => (Arc::clone(outcome.session()), rx),
            Err(err) => panic!("admission failed: {err}"),
        }
    }

    #[tokio::test]
    async fn fresh_session_is_created_and_connected() {
        let registry = registry_with(OcppConfig::default());
        let (session, _rx) = admit(&registry, "CP-1");
        assert_eq!(session.state(), SessionState::Connected);
        assert!(registry.is_connected("CP-1"));
        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.connection_metrics().total_connections_ever, 1);
    }

    #[tokio::test]
    async fn connection_limit_rejects() {
        let config = OcppConfig {
            max_concurrent_connections: 1,
            ..OcppConfig::default()
        };
        let registry = registry_with(config);
        let (_session, _rx1) = admit(&registry, "CP-1");

        let (tx, _rx) = channel();
        let result = registry.add_session("CP-2", OcppVersion::V16, tx, None, false);
        assert!(matches!(result, Err(RegistryError::LimitExceeded { limit: 1 })));
        assert_eq!(registry.connection_metrics().failed_connections, 1);
    }

    #[tokio::test]
    async fn duplicate_reject_strategy_keeps_first_session() {
        let config = OcppConfig {
            duplicate_connection_strategy: DuplicateConnectionStrategy::Reject,
            ..OcppConfig::default()
        };
        let registry = registry_with(config);
        let (first, _rx1) = admit(&registry, "CP-1");

        let (tx, _rx) = channel();
        let result = registry.add_session("CP-1", OcppVersion::V16, tx, None, false);
        assert!(matches!(result, Err(RegistryError::DuplicateRejected(_))));
        assert!(Arc::ptr_eq(&registry.get_session("CP-1").unwrap(), &first));
    }

    #[tokio::test]
    async fn duplicate_replace_strategy_swaps_sessions() {
        let registry = registry_with(OcppConfig::default());
        let (first, _rx1) = admit(&registry, "CP-1");
        let (second, _rx2) = admit(&registry, "CP-1");

        assert_eq!(first.state(), SessionState::Closing);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&registry.get_session("CP-1").unwrap(), &second));
        assert_eq!(registry.session_count(), 1);
    }

    #[tokio::test]
    async fn network_drop_retains_session_for_resumption() {
        let registry = registry_with(OcppConfig::default());
        let (session, _rx1) = admit(&registry, "CP-1");

        registry.remove_session(&session, "socket reset");
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(registry.session_count(), 1);
        assert!(!registry.is_connected("CP-1"));

        let (tx, _rx) = channel();
        let outcome = registry
            .add_session("CP-1", OcppVersion::V16, tx, None, false)
            .unwrap();
        match outcome {
            AddOutcome::Resumed(resumed) => {
                assert!(Arc::ptr_eq(&resumed, &session));
                assert_eq!(resumed.state(), SessionState::Connected);
            }
            AddOutcome::Created(_) => panic!("expected resumption"),
        }
        // Identity survived the drop.
        assert_eq!(registry.connection_metrics().total_connections_ever, 1);
    }

    #[tokio::test]
    async fn deliberate_close_purges_immediately() {
        let registry = registry_with(OcppConfig::default());
        let (session, _rx1) = admit(&registry, "CP-1");
        session.close("operator request");

        registry.remove_session(&session, "operator request");
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(registry.session_count(), 0);

        let (tx, _rx) = channel();
        let outcome = registry
            .add_session("CP-1", OcppVersion::V16, tx, None, false)
            .unwrap();
        assert!(matches!(outcome, AddOutcome::Created(_)));
    }

    #[tokio::test]
    async fn expired_retained_session_is_not_resumed() {
        let config = OcppConfig {
            session_state_retention: 0,
            ..OcppConfig::default()
        };
        let registry = registry_with(config);
        let (session, _rx1) = admit(&registry, "CP-1");
        registry.remove_session(&session, "socket reset");

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let (tx, _rx) = channel();
        let outcome = registry
            .add_session("CP-1", OcppVersion::V16, tx, None, false)
            .unwrap();
        match outcome {
            AddOutcome::Created(fresh) => assert!(!Arc::ptr_eq(&fresh, &session)),
            AddOutcome::Resumed(_) => panic!("expired session must not resume"),
        }
    }

    #[tokio::test]
    async fn sweep_purges_expired_disconnected_sessions() {
        let config = OcppConfig {
            session_state_retention: 0,
            ..OcppConfig::default()
        };
        let registry = registry_with(config);
        let (session, _rx) = admit(&registry, "CP-1");
        registry.remove_session(&session, "socket reset");
        assert_eq!(registry.session_count(), 1);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        registry.cleanup_stale_sessions();
        assert_eq!(registry.session_count(), 0);
    }

    #[tokio::test]
    async fn stale_teardown_from_replaced_session_is_ignored() {
        let registry = registry_with(OcppConfig::default());
        let (first, _rx1) = admit(&registry, "CP-1");
        let (second, _rx2) = admit(&registry, "CP-1");

        // The replaced socket's teardown fires late.
        registry.remove_session(&first, "Replaced by new connection");
        assert!(Arc::ptr_eq(&registry.get_session("CP-1").unwrap(), &second));
        assert_eq!(registry.session_count(), 1);
    }

    #[tokio::test]
    async fn send_to_requires_connected_state() {
        let registry = registry_with(OcppConfig::default());
        let (session, _rx) = admit(&registry, "CP-1");
        assert!(registry.send_to("CP-1", "[2,\"1\",\"Reset\",{}]".to_string()).is_ok());

        registry.remove_session(&session, "socket reset");
        assert!(matches!(
            registry.send_to("CP-1", "x".to_string()),
            Err(RegistryError::NotConnected(_))
        ));
        assert!(matches!(
            registry.send_to("CP-9", "x".to_string()),
            Err(RegistryError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn unverified_resume_gets_closed_by_fresh_watchdog() {
        let registry = registry_with(OcppConfig::default());
        let (session, _rx1) = admit(&registry, "CP-1");
        registry.remove_session(&session, "socket reset");

        // Still within retention: same session comes back, still unverified.
        let (tx, mut rx2) = channel();
        let outcome = registry
            .add_session("CP-1", OcppVersion::V16, tx, None, false)
            .unwrap();
        let resumed = Arc::clone(outcome.session());
        assert!(Arc::ptr_eq(&resumed, &session));
        assert!(!resumed.is_verified());

        // The original watchdog ran out while the session sat disconnected,
        // so the resume must arm a new one.
        resumed.start_verification_watchdog(std::time::Duration::from_millis(20));
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;

        assert_eq!(resumed.state(), SessionState::Closing);
        let mut saw_close = false;
        while let Ok(msg) = rx2.try_recv() {
            if matches!(msg, Message::Close(_)) {
                saw_close = true;
            }
        }
        assert!(saw_close, "watchdog did not close the resumed session");
    }
}
