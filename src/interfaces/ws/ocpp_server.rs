//! OCPP WebSocket server
//!
//! Accepts charge-point connections at `ws://<host>:<port>/ocpp/{charge_point_id}`
//! (or with the station ID as a `chargePointId`/`cpid` query parameter),
//! negotiates the OCPP subprotocol, admits the connection to the session
//! registry and runs the two per-connection pumps: outbound frames from
//! the session's transport channel, inbound frames into the message
//! router. The transport reassembles fragmented WebSocket messages, so
//! the router always sees one complete JSON document per call.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use rust_ocpp::v1_6::types::RegistrationStatus;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::application::call_matcher::SharedCallMatcher;
use crate::application::handlers::{OcppHandler, SharedRequestDispatcher};
use crate::application::session::SharedSessionRegistry;
use crate::config::AppConfig;
use crate::domain::ocpp::OcppVersion;
use crate::interfaces::ws::negotiator::{Negotiation, ProtocolNegotiator};
use crate::support::shutdown::ShutdownSignal;

/// OCPP WebSocket server.
pub struct OcppServer {
    config: AppConfig,
    registry: SharedSessionRegistry,
    dispatcher: SharedRequestDispatcher,
    call_matcher: SharedCallMatcher,
    negotiator: Arc<ProtocolNegotiator>,
    shutdown: Option<ShutdownSignal>,
}

impl OcppServer {
    pub fn new(
        config: AppConfig,
        registry: SharedSessionRegistry,
        dispatcher: SharedRequestDispatcher,
        call_matcher: SharedCallMatcher,
    ) -> Self {
        let negotiator = Arc::new(ProtocolNegotiator::from_config(&config.ocpp));
        Self {
            config,
            registry,
            dispatcher,
            call_matcher,
            negotiator,
            shutdown: None,
        }
    }

    /// Set the shutdown signal for graceful shutdown.
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    /// Bind and serve until the listener fails or shutdown is triggered.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = self.config.server.address();
        let listener = TcpListener::bind(&addr).await?;

        info!("🔌 OCPP Central System started on ws://{}", addr);
        info!(
            "   Charge points should connect to: ws://{}/ocpp/{{charge_point_id}}",
            addr
        );
        info!(
            "   Supported subprotocols: {}",
            self.negotiator.supported_subprotocols().join(", ")
        );

        match self.shutdown.clone() {
            Some(shutdown) => self.run_with_shutdown(listener, shutdown).await,
            None => self.run_loop(listener).await,
        }
    }

    async fn run_loop(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        while let Ok((stream, addr)) = listener.accept().await {
            self.spawn_connection(stream, addr);
        }
        Ok(())
    }

    async fn run_with_shutdown(
        &self,
        listener: TcpListener,
        shutdown: ShutdownSignal,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.spawn_connection(stream, addr),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
                _ = shutdown.wait() => {
                    info!("🛑 WebSocket server received shutdown signal");
                    self.registry.close_all("Server shutting down");
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let registry = Arc::clone(&self.registry);
        let dispatcher = Arc::clone(&self.dispatcher);
        let call_matcher = Arc::clone(&self.call_matcher);
        let negotiator = Arc::clone(&self.negotiator);
        let shutdown = self.shutdown.clone();
        let boot_timeout = self.config.ocpp.boot_timeout();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(
                stream,
                addr,
                registry,
                dispatcher,
                call_matcher,
                negotiator,
                boot_timeout,
                shutdown,
            )
            .await
            {
                warn!("Connection error from {}: {}", addr, e);
            }
        });
    }
}

/// Extract the charge point ID from the request path (last segment after
/// an optional `ocpp/` route token) or, failing that, from the
/// `chargePointId`/`cpid` query parameter.
fn extract_charge_point_id(path: &str, query: Option<&str>) -> Option<String> {
    let path = path.trim_matches('/');
    let candidate = path.strip_prefix("ocpp/").unwrap_or(path).trim_matches('/');
    if !candidate.is_empty() && !candidate.contains('/') && candidate != "ocpp" {
        return Some(candidate.to_string());
    }

    let query = query?;
    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?;
        if matches!(key, "chargePointId" | "cpid") {
            let value = parts.next().unwrap_or("");
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn reject_handshake(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Handle a single WebSocket connection end to end.
#[allow(clippy::too_many_arguments)]
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: SharedSessionRegistry,
    dispatcher: SharedRequestDispatcher,
    call_matcher: SharedCallMatcher,
    negotiator: Arc<ProtocolNegotiator>,
    boot_timeout: std::time::Duration,
    shutdown: Option<ShutdownSignal>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    debug!("New connection from: {}", addr);

    let mut charge_point_id: Option<String> = None;
    let mut protocol = OcppVersion::V16;

    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, mut response: Response| {
            let path = req.uri().path();
            let query = req.uri().query();
            info!("WebSocket handshake from: {}, path: {}", addr, path);

            let Some(id) = extract_charge_point_id(path, query) else {
                warn!("No charge point ID in path or query, rejecting: {}", path);
                return Err(reject_handshake(
                    StatusCode::BAD_REQUEST,
                    "Missing charge point identifier",
                ));
            };

            let offered = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok());
            match negotiator.negotiate(offered) {
                Negotiation::Agreed(version) => {
                    protocol = version;
                    response.headers_mut().insert(
                        "Sec-WebSocket-Protocol",
                        version
                            .subprotocol()
                            .parse()
                            .expect("static subprotocol is a valid header value"),
                    );
                    info!(
                        charge_point_id = id.as_str(),
                        subprotocol = version.subprotocol(),
                        "Subprotocol agreed"
                    );
                }
                Negotiation::Assumed(version) => {
                    protocol = version;
                    info!(
                        charge_point_id = id.as_str(),
                        subprotocol = version.subprotocol(),
                        "No subprotocol offered, assuming default"
                    );
                }
                Negotiation::NoMatch => {
                    warn!(
                        charge_point_id = id.as_str(),
                        offered = offered.unwrap_or(""),
                        "No mutually supported subprotocol, rejecting"
                    );
                    return Err(reject_handshake(
                        StatusCode::BAD_REQUEST,
                        "No supported OCPP subprotocol",
                    ));
                }
            }

            charge_point_id = Some(id);
            Ok(response)
        },
    )
    .await?;

    // Set inside the handshake callback; accept_hdr_async failed otherwise.
    let Some(charge_point_id) = charge_point_id else {
        return Ok(());
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // A station we already booted to Accepted skips re-verification.
    let pre_verified = dispatcher
        .state_cache
        .charge_point_info(&charge_point_id)
        .is_some_and(|info| matches!(info.status, RegistrationStatus::Accepted));

    let outcome = match registry.add_session(
        &charge_point_id,
        protocol,
        tx,
        Some(addr.to_string()),
        pre_verified,
    ) {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(
                charge_point_id = charge_point_id.as_str(),
                error = %err,
                "Connection refused"
            );
            let _ = ws_sender.close().await;
            return Ok(());
        }
    };
    let session = Arc::clone(outcome.session());
    if pre_verified {
        // Resumed sessions may predate the accepted boot.
        session.mark_verified();
    } else {
        // Fresh sessions and unverified resumes alike must boot within the
        // window; a resume's original watchdog already ran out while the
        // session sat disconnected. No-op when already verified.
        session.start_verification_watchdog(boot_timeout);
    }
    dispatcher.state_cache.mark_online(&charge_point_id);

    info!(
        charge_point_id = charge_point_id.as_str(),
        session_id = %session.session_id,
        "[{}] Connected from {}",
        charge_point_id,
        addr
    );

    let handler = OcppHandler::new(
        Arc::clone(&session),
        Arc::clone(&dispatcher),
        Arc::clone(&call_matcher),
    );

    // Outbound pump: frames queued on the session's transport channel.
    let cp_id_send = charge_point_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if let Err(e) = ws_sender.send(msg).await {
                debug!("[{}] Send error: {}", cp_id_send, e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Inbound pump: complete text frames into the router.
    let recv_session = Arc::clone(&session);
    let cp_id_recv = charge_point_id.clone();
    let recv_task = tokio::spawn(async move {
        let mut reason = "Connection closed".to_string();
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Some(response) = handler.handle(&text).await {
                        if let Err(e) = recv_session.send_text(response) {
                            warn!("[{}] Failed to send response: {}", cp_id_recv, e);
                            reason = "Transport closed".to_string();
                            break;
                        }
                    }
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    recv_session.touch();
                }
                Ok(Message::Close(frame)) => {
                    debug!("[{}] Close frame received: {:?}", cp_id_recv, frame);
                    reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "Closed by charge point".to_string());
                    break;
                }
                Ok(Message::Binary(data)) => {
                    warn!(
                        "[{}] Binary message received ({} bytes), ignoring",
                        cp_id_recv,
                        data.len()
                    );
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => {
                    debug!("[{}] WebSocket error: {}", cp_id_recv, e);
                    reason = format!("Socket error: {}", e);
                    break;
                }
            }
        }
        reason
    });

    let reason = if let Some(shutdown) = shutdown {
        tokio::select! {
            reason = recv_task => reason.unwrap_or_else(|_| "Receive task failed".to_string()),
            _ = send_task => "Send pump stopped".to_string(),
            _ = shutdown.wait() => {
                session.close("Server shutting down");
                "Server shutting down".to_string()
            }
        }
    } else {
        tokio::select! {
            reason = recv_task => reason.unwrap_or_else(|_| "Receive task failed".to_string()),
            _ = send_task => "Send pump stopped".to_string(),
        }
    };

    // Teardown: retain or purge per session state, and fail the device's
    // in-flight commands instead of letting them run out their timeouts.
    registry.remove_session(&session, &reason);
    let cancelled = call_matcher.cancel_device(&charge_point_id);
    if cancelled > 0 {
        debug!(
            charge_point_id = charge_point_id.as_str(),
            cancelled, "Cancelled in-flight commands on disconnect"
        );
    }
    if !registry.is_connected(&charge_point_id) {
        dispatcher.state_cache.mark_offline(&charge_point_id);
    }

    info!("[{}] Disconnected: {}", charge_point_id, reason);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_point_id_from_prefixed_path() {
        assert_eq!(
            extract_charge_point_id("/ocpp/CP001", None),
            Some("CP001".to_string())
        );
        assert_eq!(
            extract_charge_point_id("/ocpp/CP001/", None),
            Some("CP001".to_string())
        );
    }

    #[test]
    fn charge_point_id_from_bare_path() {
        assert_eq!(
            extract_charge_point_id("/CP001", None),
            Some("CP001".to_string())
        );
    }

    #[test]
    fn charge_point_id_from_query_parameter() {
        assert_eq!(
            extract_charge_point_id("/", Some("chargePointId=CP001")),
            Some("CP001".to_string())
        );
        assert_eq!(
            extract_charge_point_id("/ocpp", Some("cpid=CP002&foo=bar")),
            Some("CP002".to_string())
        );
    }

    #[test]
    fn missing_charge_point_id_is_none() {
        assert_eq!(extract_charge_point_id("/", None), None);
        assert_eq!(extract_charge_point_id("/ocpp/", None), None);
        assert_eq!(extract_charge_point_id("/", Some("chargePointId=")), None);
        // Nested paths are not a station ID.
        assert_eq!(extract_charge_point_id("/ocpp/a/b", None), None);
    }
}
