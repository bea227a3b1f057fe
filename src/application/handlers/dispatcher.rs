//! Business hooks for device-initiated actions
//!
//! Every inbound action gets a protocol-correct default response from the
//! engine. A business layer that wants to decide for itself attaches to
//! the matching [`Hook`] and receives each request together with a
//! one-shot response slot. The engine waits a bounded time for the slot to
//! be filled and falls back to the default, so a slow or absent business
//! layer never stalls a station.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::messages::data_transfer::{DataTransferRequest, DataTransferResponse};
use rust_ocpp::v1_6::messages::diagnostics_status_notification::{
    DiagnosticsStatusNotificationRequest, DiagnosticsStatusNotificationResponse,
};
use rust_ocpp::v1_6::messages::firmware_status_notification::{
    FirmwareStatusNotificationRequest, FirmwareStatusNotificationResponse,
};
use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use rust_ocpp::v1_6::messages::stop_transaction::{
    StopTransactionRequest, StopTransactionResponse,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::application::state_cache::SharedStateCache;
use crate::config::OcppConfig;
use crate::notifications::SharedEventBus;

const HOOK_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("hook already attached")]
    AlreadyAttached,
}

/// One request delivered to a hook subscriber, with its response slot.
pub struct HookCall<Req, Res> {
    pub charge_point_id: String,
    pub request: Req,
    respond_to: oneshot::Sender<Res>,
}

impl<Req, Res> HookCall<Req, Res> {
    /// Fill the response slot. Returns false if the engine already gave
    /// up waiting and answered with the default.
    pub fn respond(self, response: Res) -> bool {
        self.respond_to.send(response).is_ok()
    }
}

/// A subscribable decision point for one action type.
pub struct Hook<Req, Res> {
    slot: OnceLock<mpsc::Sender<HookCall<Req, Res>>>,
    action: &'static str,
}

impl<Req, Res> Hook<Req, Res> {
    fn new(action: &'static str) -> Self {
        Self {
            slot: OnceLock::new(),
            action,
        }
    }

    /// Attach the business layer. At most one subscriber per hook.
    pub fn attach(&self) -> Result<mpsc::Receiver<HookCall<Req, Res>>, HookError> {
        let (tx, rx) = mpsc::channel(HOOK_CHANNEL_CAPACITY);
        self.slot
            .set(tx)
            .map_err(|_| HookError::AlreadyAttached)?;
        Ok(rx)
    }

    pub fn is_attached(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Offer `request` to the subscriber and wait up to `wait` for an
    /// answer. Without a subscriber the default is returned immediately.
    pub(crate) async fn dispatch(
        &self,
        charge_point_id: &str,
        request: Req,
        wait: Duration,
        default: impl FnOnce() -> Res,
    ) -> Res {
        let Some(sender) = self.slot.get() else {
            return default();
        };
        let (tx, rx) = oneshot::channel();
        let call = HookCall {
            charge_point_id: charge_point_id.to_string(),
            request,
            respond_to: tx,
        };
        if sender.send(call).await.is_err() {
            warn!(
                charge_point_id = charge_point_id,
                action = self.action,
                "Hook subscriber is gone, using default response"
            );
            return default();
        }
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                debug!(
                    charge_point_id = charge_point_id,
                    action = self.action,
                    "Hook subscriber dropped the request, using default response"
                );
                default()
            }
            Err(_) => {
                warn!(
                    charge_point_id = charge_point_id,
                    action = self.action,
                    wait_secs = wait.as_secs(),
                    "No business response in time, using default response"
                );
                metrics::counter!("ocpp_hook_timeouts_total").increment(1);
                default()
            }
        }
    }
}

/// All subscribable hooks, one per device-initiated action that carries a
/// business decision. Heartbeat has no hook: its response is fixed by the
/// protocol and observers get the event instead.
pub struct Hooks {
    pub boot_notification: Hook<BootNotificationRequest, BootNotificationResponse>,
    pub authorize: Hook<AuthorizeRequest, AuthorizeResponse>,
    pub start_transaction: Hook<StartTransactionRequest, StartTransactionResponse>,
    pub stop_transaction: Hook<StopTransactionRequest, StopTransactionResponse>,
    pub status_notification: Hook<StatusNotificationRequest, StatusNotificationResponse>,
    pub meter_values: Hook<MeterValuesRequest, MeterValuesResponse>,
    pub data_transfer: Hook<DataTransferRequest, DataTransferResponse>,
    pub diagnostics_status: Hook<
        DiagnosticsStatusNotificationRequest,
        DiagnosticsStatusNotificationResponse,
    >,
    pub firmware_status: Hook<
        FirmwareStatusNotificationRequest,
        FirmwareStatusNotificationResponse,
    >,
}

impl Hooks {
    pub fn new() -> Self {
        Self {
            boot_notification: Hook::new("BootNotification"),
            authorize: Hook::new("Authorize"),
            start_transaction: Hook::new("StartTransaction"),
            stop_transaction: Hook::new("StopTransaction"),
            status_notification: Hook::new("StatusNotification"),
            meter_values: Hook::new("MeterValues"),
            data_transfer: Hook::new("DataTransfer"),
            diagnostics_status: Hook::new("DiagnosticsStatusNotification"),
            firmware_status: Hook::new("FirmwareStatusNotification"),
        }
    }
}

impl Default for Hooks {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared context for the per-action request handlers: cache, events,
/// hooks, and the timeout knobs.
pub struct RequestDispatcher {
    pub state_cache: SharedStateCache,
    pub event_bus: SharedEventBus,
    pub hooks: Hooks,
    pub config: OcppConfig,
}

impl RequestDispatcher {
    pub fn new(
        state_cache: SharedStateCache,
        event_bus: SharedEventBus,
        config: OcppConfig,
    ) -> Self {
        Self {
            state_cache,
            event_bus,
            hooks: Hooks::new(),
            config,
        }
    }
}

/// Shared dispatcher type
pub type SharedRequestDispatcher = Arc<RequestDispatcher>;

/// Create a shared dispatcher
pub fn create_request_dispatcher(
    state_cache: SharedStateCache,
    event_bus: SharedEventBus,
    config: OcppConfig,
) -> SharedRequestDispatcher {
    Arc::new(RequestDispatcher::new(state_cache, event_bus, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};

    fn accepted() -> AuthorizeResponse {
        AuthorizeResponse {
            id_tag_info: IdTagInfo {
                status: AuthorizationStatus::Accepted,
                expiry_date: None,
                parent_id_tag: None,
            },
        }
    }

    fn blocked() -> AuthorizeResponse {
        AuthorizeResponse {
            id_tag_info: IdTagInfo {
                status: AuthorizationStatus::Blocked,
                expiry_date: None,
                parent_id_tag: None,
            },
        }
    }

    #[tokio::test]
    async fn unattached_hook_returns_default_immediately() {
        let hook: Hook<AuthorizeRequest, AuthorizeResponse> = Hook::new("Authorize");
        let started = std::time::Instant::now();
        let response = hook
            .dispatch(
                "CP-1",
                AuthorizeRequest {
                    id_tag: "TAG".to_string(),
                },
                Duration::from_secs(30),
                accepted,
            )
            .await;
        assert_eq!(response.id_tag_info.status, AuthorizationStatus::Accepted);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn subscriber_response_wins_over_default() {
        let hook: Hook<AuthorizeRequest, AuthorizeResponse> = Hook::new("Authorize");
        let mut rx = hook.attach().unwrap();
        tokio::spawn(async move {
            let call = rx.recv().await.unwrap();
            assert_eq!(call.charge_point_id, "CP-1");
            assert_eq!(call.request.id_tag, "TAG");
            assert!(call.respond(blocked()));
        });

        let response = hook
            .dispatch(
                "CP-1",
                AuthorizeRequest {
                    id_tag: "TAG".to_string(),
                },
                Duration::from_secs(1),
                accepted,
            )
            .await;
        assert_eq!(response.id_tag_info.status, AuthorizationStatus::Blocked);
    }

    #[tokio::test]
    async fn slow_subscriber_falls_back_to_default() {
        let hook: Hook<AuthorizeRequest, AuthorizeResponse> = Hook::new("Authorize");
        let mut rx = hook.attach().unwrap();
        let _keep_alive = tokio::spawn(async move {
            let call = rx.recv().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            // Too late; the default already went out.
            assert!(!call.respond(blocked()));
        });

        let response = hook
            .dispatch(
                "CP-1",
                AuthorizeRequest {
                    id_tag: "TAG".to_string(),
                },
                Duration::from_millis(40),
                accepted,
            )
            .await;
        assert_eq!(response.id_tag_info.status, AuthorizationStatus::Accepted);
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    #[tokio::test]
    async fn dropped_call_falls_back_to_default() {
        let hook: Hook<AuthorizeRequest, AuthorizeResponse> = Hook::new("Authorize");
        let mut rx = hook.attach().unwrap();
        tokio::spawn(async move {
            let call = rx.recv().await.unwrap();
            drop(call);
        });

        let response = hook
            .dispatch(
                "CP-1",
                AuthorizeRequest {
                    id_tag: "TAG".to_string(),
                },
                Duration::from_secs(1),
                accepted,
            )
            .await;
        assert_eq!(response.id_tag_info.status, AuthorizationStatus::Accepted);
    }

    #[tokio::test]
    async fn second_attach_is_rejected() {
        let hooks = Hooks::new();
        let _rx = hooks.boot_notification.attach().unwrap();
        assert!(matches!(
            hooks.boot_notification.attach(),
            Err(HookError::AlreadyAttached)
        ));
        assert!(hooks.boot_notification.is_attached());
        assert!(!hooks.authorize.is_attached());
    }
}
