//!
//! OCPP 1.6 Central System for managing EV charging stations.
//! Reads configuration from TOML file (~/.config/ocpp-csms/config.toml).

use tracing::{error, info, warn};

use ocpp_csms::application::services::create_interrogator;
use ocpp_csms::support::shutdown::ShutdownCoordinator;
use ocpp_csms::{
    create_call_matcher, create_command_sender, create_event_bus, create_request_dispatcher,
    create_session_registry, create_state_cache, default_config_path, AppConfig, OcppServer,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Load configuration ─────────────────────────────────────
    let config_path = std::env::var("OCPP_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    let config = match AppConfig::load(&config_path) {
        Ok(cfg) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level)),
                )
                .init();
            info!("Configuration loaded from {}", config_path.display());
            cfg
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
                .init();
            error!("Failed to load config: {}. Using defaults.", e);
            AppConfig::default()
        }
    };

    info!("Starting OCPP Central System...");

    // ── Prometheus metrics recorder (must be installed before any metrics calls) ──
    if config.metrics.enabled {
        let addr: std::net::SocketAddr = config.metrics.address().parse()?;
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus metrics exporter");
        info!("📊 Prometheus metrics exposed on http://{}/metrics", addr);
    } else {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus metrics recorder");
    }

    // ── Engine wiring ──────────────────────────────────────────
    let event_bus = create_event_bus();
    let state_cache = create_state_cache();
    let call_matcher = create_call_matcher();
    let session_registry = create_session_registry(config.ocpp.clone(), event_bus.clone());
    let dispatcher = create_request_dispatcher(
        state_cache.clone(),
        event_bus.clone(),
        config.ocpp.clone(),
    );
    let command_sender = create_command_sender(
        session_registry.clone(),
        call_matcher.clone(),
        state_cache.clone(),
        config.ocpp.clone(),
    );
    let interrogator = create_interrogator(
        command_sender.clone(),
        state_cache.clone(),
        event_bus.clone(),
    );

    // ── Shutdown handling ──────────────────────────────────────
    let shutdown = ShutdownCoordinator::new(config.server.shutdown_timeout);
    let shutdown_signal = shutdown.signal();
    shutdown.start_signal_listener();

    // ── Background sweeps ──────────────────────────────────────
    call_matcher.start(config.ocpp.call_cleanup_period(), shutdown_signal.clone());
    session_registry.start(config.ocpp.session_cleanup_period(), shutdown_signal.clone());
    interrogator.start(shutdown_signal.clone());

    // ── WebSocket server ───────────────────────────────────────
    let server = OcppServer::new(
        config,
        session_registry.clone(),
        dispatcher,
        call_matcher.clone(),
    )
    .with_shutdown(shutdown_signal.clone());

    info!("🚀 Server starting. Press Ctrl+C to shutdown gracefully.");
    let server_exit = shutdown_signal.clone();
    let ws_task = tokio::spawn(async move {
        let result = server.run().await;
        // Listener failure also takes the process down.
        server_exit.trigger();
        result
    });

    let graceful = shutdown
        .shutdown_with_cleanup(|| async {
            match ws_task.await {
                Ok(Ok(())) => info!("WebSocket server stopped"),
                Ok(Err(e)) => error!("WebSocket server error: {}", e),
                Err(e) => error!("WebSocket server task panicked: {}", e),
            }
        })
        .await;
    if !graceful {
        warn!("Some sessions did not drain before the grace period expired");
    }

    info!("👋 OCPP Central System shutdown complete");
    Ok(())
}
