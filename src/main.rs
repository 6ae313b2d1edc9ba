use modemhub::application::CallService;
use modemhub::config::Config;
use modemhub::domain::modem::OperatorDirectory;
use modemhub::infrastructure::persistence::{
    InMemoryIdentityRegistry, InMemoryModemRepository, LoggingSmsSink,
};
use modemhub::infrastructure::protocols::webrtc::SessionManager;
use modemhub::infrastructure::serial::{EngineContext, PortManager};
use modemhub::infrastructure::usb::platform_resolver;
use modemhub::interface::api::{build_router, init_metrics, AppState};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load(Some("config"))?;

    // Initialize tracing; RUST_LOG overrides the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting modemhub");
    info!("Configuration loaded: {:?}", config);

    let operators = match config.serial.operator_file.as_deref() {
        Some(path) => match OperatorDirectory::load(path) {
            Ok(directory) => {
                info!("Loaded {} operators from {}", directory.len(), path);
                directory
            }
            Err(e) => {
                warn!("Operator list {} unavailable: {}", path, e);
                OperatorDirectory::empty()
            }
        },
        None => OperatorDirectory::empty(),
    };

    let context = EngineContext {
        config: Arc::new(config.serial.engine_config()),
        // Replaced by the port manager's own table
        registry: Arc::new(InMemoryIdentityRegistry::new()),
        repository: Arc::new(InMemoryModemRepository::new()),
        sms_sink: Arc::new(LoggingSmsSink),
        operators: Arc::new(operators),
        usb: platform_resolver(),
    };

    let ports = PortManager::with_serial_ports(config.serial.clone(), context);
    ports.start().await;

    let sessions = SessionManager::new(&config.calling)?;
    let calls = CallService::new(ports.clone(), sessions.clone());

    let prometheus_handle = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics exporter disabled: {}", e);
            None
        }
    };

    let app = build_router(AppState::new(calls), prometheus_handle);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("HTTP API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down...");
        })
        .await?;

    if let Err(e) = sessions.close_all().await {
        warn!("Error closing call sessions: {}", e);
    }
    ports.stop();

    info!("modemhub stopped");
    Ok(())
}
