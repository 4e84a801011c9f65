mod config;
mod relay;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use devtrack_auth::{AuthService, FileStore, MemoryStore, SecureStore, StorageLifetime, SystemClock};
use tower_http::trace::TraceLayer;

use state::AppState;

const SESSION_VALIDATION_PERIOD: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::Config::load_or_default();

    let log_level = match config.logging.level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt().with_max_level(log_level).init();

    tracing::info!("Starting devtrack server");
    tracing::info!("  Host: {}, port: {}", config.server.host, config.server.port);
    tracing::info!("  Providers: {}", config.auth.providers.len());
    tracing::info!("  Hosted auth: {}", config.auth.hosted.is_some());
    tracing::info!("  Token encryption: {}", config.auth.security.encrypt_tokens);

    let store: Arc<dyn SecureStore> = match config.auth.security.storage {
        StorageLifetime::Persistent => Arc::new(FileStore::new(&config.auth.security.storage_dir)?),
        StorageLifetime::Session => Arc::new(MemoryStore::new()),
    };

    let auth = Arc::new(AuthService::new(
        config.auth.clone(),
        store,
        Arc::new(SystemClock),
    )?);
    auth.initialize_session().await;
    let _validation = auth.start_session_validation(SESSION_VALIDATION_PERIOD);

    let app_state = AppState::new(auth, config.auth.providers.clone());
    let app = routes::router(app_state).layer(TraceLayer::new_for_http());

    let ip_addr = config
        .server
        .host
        .parse::<std::net::IpAddr>()
        .unwrap_or_else(|e| {
            tracing::warn!(
                "Failed to parse host '{}': {}. Using 0.0.0.0",
                config.server.host,
                e
            );
            std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
        });
    let addr = SocketAddr::new(ip_addr, config.server.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
