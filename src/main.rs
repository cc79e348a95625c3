//! Identity Gate server binary.
//!
//! Serves the external sign-in start and callback routes and the health
//! endpoint.

use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use identity_gate::adapters::http::{auth_router, CallbackState};
use identity_gate::application::AuthProvider;
use identity_gate::config::AppConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_tracing(&config);
    config.validate()?;

    tracing::info!(
        "Starting Identity Gate v{} ({:?})",
        env!("CARGO_PKG_VERSION"),
        config.server.environment
    );

    let provider = AuthProvider::from_config(&config, None);
    let mut state = CallbackState::new(provider.capability())
        .with_sign_in_path(config.auth.sign_in_path.clone());
    if let Some(origin) = config.server.public_origin() {
        state = state.with_public_origin(origin);
    }

    let app = auth_router(state)
        .layer(TimeoutLayer::new(config.server.request_timeout()))
        .layer(TraceLayer::new_for_http());

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, auth_configured = provider.capability().is_configured(), "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    provider.shutdown();
    tracing::info!("Server stopped");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));

    let production = config.is_production();
    let json = production.then(|| tracing_subscriber::fmt::layer().json());
    let pretty = (!production).then(|| tracing_subscriber::fmt::layer().pretty());

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(pretty)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
