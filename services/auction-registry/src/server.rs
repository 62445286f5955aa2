//! Auction Registry HTTP Server

use std::net::SocketAddr;
use std::sync::Arc;

use auction::{AuctionRegistry, CredentialIssuer, LocalAuthority};
use axum::{
    Router,
    routing::{get, post},
};
use tracing::{error, info};

use crate::config::ServiceConfig;
use crate::handlers::{self, AppState};

/// Create and configure the Axum router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))
        // Auction lifecycle
        .route("/api/auction", post(handlers::create_auction))
        .route("/api/auction/register", post(handlers::register))
        .route("/api/auction/descriptor", get(handlers::download_descriptor))
        .route("/api/auction/ca", get(handlers::root_certificate))
        .with_state(state)
}

/// Load the CA and assemble the shared state.
pub fn build_state(config: &ServiceConfig) -> Result<Arc<AppState>, Box<dyn std::error::Error>> {
    info!(
        cert = %config.ca_cert_path.display(),
        key = %config.ca_key_path.display(),
        "Loading certificate authority"
    );
    let authority = LocalAuthority::from_files(
        &config.ca_cert_path,
        &config.ca_key_path,
        config.validity_days,
    )
    .map_err(|e| format!("Failed to load certificate authority: {}", e))?;
    let root_certificate = authority.root_certificate_pem().to_string();

    let issuer = CredentialIssuer::new(Arc::new(authority), config.issuer.clone());
    let registry = AuctionRegistry::new(issuer, config.registry);

    Ok(Arc::new(AppState {
        registry,
        root_certificate,
        trust_forwarded_for: config.trust_forwarded_for,
    }))
}

/// Run the HTTP server
pub async fn run(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(state);

    info!(
        "Auction registry listening on {}",
        listener
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)))
    );

    // Caller addresses come from the connection, so the peer address must be attached.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

/// Resolves on SIGTERM or Ctrl+C.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let received = tokio::select! {
        _ = ctrl_c => "ctrl_c",
        _ = terminate => "sigterm",
    };

    info!(signal = received, "Shutting down, in-memory auction state will be discarded");
}
