//! WebAuthn RP Server - passkey registration and login over HTTP
//!
//! Endpoints:
//! - POST /webauthn/register/start, /webauthn/register/finish
//! - POST /webauthn/authenticate/start, /webauthn/authenticate/finish
//! - POST /webauthn/deregister
//! - GET  /webauthn/registrations/{username}
//! - GET  /health

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webauthn_rp_core::{
    InMemoryCredentialRepository, MetadataTrustService, RelyingParty, RelyingPartyConfig,
};
use webauthn_rp_server::{create_router_with_config, AppState, Config};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // RUST_LOG overrides; default is info with debug for our crates
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,webauthn_rp_core=debug,webauthn_rp_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let rp_config = RelyingPartyConfig::from_env()?;
    tracing::info!(
        rp_id = rp_config.rp_id(),
        origins = ?rp_config.origins().collect::<Vec<_>>(),
        user_verification = rp_config.user_verification().as_str(),
        attestation = ?rp_config.attestation_policy(),
        counter = ?rp_config.counter_policy(),
        "Relying party configured"
    );

    let mut rp = RelyingParty::new(rp_config, Arc::new(InMemoryCredentialRepository::new()));
    if let Some(path) = &config.trust_roots_pem {
        let pem = std::fs::read(path)?;
        let trust = MetadataTrustService::new().with_roots_pem(&pem)?;
        tracing::info!(
            path = %path.display(),
            roots = trust.root_count(),
            "Attestation roots loaded"
        );
        rp = rp.with_trust_service(Arc::new(trust));
    }
    let state = AppState::new(rp);

    // Expired ceremonies are rejected on use anyway; this only reclaims memory
    let evictor = state.rp.clone();
    let interval = config.eviction_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            evictor.evict_expired_ceremonies();
        }
    });

    let app = create_router_with_config(state, &config);
    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
