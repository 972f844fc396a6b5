//! Voice dialog server entry point

use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_dialog_config::{load_settings, Settings};
use voice_dialog_providers::{build_capabilities, Registries};
use voice_dialog_server::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_name = std::env::var("VOICE_DIALOG_ENV").ok();
    let settings = load_settings(env_name.as_deref())?;

    init_tracing(&settings);
    tracing::info!("Starting voice dialog server v{}", env!("CARGO_PKG_VERSION"));

    // Instantiate every enabled provider; an unknown adapter name is fatal
    let registries = Registries::builtin();
    let caps = build_capabilities(&settings.modules, &registries)?;
    for (module, state) in caps.module_states() {
        tracing::info!("Module {}: {}", module, state);
    }

    let state = AppState::new(settings.clone(), caps);
    let cleanup_shutdown = state.sessions.start_cleanup_task();

    let app = create_router(state.clone());

    let addr: SocketAddr =
        format!("{}:{}", settings.transport.host, settings.transport.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = cleanup_shutdown.send(true);
    state.sessions.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(settings: &Settings) {
    let level = match settings.global_settings.log_level.to_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARNING" => "warn",
        "ERROR" => "error",
        _ => "info",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("voice_dialog={level},tower_http=warn").into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
