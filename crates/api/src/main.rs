use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshport_api::config::ServerConfig;
use meshport_api::engine::Engine;
use meshport_api::router::build_router;
use meshport_api::state::AppState;
use meshport_api::background;
use meshport_pipeline::{ToolConfig, ToolConverter};
use meshport_store::JobStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meshport=debug,meshport_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        data_dir = %config.data_dir.display(),
        max_workers = config.max_workers,
        retention_days = config.retention_days,
        "Loaded server configuration",
    );

    let tools = ToolConfig::from_env();

    // --- Job store ---
    let store = Arc::new(JobStore::open(&config.data_dir).expect("Failed to open job store"));
    let restored = store.load_existing();
    if restored > 0 {
        tracing::info!(restored, "Restored persisted jobs");
    }

    // --- Engine ---
    let converter = Arc::new(ToolConverter::new(tools.clone()));
    let engine = Arc::new(Engine::new(
        Arc::clone(&store),
        converter,
        config.max_workers,
    ));

    // Hand mid-flight jobs back to the executor. Records left `running`
    // by an ungraceful restart were reclassified to `queued` by the
    // store.
    let resumed = engine.resume_pending();
    if resumed > 0 {
        tracing::info!(resumed, "Resumed pending jobs after restart");
    }

    // --- Retention sweeper ---
    let retention_cancel = tokio_util::sync::CancellationToken::new();
    let retention_handle = tokio::spawn(background::retention::run(
        Arc::clone(&store),
        config.retention(),
        retention_cancel.clone(),
    ));

    // --- App state / router ---
    let state = AppState {
        engine: Arc::clone(&engine),
        config: Arc::new(config.clone()),
        tools: Arc::new(tools),
    };
    let app = build_router(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Stop accepting submissions and let in-flight conversions drain.
    engine
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;

    // Stop the retention sweeper with a bounded join.
    retention_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;
    tracing::info!("Retention sweeper stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
