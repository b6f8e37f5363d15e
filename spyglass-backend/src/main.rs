use spyglass_backend::{build_state, config::Config, create_app, helpers, spawn_monitor_tasks};
use spyglass_db::Database;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};

#[tokio::main]
async fn main() {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = tracing::Level::DEBUG;
    #[cfg(not(debug_assertions))]
    let log_level = tracing::Level::INFO;

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting Spyglass backend server...");

    // Load configuration from environment variables or use defaults
    let config = Config::from_env();
    tracing::info!(
        "Configuration: port={}, db_path={}, log_file={}, rcon={}:{}, poll={}s, min_session={}s, cache_ttl={}s",
        config.port,
        config.database_path,
        config.log_file.display(),
        config.rcon_host,
        config.rcon_port,
        config.roster_poll_interval.as_secs(),
        config.min_session_duration.as_secs(),
        config.skills_cache_ttl.as_secs()
    );

    let db = Database::open(&config.database_path).await.unwrap();

    // Sessions left open by a previous run are unverifiable: close the
    // long ones at recovery time, drop the noise
    db.recover_orphaned_sessions(
        helpers::now(),
        config.min_session_duration.as_secs() as i64,
    )
    .await
    .unwrap();

    let governor = GovernorConfigBuilder::default()
        .per_second(config.rate_limit_per_sec)
        .burst_size(config.rate_limit_burst)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .unwrap();

    let state = build_state(db, config.clone());

    // Best-effort initial RCON connection; failures retry on their own
    state.rcon.connect().await;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let tasks = spawn_monitor_tasks(&state, shutdown_rx);

    let app = create_app(state).layer(GovernorLayer::new(governor));

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await.unwrap();
    tracing::info!("Server listening on {}", addr);

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    });

    if let Err(e) = serve.await {
        tracing::error!("Axum server error: {}", e);
    }

    // Stop the watcher and timer tasks before exit
    let _ = shutdown_tx.send(true);
    for task in tasks {
        let _ = task.await;
    }
    tracing::info!("shutdown complete");
}
