pub mod config;
mod error;
pub mod events;
pub mod gateway;
pub mod helpers;
pub mod ledger;
mod monitor;
pub mod perf;
pub mod rcon;
mod routes;
pub mod skills;
pub mod tail;
mod validation;

pub use monitor::PlayersPayload;

use axum::{Router, http::StatusCode, routing::get};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// All services, wired once at startup and shared by reference.
pub struct AppState {
    pub config: config::Config,
    pub db: spyglass_db::Database,
    pub rcon: rcon::RconClient,
    pub gateway: gateway::Gateway,
    pub ledger: ledger::SessionLedger,
    pub skills_cache: Arc<skills::SkillsCache>,
    pub log_buffer: tail::LogBuffer,
    pub perf: perf::PerfMonitor,
    /// Last roster pushed to observers, for change detection
    pub(crate) last_players: tokio::sync::Mutex<Option<rcon::Roster>>,
}

/// Construct every service. Background tasks are spawned separately (see
/// [`spawn_monitor_tasks`]) so tests can build a state with nothing
/// running behind it.
pub fn build_state(db: spyglass_db::Database, config: config::Config) -> Arc<AppState> {
    let gateway = gateway::Gateway::new();
    let skills_cache = Arc::new(skills::SkillsCache::new(
        db.clone(),
        gateway.clone(),
        config.skills_cache_ttl,
    ));
    let ledger = ledger::SessionLedger::new(
        db.clone(),
        skills_cache.clone(),
        config.min_session_duration,
        config.session_retention,
    );
    let rcon = rcon::RconClient::new(
        config.rcon_host.clone(),
        config.rcon_port,
        config.rcon_password.clone(),
        config.rcon_retry,
    );
    let log_buffer = tail::LogBuffer::new(config.log_history_lines);
    let perf = perf::PerfMonitor::new(288); // 24h of 5-minute samples

    Arc::new(AppState {
        config,
        db,
        rcon,
        gateway,
        ledger,
        skills_cache,
        log_buffer,
        perf,
        last_players: tokio::sync::Mutex::new(None),
    })
}

/// Spawn the log tailer, roster poller, ledger GC and performance
/// collector. All of them exit when `shutdown` flips to true.
pub fn spawn_monitor_tasks(
    state: &Arc<AppState>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(tail::run_log_tailer(state.clone(), shutdown.clone())),
        tokio::spawn(monitor::run_roster_poller(state.clone(), shutdown.clone())),
        tokio::spawn(monitor::run_ledger_gc(state.clone(), shutdown.clone())),
        tokio::spawn(perf::run_perf_collector(state.clone(), shutdown)),
    ]
}

/// Create the application router with the given shared state
pub fn create_app(state: Arc<AppState>) -> Router {
    let request_timeout = state.config.request_timeout;
    let request_body_limit = state.config.request_body_limit;

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/ws", get(gateway::ws_handler))
        .route("/api/sessions", get(routes::list_sessions))
        .route("/api/sessions/active", get(routes::active_sessions))
        .route("/api/sessions/stats", get(routes::session_stats))
        .route("/api/sessions/player/{player_name}", get(routes::player_history))
        .route("/api/performance", get(routes::performance))
        .route("/api/cache/stats", get(routes::cache_stats))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(request_body_limit))
        .with_state(state)
}
