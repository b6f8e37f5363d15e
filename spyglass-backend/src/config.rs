use std::env::var;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;

/// Application configuration with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port
    /// Env: PORT (default: 3000)
    pub port: u16,

    /// Database file path
    /// Env: DATABASE_PATH (default: "spyglass.db")
    pub database_path: String,

    /// Path to the live Minecraft server log
    /// Env: LOG_FILE (default: "./logs/latest.log")
    pub log_file: PathBuf,

    /// RCON host
    /// Env: RCON_HOST (default: "localhost")
    pub rcon_host: String,

    /// RCON port
    /// Env: RCON_PORT (default: 25575)
    pub rcon_port: u16,

    /// RCON password
    /// Env: RCON_PASSWORD (default: empty; auth will fail and retry until set)
    pub rcon_password: String,

    /// Fixed delay between RCON reconnect attempts
    /// Env: RCON_RETRY_SECS (default: 5)
    pub rcon_retry: Duration,

    /// Roster poll interval while observers are connected
    /// Env: ROSTER_POLL_SECS (default: 10)
    pub roster_poll_interval: Duration,

    /// Sessions shorter than this are discarded instead of persisted
    /// Env: MIN_SESSION_SECS (default: 150)
    pub min_session_duration: Duration,

    /// Offline ledger entries older than this are garbage collected
    /// Env: SESSION_RETENTION_SECS (default: 86400 = 24h)
    pub session_retention: Duration,

    /// Presence cache TTL
    /// Env: SKILLS_CACHE_TTL_SECS (default: 60)
    pub skills_cache_ttl: Duration,

    /// Performance metric collection interval
    /// Env: PERF_COLLECT_SECS (default: 300 = 5 minutes)
    pub perf_collect_interval: Duration,

    /// Number of recent log lines kept for new observers
    /// Env: LOG_HISTORY_LINES (default: 200)
    pub log_history_lines: usize,

    /// How far back to seed the log history on startup, in bytes
    /// Env: LOG_BACKLOG_BYTES (default: 20000)
    pub log_backlog_bytes: u64,

    /// Request body size limit in bytes
    /// Env: REQUEST_BODY_LIMIT (default: 1048576 = 1MB)
    pub request_body_limit: usize,

    /// Request timeout in seconds
    /// Env: REQUEST_TIMEOUT_SECS (default: 30)
    pub request_timeout: Duration,

    /// Rate limit for API endpoints (requests per second)
    /// Env: RATE_LIMIT_PER_SEC (default: 10)
    pub rate_limit_per_sec: u64,

    /// Burst size for API endpoints
    /// Env: RATE_LIMIT_BURST (default: 20)
    pub rate_limit_burst: u32,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let _ = dotenv(); //for debugging mostly
        Self {
            port: env_or_default("PORT", 3000),
            database_path: env_or_default_string("DATABASE_PATH", "spyglass.db"),
            log_file: PathBuf::from(env_or_default_string("LOG_FILE", "./logs/latest.log")),
            rcon_host: env_or_default_string("RCON_HOST", "localhost"),
            rcon_port: env_or_default("RCON_PORT", 25575),
            rcon_password: env_or_default_string("RCON_PASSWORD", ""),
            rcon_retry: Duration::from_secs(env_or_default("RCON_RETRY_SECS", 5)),
            roster_poll_interval: Duration::from_secs(env_or_default("ROSTER_POLL_SECS", 10)),
            min_session_duration: Duration::from_secs(env_or_default("MIN_SESSION_SECS", 150)),
            session_retention: Duration::from_secs(env_or_default("SESSION_RETENTION_SECS", 86400)),
            skills_cache_ttl: Duration::from_secs(env_or_default("SKILLS_CACHE_TTL_SECS", 60)),
            perf_collect_interval: Duration::from_secs(env_or_default("PERF_COLLECT_SECS", 300)),
            log_history_lines: env_or_default("LOG_HISTORY_LINES", 200),
            log_backlog_bytes: env_or_default("LOG_BACKLOG_BYTES", 20_000),
            request_body_limit: env_or_default("REQUEST_BODY_LIMIT", 1024 * 1024),
            request_timeout: Duration::from_secs(env_or_default("REQUEST_TIMEOUT_SECS", 30)),
            rate_limit_per_sec: env_or_default("RATE_LIMIT_PER_SEC", 10),
            rate_limit_burst: env_or_default("RATE_LIMIT_BURST", 20),
        }
    }

    /// Create configuration with all default values
    pub fn default() -> Self {
        Self {
            port: 3000,
            database_path: "spyglass.db".to_string(),
            log_file: PathBuf::from("./logs/latest.log"),
            rcon_host: "localhost".to_string(),
            rcon_port: 25575,
            rcon_password: String::new(),
            rcon_retry: Duration::from_secs(5),
            roster_poll_interval: Duration::from_secs(10),
            min_session_duration: Duration::from_secs(150),
            session_retention: Duration::from_secs(86400),
            skills_cache_ttl: Duration::from_secs(60),
            perf_collect_interval: Duration::from_secs(300),
            log_history_lines: 200,
            log_backlog_bytes: 20_000,
            request_body_limit: 1024 * 1024, // 1 MB
            request_timeout: Duration::from_secs(30),
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
        }
    }
}

/// Parse environment variable or return default value
fn env_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}

/// Parse environment variable string or return default value
fn env_or_default_string(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|_| default.to_string())
}
