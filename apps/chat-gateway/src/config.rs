use chat_common::snowflake::MAX_WORKER_ID;

/// Upper bound accepted for `HEARTBEAT_INTERVAL_MS` (one hour).
pub const MAX_HEARTBEAT_INTERVAL_MS: u64 = 3_600_000;

/// Chat gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP/WebSocket server binds to.
    pub port: u16,
    /// When true, only `allowed_origins` may make cross-origin requests.
    pub production: bool,
    /// Origins accepted by CORS in production.
    pub allowed_origins: Vec<String>,
    /// Heartbeat interval advertised to clients in READY (ms).
    pub heartbeat_interval_ms: u64,
    /// Seconds a fresh socket has to send IDENTIFY.
    pub identify_timeout_secs: u64,
    /// Worker field of generated message IDs.
    pub worker_id: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            production: false,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "https://social-media-app-txhv.onrender.com".to_string(),
            ],
            heartbeat_interval_ms: 41_250,
            identify_timeout_secs: 10,
            worker_id: 0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional; unset or unparsable values fall back to
    /// the defaults. `APP_ENV` selects the mode, with `NODE_ENV` honoured when
    /// it is unset so existing deployments keep working.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parsed_var::<u16>("PORT").unwrap_or(defaults.port),
            production: is_production(
                std::env::var("APP_ENV").ok().as_deref(),
                std::env::var("NODE_ENV").ok().as_deref(),
            ),
            allowed_origins: std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| parse_origins(&v))
                .filter(|origins| !origins.is_empty())
                .unwrap_or(defaults.allowed_origins),
            heartbeat_interval_ms: parsed_var::<u64>("HEARTBEAT_INTERVAL_MS")
                .filter(|ms| (1..=MAX_HEARTBEAT_INTERVAL_MS).contains(ms))
                .unwrap_or(defaults.heartbeat_interval_ms),
            identify_timeout_secs: parsed_var::<u64>("IDENTIFY_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.identify_timeout_secs),
            worker_id: parsed_var::<u16>("WORKER_ID")
                .filter(|id| *id <= MAX_WORKER_ID)
                .unwrap_or(defaults.worker_id),
        }
    }
}

fn is_production(app_env: Option<&str>, node_env: Option<&str>) -> bool {
    app_env
        .or(node_env)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("production"))
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
