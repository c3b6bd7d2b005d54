//! Runtime configuration: defaults, overlaid by `LUMINA_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SESSION_PUSH_LIMIT: u32 = 50;
pub const DEFAULT_SAMPLE_PUSH_LIMIT: u32 = 500;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration shared by the capture pipeline and the sync worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_base_url: String,
    /// `None` resolves to [`crate::paths::db_path`].
    pub db_path: Option<PathBuf>,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub sync_interval: Duration,
    /// Upper bound on every remote call.
    pub request_timeout: Duration,
    pub session_push_limit: u32,
    pub sample_push_limit: u32,
    /// How long shutdown waits for the sync worker to notice cancellation.
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            db_path: None,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            session_push_limit: DEFAULT_SESSION_PUSH_LIMIT,
            sample_push_limit: DEFAULT_SAMPLE_PUSH_LIMIT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl Config {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`. Unparseable values are
    /// logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("LUMINA_API_URL").filter(|u| !u.trim().is_empty()) {
            config.api_base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(path) = lookup("LUMINA_DB_PATH").filter(|p| !p.trim().is_empty()) {
            config.db_path = Some(PathBuf::from(path));
        }
        if let Some(n) = parse_var::<usize>(&lookup, "LUMINA_BATCH_SIZE") {
            config.batch_size = n.max(1);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "LUMINA_FLUSH_INTERVAL_SECS") {
            config.flush_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "LUMINA_SYNC_INTERVAL_SECS") {
            config.sync_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "LUMINA_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs.max(1));
        }

        config
    }

    /// Resolved database location.
    pub fn resolved_db_path(&self) -> Option<PathBuf> {
        self.db_path.clone().or_else(crate::paths::db_path)
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable config value");
            None
        }
    }
}
