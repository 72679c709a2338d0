//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "dispatch.toml",
    "./config/config.toml",
    "./config/dispatch.toml",
    "/etc/campaign-dispatch/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_overrides(&mut config, |key| env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
            warn!(?path, "Configured file not found, searching standard paths");
        }

        if let Ok(path) = env::var("DISPATCH_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    /// Apply overrides from a variable source (the process environment in `load`)
    pub fn apply_overrides<F>(&self, config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // HTTP
        set_parsed(&lookup, "DISPATCH_HTTP_PORT", &mut config.http.port);
        if let Some(val) = lookup("DISPATCH_HTTP_HOST") {
            config.http.host = val;
        }

        // Database
        if let Some(val) = lookup("DISPATCH_DATABASE_URL") {
            config.database.url = val;
        }
        set_parsed(&lookup, "DISPATCH_DATABASE_MAX_CONNECTIONS", &mut config.database.max_connections);

        // Gateway
        if let Some(val) = lookup("DISPATCH_GATEWAY_URL") {
            config.gateway.base_url = val;
        }
        if let Some(val) = lookup("DISPATCH_GATEWAY_TOKEN") {
            config.gateway.api_token = val;
        }
        set_parsed(&lookup, "DISPATCH_GATEWAY_TIMEOUT_MS", &mut config.gateway.request_timeout_ms);

        // Scheduler
        set_parsed(&lookup, "DISPATCH_SCHEDULER_ENABLED", &mut config.scheduler.enabled);
        set_parsed(&lookup, "DISPATCH_MAX_CONCURRENT_CAMPAIGNS", &mut config.scheduler.max_concurrent_campaigns);
        set_parsed(&lookup, "DISPATCH_STUCK_TTL_MS", &mut config.scheduler.stuck_ttl_ms);
        set_parsed(&lookup, "DISPATCH_TICK_INTERVAL_MS", &mut config.scheduler.tick_interval_ms);
        set_parsed(&lookup, "DISPATCH_CLAIM_TIMEOUT_MS", &mut config.scheduler.claim_timeout_ms);
        set_parsed(&lookup, "DISPATCH_PAUSED_POLL_MS", &mut config.scheduler.paused_poll_ms);
        set_parsed(&lookup, "DISPATCH_ERROR_BACKOFF_MS", &mut config.scheduler.error_backoff_ms);
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Overwrite `target` when the variable is present and parses; keep it otherwise
fn set_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(val) = lookup(key) {
        match val.trim().parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(key = %key, value = %val, "Ignoring unparseable configuration override"),
        }
    }
}
