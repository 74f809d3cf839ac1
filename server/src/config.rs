//! Server configuration
//!
//! Configuration is loaded from environment variables; every knob has a
//! production default.

use crate::server::heartbeat::HeartbeatConfig;
use crate::server::rate_limit::RateLimitConfig;
use crate::session::state::SessionConfig;
use std::env;
use std::time::Duration;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,

    /// Connection admission control
    pub rate_limit: RateLimitConfig,

    /// Liveness detection
    pub heartbeat: HeartbeatConfig,

    /// Session residency / cleanup
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            rate_limit: RateLimitConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        if let Ok(val) = env::var("RATE_LIMIT_WINDOW_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.rate_limit.window = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("RATE_LIMIT_MAX_ATTEMPTS")
            && let Ok(v) = val.parse()
        {
            config.rate_limit.max_attempts = v;
        }

        if let Ok(val) = env::var("HEARTBEAT_TIMEOUT_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.heartbeat.timeout = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("HEARTBEAT_CHECK_INTERVAL_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.heartbeat.check_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = env::var("SESSION_SWEEP_INTERVAL_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.session.sweep_interval = Duration::from_secs(secs);
        }
        if let Ok(val) = env::var("SESSION_STALE_AFTER_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            config.session.stale_after = Duration::from_secs(secs);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.rate_limit.max_attempts, 10);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.heartbeat.timeout, Duration::from_secs(120));
        assert_eq!(config.heartbeat.check_interval, Duration::from_secs(30));
        assert_eq!(config.session.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.session.stale_after, Duration::from_secs(3600));
    }

    #[test]
    fn test_config_from_env_falls_back_to_defaults() {
        // No env vars set in the test environment
        let config = Config::from_env();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
    }
}
