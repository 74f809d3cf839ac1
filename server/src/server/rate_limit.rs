//! Rate Limiter
//!
//! Per-source-address sliding-window admission control for new connections.
//! Denied attempts never reach the Connection Registry. In-memory only; the
//! window resets on process restart.

use metrics::counter;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Trailing window attempts are counted over
    pub window: Duration,
    /// Attempts allowed per address within the window
    pub max_attempts: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

/// Sliding-window connection admission per source address
pub struct RateLimiter {
    config: RateLimitConfig,
    attempts: Mutex<HashMap<IpAddr, Vec<Instant>>>,
    denied: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            attempts: Mutex::new(HashMap::new()),
            denied: AtomicU64::new(0),
        }
    }

    /// Admit or reject a connection attempt. On admission the attempt is
    /// recorded; entries older than the window are pruned either way.
    pub fn admit(&self, addr: IpAddr) -> bool {
        let now = Instant::now();
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let window = attempts.entry(addr).or_default();
        window.retain(|t| now.duration_since(*t) < self.config.window);

        if window.len() >= self.config.max_attempts {
            self.denied.fetch_add(1, Ordering::Relaxed);
            counter!("pairquiz_rate_limited_total").increment(1);
            warn!("Rate limit exceeded for {}", addr);
            return false;
        }

        window.push(now);
        true
    }

    /// Total attempts denied
    pub fn denied_total(&self) -> u64 {
        self.denied.load(Ordering::Relaxed)
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
