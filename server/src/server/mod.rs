//! Server module: transport, routing, and connection-lifecycle components
//!
//! This module provides:
//! - `AppState` shared across HTTP and WebSocket handlers
//! - the WebSocket upgrade handler and per-socket loops
//! - the Event Router mapping wire events to coordinator calls
//! - Connection Registry, Heartbeat Monitor, and Rate Limiter

pub mod events;
pub mod heartbeat;
pub mod rate_limit;
pub mod registry;
pub mod rooms;
pub mod websocket;

pub use websocket::ws_handler;

use crate::config::Config;
use crate::protocol::MetricsSnapshot;
use crate::server::heartbeat::HeartbeatConfig;
use crate::server::rate_limit::RateLimiter;
use crate::server::registry::ConnectionRegistry;
use crate::session::coordinator::SessionCoordinator;
use crate::session::state::now_millis;
use crate::session::store::SessionStore;
use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub coordinator: Arc<SessionCoordinator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub heartbeat: HeartbeatConfig,
    pub started_at: Instant,
    errors: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(store: Arc<dyn SessionStore>, config: &Config) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            coordinator: Arc::new(SessionCoordinator::new(store, config.session.clone())),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            heartbeat: config.heartbeat.clone(),
            started_at: Instant::now(),
            errors: Arc::new(AtomicU64::new(0)),
        }
    }

    /// (active sessions, active connections)
    pub async fn get_stats(&self) -> (usize, usize) {
        (
            self.coordinator.session_count().await,
            self.registry.len().await,
        )
    }

    pub fn count_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Assemble the readable counters for `/metrics` and `get_metrics`
    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        let (active_sessions, active_connections) = self.get_stats().await;
        MetricsSnapshot {
            total_connections: self.registry.total_registered(),
            active_connections,
            total_sessions: self.coordinator.sessions_loaded(),
            active_sessions,
            errors: self.errors.load(Ordering::Relaxed),
            reconnections: self.coordinator.reconnections(),
            rate_limited: self.rate_limiter.denied_total(),
            dropped_messages: self.coordinator.dropped_messages(),
            timestamp: now_millis(),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    websocket: &'static str,
    uptime_seconds: u64,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        websocket: "ready",
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics_snapshot().await)
}

/// Core application router; the binary layers tracing/CORS and the
/// Prometheus endpoint on top
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws_handler))
        .with_state(state)
}
