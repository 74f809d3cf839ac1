//! Integration Tests for the Paired-Quiz Server
//!
//! These tests boot the real router on an ephemeral port and drive it over
//! live WebSocket connections, testing the system as a whole rather than
//! individual units.

use futures_util::{SinkExt, StreamExt};
use pairquiz_server::config::Config;
use pairquiz_server::server::{AppState, router};
use pairquiz_server::session::store::{MemorySessionStore, SessionRecord};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    store: Arc<MemorySessionStore>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with_config(Config::default()).await
    }

    async fn spawn_with_config(config: Config) -> Self {
        let store = Arc::new(MemorySessionStore::new());
        let state = AppState::new(store.clone(), &config);
        let app = router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self { addr, store }
    }

    async fn seed_session(&self) {
        self.store
            .insert(SessionRecord::new(
                "sess-1",
                "host-user",
                Some("partner-user"),
                vec![json!({"question": "2 + 2?", "options": ["3", "4", "5"]})],
            ))
            .await;
    }

    async fn connect(&self) -> WsClient {
        let (ws, _) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .expect("WebSocket connect failed");
        ws
    }
}

async fn send(ws: &mut WsClient, value: Value) {
    ws.send(tungstenite::Message::text(value.to_string()))
        .await
        .unwrap();
}

async fn recv_event(ws: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for an event")
            .expect("stream ended unexpectedly")
            .expect("transport error");
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().unwrap()).unwrap();
        }
    }
}

async fn expect_event(ws: &mut WsClient, event: &str) -> Value {
    let value = recv_event(ws).await;
    assert_eq!(value["event"], event, "unexpected frame: {value}");
    value
}

/// Connect and pair both participants, consuming all pairing frames
async fn pair(server: &TestServer) -> (WsClient, WsClient) {
    server.seed_session().await;

    let mut host = server.connect().await;
    expect_event(&mut host, "connected").await;
    send(
        &mut host,
        json!({"event": "join_session", "sessionId": "sess-1", "userId": "host-user"}),
    )
    .await;
    expect_event(&mut host, "session_joined").await;

    let mut partner = server.connect().await;
    expect_event(&mut partner, "connected").await;
    send(
        &mut partner,
        json!({"event": "join_session", "sessionId": "sess-1", "userId": "partner-user"}),
    )
    .await;
    expect_event(&mut partner, "session_joined").await;
    expect_event(&mut partner, "partner_joined").await;
    expect_event(&mut partner, "state_update").await;

    expect_event(&mut host, "partner_joined").await;
    expect_event(&mut host, "state_update").await;

    (host, partner)
}

// ============================================================================
// HTTP Route Integration Tests
// ============================================================================

mod http_routes {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn test_app() -> axum::Router {
        let store = Arc::new(MemorySessionStore::new());
        router(AppState::new(store, &Config::default()))
    }

    #[tokio::test]
    async fn test_health_endpoint_returns_ok() {
        let app = test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["websocket"], "ready");
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn test_metrics_endpoint_reports_counters() {
        let app = test_app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["activeConnections"], 0);
        assert_eq!(json["activeSessions"], 0);
        assert_eq!(json["errors"], 0);
    }
}

// ============================================================================
// Session Pairing Tests
// ============================================================================

mod pairing {
    use super::*;

    #[tokio::test]
    async fn test_connected_ack_advertises_features() {
        let server = TestServer::spawn().await;
        let mut ws = server.connect().await;

        let connected = expect_event(&mut ws, "connected").await;
        assert!(connected["sid"].is_string());
        assert!(connected["serverTime"].as_u64().unwrap() > 0);
        let features = connected["features"].as_array().unwrap();
        assert!(features.contains(&json!("pair_quiz")));
        assert!(features.contains(&json!("heartbeat")));
    }

    #[tokio::test]
    async fn test_host_waits_then_partner_activates() {
        let server = TestServer::spawn().await;
        server.seed_session().await;

        let mut host = server.connect().await;
        expect_event(&mut host, "connected").await;
        send(
            &mut host,
            json!({"event": "join_session", "sessionId": "sess-1", "userId": "host-user"}),
        )
        .await;

        let joined = expect_event(&mut host, "session_joined").await;
        assert_eq!(joined["role"], "host");
        assert_eq!(joined["session"]["status"], "waiting");

        let mut partner = server.connect().await;
        expect_event(&mut partner, "connected").await;
        send(
            &mut partner,
            json!({"event": "join_session", "sessionId": "sess-1", "userId": "partner-user"}),
        )
        .await;

        let joined = expect_event(&mut partner, "session_joined").await;
        assert_eq!(joined["role"], "partner");

        // Both sides observe the pairing
        let broadcast = expect_event(&mut host, "partner_joined").await;
        assert_eq!(broadcast["session"]["status"], "active");
        let update = expect_event(&mut host, "state_update").await;
        assert_eq!(update["type"], "PARTNER_JOINED");

        expect_event(&mut partner, "partner_joined").await;
        let update = expect_event(&mut partner, "state_update").await;
        assert!(update["session"]["startedAt"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_join_unknown_session_returns_error() {
        let server = TestServer::spawn().await;
        let mut ws = server.connect().await;
        expect_event(&mut ws, "connected").await;

        send(
            &mut ws,
            json!({"event": "join_session", "sessionId": "no-such", "userId": "host-user"}),
        )
        .await;

        let error = expect_event(&mut ws, "error").await;
        assert_eq!(error["type"], "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_join_by_unrelated_user_is_unauthorized() {
        let server = TestServer::spawn().await;
        server.seed_session().await;
        let mut ws = server.connect().await;
        expect_event(&mut ws, "connected").await;

        send(
            &mut ws,
            json!({"event": "join_session", "sessionId": "sess-1", "userId": "intruder"}),
        )
        .await;

        let error = expect_event(&mut ws, "error").await;
        assert_eq!(error["type"], "UNAUTHORIZED");
    }
}

// ============================================================================
// Quiz Flow Tests
// ============================================================================

mod quiz_flow {
    use super::*;

    #[tokio::test]
    async fn test_answer_excludes_sender_and_navigation_includes_it() {
        let server = TestServer::spawn().await;
        let (mut host, mut partner) = pair(&server).await;

        send(
            &mut host,
            json!({
                "event": "answer_selected", "sessionId": "sess-1", "userId": "host-user",
                "questionIndex": 0, "selectedOption": "B"
            }),
        )
        .await;

        let update = expect_event(&mut partner, "state_update").await;
        assert_eq!(update["type"], "ANSWER_SELECTED");
        assert_eq!(update["selectedOption"], "B");

        // The sender is excluded from the answer broadcast, so the next
        // frame the host sees is its own navigation echo.
        send(
            &mut host,
            json!({"event": "next_question", "sessionId": "sess-1", "questionIndex": 1}),
        )
        .await;

        let update = expect_event(&mut host, "state_update").await;
        assert_eq!(update["type"], "NEXT_QUESTION");
        assert_eq!(update["questionIndex"], 1);

        let update = expect_event(&mut partner, "state_update").await;
        assert_eq!(update["type"], "NEXT_QUESTION");
    }

    #[tokio::test]
    async fn test_timer_update_reaches_only_the_partner() {
        let server = TestServer::spawn().await;
        let (mut host, mut partner) = pair(&server).await;

        send(
            &mut partner,
            json!({"event": "update_timer", "sessionId": "sess-1", "timerSeconds": 25}),
        )
        .await;

        let update = expect_event(&mut host, "state_update").await;
        assert_eq!(update["type"], "TIMER_UPDATE");
        assert_eq!(update["timerSeconds"], 25);

        // Navigation echo proves the timer update never came back
        send(
            &mut partner,
            json!({"event": "next_question", "sessionId": "sess-1", "questionIndex": 0}),
        )
        .await;
        let update = expect_event(&mut partner, "state_update").await;
        assert_eq!(update["type"], "NEXT_QUESTION");
    }

    #[tokio::test]
    async fn test_completion_flow_reports_both_completed() {
        let server = TestServer::spawn().await;
        let (mut host, mut partner) = pair(&server).await;

        send(
            &mut host,
            json!({
                "event": "quiz_complete", "sessionId": "sess-1", "userId": "host-user",
                "score": 8, "timeTaken": 145
            }),
        )
        .await;

        let update = expect_event(&mut partner, "state_update").await;
        assert_eq!(update["type"], "QUIZ_COMPLETE");
        assert_eq!(update["bothCompleted"], false);
        assert!(update.get("session").is_none());

        send(
            &mut partner,
            json!({
                "event": "quiz_complete", "sessionId": "sess-1", "userId": "partner-user",
                "score": 6, "timeTaken": 160
            }),
        )
        .await;

        // Host sees its own completion echo, then the final one
        expect_event(&mut host, "state_update").await;
        let update = expect_event(&mut host, "state_update").await;
        assert_eq!(update["type"], "QUIZ_COMPLETE");
        assert_eq!(update["bothCompleted"], true);
        assert_eq!(update["session"]["status"], "completed");
        assert_eq!(update["session"]["hostScore"], 8);
        assert_eq!(update["session"]["partnerScore"], 6);

        // The durable record reached the terminal state too
        let record = server.store.get("sess-1").await.unwrap();
        assert_eq!(record.host_score, Some(8));
        assert_eq!(record.partner_score, Some(6));
    }

    #[tokio::test]
    async fn test_cancel_session_uses_default_reason() {
        let server = TestServer::spawn().await;
        let (mut host, mut partner) = pair(&server).await;

        send(
            &mut partner,
            json!({"event": "cancel_session", "sessionId": "sess-1"}),
        )
        .await;

        let update = expect_event(&mut host, "state_update").await;
        assert_eq!(update["type"], "SESSION_CANCELLED");
        assert_eq!(update["reason"], "User cancelled");

        let update = expect_event(&mut partner, "state_update").await;
        assert_eq!(update["type"], "SESSION_CANCELLED");
    }
}

// ============================================================================
// Connection Lifecycle Tests
// ============================================================================

mod connection_lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_partner_disconnect_notifies_survivor() {
        let server = TestServer::spawn().await;
        let (mut host, mut partner) = pair(&server).await;

        partner.close(None).await.unwrap();

        let event = expect_event(&mut host, "partner_disconnected").await;
        assert_eq!(event["sessionId"], "sess-1");
        assert!(event["message"].is_string());
    }

    #[tokio::test]
    async fn test_silent_connection_is_timed_out_and_partner_notified() {
        use pairquiz_server::server::heartbeat::HeartbeatConfig;

        let mut config = Config::default();
        config.heartbeat = HeartbeatConfig {
            timeout: Duration::from_millis(300),
            check_interval: Duration::from_millis(50),
        };
        let server = TestServer::spawn_with_config(config).await;
        let (mut host, mut partner) = pair(&server).await;

        // The partner goes silent while the host keeps heartbeating; the
        // watchdog must drop the partner and notify the host.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            assert!(
                tokio::time::Instant::now() < deadline,
                "no disconnect notice arrived"
            );
            send(&mut host, json!({"event": "heartbeat", "clientTime": 1})).await;
            let frame = recv_event(&mut host).await;
            if frame["event"] == "partner_disconnected" {
                break;
            }
            assert_eq!(frame["event"], "heartbeat_ack");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        // The partner's transport is closed by the server
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match partner.next().await {
                    None | Some(Err(_)) => break,
                    Some(Ok(msg)) if msg.is_close() => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "partner socket should be closed");
    }

    #[tokio::test]
    async fn test_heartbeat_is_acked() {
        let server = TestServer::spawn().await;
        let mut ws = server.connect().await;
        expect_event(&mut ws, "connected").await;

        send(&mut ws, json!({"event": "heartbeat", "clientTime": 123})).await;

        let ack = expect_event(&mut ws, "heartbeat_ack").await;
        assert_eq!(ack["clientTime"], 123);
        assert!(ack["serverTime"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_invalid_data_error() {
        let server = TestServer::spawn().await;
        let mut ws = server.connect().await;
        expect_event(&mut ws, "connected").await;

        ws.send(tungstenite::Message::text("this is not json"))
            .await
            .unwrap();
        let error = expect_event(&mut ws, "error").await;
        assert_eq!(error["type"], "INVALID_DATA");

        // Missing required field is also INVALID_DATA
        send(&mut ws, json!({"event": "join_session", "sessionId": "x"})).await;
        let error = expect_event(&mut ws, "error").await;
        assert_eq!(error["type"], "INVALID_DATA");
    }

    #[tokio::test]
    async fn test_rate_limiter_rejects_excess_upgrades() {
        let mut config = Config::default();
        config.rate_limit.max_attempts = 2;
        let server = TestServer::spawn_with_config(config).await;

        let _first = server.connect().await;
        let _second = server.connect().await;

        let result = connect_async(format!("ws://{}/ws", server.addr)).await;
        match result {
            Err(tungstenite::Error::Http(response)) => {
                assert_eq!(response.status(), 429);
            }
            other => panic!("expected HTTP 429 rejection, got: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_get_metrics_counts_this_connection() {
        let server = TestServer::spawn().await;
        let mut ws = server.connect().await;
        expect_event(&mut ws, "connected").await;

        send(&mut ws, json!({"event": "get_metrics"})).await;

        let metrics = expect_event(&mut ws, "metrics").await;
        assert_eq!(metrics["activeConnections"], 1);
        assert_eq!(metrics["totalConnections"], 1);
    }
}
