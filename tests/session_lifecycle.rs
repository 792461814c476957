//! Session Lifecycle Integration Tests
//!
//! Exercises the connection manager against an in-process WebSocket
//! server: handshake and resume, token refresh, recovery after loss,
//! server-side teardown, and RPC round trips.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use session_stream_client::{
    AuthProvider, CircuitBreakerState, ClientConfig, ConnectionEvent, ConnectionManager,
    ConnectionState, HeartbeatSettings, MemoryStorage, OverallStatus, RecoverySettings,
    RpcSettings, SimulatorStatus,
};

// =============================================================================
// Test Harness
// =============================================================================

type Ws = WebSocketStream<TcpStream>;

/// Auth stub with an optional replacement token for the refresh path.
struct StubAuth {
    token: Mutex<String>,
    refresh_to: Option<String>,
}

impl StubAuth {
    fn fixed(token: &str) -> Arc<Self> {
        Arc::new(Self {
            token: Mutex::new(token.to_string()),
            refresh_to: None,
        })
    }

    fn refreshable(token: &str, refresh_to: &str) -> Arc<Self> {
        Arc::new(Self {
            token: Mutex::new(token.to_string()),
            refresh_to: Some(refresh_to.to_string()),
        })
    }
}

#[async_trait]
impl AuthProvider for StubAuth {
    async fn access_token(&self) -> Option<String> {
        Some(self.token.lock().unwrap().clone())
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    async fn refresh_access_token(&self) -> bool {
        match &self.refresh_to {
            Some(next) => {
                *self.token.lock().unwrap() = next.clone();
                true
            }
            None => false,
        }
    }
}

fn test_config(url: &str) -> ClientConfig {
    let mut config = ClientConfig::new(url);
    config.recovery = RecoverySettings {
        initial_delay: Duration::from_millis(40),
        max_delay: Duration::from_millis(200),
        multiplier: 2.0,
        jitter_factor: 0.0,
        max_attempts: 4,
    };
    config.rpc = RpcSettings {
        timeout: Duration::from_secs(2),
    };
    config
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> Ws {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

/// Read frames until one carries the given `type` discriminator.
/// Heartbeats and other chatter are skipped.
async fn recv_typed(ws: &mut Ws, msg_type: &str) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] == msg_type {
                    return value;
                }
            }
            Some(Ok(_)) => {}
            other => panic!("connection ended while waiting for {msg_type}: {other:?}"),
        }
    }
}

async fn send_json(ws: &mut Ws, value: &Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Accept one connection and answer its handshake successfully.
async fn accept_handshake(listener: &TcpListener, session_id: &str) -> Ws {
    let mut ws = accept(listener).await;
    let reconnect = recv_typed(&mut ws, "reconnect").await;
    send_json(
        &mut ws,
        &json!({
            "type": "reconnect_result",
            "request_id": reconnect["request_id"],
            "success": true,
            "session_id": session_id,
            "simulator_status": "STOPPED",
        }),
    )
    .await;
    ws
}

async fn wait_for_state(
    state: &mut watch::Receiver<ConnectionState>,
    f: impl FnMut(&ConnectionState) -> bool,
) {
    timeout(Duration::from_secs(5), state.wait_for(f))
        .await
        .expect("timed out waiting for state")
        .unwrap();
}

async fn wait_for_event(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    f: impl Fn(&ConnectionEvent) -> bool,
) -> ConnectionEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if f(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn handshake_establishes_resumes_and_recovers() {
    let (listener, url) = bind().await;
    let manager = ConnectionManager::new(
        test_config(&url),
        StubAuth::fixed("tok"),
        Arc::new(MemoryStorage::new()),
    );
    let mut state = manager.state();

    let (data_seen_tx, data_seen_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        // First connection: fresh client, no prior session to resume.
        let mut ws = accept(&listener).await;
        let reconnect = recv_typed(&mut ws, "reconnect").await;
        assert!(reconnect["session_id"].is_null());
        assert_eq!(reconnect["access_token"], "tok");
        let device_id = reconnect["device_id"].as_str().unwrap().to_string();
        send_json(
            &mut ws,
            &json!({
                "type": "reconnect_result",
                "request_id": reconnect["request_id"],
                "success": true,
                "session_id": "sess-1",
            }),
        )
        .await;

        send_json(
            &mut ws,
            &json!({
                "type": "exchange_data",
                "delta_type": "FULL",
                "sequence": 1,
                "timestamp": "2026-08-27T14:00:00Z",
                "equities": [
                    {"symbol": "ACME", "last_price": "100.50", "bid": "100.40", "ask": "100.60"}
                ],
                "orders": [],
            }),
        )
        .await;

        // Drop the socket once the client has seen the data.
        let _ = data_seen_rx.await;
        drop(ws);

        // Second connection: same device, resuming the same session.
        let mut ws = accept(&listener).await;
        let reconnect = recv_typed(&mut ws, "reconnect").await;
        assert_eq!(reconnect["session_id"], "sess-1");
        assert_eq!(reconnect["device_id"], device_id.as_str());
        send_json(
            &mut ws,
            &json!({
                "type": "reconnect_result",
                "request_id": reconnect["request_id"],
                "success": true,
                "session_id": "sess-1",
            }),
        )
        .await;

        // Hold the connection until the client hangs up.
        while let Some(Ok(_)) = ws.next().await {}
    });

    assert!(manager.connect().await.unwrap());
    wait_for_state(&mut state, |s| s.is_connected).await;

    let store = manager.store();
    let mut equities = store.equities();
    timeout(
        Duration::from_secs(5),
        equities.wait_for(|list| list.len() == 1 && list[0].symbol == "ACME"),
    )
    .await
    .expect("timed out waiting for exchange data")
    .unwrap();
    data_seen_tx.send(()).unwrap();

    // Loss is observed, recovery runs, and the session comes back.
    wait_for_state(&mut state, |s| s.is_recovering).await;
    wait_for_state(&mut state, |s| s.is_connected).await;

    // The cache was cleared on loss; nothing stale survives the gap.
    assert!(store.equities().borrow().is_empty());

    manager.disconnect("test over");
    server.await.unwrap();
}

#[tokio::test]
async fn rejected_token_gets_exactly_one_refresh() {
    let (listener, url) = bind().await;
    let manager = ConnectionManager::new(
        test_config(&url),
        StubAuth::refreshable("stale", "fresh"),
        Arc::new(MemoryStorage::new()),
    );

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let reconnect = recv_typed(&mut ws, "reconnect").await;
        assert_eq!(reconnect["access_token"], "stale");
        send_json(
            &mut ws,
            &json!({
                "type": "reconnect_result",
                "request_id": reconnect["request_id"],
                "success": false,
                "failure": "TOKEN_REJECTED",
                "message": "token expired",
            }),
        )
        .await;

        // Retry must present the refreshed token.
        let mut ws = accept(&listener).await;
        let reconnect = recv_typed(&mut ws, "reconnect").await;
        assert_eq!(reconnect["access_token"], "fresh");
        send_json(
            &mut ws,
            &json!({
                "type": "reconnect_result",
                "request_id": reconnect["request_id"],
                "success": true,
                "session_id": "sess-1",
            }),
        )
        .await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    assert!(manager.connect().await.unwrap());
    assert!(manager.is_connected());

    manager.disconnect("test over");
    server.await.unwrap();
}

#[tokio::test]
async fn failed_refresh_forces_logout() {
    let (listener, url) = bind().await;
    let manager = ConnectionManager::new(
        test_config(&url),
        StubAuth::fixed("stale"),
        Arc::new(MemoryStorage::new()),
    );
    let mut events = manager.events();

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let reconnect = recv_typed(&mut ws, "reconnect").await;
        send_json(
            &mut ws,
            &json!({
                "type": "reconnect_result",
                "request_id": reconnect["request_id"],
                "success": false,
                "failure": "TOKEN_REJECTED",
            }),
        )
        .await;
    });

    let err = manager.connect().await.unwrap_err();
    assert!(err.to_string().contains("refresh failed"), "got: {err}");

    wait_for_event(&mut events, |e| {
        matches!(e, ConnectionEvent::ForcedLogout { .. })
    })
    .await;
    assert_eq!(
        manager.state().borrow().overall_status,
        OverallStatus::Disconnected
    );

    server.await.unwrap();
}

#[tokio::test]
async fn connection_replaced_stands_down_without_recovery() {
    let (listener, url) = bind().await;
    let manager = ConnectionManager::new(
        test_config(&url),
        StubAuth::fixed("tok"),
        Arc::new(MemoryStorage::new()),
    );
    let mut state = manager.state();
    let mut events = manager.events();

    let server = tokio::spawn(async move {
        let mut ws = accept_handshake(&listener, "sess-1").await;
        send_json(&mut ws, &json!({"type": "connection_replaced"})).await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    // The teardown can land before or after connect() resolves; either
    // way the session must end up disconnected without recovery.
    let _ = manager.connect().await;
    wait_for_state(&mut state, |s| s.overall_status == OverallStatus::Disconnected).await;
    assert!(!manager.desired_state().connected);

    // An intentional stand-down never schedules recovery.
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, ConnectionEvent::RecoveryScheduled { .. }),
            "recovery scheduled after connection_replaced"
        );
    }

    server.await.unwrap();
}

#[tokio::test]
async fn session_invalidated_forces_logout() {
    let (listener, url) = bind().await;
    let manager = ConnectionManager::new(
        test_config(&url),
        StubAuth::fixed("tok"),
        Arc::new(MemoryStorage::new()),
    );
    let mut events = manager.events();

    let server = tokio::spawn(async move {
        let mut ws = accept_handshake(&listener, "sess-1").await;
        send_json(
            &mut ws,
            &json!({"type": "session_invalidated", "reason": "administrator action"}),
        )
        .await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    let _ = manager.connect().await;

    let event = wait_for_event(&mut events, |e| {
        matches!(e, ConnectionEvent::ForcedLogout { .. })
    })
    .await;
    if let ConnectionEvent::ForcedLogout { reason } = event {
        assert_eq!(reason, "administrator action");
    }

    server.await.unwrap();
}

#[tokio::test]
async fn simulator_rpc_round_trips() {
    let (listener, url) = bind().await;
    let manager = ConnectionManager::new(
        test_config(&url),
        StubAuth::fixed("tok"),
        Arc::new(MemoryStorage::new()),
    );
    let mut state = manager.state();

    let server = tokio::spawn(async move {
        let mut ws = accept_handshake(&listener, "sess-1").await;

        let start = recv_typed(&mut ws, "start_simulator").await;
        send_json(
            &mut ws,
            &json!({
                "type": "simulator_started",
                "request_id": start["request_id"],
                "success": true,
                "status": "RUNNING",
            }),
        )
        .await;

        let order = recv_typed(&mut ws, "submit_order").await;
        assert_eq!(order["order"]["symbol"], "ACME");
        assert_eq!(order["order"]["side"], "BUY");
        send_json(
            &mut ws,
            &json!({
                "type": "order_result",
                "request_id": order["request_id"],
                "success": true,
                "order_id": "ord-77",
            }),
        )
        .await;

        while let Some(Ok(_)) = ws.next().await {}
    });

    manager.connect().await.unwrap();
    wait_for_state(&mut state, |s| s.is_connected).await;

    let outcome = manager.start_simulator().await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.status, SimulatorStatus::Running);
    assert_eq!(
        manager.state().borrow().simulator_status,
        SimulatorStatus::Running
    );

    let order = manager
        .submit_order(session_stream_client::OrderRequest {
            symbol: "ACME".to_string(),
            side: session_stream_client::OrderSide::Buy,
            quantity: rust_decimal::Decimal::from(10),
            limit_price: None,
        })
        .await
        .unwrap();
    assert!(order.success);
    assert_eq!(order.order_id.as_deref(), Some("ord-77"));

    manager.disconnect("test over");
    server.await.unwrap();
}

#[tokio::test]
async fn manual_reconnect_overlapping_a_recovery_probe_shares_its_connection() {
    let (listener, url) = bind().await;
    let manager = ConnectionManager::new(
        test_config(&url),
        StubAuth::fixed("tok"),
        Arc::new(MemoryStorage::new()),
    );
    let mut state = manager.state();

    let (probe_seen_tx, probe_seen_rx) = oneshot::channel::<()>();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        // First connection, dropped to push the client into recovery.
        let ws = accept_handshake(&listener, "sess-1").await;
        drop(ws);

        // Recovery probe: hold the handshake answer back so a manual
        // reconnect arrives while the probe's establish is in flight.
        let mut ws = accept(&listener).await;
        let reconnect = recv_typed(&mut ws, "reconnect").await;
        probe_seen_tx.send(()).unwrap();
        let _ = release_rx.await;
        send_json(
            &mut ws,
            &json!({
                "type": "reconnect_result",
                "request_id": reconnect["request_id"],
                "success": true,
                "session_id": "sess-1",
            }),
        )
        .await;

        // The manual reconnect must coalesce with the in-flight probe
        // rather than opening a competing physical connection.
        let extra = timeout(Duration::from_millis(300), listener.accept()).await;
        assert!(extra.is_err(), "a second concurrent connection was opened");

        while let Some(Ok(_)) = ws.next().await {}
    });

    assert!(manager.connect().await.unwrap());
    wait_for_state(&mut state, |s| s.is_connected).await;

    // The probe is now mid-handshake, waiting on the server.
    probe_seen_rx.await.unwrap();

    let reconnect_task = tokio::spawn({
        let manager = manager.clone();
        async move { manager.manual_reconnect().await }
    });
    release_tx.send(()).unwrap();

    assert!(reconnect_task.await.unwrap().unwrap());
    wait_for_state(&mut state, |s| s.is_connected).await;
    assert!(manager.is_connected());

    manager.disconnect("test over");
    server.await.unwrap();
}

#[tokio::test]
async fn missed_heartbeats_force_reconnect() {
    let (listener, url) = bind().await;
    let mut config = test_config(&url);
    config.heartbeat = HeartbeatSettings {
        interval: Duration::from_millis(60),
        ack_timeout: Duration::from_millis(20),
        miss_cap: 3,
        ..HeartbeatSettings::default()
    };
    let manager = ConnectionManager::new(
        config,
        StubAuth::fixed("tok"),
        Arc::new(MemoryStorage::new()),
    );
    let mut state = manager.state();
    let mut events = manager.events();

    let server = tokio::spawn(async move {
        // First connection: answer the handshake, then go silent so every
        // heartbeat goes unacknowledged.
        let mut ws = accept_handshake(&listener, "sess-1").await;
        while let Some(Ok(_)) = ws.next().await {}

        // Second connection after the miss-cap disconnect: acknowledge
        // heartbeats so the session stays healthy.
        let mut ws = accept_handshake(&listener, "sess-1").await;
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    if value["type"] == "heartbeat" {
                        send_json(
                            &mut ws,
                            &json!({
                                "type": "heartbeat_ack",
                                "client_time_ms": value["client_time_ms"],
                                "server_time_ms": 0,
                            }),
                        )
                        .await;
                    }
                }
                Some(Ok(_)) => {}
                _ => break,
            }
        }
    });

    assert!(manager.connect().await.unwrap());
    wait_for_state(&mut state, |s| s.is_connected).await;

    // Three unacknowledged heartbeats force the disconnect.
    let event = wait_for_event(&mut events, |e| {
        matches!(e, ConnectionEvent::Disconnected { .. })
    })
    .await;
    if let ConnectionEvent::Disconnected { reason } = event {
        assert!(reason.contains("heartbeat"), "got: {reason}");
    }

    // Recovery brings the session back, and acked heartbeats keep it up.
    wait_for_state(&mut state, |s| s.is_connected && s.heartbeat_latency_ms.is_some()).await;
    assert_eq!(manager.state().borrow().missed_heartbeats, 0);

    manager.disconnect("test over");
    server.await.unwrap();
}

#[tokio::test]
async fn exhausted_recovery_opens_the_breaker() {
    let (listener, url) = bind().await;
    let mut config = test_config(&url);
    config.recovery.max_attempts = 2;
    let manager = ConnectionManager::new(
        config,
        StubAuth::fixed("tok"),
        Arc::new(MemoryStorage::new()),
    );
    let mut state = manager.state();
    let mut events = manager.events();

    let (drop_tx, drop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let ws = accept_handshake(&listener, "sess-1").await;
        let _ = drop_rx.await;
        // Drop both the socket and the listener: every recovery attempt
        // is refused outright.
        drop(ws);
        drop(listener);
    });

    assert!(manager.connect().await.unwrap());
    wait_for_state(&mut state, |s| s.is_connected).await;
    drop_tx.send(()).unwrap();
    server.await.unwrap();

    wait_for_event(&mut events, |e| {
        matches!(e, ConnectionEvent::RecoveryExhausted)
    })
    .await;

    let snapshot = manager.state().borrow().clone();
    assert_eq!(snapshot.circuit_breaker_state, CircuitBreakerState::Open);
    assert!(!snapshot.is_recovering);
    assert_eq!(snapshot.overall_status, OverallStatus::Disconnected);

    // The one manual probe is admitted, fails against the dead endpoint,
    // and reopens the breaker.
    manager.manual_reconnect().await.unwrap_err();
    assert_eq!(
        manager.state().borrow().circuit_breaker_state,
        CircuitBreakerState::Open
    );
}
