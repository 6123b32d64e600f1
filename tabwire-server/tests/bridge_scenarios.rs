//! End-to-end dispatcher scenarios against stub extension clients
//!
//! Each stub speaks the raw wire protocol over a real WebSocket connection,
//! standing in for the browser extension.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use tabwire_protocol::{ErrorBody, Frame};
use tabwire_server::{BridgeServer, ServerConfig};
use tabwire_utils::BridgeError;

async fn start_server(config: ServerConfig) -> (BridgeServer, u16) {
    let server = BridgeServer::new(ServerConfig { port: 0, ..config });
    let addr = server.start().await.expect("bind");
    (server, addr.port())
}

fn quick_retry_config() -> ServerConfig {
    ServerConfig {
        retry_wait_for_client: Duration::from_millis(300),
        retry_jitter_max: Duration::from_millis(20),
        ..ServerConfig::default()
    }
}

/// A scripted extension client
struct StubClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl StubClient {
    /// Connect, introduce ourselves, and wait for acceptance
    async fn connect(port: u16) -> Self {
        let (ws, _) = connect_async(format!("ws://127.0.0.1:{}", port))
            .await
            .expect("connect");
        let mut stub = Self { ws };
        stub.send(Frame::Hello {
            client_id: "t".into(),
            extension_version: "0".into(),
        })
        .await;
        loop {
            if let Frame::HelloAck {} = stub.next_frame().await {
                break;
            }
        }
        stub
    }

    async fn send(&mut self, frame: Frame) {
        self.ws
            .send(Message::Text(frame.encode().unwrap()))
            .await
            .expect("send");
    }

    /// Next decoded frame, skipping transport-level noise
    async fn next_frame(&mut self) -> Frame {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                .await
                .expect("frame within deadline")
                .expect("socket open")
                .expect("frame");
            match msg {
                Message::Text(text) => return Frame::decode(&text).unwrap(),
                Message::Close(frame) => {
                    panic!("unexpected close: {:?}", frame)
                }
                _ => continue,
            }
        }
    }

    /// Next `cmd` frame, ignoring heartbeat pings
    async fn next_cmd(&mut self) -> (String, String, Value) {
        loop {
            match self.next_frame().await {
                Frame::Cmd { id, cmd, params } => return (id, cmd, params),
                Frame::Ping {} => continue,
                Frame::Pong { .. } => continue,
                other => panic!("expected cmd, got {:?}", other),
            }
        }
    }

    /// Wait for the server to close the socket, returning code and reason
    async fn expect_close(&mut self, deadline: Duration) -> (u16, String) {
        let until = tokio::time::Instant::now() + deadline;
        loop {
            let msg = tokio::time::timeout_at(until, self.ws.next())
                .await
                .expect("close within deadline")
                .expect("socket open");
            match msg {
                Ok(Message::Close(Some(frame))) => {
                    return (u16::from(frame.code), frame.reason.to_string())
                }
                Ok(Message::Close(None)) => return (1000, String::new()),
                Ok(_) => continue,
                // abrupt teardown surfaces as a protocol error
                Err(_) => return (1006, String::new()),
            }
        }
    }
}

// Scenario 1: no client connected
#[tokio::test]
async fn call_without_client_names_the_endpoint() {
    let (server, port) = start_server(ServerConfig::default()).await;

    let err = server
        .call("listTabs", json!({}), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(err.to_string().contains(&format!("ws://127.0.0.1:{}", port)));

    server.stop().await;
}

// Scenario 2: call/response round-trip
#[tokio::test]
async fn call_round_trip_resolves_with_result() {
    let (server, port) = start_server(ServerConfig::default()).await;
    let mut stub = StubClient::connect(port).await;

    let call = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .call("listTabs", json!({}), Duration::from_millis(1000))
                .await
        })
    };

    let (id, cmd, _params) = stub.next_cmd().await;
    assert_eq!(cmd, "listTabs");
    stub.send(Frame::res_ok(id, json!({"ok": 1}))).await;

    let result = call.await.unwrap().unwrap();
    assert_eq!(result, json!({"ok": 1}));

    server.stop().await;
}

// Scenario 3: per-call timeout with retries disabled
#[tokio::test]
async fn call_times_out_when_client_never_replies() {
    let (server, port) = start_server(ServerConfig {
        max_attempts: 1,
        ..ServerConfig::default()
    })
    .await;
    let mut stub = StubClient::connect(port).await;

    let call = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .call("listTabs", json!({}), Duration::from_millis(100))
                .await
        })
    };

    // the cmd arrives and is deliberately ignored
    let _ = stub.next_cmd().await;

    let err = call.await.unwrap().unwrap_err();
    assert!(err.to_string().to_lowercase().contains("timeout"));

    server.stop().await;
}

// Scenario 4: retryable error leads to a second dispatch that succeeds
#[tokio::test]
async fn retryable_error_is_retried_until_success() {
    let (server, port) = start_server(quick_retry_config()).await;
    let mut stub = StubClient::connect(port).await;

    let call = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .call("listTabs", json!({}), Duration::from_secs(2))
                .await
        })
    };

    let (first_id, _, _) = stub.next_cmd().await;
    stub.send(Frame::res_err(
        first_id.clone(),
        ErrorBody::with_details("temp", "temp_fail", "TEMP", true),
    ))
    .await;

    let (second_id, _, _) = stub.next_cmd().await;
    assert_eq!(second_id, first_id);
    stub.send(Frame::res_ok(second_id, json!({"ok": true}))).await;

    let result = call.await.unwrap().unwrap();
    assert_eq!(result, json!({"ok": true}));

    server.stop().await;
}

// A permanently failing client consumes exactly max_attempts dispatches
#[tokio::test]
async fn retries_stop_at_the_attempt_cap() {
    let (server, port) = start_server(quick_retry_config()).await;
    let mut stub = StubClient::connect(port).await;

    let call = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .call("listTabs", json!({}), Duration::from_secs(2))
                .await
        })
    };

    let mut dispatches = 0;
    for _ in 0..3 {
        let (id, _, _) = stub.next_cmd().await;
        dispatches += 1;
        stub.send(Frame::res_err(
            id,
            ErrorBody::with_details("still broken", "temp_fail", "TEMP", true),
        ))
        .await;
    }

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(dispatches, 3);
    match err {
        BridgeError::Extension {
            reason, retryable, ..
        } => {
            assert_eq!(reason.as_deref(), Some("temp_fail"));
            assert!(retryable);
        }
        other => panic!("expected the extension error, got {:?}", other),
    }

    // no fourth dispatch arrives
    let extra = tokio::time::timeout(Duration::from_millis(500), stub.next_cmd()).await;
    assert!(extra.is_err());

    server.stop().await;
}

// Scenario 5: abrupt socket loss moves the in-flight request to another client
#[tokio::test]
async fn lost_client_request_is_redispatched() {
    let (server, port) = start_server(quick_retry_config()).await;
    let mut stub_a = StubClient::connect(port).await;
    let mut stub_b = StubClient::connect(port).await;

    let call = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .call("listTabs", json!({}), Duration::from_secs(2))
                .await
        })
    };

    // round-robin starts with the first authenticated client
    let (id_a, _, _) = stub_a.next_cmd().await;

    // terminate A without a close frame
    drop(stub_a);

    let (id_b, _, _) = stub_b.next_cmd().await;
    assert_eq!(id_b, id_a);
    stub_b
        .send(Frame::res_ok(id_b, json!({"recovered": true})))
        .await;

    let result = call.await.unwrap().unwrap();
    assert_eq!(result, json!({"recovered": true}));

    server.stop().await;
}

// Scenario 6: a client that never answers pongs is closed with 4002
#[tokio::test]
async fn silent_client_is_evicted_by_heartbeat() {
    let (server, port) = start_server(ServerConfig {
        heartbeat_interval: Duration::from_millis(20),
        pong_timeout: Duration::from_millis(70),
        ..ServerConfig::default()
    })
    .await;
    let mut stub = StubClient::connect(port).await;

    let (code, reason) = stub.expect_close(Duration::from_secs(1)).await;
    assert_eq!(code, 4002);
    assert!(reason.contains("pong_timeout"));
    assert_eq!(server.client_count(), 0);

    server.stop().await;
}

// A client that answers pongs stays connected across many heartbeats
#[tokio::test]
async fn responsive_client_survives_heartbeat() {
    let (server, port) = start_server(ServerConfig {
        heartbeat_interval: Duration::from_millis(20),
        pong_timeout: Duration::from_millis(70),
        ..ServerConfig::default()
    })
    .await;
    let mut stub = StubClient::connect(port).await;

    let until = tokio::time::Instant::now() + Duration::from_millis(300);
    while tokio::time::Instant::now() < until {
        let msg = match tokio::time::timeout_at(until, stub.ws.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(_) => panic!("socket dropped"),
            Err(_) => break,
        };
        if let Message::Text(text) = msg {
            if let Ok(Frame::Ping {}) = Frame::decode(&text) {
                stub.send(Frame::Pong { t: 1 }).await;
            }
        }
    }

    assert_eq!(server.client_count(), 1);
    server.stop().await;
}

// Round-robin fairness: calls spread evenly over connected clients
#[tokio::test]
async fn round_robin_spreads_calls_evenly() {
    let (server, port) = start_server(ServerConfig::default()).await;

    // two auto-responding stubs that tag their replies
    let mut tallies = Vec::new();
    for tag in ["a", "b"] {
        let mut stub = StubClient::connect(port).await;
        let (tally_tx, tally_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        tallies.push(tally_rx);
        tokio::spawn(async move {
            loop {
                let (id, _, _) = stub.next_cmd().await;
                let _ = tally_tx.send(());
                stub.send(Frame::res_ok(id, json!({"from": tag}))).await;
            }
        });
    }

    for _ in 0..6 {
        server
            .call("listTabs", json!({}), Duration::from_secs(1))
            .await
            .unwrap();
    }

    let mut counts = Vec::new();
    for tally in &mut tallies {
        let mut count = 0;
        while tally.try_recv().is_ok() {
            count += 1;
        }
        counts.push(count);
    }
    assert_eq!(counts, vec![3, 3]);

    server.stop().await;
}

// A res from a client the request is not attached to is ignored
#[tokio::test]
async fn stale_res_from_wrong_client_is_ignored() {
    let (server, port) = start_server(ServerConfig::default()).await;
    let mut stub_a = StubClient::connect(port).await;
    let mut stub_b = StubClient::connect(port).await;

    let call = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .call("listTabs", json!({}), Duration::from_secs(2))
                .await
        })
    };

    let (id, _, _) = stub_a.next_cmd().await;

    // B races in a response for a request it does not own
    stub_b
        .send(Frame::res_ok(id.clone(), json!({"from": "b"})))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    stub_a.send(Frame::res_ok(id, json!({"from": "a"}))).await;

    let result = call.await.unwrap().unwrap();
    assert_eq!(result, json!({"from": "a"}));

    server.stop().await;
}

// A socket whose first frame is not hello is rejected and closed
#[tokio::test]
async fn first_frame_must_be_hello() {
    let (server, port) = start_server(ServerConfig::default()).await;

    let (mut ws, _) = connect_async(format!("ws://127.0.0.1:{}", port))
        .await
        .expect("connect");
    ws.send(Message::Text(
        Frame::res_ok("r", json!({})).encode().unwrap(),
    ))
    .await
    .unwrap();

    let mut saw_error = false;
    loop {
        match tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("reply within deadline")
        {
            Some(Ok(Message::Text(text))) => {
                if let Ok(Frame::Error { message }) = Frame::decode(&text) {
                    assert!(message.contains("hello"));
                    saw_error = true;
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(_)) => break,
        }
    }
    assert!(saw_error);
    assert_eq!(server.client_count(), 0);

    server.stop().await;
}

// stop() rejects an in-flight call with a terminal error
#[tokio::test]
async fn stop_rejects_in_flight_calls() {
    let (server, port) = start_server(ServerConfig::default()).await;
    let mut stub = StubClient::connect(port).await;

    let call = {
        let server = server.clone();
        tokio::spawn(async move {
            server
                .call("listTabs", json!({}), Duration::from_secs(5))
                .await
        })
    };

    let _ = stub.next_cmd().await;
    server.stop().await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, BridgeError::ServerStopped));
}

// close code 4002 is only used for heartbeat eviction, not normal shutdown
#[tokio::test]
async fn stop_closes_clients_normally() {
    let (server, port) = start_server(ServerConfig::default()).await;
    let mut stub = StubClient::connect(port).await;

    server.stop().await;

    let (code, reason) = stub.expect_close(Duration::from_secs(2)).await;
    assert_ne!(code, u16::from(CloseCode::from(4002)));
    assert!(!reason.contains("pong_timeout"));
}
