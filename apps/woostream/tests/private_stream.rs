//! Private Stream Integration Tests
//!
//! Runs the stream client, relay, and dispatcher against a local WebSocket
//! server that speaks the exchange's auth/subscribe protocol.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use woostream::domain::session::Failure;
use woostream::infrastructure::backoff::BackoffConfig;
use woostream::infrastructure::woo::HeartbeatConfig;
use woostream::{
    ConnectionState, Credentials, Dispatcher, Network, RateLimiter, Relay, Session, ShellSink,
    StreamClient, StreamClientConfig,
};

const FILL_FRAME: &str = r#"{"topic":"executionreport","ts":1697450400200,"data":{"symbol":"BTCUSDT","clientOrderId":0,"orderId":4217894,"type":"LIMIT","side":"BUY","quantity":0.01,"price":27000.5,"executedPrice":27000.5,"executedQuantity":0.01,"status":"FILLED","timestamp":1697450400123}}"#;

const WAIT: Duration = Duration::from_secs(5);

/// What the mock exchange does with one incoming connection.
#[derive(Debug, Clone, Copy)]
enum Behaviour {
    /// Complete the WebSocket handshake, then hang up.
    Hangup,
    /// Answer the auth frame with a failure.
    RejectAuth,
    /// Authenticate, acknowledge subscriptions, then push frames.
    Accept(&'static [&'static str]),
    /// Authenticate and acknowledge subscriptions, then never send again.
    Silent,
}

struct MockExchange {
    url: String,
    connections: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockExchange {
    /// Serve connections; the n-th connection gets `script(n)`.
    async fn start(script: fn(usize) -> Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/v2/ws/private/stream/app", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        let close_counter = closes.clone();

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, script(n), close_counter.clone()));
            }
        });

        Self {
            url,
            connections,
            closes,
            handle,
        }
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Close frames received from clients.
    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Drop for MockExchange {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(stream: tokio::net::TcpStream, behaviour: Behaviour, closes: Arc<AtomicUsize>) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };

    if matches!(behaviour, Behaviour::Hangup) {
        let _ = ws.close(None).await;
        return;
    }

    let auth = next_json(&mut ws).await;
    assert_eq!(auth["event"], "auth");
    assert!(auth["params"]["sign"].as_str().is_some_and(|s| s.len() == 64));
    let id = auth["id"].clone();

    if matches!(behaviour, Behaviour::RejectAuth) {
        let reply = serde_json::json!({
            "id": id, "event": "auth", "success": false, "ts": 1697450400000_i64,
            "errorMsg": "invalid signature"
        });
        let _ = ws.send(Message::Text(reply.to_string().into())).await;
        // Client is expected to hang up.
        while let Some(Ok(_)) = ws.next().await {}
        return;
    }

    let reply = serde_json::json!({
        "id": id, "event": "auth", "success": true, "ts": 1697450400000_i64
    });
    ws.send(Message::Text(reply.to_string().into())).await.unwrap();

    for _ in 0..2 {
        let subscribe = next_json(&mut ws).await;
        assert_eq!(subscribe["event"], "subscribe");
        let ack = serde_json::json!({
            "id": subscribe["id"], "event": "subscribe", "success": true,
            "ts": 1697450400000_i64, "data": subscribe["topic"]
        });
        ws.send(Message::Text(ack.to_string().into())).await.unwrap();
    }

    if let Behaviour::Accept(frames) = behaviour {
        for frame in frames {
            ws.send(Message::Text((*frame).into())).await.unwrap();
        }
    }

    // Keep the connection open until the client leaves, answering pings
    // unless told to stay silent.
    while let Some(Ok(message)) = ws.next().await {
        match message {
            Message::Close(_) => {
                closes.fetch_add(1, Ordering::SeqCst);
            }
            Message::Text(text)
                if text.contains("\"ping\"") && !matches!(behaviour, Behaviour::Silent) =>
            {
                let pong = r#"{"event":"pong","ts":1697450400000}"#;
                if ws.send(Message::Text(pong.into())).await.is_err() {
                    return;
                }
            }
            _ => {}
        }
    }
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if value["event"] == "ping" {
                    continue;
                }
                return value;
            }
            Some(Ok(_)) => {}
            other => panic!("connection ended early: {other:?}"),
        }
    }
}

fn client_config(url: &str) -> StreamClientConfig {
    let credentials =
        Credentials::new("app", "AbmyVJGUpN064ks5ELjLfA==", "QHKRXHPAW1MC9YGZMAT8YDJG2HPR")
            .unwrap();
    StreamClientConfig {
        reconnect: BackoffConfig::new(
            Duration::from_millis(10),
            Duration::from_millis(80),
            2.0,
            0.0,
            0,
        ),
        ..StreamClientConfig::new(Network::Testnet, url, credentials)
    }
}

struct Running {
    session: watch::Receiver<Session>,
    cancel: CancellationToken,
    stream: JoinHandle<()>,
    relay: JoinHandle<Dispatcher>,
}

fn start(url: &str, dispatcher: Dispatcher) -> Running {
    start_with(client_config(url), dispatcher)
}

fn start_with(config: StreamClientConfig, dispatcher: Dispatcher) -> Running {
    let cancel = CancellationToken::new();
    let (raw_tx, raw_rx) = mpsc::channel(1024);
    let client = StreamClient::new(config, raw_tx, cancel.clone());
    let session = client.session();

    let stream = tokio::spawn(async move {
        client.run().await.unwrap();
    });
    let relay = tokio::spawn(Relay::new(raw_rx, dispatcher, cancel.clone()).run());

    Running {
        session,
        cancel,
        stream,
        relay,
    }
}

impl Running {
    async fn stop(self) -> Dispatcher {
        self.cancel.cancel();
        timeout(WAIT, self.stream).await.unwrap().unwrap();
        timeout(WAIT, self.relay).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn fill_is_printed_by_shell_sink() {
    static FRAMES: [&str; 1] = [FILL_FRAME];
    let exchange = MockExchange::start(|_| Behaviour::Accept(&FRAMES)).await;

    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(
        Arc::new(ShellSink::new(writer)),
        RateLimiter::unlimited(),
        BackoffConfig::delivery(),
    );

    let running = start(&exchange.url, dispatcher);

    let mut lines = BufReader::new(reader).lines();
    let fill_line = timeout(WAIT, async {
        loop {
            let line = lines.next_line().await.unwrap().unwrap();
            if line.starts_with("FILL") {
                return line;
            }
        }
    })
    .await
    .expect("fill line should be printed");

    for needle in ["BTCUSDT", "Buy", "27000.5", "0.01"] {
        assert!(fill_line.contains(needle), "{needle} missing from {fill_line}");
    }

    let report = running.stop().await.shutdown(Duration::from_secs(1)).await;
    assert_eq!(report.dropped, 0);
    assert_eq!(exchange.connections(), 1);
}

#[tokio::test]
async fn auth_rejection_costs_one_backoff_attempt() {
    let exchange = MockExchange::start(|n| {
        if n == 0 {
            Behaviour::RejectAuth
        } else {
            Behaviour::Accept(&[])
        }
    })
    .await;

    let mut running = start(&exchange.url, Dispatcher::new());

    let failed = timeout(
        WAIT,
        running
            .session
            .wait_for(|s| s.consecutive_auth_failures == 1),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(failed.backoff_attempt, 1);

    let subscribed = timeout(WAIT, running.session.wait_for(Session::is_subscribed))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(subscribed.backoff_attempt, 0);
    assert_eq!(subscribed.consecutive_auth_failures, 0);
    assert_eq!(exchange.connections(), 2);

    running.stop().await;
}

#[tokio::test]
async fn transport_failures_are_retried_until_subscribed() {
    const FAILURES: usize = 3;
    let exchange = MockExchange::start(|n| {
        if n < FAILURES {
            Behaviour::Hangup
        } else {
            Behaviour::Accept(&[])
        }
    })
    .await;

    let mut running = start(&exchange.url, Dispatcher::new());

    let mut highest_attempt = 0;
    timeout(WAIT, async {
        loop {
            running.session.changed().await.unwrap();
            let session = running.session.borrow_and_update().clone();
            if session.is_subscribed() {
                return;
            }
            assert!(session.backoff_attempt >= highest_attempt);
            highest_attempt = session.backoff_attempt;
        }
    })
    .await
    .expect("client should subscribe after retrying");

    assert_eq!(exchange.connections(), FAILURES + 1);
    assert!(highest_attempt <= u32::try_from(FAILURES).unwrap());

    running.stop().await;
}

#[tokio::test]
async fn silent_connection_goes_stale_and_reconnects() {
    let exchange = MockExchange::start(|n| {
        if n == 0 {
            Behaviour::Silent
        } else {
            Behaviour::Accept(&[])
        }
    })
    .await;

    let config = StreamClientConfig {
        heartbeat: HeartbeatConfig::new(Duration::from_millis(50), 2),
        ..client_config(&exchange.url)
    };
    let mut running = start_with(config, Dispatcher::new());

    timeout(WAIT, running.session.wait_for(Session::is_subscribed))
        .await
        .unwrap()
        .unwrap();

    let failed = timeout(WAIT, running.session.wait_for(|s| s.backoff_attempt == 1))
        .await
        .unwrap()
        .unwrap()
        .clone();
    assert_eq!(failed.last_failure, Some(Failure::Stale));
    assert_eq!(failed.consecutive_auth_failures, 0);

    let resubscribed = timeout(
        WAIT,
        running
            .session
            .wait_for(|s| s.is_subscribed() && s.last_failure.is_some()),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(resubscribed.backoff_attempt, 0);
    assert_eq!(exchange.connections(), 2);

    running.stop().await;
}

#[tokio::test]
async fn cancellation_leaves_session_disconnected() {
    let exchange = MockExchange::start(|_| Behaviour::Accept(&[])).await;
    let mut running = start(&exchange.url, Dispatcher::new());

    timeout(WAIT, running.session.wait_for(Session::is_subscribed))
        .await
        .unwrap()
        .unwrap();

    let session = running.session.clone();
    running.stop().await;
    assert_eq!(session.borrow().state, ConnectionState::Disconnected);
    assert_eq!(session.borrow().last_failure, None);

    timeout(WAIT, async {
        while exchange.closes() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client should send a close frame");
    assert_eq!(exchange.closes(), 1);
}
