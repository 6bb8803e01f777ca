// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Integration tests for automatic reconnection over real WebSockets.
//!
//! ## Partition simulation
//!
//! Stopping the echo server does not close its live WebSocket connections
//! (they run on independently spawned tasks). Instead a **TCP proxy** sits
//! between the client and the echo server. Killing the proxy aborts every
//! proxied connection task, which drops both TCP streams without a
//! WebSocket closing handshake: an abnormal close from the client's view.
//! Starting a new proxy on the same port heals the partition.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use wirechat::chat::history::InMemoryHistory;
use wirechat::chat::message::{MessageStatus, Sender};
use wirechat::client::ChatClient;
use wirechat::config::{ClientConfig, ReconnectConfig};
use wirechat::connection::{ATTEMPTS_EXHAUSTED, ConnectionEvent, ConnectionStatus};
use wirechat::transport::ws::WsConnector;
use wirechat_echo::server::EchoServer;

// =============================================================================
// TCP Proxy helper
// =============================================================================

/// Forwards a fixed local port to a backend address.
struct TcpProxy {
    accept_handle: tokio::task::JoinHandle<()>,
    conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl TcpProxy {
    /// Listen on `127.0.0.1:proxy_port` and forward to `backend_addr`.
    async fn new(proxy_port: u16, backend_addr: &str) -> Self {
        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{proxy_port}"))
            .await
            .unwrap_or_else(|e| panic!("proxy: failed to bind to port {proxy_port}: {e}"));
        let backend = backend_addr.to_string();
        let conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let conn_handles_clone = Arc::clone(&conn_handles);

        let accept_handle = tokio::spawn(async move {
            loop {
                let Ok((mut client_stream, _)) = listener.accept().await else {
                    break;
                };

                let backend = backend.clone();
                let conn_handle = tokio::spawn(async move {
                    let Ok(mut backend_stream) = tokio::net::TcpStream::connect(&backend).await
                    else {
                        return;
                    };
                    // Abort drops both streams at once; no sub-tasks.
                    let _ = tokio::io::copy_bidirectional(&mut client_stream, &mut backend_stream)
                        .await;
                });

                conn_handles_clone.lock().push(conn_handle);
            }
        });

        Self {
            accept_handle,
            conn_handles,
        }
    }

    /// Stop accepting and sever every proxied connection.
    fn kill(self) {
        self.accept_handle.abort();
        for handle in self.conn_handles.lock().iter() {
            handle.abort();
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Find a free port by binding to 0 and recording the port.
async fn find_free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind to port 0");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

async fn start_echo() -> EchoServer {
    wirechat_echo::server::start_server("127.0.0.1:0", "echo: ")
        .await
        .expect("failed to start echo server")
}

/// Client config pointing at `port` with a fast retry policy.
fn fast_config(port: u16, reconnect: ReconnectConfig) -> ClientConfig {
    ClientConfig {
        url: format!("ws://127.0.0.1:{port}/ws"),
        connect_timeout: Duration::from_secs(2),
        reconnect,
        ..Default::default()
    }
}

/// Drive the client until an event matching `pred` arrives, collecting all
/// events seen on the way.
async fn events_until<F>(
    client: &mut ChatClient,
    timeout: Duration,
    description: &str,
    pred: F,
) -> Vec<ConnectionEvent>
where
    F: Fn(&ConnectionEvent) -> bool,
{
    let mut seen = Vec::new();
    let result = tokio::time::timeout(timeout, async {
        while let Some(event) = client.next_event().await {
            let done = pred(&event);
            seen.push(event);
            if done {
                return true;
            }
        }
        false
    })
    .await;

    match result {
        Ok(true) => seen,
        Ok(false) => panic!("connection manager stopped while waiting for {description}"),
        Err(_) => panic!("timeout waiting for {description}; saw {seen:?}"),
    }
}

fn is_connected(event: &ConnectionEvent) -> bool {
    *event == ConnectionEvent::StatusChanged(ConnectionStatus::Connected)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn partition_fails_pending_message_then_recovers() {
    let echo = start_echo().await;
    let port = find_free_port().await;
    let proxy = TcpProxy::new(port, &echo.addr().to_string()).await;

    let policy = ReconnectConfig {
        max_attempts: 20,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(400),
    };
    let mut client =
        ChatClient::start(&fast_config(port, policy), WsConnector::default(), InMemoryHistory::new())
            .unwrap();
    events_until(&mut client, Duration::from_secs(10), "Connected", is_connected).await;

    client.submit("hello").unwrap();
    events_until(&mut client, Duration::from_secs(10), "reply", |e| {
        matches!(e, ConnectionEvent::Inbound(_))
    })
    .await;

    // Sever the link; "ping" can never be answered.
    proxy.kill();
    let _ = client.submit("ping");
    let seen = events_until(&mut client, Duration::from_secs(10), "Reconnecting", |e| {
        matches!(e, ConnectionEvent::Reconnecting { .. })
    })
    .await;
    assert!(seen.contains(&ConnectionEvent::StatusChanged(ConnectionStatus::Disconnected)));

    let ping = client.messages().iter().find(|m| m.content() == "ping");
    if let Some(ping) = ping {
        assert_eq!(ping.status(), MessageStatus::Error);
    }
    assert_eq!(client.messages()[0].status(), MessageStatus::Delivered);
    assert!(!client.awaiting_reply());

    // Heal the partition; the client reconnects on its own.
    let _proxy = TcpProxy::new(port, &echo.addr().to_string()).await;
    events_until(&mut client, Duration::from_secs(15), "Connected", is_connected).await;
    assert_eq!(client.connection_state().attempt, 0);
    assert!(client.connection_state().last_error.is_none());

    client.submit("again").unwrap();
    events_until(&mut client, Duration::from_secs(10), "reply", |e| {
        matches!(e, ConnectionEvent::Inbound(text) if text == "echo: again")
    })
    .await;

    let again = client
        .messages()
        .iter()
        .find(|m| m.content() == "again")
        .unwrap();
    assert_eq!(again.status(), MessageStatus::Delivered);
    if let Some(ping) = client.messages().iter().find(|m| m.content() == "ping") {
        assert_eq!(ping.status(), MessageStatus::Error);
    }
    assert_eq!(
        client.messages().last().map(|m| m.sender()),
        Some(Sender::Assistant)
    );
}

#[tokio::test]
async fn ceiling_reached_then_explicit_connect_recovers() {
    let echo = start_echo().await;
    let port = find_free_port().await;

    let policy = ReconnectConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(100),
    };
    let mut client =
        ChatClient::start(&fast_config(port, policy), WsConnector::default(), InMemoryHistory::new())
            .unwrap();

    let seen = events_until(&mut client, Duration::from_secs(10), "ceiling error", |e| {
        matches!(e, ConnectionEvent::Error(_))
    })
    .await;

    let attempts: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::Reconnecting { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert_eq!(
        seen.last(),
        Some(&ConnectionEvent::Error(ATTEMPTS_EXHAUSTED.to_string()))
    );
    assert_eq!(client.connection_status(), ConnectionStatus::Error);
    assert!(client.submit("ignored").is_none());

    // Nothing happens on its own after the ceiling.
    let idle = tokio::time::timeout(Duration::from_millis(400), client.next_event()).await;
    assert!(idle.is_err(), "unexpected event after ceiling: {idle:?}");

    let _proxy = TcpProxy::new(port, &echo.addr().to_string()).await;
    client.reconnect().unwrap();
    events_until(&mut client, Duration::from_secs(10), "Connected", is_connected).await;

    client.submit("back").unwrap();
    events_until(&mut client, Duration::from_secs(10), "reply", |e| {
        *e == ConnectionEvent::Inbound("echo: back".to_string())
    })
    .await;
}

#[tokio::test]
async fn server_close_is_clean_and_not_retried() {
    let echo = start_echo().await;
    let config = ClientConfig {
        url: format!("ws://{}/ws", echo.addr()),
        ..Default::default()
    };
    let mut client =
        ChatClient::start(&config, WsConnector::default(), InMemoryHistory::new()).unwrap();
    events_until(&mut client, Duration::from_secs(10), "Connected", is_connected).await;

    // Round-trip once so the server has registered the connection.
    client.submit("ready").unwrap();
    events_until(&mut client, Duration::from_secs(10), "reply", |e| {
        matches!(e, ConnectionEvent::Inbound(_))
    })
    .await;

    echo.close_all_connections().await;
    events_until(&mut client, Duration::from_secs(10), "Disconnected", |e| {
        *e == ConnectionEvent::StatusChanged(ConnectionStatus::Disconnected)
    })
    .await;

    let idle = tokio::time::timeout(Duration::from_secs(2), client.next_event()).await;
    assert!(idle.is_err(), "unexpected event after clean close: {idle:?}");
    assert_eq!(client.connection_status(), ConnectionStatus::Disconnected);
}
