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

//! End-to-end conversation tests against an in-process echo endpoint.
//!
//! Each test starts a `wirechat-echo` server on an OS-assigned port and
//! drives a real [`ChatClient`] over WebSocket through submit, reply,
//! clear, and history restore.

use std::time::Duration;

use wirechat::chat::ChatEvent;
use wirechat::chat::history::{InMemoryHistory, JsonFileHistory};
use wirechat::chat::message::{MessageStatus, Sender};
use wirechat::client::ChatClient;
use wirechat::config::ClientConfig;
use wirechat::connection::{ConnectionEvent, ConnectionStatus};
use wirechat::transport::ws::WsConnector;
use wirechat_echo::server::EchoServer;

// =============================================================================
// Helpers
// =============================================================================

async fn start_echo() -> EchoServer {
    wirechat_echo::server::start_server("127.0.0.1:0", "echo: ")
        .await
        .expect("failed to start echo server")
}

fn config_for(server: &EchoServer) -> ClientConfig {
    ClientConfig {
        url: format!("ws://{}/ws", server.addr()),
        ..Default::default()
    }
}

/// Drive the client until an event matching `pred` arrives.
///
/// Panics on timeout or if the connection manager stops.
async fn wait_for<F>(client: &mut ChatClient, description: &str, pred: F) -> ConnectionEvent
where
    F: Fn(&ConnectionEvent) -> bool,
{
    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = client.next_event().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await;

    match result {
        Ok(Some(event)) => event,
        Ok(None) => panic!("connection manager stopped while waiting for {description}"),
        Err(_) => panic!("timeout waiting for {description}"),
    }
}

async fn wait_for_connected(client: &mut ChatClient) {
    wait_for(client, "Connected", |e| {
        *e == ConnectionEvent::StatusChanged(ConnectionStatus::Connected)
    })
    .await;
}

async fn wait_for_reply(client: &mut ChatClient) -> String {
    match wait_for(client, "Inbound", |e| matches!(e, ConnectionEvent::Inbound(_))).await {
        ConnectionEvent::Inbound(text) => text,
        other => panic!("unexpected event {other:?}"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn hello_is_delivered_and_answered() {
    let server = start_echo().await;
    let mut client =
        ChatClient::start(&config_for(&server), WsConnector::default(), InMemoryHistory::new())
            .unwrap();
    let mut chat_events = client.subscribe();
    wait_for_connected(&mut client).await;

    let sent = client.submit("hello").expect("submit accepted");
    assert!(client.awaiting_reply());
    assert_eq!(client.messages()[0].status(), MessageStatus::Sent);

    assert_eq!(wait_for_reply(&mut client).await, "echo: hello");

    let messages = client.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].id(), sent);
    assert_eq!(messages[0].sender(), Sender::User);
    assert_eq!(messages[0].status(), MessageStatus::Delivered);
    assert_eq!(messages[1].sender(), Sender::Assistant);
    assert_eq!(messages[1].content(), "echo: hello");
    assert_eq!(messages[1].status(), MessageStatus::Delivered);
    assert!(!client.awaiting_reply());

    match chat_events.recv().await.unwrap() {
        ChatEvent::Delivered { acknowledged, .. } => assert_eq!(acknowledged, vec![sent]),
        other => panic!("expected Delivered, got {other:?}"),
    }
}

#[tokio::test]
async fn sequential_exchanges_keep_order() {
    let server = start_echo().await;
    let mut client =
        ChatClient::start(&config_for(&server), WsConnector::default(), InMemoryHistory::new())
            .unwrap();
    wait_for_connected(&mut client).await;

    for text in ["one", "two", "three"] {
        client.submit(text).unwrap();
        assert_eq!(wait_for_reply(&mut client).await, format!("echo: {text}"));
    }

    let contents: Vec<&str> = client.messages().iter().map(|m| m.content()).collect();
    assert_eq!(
        contents,
        vec!["one", "echo: one", "two", "echo: two", "three", "echo: three"]
    );
    assert!(
        client
            .messages()
            .iter()
            .all(|m| m.status() == MessageStatus::Delivered)
    );
}

#[tokio::test]
async fn blank_input_is_ignored() {
    let server = start_echo().await;
    let mut client =
        ChatClient::start(&config_for(&server), WsConnector::default(), InMemoryHistory::new())
            .unwrap();
    wait_for_connected(&mut client).await;

    assert!(client.submit("").is_none());
    assert!(client.submit("   ").is_none());
    assert!(client.messages().is_empty());
    assert!(!client.awaiting_reply());

    // Nothing was transmitted, so nothing comes back.
    let reply = tokio::time::timeout(Duration::from_millis(300), client.next_event()).await;
    assert!(reply.is_err(), "unexpected event {reply:?}");
}

#[tokio::test]
async fn clear_resets_log_and_history_file() {
    let server = start_echo().await;
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join("history.json");

    let mut client = ChatClient::start(
        &config_for(&server),
        WsConnector::default(),
        JsonFileHistory::new(&history_path),
    )
    .unwrap();
    wait_for_connected(&mut client).await;

    client.submit("hello").unwrap();
    wait_for_reply(&mut client).await;
    assert!(history_path.exists());

    client.clear();
    assert!(client.messages().is_empty());
    assert!(!client.awaiting_reply());
    assert!(!history_path.exists());
    assert_eq!(client.connection_status(), ConnectionStatus::Connected);

    // The conversation continues normally afterwards.
    client.submit("again").unwrap();
    assert_eq!(wait_for_reply(&mut client).await, "echo: again");
    assert_eq!(client.messages().len(), 2);
}

#[tokio::test]
async fn history_is_restored_on_restart() {
    let server = start_echo().await;
    let dir = tempfile::tempdir().unwrap();
    let history_path = dir.path().join("history.json");

    {
        let mut client = ChatClient::start(
            &config_for(&server),
            WsConnector::default(),
            JsonFileHistory::new(&history_path),
        )
        .unwrap();
        wait_for_connected(&mut client).await;
        client.submit("remember me").unwrap();
        wait_for_reply(&mut client).await;
        client.shutdown().unwrap();
    }

    let client = ChatClient::start(
        &config_for(&server),
        WsConnector::default(),
        JsonFileHistory::new(&history_path),
    )
    .unwrap();

    let contents: Vec<&str> = client.messages().iter().map(|m| m.content()).collect();
    assert_eq!(contents, vec!["remember me", "echo: remember me"]);
    assert!(
        client
            .messages()
            .iter()
            .all(|m| m.status() == MessageStatus::Delivered)
    );
}
