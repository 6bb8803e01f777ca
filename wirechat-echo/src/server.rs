//! Echo server core: connection registry, WebSocket handler, and startup.
//!
//! Each text frame received on `/ws` is answered with `prefix + text` on the
//! same connection, in order. Binary frames carrying UTF-8 are treated the
//! same way; anything else is ignored.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

/// Shared server state.
struct EchoState {
    prefix: String,
    next_id: AtomicU64,
    /// Writer channels of the live connections.
    connections: RwLock<HashMap<u64, mpsc::UnboundedSender<Message>>>,
}

impl EchoState {
    async fn register(&self, sender: mpsc::UnboundedSender<Message>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(id, sender);
        id
    }

    async fn unregister(&self, id: u64) {
        self.connections.write().await.remove(&id);
    }
}

/// A running echo server. The server stops when this is dropped.
pub struct EchoServer {
    addr: SocketAddr,
    state: Arc<EchoState>,
    task: JoinHandle<()>,
}

impl EchoServer {
    /// The bound address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of live WebSocket connections.
    pub async fn connection_count(&self) -> usize {
        self.state.connections.read().await.len()
    }

    /// Send a normal-closure Close frame to every connected client.
    pub async fn close_all_connections(&self) {
        let conns = self.state.connections.read().await;
        for (id, sender) in conns.iter() {
            tracing::info!(connection = id, "sending close frame");
            let _ = sender.send(Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "server closing".into(),
            })));
        }
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start an echo server bound to `addr` (use port 0 for an OS-assigned one).
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
    prefix: &str,
) -> Result<EchoServer, Box<dyn std::error::Error + Send + Sync>> {
    let state = Arc::new(EchoState {
        prefix: prefix.to_owned(),
        next_id: AtomicU64::new(0),
        connections: RwLock::new(HashMap::new()),
    });

    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "echo server error");
        }
    });

    Ok(EchoServer {
        addr: bound_addr,
        state,
        task,
    })
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<EchoState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Serve one connection until either side closes it.
async fn handle_socket(socket: WebSocket, state: Arc<EchoState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let id = state.register(tx.clone()).await;
    tracing::info!(connection = id, "client connected");

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(connection = id, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let prefix = state.prefix.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            let text = match msg {
                Message::Text(text) => text.as_str().to_owned(),
                Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        tracing::debug!(connection = id, "ignoring non-UTF-8 binary frame");
                        continue;
                    }
                },
                Message::Close(_) => {
                    tracing::info!(connection = id, "received close frame");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            tracing::debug!(connection = id, len = text.len(), "echoing frame");
            if tx.send(Message::Text(format!("{prefix}{text}").into())).is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    state.unregister(id).await;
    tracing::info!(connection = id, "client disconnected");
}
