//! WebSocket transport for `WireChat`.
//!
//! Implements [`Connector`] / [`Link`] over `tokio-tungstenite`. Text frames
//! are passed through unmodified; binary frames are accepted only when they
//! carry valid UTF-8. Ping/pong is handled by tungstenite and never surfaces.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Connector, Link, LinkFrame, TransportError};

/// Default timeout for opening a WebSocket connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Opens WebSocket links with a bounded handshake time.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    /// Create a connector that gives up on a handshake after `connect_timeout`.
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Connector for WsConnector {
    type Link = WsLink;

    /// Establish a WebSocket connection to `url`.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Timeout`] if the handshake does not finish in time.
    /// - [`TransportError::Unreachable`] if the endpoint refuses the connection.
    /// - [`TransportError::Io`] / [`TransportError::Protocol`] for other failures.
    async fn open(&self, url: &str) -> Result<WsLink, TransportError> {
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "WebSocket connect timed out");
                TransportError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, err = %e, "WebSocket connect failed");
                map_ws_connect_error(url, e)
            })?;

        tracing::debug!(url, "WebSocket link open");
        Ok(WsLink { stream })
    }
}

/// A live WebSocket connection.
pub struct WsLink {
    stream: WsStream,
}

impl Link for WsLink {
    async fn send(&mut self, payload: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(payload.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "WebSocket send failed");
                map_ws_io_error(e)
            })
    }

    async fn recv(&mut self) -> Result<LinkFrame, TransportError> {
        use tokio_tungstenite::tungstenite::Error as WsError;

        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(LinkFrame::Text(text.as_str().to_owned())),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Ok(LinkFrame::Text(text)),
                    Err(_) => {
                        tracing::warn!(len = data.len(), "non-UTF-8 binary frame, skipping");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()))
                        .map(|r| r.trim_end().to_owned());
                    tracing::info!(reason = ?reason, "WebSocket closed by peer");
                    return Ok(LinkFrame::Closed {
                        clean: true,
                        reason,
                    });
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(
                    WsError::ConnectionClosed
                    | WsError::AlreadyClosed
                    | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake),
                )) => {
                    return Ok(LinkFrame::Closed {
                        clean: false,
                        reason: Some("connection reset without closing handshake".to_owned()),
                    });
                }
                Some(Err(WsError::Io(e))) => {
                    tracing::warn!(err = %e, "WebSocket read I/O error");
                    return Ok(LinkFrame::Closed {
                        clean: false,
                        reason: Some(e.to_string()),
                    });
                }
                Some(Err(e)) => {
                    tracing::warn!(err = %e, "WebSocket protocol error");
                    return Err(TransportError::Protocol(e.to_string()));
                }
                None => {
                    return Ok(LinkFrame::Closed {
                        clean: false,
                        reason: Some("stream ended".to_owned()),
                    });
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(err = %e, "WebSocket close handshake did not complete");
        }
    }
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(url.to_owned())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Tls(_) => TransportError::Io(std::io::Error::other(format!("TLS error: {err}"))),
        WsError::Http(response) => TransportError::Protocol(format!(
            "HTTP error during upgrade: status {}",
            response.status()
        )),
        WsError::Url(e) => TransportError::Protocol(format!("invalid endpoint URL: {e}")),
        other => TransportError::Protocol(format!("connection error: {other}")),
    }
}

/// Map a write-side error to a [`TransportError`].
fn map_ws_io_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ConnectionClosed,
        WsError::Io(e) => TransportError::Io(e),
        other => TransportError::Protocol(other.to_string()),
    }
}
