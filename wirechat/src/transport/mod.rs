//! Transport layer abstraction for `WireChat`.
//!
//! Defines the [`Connector`] / [`Link`] pair that the connection manager
//! drives. A connector opens links; a link carries opaque text frames in
//! both directions until it closes. Concrete implementations:
//! - [`ws::WsConnector`]: WebSocket transport over `tokio-tungstenite`
//! - [`loopback::LoopbackConnector`]: in-process channels for testing

pub mod loopback;
pub mod ws;

use std::future::Future;

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The link has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The endpoint could not be reached.
    #[error("endpoint {0} is unreachable")]
    Unreachable(String),

    /// The remote side violated the framing protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A unit delivered by [`Link::recv`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFrame {
    /// One transport-delivered text message, unmodified.
    Text(String),
    /// The link closed.
    ///
    /// `clean` is true only when the closing handshake completed; anything
    /// else (reset, EOF without handshake) is an abnormal close.
    Closed {
        /// Whether the close handshake completed.
        clean: bool,
        /// Close reason or failure description, if any.
        reason: Option<String>,
    },
}

/// Opens links to a single endpoint URL.
pub trait Connector: Send + Sync + 'static {
    /// The link type produced by this connector.
    type Link: Link;

    /// Open a new link to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the endpoint cannot be reached or the
    /// handshake fails.
    fn open(&self, url: &str) -> impl Future<Output = Result<Self::Link, TransportError>> + Send;
}

/// A live, full-duplex, message-framed connection.
///
/// # Invariant
///
/// [`Link::recv`] must be cancel-safe: dropping the future before it
/// completes must not lose a frame. The connection manager races it against
/// outbound commands.
pub trait Link: Send + 'static {
    /// Transmit one text payload.
    fn send(&mut self, payload: String)
    -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Wait for the next frame or close notification.
    ///
    /// Errors are protocol-level failures; ordinary closes (clean or not)
    /// arrive as [`LinkFrame::Closed`].
    fn recv(&mut self) -> impl Future<Output = Result<LinkFrame, TransportError>> + Send;

    /// Close the link intentionally.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
