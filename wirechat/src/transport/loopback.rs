//! Loopback transport for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels to simulate an endpoint.
//! Created via [`LoopbackConnector::create`], which returns the client-side
//! connector and a [`LoopbackServer`] that accepts each opened link as a
//! [`LoopbackPeer`]. The server side can reply, close cleanly or abruptly,
//! inject protocol errors, and refuse new connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::mpsc;

use super::{Connector, Link, LinkFrame, TransportError};

/// Client-side half of the loopback transport.
#[derive(Clone)]
pub struct LoopbackConnector {
    accept_tx: mpsc::UnboundedSender<LoopbackPeer>,
    refusing: Arc<AtomicBool>,
    open_attempts: Arc<AtomicUsize>,
}

/// Server-side half of the loopback transport.
pub struct LoopbackServer {
    accept_rx: mpsc::UnboundedReceiver<LoopbackPeer>,
    refusing: Arc<AtomicBool>,
    open_attempts: Arc<AtomicUsize>,
}

/// The server end of one accepted loopback link.
pub struct LoopbackPeer {
    to_client: mpsc::UnboundedSender<Result<LinkFrame, TransportError>>,
    from_client: mpsc::UnboundedReceiver<String>,
}

/// The client end of one loopback link.
pub struct LoopbackLink {
    incoming: mpsc::UnboundedReceiver<Result<LinkFrame, TransportError>>,
    outgoing: Option<mpsc::UnboundedSender<String>>,
}

impl LoopbackConnector {
    /// Create a connected connector/server pair.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use wirechat::transport::loopback::LoopbackConnector;
    /// use wirechat::transport::{Connector, Link, LinkFrame};
    ///
    /// # async fn example() {
    /// let (connector, mut server) = LoopbackConnector::create();
    /// let mut link = connector.open("loopback://test").await.unwrap();
    /// let peer = server.accept().await.unwrap();
    /// peer.reply("hi");
    /// assert_eq!(link.recv().await.unwrap(), LinkFrame::Text("hi".into()));
    /// # }
    /// ```
    #[must_use]
    pub fn create() -> (Self, LoopbackServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let refusing = Arc::new(AtomicBool::new(false));
        let open_attempts = Arc::new(AtomicUsize::new(0));

        let connector = Self {
            accept_tx,
            refusing: Arc::clone(&refusing),
            open_attempts: Arc::clone(&open_attempts),
        };
        let server = LoopbackServer {
            accept_rx,
            refusing,
            open_attempts,
        };
        (connector, server)
    }
}

impl Connector for LoopbackConnector {
    type Link = LoopbackLink;

    async fn open(&self, url: &str) -> Result<LoopbackLink, TransportError> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable(url.to_owned()));
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let peer = LoopbackPeer {
            to_client,
            from_client,
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| TransportError::Unreachable(url.to_owned()))?;

        Ok(LoopbackLink {
            incoming,
            outgoing: Some(outgoing),
        })
    }
}

impl LoopbackServer {
    /// Wait for the next link opened by the client.
    pub async fn accept(&mut self) -> Option<LoopbackPeer> {
        self.accept_rx.recv().await
    }

    /// Make subsequent `open` calls fail (or succeed again).
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of `open` calls seen so far, refused ones included.
    #[must_use]
    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }
}

impl LoopbackPeer {
    /// Deliver a text frame to the client.
    pub fn reply(&self, text: impl Into<String>) {
        let _ = self.to_client.send(Ok(LinkFrame::Text(text.into())));
    }

    /// Wait for the next payload the client transmitted.
    ///
    /// Returns `None` once the client closed or dropped its link.
    pub async fn next_payload(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Inject a protocol error into the client's receive side.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self
            .to_client
            .send(Err(TransportError::Protocol(reason.into())));
    }

    /// Close the link, completing the handshake when `clean` is true.
    pub fn close(self, clean: bool) {
        let _ = self.to_client.send(Ok(LinkFrame::Closed {
            clean,
            reason: None,
        }));
    }
}

impl Link for LoopbackLink {
    async fn send(&mut self, payload: String) -> Result<(), TransportError> {
        self.outgoing
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(payload)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&mut self) -> Result<LinkFrame, TransportError> {
        self.incoming.recv().await.unwrap_or_else(|| {
            Ok(LinkFrame::Closed {
                clean: false,
                reason: Some("peer dropped".to_owned()),
            })
        })
    }

    async fn close(&mut self) {
        // Dropping the sender is what the peer observes as a close.
        self.outgoing = None;
        self.incoming.close();
    }
}
