//! Client façade wiring the connection manager to the conversation store.
//!
//! [`ChatClient`] owns both halves and the connection event receiver. The
//! host drives it by awaiting [`ChatClient::next_event`], which applies each
//! event to the store before returning it for display.

use tokio::sync::{broadcast, mpsc};

use crate::chat::history::HistoryStore;
use crate::chat::message::{Message, MessageId};
use crate::chat::{ChatEvent, ConversationStore};
use crate::config::ClientConfig;
use crate::connection::{
    self, ConnectionError, ConnectionEvent, ConnectionHandle, ConnectionState, ConnectionStatus,
};
use crate::transport::Connector;

/// A running chat session.
pub struct ChatClient {
    handle: ConnectionHandle,
    events: mpsc::Receiver<ConnectionEvent>,
    store: ConversationStore<ConnectionHandle>,
}

impl ChatClient {
    /// Spawn the connection manager, restore history, and start connecting.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the initial connect could not be queued.
    pub fn start<C: Connector>(
        config: &ClientConfig,
        connector: C,
        history: impl HistoryStore + 'static,
    ) -> Result<Self, ConnectionError> {
        let (handle, events) = connection::spawn(config.to_connection_config(), connector);
        let store =
            ConversationStore::with_history(handle.clone(), history, config.chat_event_buffer);
        handle.connect()?;

        tracing::info!(url = %config.url, "chat client started");
        Ok(Self {
            handle,
            events,
            store,
        })
    }

    /// Wait for the next connection event and apply it.
    ///
    /// Returns `None` once the connection manager has stopped.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        let event = self.events.recv().await?;
        self.store.apply(&event);
        Some(event)
    }

    /// Submit user text. See [`ConversationStore::submit`].
    pub fn submit(&mut self, text: &str) -> Option<MessageId> {
        self.store.submit(text)
    }

    /// Clear the conversation log.
    pub fn clear(&mut self) {
        self.store.clear();
    }

    /// Ask the connection manager to connect now.
    ///
    /// Restarts the retry cycle after the ceiling was reached, or expedites a
    /// pending retry.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the command could not be queued.
    pub fn reconnect(&self) -> Result<(), ConnectionError> {
        self.handle.connect()
    }

    /// Close the link and stop the connection manager.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Shutdown`] if it already stopped.
    pub fn shutdown(&self) -> Result<(), ConnectionError> {
        tracing::info!("chat client shutting down");
        self.handle.shutdown()
    }

    /// The ordered conversation log.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    /// Whether a reply is expected.
    #[must_use]
    pub const fn awaiting_reply(&self) -> bool {
        self.store.awaiting_reply()
    }

    /// Connection status as last applied to the store.
    #[must_use]
    pub const fn connection_status(&self) -> ConnectionStatus {
        self.store.connection_status()
    }

    /// Live snapshot from the connection manager.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Subscribe to conversation notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.store.subscribe()
    }
}
