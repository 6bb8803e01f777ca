//! Conversation layer for `WireChat`.
//!
//! Contains the [`ConversationStore`] which owns the ordered message log,
//! assigns identity and status to outbound messages, and reconciles those
//! statuses against inbound replies and connection failures.
//!
//! # Reconciliation
//!
//! The endpoint does not correlate replies with requests. Every inbound
//! payload therefore promotes *all* user messages still `Sent` to
//! `Delivered`. A connection failure moves them to `Error` instead.
//! `Delivered` and `Error` are final.

pub mod history;
pub mod message;

use tokio::sync::broadcast;

use crate::connection::{ConnectionError, ConnectionEvent, ConnectionHandle, ConnectionStatus};

use history::{HistoryStore, InMemoryHistory};
use message::{Message, MessageId, MessageStatus};

/// Default capacity of the [`ChatEvent`] broadcast channel.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Where the conversation store hands outbound text.
///
/// Implemented by [`ConnectionHandle`]; tests substitute a recorder.
pub trait Outbound {
    /// Transmit `payload` on the live link.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] when the payload could not be handed off.
    fn send(&self, payload: &str) -> Result<(), ConnectionError>;
}

impl Outbound for ConnectionHandle {
    fn send(&self, payload: &str) -> Result<(), ConnectionError> {
        Self::send(self, payload)
    }
}

/// Notifications for optional observers (bell, status line, logging).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A reply arrived.
    Delivered {
        /// The assistant message that was appended.
        message_id: MessageId,
        /// User messages promoted to `Delivered` by this reply.
        acknowledged: Vec<MessageId>,
    },
    /// User messages moved to `Error` after a connection failure.
    Failed {
        /// The affected messages.
        message_ids: Vec<MessageId>,
    },
    /// The log could not be persisted.
    HistoryWriteFailed {
        /// Description of the error.
        reason: String,
    },
    /// The log was cleared.
    Cleared,
}

/// Owns the ordered conversation log.
///
/// A plain single-owner value: the host loop feeds it connection events in
/// arrival order via [`ConversationStore::apply`]. Nothing here blocks.
pub struct ConversationStore<O: Outbound> {
    outbound: O,
    history: Box<dyn HistoryStore>,
    messages: Vec<Message>,
    awaiting_reply: bool,
    connection_status: ConnectionStatus,
    events: broadcast::Sender<ChatEvent>,
}

impl<O: Outbound> ConversationStore<O> {
    /// Create an empty store with in-memory history.
    #[must_use]
    pub fn new(outbound: O) -> Self {
        Self::build(
            outbound,
            Box::new(InMemoryHistory::new()),
            Vec::new(),
            DEFAULT_EVENT_BUFFER,
        )
    }

    /// Create a store backed by `history`, restoring the previously saved log.
    ///
    /// Restored user messages that were still `Sent` can no longer be answered
    /// and are moved to `Error`; assistant messages are forced to `Delivered`.
    /// A log that cannot be read is logged and replaced
    /// by an empty one.
    pub fn with_history(
        outbound: O,
        history: impl HistoryStore + 'static,
        event_buffer: usize,
    ) -> Self {
        let mut messages = match history.load() {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(err = %e, "could not restore history, starting empty");
                Vec::new()
            }
        };
        let mut stale = 0usize;
        for message in &mut messages {
            if message.settle_restored() {
                stale += 1;
            }
        }
        tracing::debug!(restored = messages.len(), stale, "history restored");

        let store = Self::build(outbound, Box::new(history), messages, event_buffer);
        if stale > 0 {
            store.persist();
        }
        store
    }

    fn build(
        outbound: O,
        history: Box<dyn HistoryStore>,
        messages: Vec<Message>,
        event_buffer: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            outbound,
            history,
            messages,
            awaiting_reply: false,
            connection_status: ConnectionStatus::Disconnected,
            events,
        }
    }

    /// The ordered log.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Whether a reply is expected for the last submission.
    #[must_use]
    pub const fn awaiting_reply(&self) -> bool {
        self.awaiting_reply
    }

    /// Last connection status seen through [`ConversationStore::apply`].
    #[must_use]
    pub const fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    /// Subscribe to [`ChatEvent`]s.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Submit user text.
    ///
    /// Ignored when the trimmed text is empty or the connection is not
    /// `Connected`. Otherwise appends a `Sent` user message and forwards the
    /// trimmed text. Returns the new message's id.
    pub fn submit(&mut self, text: &str) -> Option<MessageId> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if self.connection_status != ConnectionStatus::Connected {
            tracing::debug!(status = %self.connection_status, "submit ignored, not connected");
            return None;
        }

        let message = Message::user(text);
        let id = message.id();
        self.messages.push(message);
        self.awaiting_reply = true;

        match self.outbound.send(text) {
            Ok(()) => {
                tracing::debug!(message_id = %id, "message sent");
                self.persist();
            }
            Err(e) => {
                tracing::warn!(message_id = %id, err = %e, "send failed");
                // Persists as part of the error transition.
                self.on_connection_error();
            }
        }
        Some(id)
    }

    /// Handle one inbound payload: acknowledge pending messages and append
    /// the reply.
    pub fn on_inbound_payload(&mut self, payload: &str) -> MessageId {
        let acknowledged = self.transition_pending(MessageStatus::Delivered);

        let reply = Message::assistant(payload);
        let message_id = reply.id();
        self.messages.push(reply);
        self.awaiting_reply = false;

        tracing::debug!(%message_id, acknowledged = acknowledged.len(), "reply received");
        self.persist();
        self.notify(ChatEvent::Delivered {
            message_id,
            acknowledged,
        });
        message_id
    }

    /// Mark every pending message as failed. Idempotent.
    pub fn on_connection_error(&mut self) {
        let failed = self.transition_pending(MessageStatus::Error);
        self.awaiting_reply = false;

        if failed.is_empty() {
            return;
        }
        tracing::info!(count = failed.len(), "pending messages marked as failed");
        self.persist();
        self.notify(ChatEvent::Failed {
            message_ids: failed,
        });
    }

    /// Empty the log and release the persisted copy.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.awaiting_reply = false;

        if let Err(e) = self.history.clear() {
            tracing::warn!(err = %e, "failed to clear history");
            self.notify(ChatEvent::HistoryWriteFailed {
                reason: e.to_string(),
            });
        }
        self.notify(ChatEvent::Cleared);
    }

    /// Apply one connection manager event.
    pub fn apply(&mut self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::StatusChanged(status) => {
                let previous = std::mem::replace(&mut self.connection_status, *status);
                if previous == ConnectionStatus::Connected && *status != ConnectionStatus::Connected
                {
                    self.on_connection_error();
                }
            }
            ConnectionEvent::Inbound(payload) => {
                self.on_inbound_payload(payload);
            }
            ConnectionEvent::Error(_) => self.on_connection_error(),
            ConnectionEvent::Reconnecting { .. } => {}
        }
    }

    /// Move every pending user message to `next`, returning their ids.
    fn transition_pending(&mut self, next: MessageStatus) -> Vec<MessageId> {
        self.messages
            .iter_mut()
            .filter(|m| m.is_pending())
            .filter_map(|m| m.advance(next).then_some(m.id()))
            .collect()
    }

    fn persist(&self) {
        if let Err(e) = self.history.save(&self.messages) {
            tracing::warn!(err = %e, "failed to persist history");
            self.notify(ChatEvent::HistoryWriteFailed {
                reason: e.to_string(),
            });
        }
    }

    fn notify(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
