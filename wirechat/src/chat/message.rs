//! Message records kept by the conversation store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Locally unique, time-ordered message identifier (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a new identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// Typed locally and sent to the endpoint.
    User,
    /// Received from the endpoint.
    Assistant,
}

/// Delivery status of a message.
///
/// Only moves forward: `Sent` to `Delivered` or `Sent` to `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Transmitted, no reply seen yet.
    Sent,
    /// A reply arrived after this message was sent.
    Delivered,
    /// The connection failed before any reply arrived.
    Error,
}

impl MessageStatus {
    /// Whether the status can still change.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Sent)
    }

    /// Move to `next` if that is a forward transition.
    ///
    /// Returns `true` when the status changed.
    pub fn advance(&mut self, next: Self) -> bool {
        let allowed = matches!((*self, next), (Self::Sent, Self::Delivered | Self::Error));
        if allowed {
            *self = next;
        }
        allowed
    }
}

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    content: String,
    sender: Sender,
    timestamp: DateTime<Utc>,
    status: MessageStatus,
}

impl Message {
    /// A locally originated message, pending acknowledgment.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            content: content.into(),
            sender: Sender::User,
            timestamp: Utc::now(),
            status: MessageStatus::Sent,
        }
    }

    /// A message received from the endpoint. Always delivered.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            content: content.into(),
            sender: Sender::Assistant,
            timestamp: Utc::now(),
            status: MessageStatus::Delivered,
        }
    }

    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.id
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub const fn sender(&self) -> Sender {
        self.sender
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub const fn status(&self) -> MessageStatus {
        self.status
    }

    /// Whether this is a user message still waiting for a reply.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.sender == Sender::User && self.status.is_pending()
    }

    /// Advance the status of a user message.
    ///
    /// Assistant messages are fixed at `Delivered`; the call is ignored for
    /// them. Returns `true` when the status changed.
    pub fn advance(&mut self, next: MessageStatus) -> bool {
        self.sender == Sender::User && self.status.advance(next)
    }

    /// Bring a record loaded from storage back in line with the status rules.
    ///
    /// A user message still `Sent` can never be answered now and becomes
    /// `Error`; an assistant message is forced to `Delivered`. Returns `true`
    /// when the record changed.
    pub fn settle_restored(&mut self) -> bool {
        match self.sender {
            Sender::User => self.status.advance(MessageStatus::Error),
            Sender::Assistant if self.status != MessageStatus::Delivered => {
                self.status = MessageStatus::Delivered;
                true
            }
            Sender::Assistant => false,
        }
    }
}
