//! Plain-text presentation helpers for the line-mode front-end.
//!
//! Nothing here touches the terminal; every function returns a string so the
//! binary decides where it goes.

use std::time::Duration;

use chrono::{DateTime, Local, Utc};

use crate::chat::message::{Message, MessageStatus, Sender};
use crate::connection::{ConnectionEvent, ConnectionStatus};

/// Shown while a reply is expected.
pub const TYPING_INDICATOR: &str = "assistant is typing...";

/// Display symbol for a user message status.
#[must_use]
pub const fn status_symbol(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Sent => "\u{25f7}",
        MessageStatus::Delivered => "\u{2713}",
        MessageStatus::Error => "\u{2717}",
    }
}

/// Input hint shown in place of the prompt while sending is unavailable.
#[must_use]
pub const fn prompt_hint(status: ConnectionStatus) -> Option<&'static str> {
    match status {
        ConnectionStatus::Connected => None,
        ConnectionStatus::Connecting => Some("Connecting..."),
        ConnectionStatus::Disconnected | ConnectionStatus::Error => {
            Some("Disconnected - trying to reconnect...")
        }
    }
}

/// Format a UTC timestamp in local time with a chrono format string.
#[must_use]
pub fn format_timestamp(timestamp: DateTime<Utc>, format: &str) -> String {
    timestamp.with_timezone(&Local).format(format).to_string()
}

/// One log line: `[HH:MM] you: text ✓` or `[HH:MM] assistant: text`.
#[must_use]
pub fn format_message(message: &Message, timestamp_format: &str) -> String {
    let time = format_timestamp(message.timestamp(), timestamp_format);
    match message.sender() {
        Sender::User => format!(
            "[{time}] you: {} {}",
            message.content(),
            status_symbol(message.status())
        ),
        Sender::Assistant => format!("[{time}] assistant: {}", message.content()),
    }
}

/// A one-line notice for a connection event, or `None` when it has no
/// user-facing text.
#[must_use]
pub fn connection_notice(event: &ConnectionEvent) -> Option<String> {
    match event {
        ConnectionEvent::StatusChanged(status) => Some(format!("-- {status} --")),
        ConnectionEvent::Reconnecting {
            attempt,
            max_attempts,
            delay,
        } => Some(format!(
            "-- Reconnecting in {} (attempt {attempt}/{max_attempts}) --",
            format_delay(*delay)
        )),
        ConnectionEvent::Error(reason) => Some(format!("!! {reason}")),
        ConnectionEvent::Inbound(_) => None,
    }
}

fn format_delay(delay: Duration) -> String {
    if delay.subsec_millis() == 0 {
        format!("{}s", delay.as_secs())
    } else {
        format!("{}ms", delay.as_millis())
    }
}
