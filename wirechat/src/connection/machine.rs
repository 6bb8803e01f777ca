//! Pure connection lifecycle state machine.
//!
//! [`ConnectionMachine::handle`] takes one [`Input`] and returns the
//! [`Action`]s the driver must perform. It owns no I/O and no clock, so
//! every transition is deterministic and unit-testable.
//!
//! Backoff: the delay scheduled after the n-th consecutive abnormal close is
//! `min(initial_delay * 2^(n-1), max_delay)`. Counters reset only on a
//! successful open, or when a caller restarts the cycle with `Connect`.

use std::time::Duration;

use crate::config::ReconnectConfig;

use super::{ATTEMPTS_EXHAUSTED, ConnectionEvent, ConnectionState, ConnectionStatus};

/// Something that happened, fed into the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Caller asked to (re)establish the link.
    Connect,
    /// Caller asked for an intentional closure.
    Disconnect,
    /// The transport finished opening.
    Opened,
    /// The transport closed.
    Closed {
        /// Whether the closing handshake completed.
        clean: bool,
        /// Close reason or open failure description.
        reason: Option<String>,
    },
    /// The transport reported a protocol error.
    Failed(String),
    /// The reconnect timer expired.
    TimerFired,
}

/// Something the driver must do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open a new transport link.
    Open,
    /// Close the live link intentionally.
    Close,
    /// Arm the reconnect timer.
    Schedule(Duration),
    /// Disarm the reconnect timer.
    CancelTimer,
    /// Publish an event.
    Emit(ConnectionEvent),
}

/// The connection lifecycle rules.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    policy: ReconnectConfig,
    state: ConnectionState,
    reconnect_pending: bool,
}

impl ConnectionMachine {
    /// Create a machine in the `Disconnected` state.
    #[must_use]
    pub fn new(policy: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::new(&policy),
            policy,
            reconnect_pending: false,
        }
    }

    /// Current state snapshot.
    #[must_use]
    pub const fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    /// Whether a reconnect timer is armed.
    #[must_use]
    pub const fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Whether a payload may be transmitted right now.
    #[must_use]
    pub fn can_send(&self) -> bool {
        self.state.status == ConnectionStatus::Connected
    }

    /// Apply one input and return the actions to perform, in order.
    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        let mut actions = Vec::new();
        match input {
            Input::Connect => self.on_connect(&mut actions),
            Input::Disconnect => self.on_disconnect(&mut actions),
            Input::Opened => self.on_opened(&mut actions),
            Input::Closed { clean, reason } => self.on_closed(clean, reason, &mut actions),
            Input::Failed(reason) => self.on_failed(reason, &mut actions),
            Input::TimerFired => self.on_timer(&mut actions),
        }
        actions
    }

    fn on_connect(&mut self, actions: &mut Vec<Action>) {
        if matches!(
            self.state.status,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        ) {
            tracing::debug!(status = %self.state.status, "connect ignored, link already active");
            return;
        }

        if self.reconnect_pending {
            // Expedite the pending retry; the cycle's counters carry on.
            self.cancel_timer(actions);
        } else {
            self.state.attempt = 0;
            self.state.backoff = self.policy.delay_for_failure(1);
        }

        self.set_status(ConnectionStatus::Connecting, actions);
        actions.push(Action::Open);
    }

    fn on_disconnect(&mut self, actions: &mut Vec<Action>) {
        self.cancel_timer(actions);
        if matches!(
            self.state.status,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        ) {
            actions.push(Action::Close);
        }
        self.set_status(ConnectionStatus::Disconnected, actions);
    }

    fn on_opened(&mut self, actions: &mut Vec<Action>) {
        if self.state.status != ConnectionStatus::Connecting {
            tracing::warn!(status = %self.state.status, "open completed outside connecting state");
            return;
        }

        self.state.attempt = 0;
        self.state.backoff = self.policy.delay_for_failure(1);
        self.state.last_error = None;
        self.set_status(ConnectionStatus::Connected, actions);
    }

    fn on_closed(&mut self, clean: bool, reason: Option<String>, actions: &mut Vec<Action>) {
        if self.state.status == ConnectionStatus::Disconnected {
            tracing::debug!("close ignored, already disconnected");
            return;
        }

        if !clean && reason.is_some() {
            self.state.last_error = reason;
        }
        self.set_status(ConnectionStatus::Disconnected, actions);

        if clean {
            tracing::info!("link closed cleanly, not reconnecting");
            return;
        }

        if self.state.attempt < self.policy.max_attempts {
            let delay = self.state.backoff.min(self.policy.max_delay);
            self.state.backoff = self
                .state
                .backoff
                .saturating_mul(2)
                .min(self.policy.max_delay);
            self.state.attempt += 1;
            self.reconnect_pending = true;

            tracing::info!(
                attempt = self.state.attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "scheduling reconnect"
            );
            actions.push(Action::Schedule(delay));
            actions.push(Action::Emit(ConnectionEvent::Reconnecting {
                attempt: self.state.attempt,
                max_attempts: self.policy.max_attempts,
                delay,
            }));
        } else {
            tracing::warn!(
                attempts = self.state.attempt,
                "reconnect attempts exhausted"
            );
            self.state.last_error = Some(ATTEMPTS_EXHAUSTED.to_owned());
            self.set_status(ConnectionStatus::Error, actions);
            actions.push(Action::Emit(ConnectionEvent::Error(
                ATTEMPTS_EXHAUSTED.to_owned(),
            )));
        }
    }

    fn on_failed(&mut self, reason: String, actions: &mut Vec<Action>) {
        if !matches!(
            self.state.status,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        ) {
            tracing::debug!(%reason, "failure ignored, no live link");
            return;
        }

        tracing::warn!(%reason, "transport failure");
        self.state.last_error = Some(reason.clone());
        self.set_status(ConnectionStatus::Error, actions);
        actions.push(Action::Emit(ConnectionEvent::Error(reason)));
    }

    fn on_timer(&mut self, actions: &mut Vec<Action>) {
        if !self.reconnect_pending {
            return;
        }
        self.reconnect_pending = false;

        if self.state.status == ConnectionStatus::Disconnected {
            self.set_status(ConnectionStatus::Connecting, actions);
            actions.push(Action::Open);
        }
    }

    fn cancel_timer(&mut self, actions: &mut Vec<Action>) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            actions.push(Action::CancelTimer);
        }
    }

    fn set_status(&mut self, status: ConnectionStatus, actions: &mut Vec<Action>) {
        if self.state.status != status {
            self.state.status = status;
            actions.push(Action::Emit(ConnectionEvent::StatusChanged(status)));
        }
    }
}
