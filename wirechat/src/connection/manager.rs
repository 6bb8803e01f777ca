//! Async driver for the connection state machine.
//!
//! [`spawn`] starts one tokio task that owns the [`ConnectionMachine`] and
//! returns a cloneable [`ConnectionHandle`] plus the receiver for
//! [`ConnectionEvent`]s.
//!
//! # Architecture
//!
//! ```text
//! ConnectionHandle ── Command ──►  driver task  ── ConnectionEvent ──► consumer
//!                                   │      ▲
//!                       LinkCommand │      │ (generation, LinkEvent)
//!                                   ▼      │
//!                                 link task (one per open attempt)
//! ```
//!
//! Each open attempt gets a fresh generation number. Events from an older
//! generation are dropped, so a link that was superseded or intentionally
//! closed can never disturb the current one.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::transport::{Connector, Link, LinkFrame};

use super::machine::{Action, ConnectionMachine, Input};
use super::{
    ConnectionConfig, ConnectionError, ConnectionEvent, ConnectionState, ConnectionStatus,
    NOT_CONNECTED,
};

/// Commands sent from handles to the driver task.
#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Send(String),
    Shutdown,
}

/// Commands sent from the driver to the current link task.
#[derive(Debug)]
enum LinkCommand {
    Send(String),
    Close,
}

/// Reports from a link task, tagged with its generation.
#[derive(Debug)]
enum LinkEvent {
    Opened,
    Frame(String),
    Failed(String),
    Closed { clean: bool, reason: Option<String> },
}

/// Cloneable handle to a running connection manager.
///
/// All operations are non-blocking. The driver task exits when every handle
/// has been dropped or [`ConnectionHandle::shutdown`] is called; the event
/// stream ends once it has.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::Sender<Command>,
    // Weak so that only the driver keeps the event stream open.
    event_tx: mpsc::WeakSender<ConnectionEvent>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Begin establishing the link. Ignored while connecting or connected.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Busy`] or [`ConnectionError::Shutdown`] if
    /// the command could not be queued.
    pub fn connect(&self) -> Result<(), ConnectionError> {
        self.command(Command::Connect)
    }

    /// Close the link intentionally and cancel any pending reconnect.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Busy`] or [`ConnectionError::Shutdown`] if
    /// the command could not be queued.
    pub fn disconnect(&self) -> Result<(), ConnectionError> {
        self.command(Command::Disconnect)
    }

    /// Transmit one payload on the live link.
    ///
    /// Nothing is queued while the link is down: the call fails with
    /// [`ConnectionError::NotConnected`] and an error event is emitted.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::NotConnected`] if the status is not `Connected`.
    /// - [`ConnectionError::Busy`] / [`ConnectionError::Shutdown`] if the
    ///   command could not be queued.
    pub fn send(&self, payload: impl Into<String>) -> Result<(), ConnectionError> {
        if self.status() != ConnectionStatus::Connected {
            tracing::debug!("send rejected, not connected");
            self.report_not_connected();
            return Err(ConnectionError::NotConnected);
        }
        self.command(Command::Send(payload.into()))
    }

    /// Close the link and stop the driver task.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Shutdown`] if the driver already exited.
    pub fn shutdown(&self) -> Result<(), ConnectionError> {
        self.command(Command::Shutdown)
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.state_rx.borrow().status
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    fn report_not_connected(&self) {
        let Some(event_tx) = self.event_tx.upgrade() else {
            tracing::trace!("event stream closed, not-connected error dropped");
            return;
        };
        if let Err(e) = event_tx.try_send(ConnectionEvent::Error(NOT_CONNECTED.to_owned())) {
            tracing::warn!(err = %e, "could not queue not-connected error event");
        }
    }

    fn command(&self, cmd: Command) -> Result<(), ConnectionError> {
        self.cmd_tx.try_send(cmd).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ConnectionError::Busy,
            mpsc::error::TrySendError::Closed(_) => ConnectionError::Shutdown,
        })
    }
}

/// Spawn the connection manager task.
///
/// The manager starts `Disconnected`; call [`ConnectionHandle::connect`] to
/// open the link. Must be called from within a tokio runtime.
pub fn spawn<C: Connector>(
    config: ConnectionConfig,
    connector: C,
) -> (ConnectionHandle, mpsc::Receiver<ConnectionEvent>) {
    let capacity = config.channel_capacity.max(1);
    let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
    let (event_tx, event_rx) = mpsc::channel(capacity);
    let (link_tx, link_rx) = mpsc::unbounded_channel();

    let machine = ConnectionMachine::new(config.reconnect);
    let (state_tx, state_rx) = watch::channel(machine.state().clone());

    let handle_events = event_tx.downgrade();
    let driver = Driver {
        url: config.url,
        connector: Arc::new(connector),
        machine,
        generation: 0,
        link: None,
        link_events: link_tx,
        event_tx,
        state_tx,
        deadline: None,
    };
    tokio::spawn(driver.run(cmd_rx, link_rx));

    let handle = ConnectionHandle {
        cmd_tx,
        event_tx: handle_events,
        state_rx,
    };
    (handle, event_rx)
}

struct Driver<C: Connector> {
    url: String,
    connector: Arc<C>,
    machine: ConnectionMachine,
    generation: u64,
    link: Option<mpsc::UnboundedSender<LinkCommand>>,
    link_events: mpsc::UnboundedSender<(u64, LinkEvent)>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    deadline: Option<Instant>,
}

impl<C: Connector> Driver<C> {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut link_rx: mpsc::UnboundedReceiver<(u64, LinkEvent)>,
    ) {
        tracing::debug!(url = %self.url, "connection manager started");
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Connect) => self.apply(Input::Connect).await,
                    Some(Command::Disconnect) => self.apply(Input::Disconnect).await,
                    Some(Command::Send(payload)) => self.transmit(payload).await,
                    Some(Command::Shutdown) | None => {
                        self.apply(Input::Disconnect).await;
                        break;
                    }
                },
                Some((generation, event)) = link_rx.recv() => {
                    if generation == self.generation {
                        self.on_link_event(event).await;
                    } else {
                        tracing::trace!(generation, current = self.generation, "stale link event dropped");
                    }
                }
                () = wait_until(self.deadline) => {
                    self.deadline = None;
                    self.apply(Input::TimerFired).await;
                }
            }
        }
        tracing::debug!("connection manager stopped");
    }

    async fn apply(&mut self, input: Input) {
        let actions = self.machine.handle(input);
        // Publish the snapshot first so consumers reacting to an event
        // observe the state that produced it.
        self.state_tx.send_replace(self.machine.state().clone());

        for action in actions {
            match action {
                Action::Open => self.open_link(),
                Action::Close => self.close_link(),
                Action::Schedule(delay) => self.deadline = Some(Instant::now() + delay),
                Action::CancelTimer => self.deadline = None,
                Action::Emit(event) => self.emit(event).await,
            }
        }
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened => {
                tracing::info!(url = %self.url, "connected");
                self.apply(Input::Opened).await;
            }
            LinkEvent::Frame(text) => {
                if self.machine.can_send() {
                    self.emit(ConnectionEvent::Inbound(text)).await;
                }
            }
            LinkEvent::Failed(reason) => self.apply(Input::Failed(reason)).await,
            LinkEvent::Closed { clean, reason } => {
                tracing::info!(clean, reason = ?reason, "link closed");
                self.link = None;
                self.apply(Input::Closed { clean, reason }).await;
            }
        }
    }

    async fn transmit(&mut self, payload: String) {
        let queued = self.machine.can_send()
            && self
                .link
                .as_ref()
                .is_some_and(|link| link.send(LinkCommand::Send(payload)).is_ok());
        if !queued {
            tracing::debug!("payload dropped, link not open");
            self.emit(ConnectionEvent::Error(NOT_CONNECTED.to_owned()))
                .await;
        }
    }

    fn open_link(&mut self) {
        self.generation += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.link = Some(tx);

        tracing::debug!(generation = self.generation, url = %self.url, "opening link");
        tokio::spawn(run_link(
            Arc::clone(&self.connector),
            self.url.clone(),
            self.generation,
            rx,
            self.link_events.clone(),
        ));
    }

    fn close_link(&mut self) {
        // Anything the old link reports from now on is stale.
        self.generation += 1;
        if let Some(link) = self.link.take() {
            let _ = link.send(LinkCommand::Close);
        }
    }

    async fn emit(&self, event: ConnectionEvent) {
        if self.event_tx.send(event).await.is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}

/// Resolve at `deadline`, or never when no timer is armed.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Resolve once the driver asks the link to close or goes away.
async fn closed(commands: &mut mpsc::UnboundedReceiver<LinkCommand>) {
    while let Some(cmd) = commands.recv().await {
        if matches!(cmd, LinkCommand::Close) {
            return;
        }
    }
}

/// Own one link for its whole life: open, pump frames both ways, report close.
async fn run_link<C: Connector>(
    connector: Arc<C>,
    url: String,
    generation: u64,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<(u64, LinkEvent)>,
) {
    let report = |event: LinkEvent| {
        let _ = events.send((generation, event));
    };

    let opened = tokio::select! {
        result = connector.open(&url) => result,
        () = closed(&mut commands) => {
            tracing::debug!(generation, "open abandoned");
            return;
        }
    };

    let mut link = match opened {
        Ok(link) => link,
        Err(e) => {
            tracing::warn!(generation, err = %e, "open failed");
            report(LinkEvent::Closed {
                clean: false,
                reason: Some(e.to_string()),
            });
            return;
        }
    };
    report(LinkEvent::Opened);

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(LinkCommand::Send(payload)) => {
                    if let Err(e) = link.send(payload).await {
                        tracing::warn!(generation, err = %e, "send failed");
                        report(LinkEvent::Closed {
                            clean: false,
                            reason: Some(e.to_string()),
                        });
                        return;
                    }
                }
                Some(LinkCommand::Close) | None => {
                    link.close().await;
                    return;
                }
            },
            frame = link.recv() => match frame {
                Ok(LinkFrame::Text(text)) => report(LinkEvent::Frame(text)),
                Ok(LinkFrame::Closed { clean, reason }) => {
                    report(LinkEvent::Closed { clean, reason });
                    return;
                }
                Err(e) => {
                    let reason = e.to_string();
                    report(LinkEvent::Failed(reason.clone()));
                    link.close().await;
                    report(LinkEvent::Closed {
                        clean: false,
                        reason: Some(reason),
                    });
                    return;
                }
            },
        }
    }
}
