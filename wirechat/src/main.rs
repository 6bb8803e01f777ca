//! `WireChat`: line-mode terminal chat client.
//!
//! Reads one message per line from stdin and prints the conversation as it
//! evolves. Configuration via CLI flags, environment variables, or config
//! file (`~/.config/wirechat/config.toml`).
//!
//! ```bash
//! # Start a local endpoint, then connect to it
//! cargo run --bin wirechat-echo
//! cargo run --bin wirechat -- --url ws://127.0.0.1:8000/ws
//! ```
//!
//! Commands: `/clear`, `/connect`, `/sound`, `/quit`.

use std::io::{self, Write as _};
use std::path::Path;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use wirechat::chat::ChatEvent;
use wirechat::chat::history::{HistoryStore, InMemoryHistory, JsonFileHistory};
use wirechat::client::ChatClient;
use wirechat::config::{CliArgs, ClientConfig};
use wirechat::connection::ConnectionEvent;
use wirechat::render;
use wirechat::transport::ws::WsConnector;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(url = %config.url, "wirechat starting");

    let history: Box<dyn HistoryStore> = match config.resolved_history_path() {
        Some(path) => {
            tracing::debug!(path = %path.display(), "using history file");
            Box::new(JsonFileHistory::new(path))
        }
        None => Box::new(InMemoryHistory::new()),
    };

    let connector = WsConnector::new(config.connect_timeout);
    let mut client = ChatClient::start(&config, connector, history).map_err(io::Error::other)?;

    let result = run(&mut client, &config).await;

    let _ = client.shutdown();
    tracing::info!("wirechat exiting");
    result
}

/// Initialize file-based logging.
///
/// Logs go to a file so they never interleave with the conversation on
/// stdout. Returns a [`WorkerGuard`] that must be held until shutdown.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("wirechat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// A line typed by the user.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Clear,
    Connect,
    Sound,
    Quit,
    Unknown(&'a str),
    Text(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        match line.trim() {
            "/clear" => Self::Clear,
            "/connect" => Self::Connect,
            "/sound" => Self::Sound,
            "/quit" | "/exit" => Self::Quit,
            cmd if cmd.starts_with('/') => Self::Unknown(cmd),
            _ => Self::Text(line),
        }
    }
}

/// Main loop: stdin lines, connection events, and conversation events.
async fn run(client: &mut ChatClient, config: &ClientConfig) -> io::Result<()> {
    let format = config.timestamp_format.as_str();
    let mut sound = config.sound;
    let mut chat_events = client.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    for message in client.messages() {
        println!("{}", render::format_message(message, format));
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Input::parse(&line) {
                    Input::Quit => break,
                    Input::Clear => {
                        client.clear();
                        println!("-- conversation cleared --");
                    }
                    Input::Connect => {
                        if let Err(e) = client.reconnect() {
                            println!("!! {e}");
                        }
                    }
                    Input::Sound => {
                        sound = !sound;
                        println!("-- sound {} --", if sound { "on" } else { "off" });
                    }
                    Input::Unknown(cmd) => println!("!! unknown command {cmd}"),
                    Input::Text(text) => {
                        if client.submit(text).is_some() {
                            if let Some(message) = client.messages().last() {
                                println!("{}", render::format_message(message, format));
                            }
                            println!("{}", render::TYPING_INDICATOR);
                        } else if let Some(hint) = render::prompt_hint(client.connection_status()) {
                            println!("{hint}");
                        }
                    }
                }
            }
            event = client.next_event() => {
                let Some(event) = event else { break };
                if let ConnectionEvent::Inbound(_) = event {
                    if let Some(message) = client.messages().last() {
                        println!("{}", render::format_message(message, format));
                    }
                } else if let Some(notice) = render::connection_notice(&event) {
                    println!("{notice}");
                }
            }
            Ok(event) = chat_events.recv() => match event {
                ChatEvent::Delivered { .. } if sound => ring_bell(),
                ChatEvent::Failed { message_ids } => {
                    println!("!! {} message(s) not delivered", message_ids.len());
                }
                ChatEvent::HistoryWriteFailed { reason } => {
                    println!("!! could not save history: {reason}");
                }
                ChatEvent::Delivered { .. } | ChatEvent::Cleared => {}
            },
        }
    }
    Ok(())
}

fn ring_bell() {
    let mut stdout = io::stdout();
    let _ = stdout.write_all(b"\x07");
    let _ = stdout.flush();
}
