//! `WireChat`: self-healing WebSocket chat client library.

pub mod chat;
pub mod client;
pub mod config;
pub mod connection;
pub mod render;
pub mod transport;
