//! `WireChat` echo endpoint library.
//!
//! Exposes the reply server for use in tests and demos. Every text frame
//! received is answered with one text frame carrying a configurable prefix
//! followed by the original text.

pub mod config;
pub mod server;
