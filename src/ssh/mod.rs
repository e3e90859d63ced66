//! SSH module - live connections and pty shells
//!
//! This module provides the core SSH functionality using the russh library.
//!
//! # Features
//! - Direct SSH connections with password or in-memory private-key auth
//! - Interactive pty shells (`xterm-256color`)
//! - Connection pool with per-connection event channels
//! - Automatic single-attempt reconnection after transport drops
//! - Idle reaping of silent connections (see `manager`)

mod client;
mod error;
pub mod manager;

pub use client::{AuthCredentials, ConnectTarget, SshClient};
pub use error::SshError;
pub use manager::{
    ConnectionEvent, ConnectionId, ConnectionManager, ConnectionStatus, EventReceiver,
};
