//! Shellgate - a multi-tenant SSH web terminal gateway
//!
//! Authenticated users open a WebSocket stream, drive interactive SSH
//! shells through it, and manage their stored connection profiles over a
//! small HTTP API.

// Use mimalloc as the global allocator for better performance
// with high-frequency small allocations (terminal chunks, WebSocket frames)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod assistant;
pub mod auth;
pub mod broker;
pub mod config;
pub mod error;
pub mod server;
pub mod ssh;
pub mod store;
pub mod vault;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
