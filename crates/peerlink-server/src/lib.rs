//! Peerlink signaling and relay server.
//!
//! Accepts WebSocket clients, maintains the peer registry, routes control
//! envelopes between peers, enforces relay authentication, and
//! garbage-collects relay pairs when a socket drops.

#![forbid(unsafe_code)]

pub mod auth;
pub mod console;
pub mod registry;
pub mod signal;

use std::sync::Arc;

use axum::{routing::get, Router};
use tokio::sync::Mutex;

use registry::Registry;

/// Shared server state: the registry and the relay pair set live behind a
/// single mutex so registration, forwarding lookups, and the disconnect
/// sweep observe one consistent view.
pub struct ServerState {
    pub registry: Mutex<Registry>,
    /// Shared relay secret; `None` means relay auth always fails.
    pub relay_secret: Option<String>,
}

impl ServerState {
    pub fn new(relay_secret: Option<String>) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            relay_secret,
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Build the axum router. The WebSocket endpoint is served at both `/`
/// and `/ws` so clients may use a bare `ws://host:port` URL.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(signal::ws_handler))
        .route("/ws", get(signal::ws_handler))
        .with_state(state)
}
