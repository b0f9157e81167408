//! Shared infrastructure for Peerlink: wire protocol, error types, ICE config.
//!
//! Both the signaling server and the client connection manager speak the
//! envelope protocol defined in [`protocol`].

#![forbid(unsafe_code)]

pub mod error;
pub mod ice;
pub mod protocol;

pub use error::{Error, Result};
pub use protocol::*;

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
