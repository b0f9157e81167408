//! Peerlink client connection manager.
//!
//! Orchestrates WebRTC negotiation per remote peer over a WebSocket
//! signaling server and exposes a uniform send/receive API across direct
//! data channels and the server-side relay fallback.

#![forbid(unsafe_code)]

mod client;
mod events;
mod peer;
mod signaling;
mod types;

pub use client::P2pClient;
pub use peerlink_common::{Error, Result};
pub use types::{
    ChannelState, ClientConfig, ConnectionState, Message, PeerInfo, PeerRole, RelayState,
};
