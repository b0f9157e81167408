//! Public state, configuration, and message types for the connection
//! manager.

use std::fmt;
use std::time::Duration;

use peerlink_common::ice::{default_stun_servers, TurnServer};

/// State of the signaling transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// State of a peer's data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Relay authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    NotAuthenticated,
    Authenticating,
    Authenticated,
    AuthFailed,
}

/// Which side of the negotiation this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Initiator,
    Responder,
}

/// An application message, text or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

/// A peer as seen by the connection manager.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: String,
    pub channel_state: ChannelState,
    /// True only when a relay pair exists and no direct channel is open.
    pub relay_mode: bool,
}

impl PeerInfo {
    pub fn is_connected(&self) -> bool {
        self.channel_state == ChannelState::Open
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Signaling server WebSocket URL
    pub signaling_url: String,
    /// Requested peer id; empty lets the server mint one
    pub peer_id: String,
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
    /// Bound on transport open + registration
    pub connection_timeout: Duration,
    /// Bound used by [`connect_to_peer_and_wait`](crate::P2pClient::connect_to_peer_and_wait)
    pub peer_connect_timeout: Duration,
    /// Bound on the relay authentication round trip
    pub relay_auth_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".to_string(),
            peer_id: String::new(),
            stun_servers: default_stun_servers(),
            turn_servers: Vec::new(),
            connection_timeout: Duration::from_secs(10),
            peer_connect_timeout: Duration::from_secs(30),
            relay_auth_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.signaling_url, "ws://localhost:8080");
        assert!(config.peer_id.is_empty());
        assert_eq!(config.stun_servers.len(), 2);
        assert!(config.turn_servers.is_empty());
        assert_eq!(config.connection_timeout, Duration::from_secs(10));
    }

    #[test]
    fn peer_info_connected_only_when_open() {
        let mut info = PeerInfo {
            id: "bob".into(),
            channel_state: ChannelState::Connecting,
            relay_mode: false,
        };
        assert!(!info.is_connected());
        info.channel_state = ChannelState::Open;
        assert!(info.is_connected());
    }

    #[test]
    fn connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Failed.to_string(), "failed");
    }
}
