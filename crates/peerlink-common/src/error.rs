//! Common error types for Peerlink.

use thiserror::Error;

/// Result type alias using Peerlink's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Peerlink operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Signaling transport failed to open or was refused
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The server returned an error or the transport produced one
    #[error("signaling error: {0}")]
    Signaling(String),

    /// Routing target unknown at the server
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// Send attempted before the data channel reached Open
    #[error("channel not open: {0}")]
    ChannelNotOpen(String),

    /// A bounded wait expired
    #[error("timeout: {0}")]
    Timeout(String),

    /// Malformed envelope or payload
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The WebRTC stack returned a failure
    #[error("internal error: {0}")]
    Internal(String),

    /// The server rejected the relay secret or is unconfigured
    #[error("relay auth failed: {0}")]
    RelayAuthFailed(String),

    /// A relay operation was attempted without authenticating
    #[error("relay not authenticated: {0}")]
    RelayNotAuthenticated(String),
}

impl Error {
    /// Create a connection-failed error from any displayable type.
    pub fn connection_failed(msg: impl std::fmt::Display) -> Self {
        Self::ConnectionFailed(msg.to_string())
    }

    /// Create a signaling error from any displayable type.
    pub fn signaling(msg: impl std::fmt::Display) -> Self {
        Self::Signaling(msg.to_string())
    }

    /// Create a peer-not-found error from any displayable type.
    pub fn peer_not_found(msg: impl std::fmt::Display) -> Self {
        Self::PeerNotFound(msg.to_string())
    }

    /// Create a channel-not-open error from any displayable type.
    pub fn channel_not_open(msg: impl std::fmt::Display) -> Self {
        Self::ChannelNotOpen(msg.to_string())
    }

    /// Create a timeout error from any displayable type.
    pub fn timeout(msg: impl std::fmt::Display) -> Self {
        Self::Timeout(msg.to_string())
    }

    /// Create an invalid-data error from any displayable type.
    pub fn invalid_data(msg: impl std::fmt::Display) -> Self {
        Self::InvalidData(msg.to_string())
    }

    /// Create an internal error from any displayable type.
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Self::Internal(msg.to_string())
    }
}
