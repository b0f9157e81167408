//! Per-peer WebRTC session state and peer-connection construction.

use std::sync::Arc;

use tracing::warn;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;

use peerlink_common::ice::parse_turn_url;
use peerlink_common::{Error, Result};

use crate::types::{ChannelState, ClientConfig, PeerInfo, PeerRole};

/// Label of the pre-created data channel; creating it before the local
/// description forces SCTP negotiation into the offer.
pub(crate) const DATA_CHANNEL_LABEL: &str = "p2p-channel";

/// One negotiation session with a remote peer.
pub(crate) struct PeerSession {
    pub role: PeerRole,
    pub pc: Arc<RTCPeerConnection>,
    /// The responder side has no channel until `on_data_channel` fires.
    pub channel: Option<Arc<RTCDataChannel>>,
    pub channel_state: ChannelState,
}

impl PeerSession {
    pub fn new(role: PeerRole, pc: Arc<RTCPeerConnection>) -> Self {
        Self {
            role,
            pc,
            channel: None,
            channel_state: ChannelState::Connecting,
        }
    }

    pub fn open_channel(&self) -> Option<Arc<RTCDataChannel>> {
        if self.channel_state == ChannelState::Open {
            self.channel.clone()
        } else {
            None
        }
    }

    pub fn info(&self, id: &str, relay_paired: bool) -> PeerInfo {
        PeerInfo {
            id: id.to_string(),
            channel_state: self.channel_state,
            relay_mode: relay_paired && self.channel_state != ChannelState::Open,
        }
    }

    /// Close the channel (if any) and the peer connection. Errors from
    /// an already-closed stack are ignored.
    pub async fn close(&self) {
        if let Some(channel) = &self.channel {
            let _ = channel.close().await;
        }
        let _ = self.pc.close().await;
    }
}

/// Build a peer connection from the configured STUN/TURN servers.
pub(crate) async fn new_peer_connection(config: &ClientConfig) -> Result<Arc<RTCPeerConnection>> {
    let mut media = MediaEngine::default();
    media.register_default_codecs().map_err(Error::internal)?;

    let registry = register_default_interceptors(Registry::new(), &mut media)
        .map_err(Error::internal)?;

    let api = APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .build();

    let pc = api
        .new_peer_connection(rtc_configuration(config))
        .await
        .map_err(Error::internal)?;

    Ok(Arc::new(pc))
}

fn rtc_configuration(config: &ClientConfig) -> RTCConfiguration {
    let mut ice_servers: Vec<RTCIceServer> = config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .collect();

    for turn in &config.turn_servers {
        if parse_turn_url(&turn.url).is_none() {
            warn!("skipping malformed TURN url: {}", turn.url);
            continue;
        }
        ice_servers.push(RTCIceServer {
            urls: vec![turn.url.clone()],
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        });
    }

    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_common::ice::TurnServer;

    #[test]
    fn rtc_configuration_includes_stun_and_valid_turn() {
        let mut config = ClientConfig::default();
        config.turn_servers = vec![
            TurnServer {
                url: "turn:turn.example.com:3478".into(),
                username: "user".into(),
                credential: "pass".into(),
            },
            TurnServer {
                url: "not-a-turn-url".into(),
                username: String::new(),
                credential: String::new(),
            },
        ];

        let rtc = rtc_configuration(&config);
        // two STUN defaults plus the one well-formed TURN entry
        assert_eq!(rtc.ice_servers.len(), 3);
        assert_eq!(rtc.ice_servers[2].username, "user");
    }
}
