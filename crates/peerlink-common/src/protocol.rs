//! Wire protocol: the tagged JSON envelope exchanged over the signaling
//! transport, plus the nested payload documents it carries.
//!
//! Every WebSocket text frame is one [`SignalEnvelope`]. All four fields
//! are strings; missing fields deserialize to empty. The `payload` field
//! is opaque at the envelope level; its interpretation depends on the
//! message type (often a nested JSON document, stringified).

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Message tags understood by both ends of the signaling transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Client registration (in: requested id, out: assigned id)
    Register,
    /// Directory request/response (out: JSON array of identifiers)
    PeerList,
    /// SDP offer, routed peer to peer via the server
    Offer,
    /// SDP answer, routed peer to peer via the server
    Answer,
    /// ICE candidate, routed peer to peer via the server
    Candidate,
    /// Legacy connect hint; not required by the core flow
    Connect,
    /// Human-readable error message
    Error,
    /// Reserved
    Chat,
    /// Relay authentication request (payload: shared secret)
    RelayAuth,
    /// Relay authentication reply
    RelayAuthResult,
    /// Relay pair establishment / notification
    RelayConnect,
    /// Relayed application payload
    RelayData,
    /// Relay pair teardown / notification
    RelayDisconnect,
}

impl MessageType {
    /// Wire tag for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Register => "register",
            MessageType::PeerList => "peer_list",
            MessageType::Offer => "offer",
            MessageType::Answer => "answer",
            MessageType::Candidate => "candidate",
            MessageType::Connect => "connect",
            MessageType::Error => "error",
            MessageType::Chat => "chat",
            MessageType::RelayAuth => "relay_auth",
            MessageType::RelayAuthResult => "relay_auth_result",
            MessageType::RelayConnect => "relay_connect",
            MessageType::RelayData => "relay_data",
            MessageType::RelayDisconnect => "relay_disconnect",
        }
    }
}

/// The outer envelope carried in each WebSocket text frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEnvelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub payload: String,
}

impl SignalEnvelope {
    /// New envelope with empty routing fields.
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            from: String::new(),
            to: String::new(),
            payload: String::new(),
        }
    }

    /// New envelope addressed to `to` with the given payload.
    pub fn to_peer(kind: MessageType, to: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind,
            from: String::new(),
            to: to.into(),
            payload: payload.into(),
        }
    }

    pub fn serialize(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::invalid_data)
    }

    pub fn deserialize(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(Error::invalid_data)
    }
}

/// Session description carried in `offer`/`answer` payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpPayload {
    /// SDP type string ("offer" or "answer")
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

/// ICE candidate carried in `candidate` payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidatePayload {
    pub candidate: String,
    #[serde(default)]
    pub mid: String,
}

/// Server reply to a `relay_auth` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayAuthResultPayload {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// Application payload carried in `relay_data` envelopes.
///
/// The signaling transport is text framed, so binary data travels as
/// standard base64 with `=` padding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayDataPayload {
    pub is_binary: bool,
    pub data: String,
}

impl RelayDataPayload {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            is_binary: false,
            data: text.into(),
        }
    }

    pub fn from_binary(data: &[u8]) -> Self {
        Self {
            is_binary: true,
            data: BASE64.encode(data),
        }
    }

    /// Decode the base64 body of a binary payload.
    pub fn decode_binary(&self) -> Result<Vec<u8>> {
        BASE64.decode(&self.data).map_err(Error::invalid_data)
    }
}

macro_rules! impl_payload_json {
    ($($ty:ty),+) => {
        $(impl $ty {
            pub fn to_json(&self) -> Result<String> {
                serde_json::to_string(self).map_err(Error::invalid_data)
            }

            pub fn from_json(text: &str) -> Result<Self> {
                serde_json::from_str(text).map_err(Error::invalid_data)
            }
        })+
    };
}

impl_payload_json!(SdpPayload, CandidatePayload, RelayAuthResultPayload, RelayDataPayload);

/// Encode a peer directory as the `peer_list` payload (JSON array).
pub fn encode_peer_list(peers: &[String]) -> Result<String> {
    serde_json::to_string(peers).map_err(Error::invalid_data)
}

/// Decode a `peer_list` payload.
pub fn decode_peer_list(payload: &str) -> Result<Vec<String>> {
    serde_json::from_str(payload).map_err(Error::invalid_data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_roundtrip() {
        let env = SignalEnvelope {
            kind: MessageType::Offer,
            from: "peer_1".into(),
            to: "bob".into(),
            payload: r#"{"type":"offer","sdp":"v=0"}"#.into(),
        };

        let text = env.serialize().unwrap();
        let back = SignalEnvelope::deserialize(&text).unwrap();
        assert_eq!(back.kind, MessageType::Offer);
        assert_eq!(back.from, "peer_1");
        assert_eq!(back.to, "bob");
        assert_eq!(back.payload, env.payload);
    }

    #[test]
    fn envelope_missing_fields_default_empty() {
        let env = SignalEnvelope::deserialize(r#"{"type":"register"}"#).unwrap();
        assert_eq!(env.kind, MessageType::Register);
        assert!(env.from.is_empty());
        assert!(env.to.is_empty());
        assert!(env.payload.is_empty());
    }

    #[test]
    fn envelope_unknown_tag_is_invalid() {
        assert!(SignalEnvelope::deserialize(r#"{"type":"bogus"}"#).is_err());
        assert!(SignalEnvelope::deserialize("not json").is_err());
    }

    #[test]
    fn tags_match_wire_names() {
        for (kind, tag) in [
            (MessageType::Register, "register"),
            (MessageType::PeerList, "peer_list"),
            (MessageType::RelayAuthResult, "relay_auth_result"),
            (MessageType::RelayDisconnect, "relay_disconnect"),
        ] {
            let env = SignalEnvelope::new(kind);
            let text = env.serialize().unwrap();
            assert!(text.contains(&format!(r#""type":"{}""#, tag)), "{}", text);
            assert_eq!(kind.as_str(), tag);
        }
    }

    #[test]
    fn sdp_payload_roundtrip() {
        let payload = SdpPayload {
            kind: "offer".into(),
            sdp: "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n".into(),
        };
        let back = SdpPayload::from_json(&payload.to_json().unwrap()).unwrap();
        assert_eq!(back.kind, "offer");
        assert_eq!(back.sdp, payload.sdp);
    }

    #[test]
    fn candidate_payload_roundtrip() {
        let payload = CandidatePayload {
            candidate: "candidate:1 1 UDP 2122252543 192.0.2.1 54321 typ host".into(),
            mid: "0".into(),
        };
        let back = CandidatePayload::from_json(&payload.to_json().unwrap()).unwrap();
        assert_eq!(back.candidate, payload.candidate);
        assert_eq!(back.mid, "0");
    }

    #[test]
    fn relay_data_text() {
        let payload = RelayDataPayload::from_text("hello");
        assert!(!payload.is_binary);
        assert_eq!(payload.data, "hello");
    }

    #[test]
    fn relay_data_binary_roundtrip() {
        let bytes = [0x00u8, 0xFF, 0x10];
        let payload = RelayDataPayload::from_binary(&bytes);
        assert!(payload.is_binary);
        assert_eq!(payload.decode_binary().unwrap(), bytes);
    }

    #[test]
    fn base64_shape_and_roundtrip() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x00],
            vec![0x00, 0xFF],
            vec![0x00, 0xFF, 0x10],
            (0u8..=255).collect(),
        ];

        for bytes in cases {
            let payload = RelayDataPayload::from_binary(&bytes);
            assert_eq!(payload.data.len() % 4, 0);
            assert!(payload
                .data
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='));
            assert_eq!(payload.decode_binary().unwrap(), bytes);
        }
    }

    #[test]
    fn peer_list_roundtrip() {
        let peers = vec!["peer_1".to_string(), "bob".to_string()];
        let payload = encode_peer_list(&peers).unwrap();
        assert_eq!(decode_peer_list(&payload).unwrap(), peers);
        assert_eq!(decode_peer_list("[]").unwrap(), Vec::<String>::new());
    }
}
