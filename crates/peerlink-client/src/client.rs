//! The connection manager: WebRTC negotiation orchestration per peer and
//! dual-mode (direct + relayed) send/receive coordination.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use peerlink_common::{
    decode_peer_list, CandidatePayload, Error, MessageType, RelayAuthResultPayload,
    RelayDataPayload, Result, SdpPayload, SignalEnvelope,
};

use crate::events::{self, Callbacks};
use crate::peer::{self, PeerSession, DATA_CHANNEL_LABEL};
use crate::signaling;
use crate::types::{
    ChannelState, ClientConfig, ConnectionState, Message, PeerInfo, PeerRole, RelayState,
};

/// Peer directory and relay set; they share one mutex so dual-mode
/// lookups observe a consistent view.
#[derive(Default)]
struct PeerDirectory {
    sessions: HashMap<String, PeerSession>,
    relay_peers: HashSet<String>,
}

pub(crate) struct Inner {
    config: ClientConfig,
    peers: Mutex<PeerDirectory>,
    conn_state: watch::Sender<ConnectionState>,
    relay_state: watch::Sender<RelayState>,
    registered: watch::Sender<Option<String>>,
    out_tx: StdMutex<Option<mpsc::UnboundedSender<SignalEnvelope>>>,
    callbacks: Callbacks,
}

/// P2P communication client.
///
/// Registers at a signaling server, negotiates WebRTC data channels with
/// remote peers, and falls back to password-gated server-side relaying
/// when direct connectivity is unavailable.
///
/// ```no_run
/// # async fn demo() -> peerlink_common::Result<()> {
/// use peerlink_client::{ClientConfig, P2pClient};
///
/// let client = P2pClient::new(ClientConfig {
///     signaling_url: "ws://server:8080".into(),
///     ..Default::default()
/// });
///
/// client.set_on_text_message(|from, text| {
///     println!("{}: {}", from, text);
/// });
///
/// client.connect().await?;
/// client.connect_to_peer("other_peer").await?;
/// # Ok(())
/// # }
/// ```
pub struct P2pClient {
    inner: Arc<Inner>,
}

impl P2pClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                peers: Mutex::new(PeerDirectory::default()),
                conn_state: watch::channel(ConnectionState::Disconnected).0,
                relay_state: watch::channel(RelayState::NotAuthenticated).0,
                registered: watch::channel(None).0,
                out_tx: StdMutex::new(None),
                callbacks: Callbacks::default(),
            }),
        }
    }

    pub fn with_url(signaling_url: impl Into<String>) -> Self {
        Self::new(ClientConfig {
            signaling_url: signaling_url.into(),
            ..Default::default()
        })
    }

    // ==================== connection management ====================

    /// Open the signaling transport, register, and wait for the assigned
    /// identifier. Bounded by `config.connection_timeout`.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.state() == ConnectionState::Connected {
            return Ok(());
        }

        inner.set_state(ConnectionState::Connecting);
        inner.registered.send_replace(None);
        inner.relay_state.send_replace(RelayState::NotAuthenticated);

        let connect = connect_async(&inner.config.signaling_url);
        let ws = match tokio::time::timeout(inner.config.connection_timeout, connect).await {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(err)) => {
                inner.set_state(ConnectionState::Failed);
                return Err(inner.report(Error::connection_failed(err)));
            }
            Err(_) => {
                inner.set_state(ConnectionState::Failed);
                return Err(inner.report(Error::timeout("signaling connection timed out")));
            }
        };

        let (sink, stream) = ws.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        if let Ok(mut guard) = inner.out_tx.lock() {
            *guard = Some(out_tx);
        }
        signaling::spawn_writer(sink, out_rx);
        signaling::spawn_reader(inner.clone(), stream);

        info!("connected to signaling server {}", inner.config.signaling_url);
        inner.set_state(ConnectionState::Connected);
        inner.emit_connected();

        let mut register = SignalEnvelope::new(MessageType::Register);
        register.payload = inner.config.peer_id.clone();
        inner.send_signal(register)?;

        let mut rx = inner.registered.subscribe();
        let assigned =
            tokio::time::timeout(inner.config.connection_timeout, async move {
                loop {
                    if let Some(id) = rx.borrow_and_update().clone() {
                        return Some(id);
                    }
                    if rx.changed().await.is_err() {
                        return None;
                    }
                }
            })
            .await;

        match assigned {
            Ok(Some(_)) => Ok(()),
            _ => {
                inner.set_state(ConnectionState::Failed);
                Err(inner.report(Error::timeout("registration timed out")))
            }
        }
    }

    /// Tear down every peer session, clear the relay set, and close the
    /// signaling transport. Idempotent and safe to call from any task.
    pub async fn disconnect(&self) {
        let inner = &self.inner;
        inner.set_state(ConnectionState::Disconnected);
        inner.teardown_all_peers().await;
        inner.relay_state.send_replace(RelayState::NotAuthenticated);
        inner.registered.send_replace(None);
        if let Ok(mut guard) = inner.out_tx.lock() {
            // Dropping the sender closes the writer, which hangs up.
            guard.take();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// The identifier assigned by the server, once registered.
    pub fn local_id(&self) -> Option<String> {
        self.inner.registered.borrow().clone()
    }

    // ==================== peer management ====================

    /// Start negotiating a direct session with `peer_id` as initiator.
    ///
    /// Returns as soon as the offer is on the wire; completion is
    /// signaled by the `on_peer_connected` callback when the data channel
    /// opens.
    pub async fn connect_to_peer(&self, peer_id: &str) -> Result<()> {
        let inner = &self.inner;
        if !self.is_connected() {
            return Err(inner.report(Error::connection_failed(
                "not connected to signaling server",
            )));
        }

        info!("initiating connection to {}", peer_id);
        let pc = peer::new_peer_connection(&inner.config).await?;
        inner.install_pc_handlers(peer_id, &pc);

        // The channel must exist before the local description so the
        // offer carries the SCTP application section.
        let channel = pc
            .create_data_channel(DATA_CHANNEL_LABEL, None)
            .await
            .map_err(Error::internal)?;

        {
            let mut dir = inner.peers.lock().await;
            let mut session = PeerSession::new(PeerRole::Initiator, pc.clone());
            session.channel = Some(channel.clone());
            if let Some(previous) = dir.sessions.insert(peer_id.to_string(), session) {
                tokio::spawn(async move { previous.close().await });
            }
        }
        inner.install_channel_handlers(peer_id, &channel);

        let offer = pc.create_offer(None).await.map_err(Error::internal)?;
        let sdp = offer.sdp.clone();
        pc.set_local_description(offer)
            .await
            .map_err(Error::internal)?;

        let payload = SdpPayload {
            kind: "offer".into(),
            sdp,
        }
        .to_json()?;
        inner.send_signal(SignalEnvelope::to_peer(MessageType::Offer, peer_id, payload))
    }

    /// [`connect_to_peer`](Self::connect_to_peer), then wait until the
    /// data channel opens or `timeout` expires. On expiry the background
    /// negotiation is left to finish on its own and its result ignored.
    pub async fn connect_to_peer_and_wait(&self, peer_id: &str, timeout: Duration) -> Result<()> {
        self.connect_to_peer(peer_id).await?;

        let wait = async {
            while !self.is_peer_connected(peer_id).await {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(()) => Ok(()),
            Err(_) => Err(self.inner.report(Error::timeout(format!(
                "peer connection to {} timed out",
                peer_id
            )))),
        }
    }

    /// Close the data channel and peer connection for `peer_id` and drop
    /// the session.
    pub async fn disconnect_from_peer(&self, peer_id: &str) {
        self.inner.teardown_peer(peer_id).await;
    }

    /// Ask the server for the current peer directory; the reply arrives
    /// through `on_peer_list`.
    pub fn request_peer_list(&self) -> Result<()> {
        self.inner
            .send_signal(SignalEnvelope::new(MessageType::PeerList))
    }

    /// Peers with an open data channel.
    pub async fn connected_peers(&self) -> Vec<String> {
        let dir = self.inner.peers.lock().await;
        let mut ids: Vec<String> = dir
            .sessions
            .iter()
            .filter(|(_, s)| s.channel_state == ChannelState::Open)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn is_peer_connected(&self, peer_id: &str) -> bool {
        let dir = self.inner.peers.lock().await;
        dir.sessions
            .get(peer_id)
            .map(|s| s.channel_state == ChannelState::Open)
            .unwrap_or(false)
    }

    pub async fn peer_info(&self, peer_id: &str) -> Option<PeerInfo> {
        let dir = self.inner.peers.lock().await;
        let relay_paired = dir.relay_peers.contains(peer_id);
        match dir.sessions.get(peer_id) {
            Some(session) => Some(session.info(peer_id, relay_paired)),
            None if relay_paired => Some(PeerInfo {
                id: peer_id.to_string(),
                channel_state: ChannelState::Closed,
                relay_mode: true,
            }),
            None => None,
        }
    }

    // ==================== direct messaging ====================

    /// Send text over the peer's data channel. Fails with
    /// `ChannelNotOpen` unless the channel is open.
    pub async fn send_text(&self, peer_id: &str, text: &str) -> Result<()> {
        let channel = self.inner.open_channel(peer_id).await?;
        channel
            .send_text(text.to_string())
            .await
            .map_err(|err| self.inner.report(Error::internal(err)))?;
        Ok(())
    }

    /// Send bytes over the peer's data channel.
    pub async fn send_binary(&self, peer_id: &str, data: &[u8]) -> Result<()> {
        let channel = self.inner.open_channel(peer_id).await?;
        channel
            .send(&Bytes::copy_from_slice(data))
            .await
            .map_err(|err| self.inner.report(Error::internal(err)))?;
        Ok(())
    }

    pub async fn send(&self, peer_id: &str, message: &Message) -> Result<()> {
        match message {
            Message::Text(text) => self.send_text(peer_id, text).await,
            Message::Binary(data) => self.send_binary(peer_id, data).await,
        }
    }

    /// Send text to every peer with an open channel; returns how many
    /// sends succeeded.
    pub async fn broadcast_text(&self, text: &str) -> usize {
        let channels = self.inner.open_channels().await;
        let mut sent = 0;
        for (_, channel) in channels {
            if channel.send_text(text.to_string()).await.is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Send bytes to every peer with an open channel; returns how many
    /// sends succeeded.
    pub async fn broadcast_binary(&self, data: &[u8]) -> usize {
        let channels = self.inner.open_channels().await;
        let payload = Bytes::copy_from_slice(data);
        let mut sent = 0;
        for (_, channel) in channels {
            if channel.send(&payload).await.is_ok() {
                sent += 1;
            }
        }
        sent
    }

    // ==================== relay mode ====================

    /// Authenticate against the server's relay gate. Returns whether the
    /// secret was accepted; the wait is bounded by
    /// `config.relay_auth_timeout`.
    pub async fn authenticate_relay(&self, secret: &str) -> Result<bool> {
        let inner = &self.inner;
        if !self.is_connected() {
            return Err(inner.report(Error::connection_failed(
                "not connected to signaling server",
            )));
        }

        inner.relay_state.send_replace(RelayState::Authenticating);

        let mut auth = SignalEnvelope::new(MessageType::RelayAuth);
        auth.payload = secret.to_string();
        inner.send_signal(auth)?;

        let mut rx = inner.relay_state.subscribe();
        let outcome = tokio::time::timeout(inner.config.relay_auth_timeout, async move {
            loop {
                let state = *rx.borrow_and_update();
                if state != RelayState::Authenticating {
                    return state;
                }
                if rx.changed().await.is_err() {
                    return RelayState::AuthFailed;
                }
            }
        })
        .await;

        match outcome {
            Ok(state) => Ok(state == RelayState::Authenticated),
            Err(_) => {
                inner.relay_state.send_replace(RelayState::AuthFailed);
                Err(inner.report(Error::timeout("relay authentication timed out")))
            }
        }
    }

    pub fn relay_state(&self) -> RelayState {
        *self.inner.relay_state.borrow()
    }

    pub fn is_relay_authenticated(&self) -> bool {
        self.relay_state() == RelayState::Authenticated
    }

    /// Establish a relay pair with `peer_id`. Requires prior
    /// authentication; the pair is inserted optimistically on this side.
    pub async fn connect_to_peer_via_relay(&self, peer_id: &str) -> Result<()> {
        let inner = &self.inner;
        inner.require_relay_auth()?;

        inner.send_signal(SignalEnvelope::to_peer(
            MessageType::RelayConnect,
            peer_id,
            "",
        ))?;

        {
            let mut dir = inner.peers.lock().await;
            dir.relay_peers.insert(peer_id.to_string());
        }
        inner.emit_relay_connected(peer_id.to_string());
        Ok(())
    }

    /// Drop the relay pair with `peer_id` and notify the server.
    pub async fn disconnect_from_peer_via_relay(&self, peer_id: &str) {
        let inner = &self.inner;
        let _ = inner.send_signal(SignalEnvelope::to_peer(
            MessageType::RelayDisconnect,
            peer_id,
            "",
        ));

        let removed = {
            let mut dir = inner.peers.lock().await;
            dir.relay_peers.remove(peer_id)
        };
        if removed {
            inner.emit_relay_disconnected(peer_id.to_string());
        }
    }

    /// Send text through the server-side relay. Requires authentication.
    pub async fn send_text_via_relay(&self, peer_id: &str, text: &str) -> Result<()> {
        self.inner.require_relay_auth()?;
        let payload = RelayDataPayload::from_text(text).to_json()?;
        self.inner
            .send_signal(SignalEnvelope::to_peer(MessageType::RelayData, peer_id, payload))
    }

    /// Send bytes through the server-side relay, base64-framed for the
    /// text transport. Requires authentication.
    pub async fn send_binary_via_relay(&self, peer_id: &str, data: &[u8]) -> Result<()> {
        self.inner.require_relay_auth()?;
        let payload = RelayDataPayload::from_binary(data).to_json()?;
        self.inner
            .send_signal(SignalEnvelope::to_peer(MessageType::RelayData, peer_id, payload))
    }

    pub async fn send_via_relay(&self, peer_id: &str, message: &Message) -> Result<()> {
        match message {
            Message::Text(text) => self.send_text_via_relay(peer_id, text).await,
            Message::Binary(data) => self.send_binary_via_relay(peer_id, data).await,
        }
    }

    /// Relay-send text to every relay-paired peer; returns how many
    /// sends were queued.
    pub async fn broadcast_text_via_relay(&self, text: &str) -> usize {
        let peers = self.relay_connected_peers().await;
        let mut sent = 0;
        for peer_id in peers {
            if self.send_text_via_relay(&peer_id, text).await.is_ok() {
                sent += 1;
            }
        }
        sent
    }

    /// Relay-send bytes to every relay-paired peer; returns how many
    /// sends were queued.
    pub async fn broadcast_binary_via_relay(&self, data: &[u8]) -> usize {
        let peers = self.relay_connected_peers().await;
        let mut sent = 0;
        for peer_id in peers {
            if self.send_binary_via_relay(&peer_id, data).await.is_ok() {
                sent += 1;
            }
        }
        sent
    }

    pub async fn relay_connected_peers(&self) -> Vec<String> {
        let dir = self.inner.peers.lock().await;
        let mut ids: Vec<String> = dir.relay_peers.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_peer_relay_connected(&self, peer_id: &str) -> bool {
        self.inner.peers.lock().await.relay_peers.contains(peer_id)
    }

    // ==================== callbacks ====================

    pub fn set_on_connected(&self, f: impl Fn() + Send + Sync + 'static) {
        events::store(&self.inner.callbacks.on_connected, Arc::new(f));
    }

    pub fn set_on_disconnected(&self, f: impl Fn(Option<Error>) + Send + Sync + 'static) {
        events::store(&self.inner.callbacks.on_disconnected, Arc::new(f));
    }

    pub fn set_on_peer_connected(&self, f: impl Fn(String) + Send + Sync + 'static) {
        events::store(&self.inner.callbacks.on_peer_connected, Arc::new(f));
    }

    pub fn set_on_peer_disconnected(&self, f: impl Fn(String) + Send + Sync + 'static) {
        events::store(&self.inner.callbacks.on_peer_disconnected, Arc::new(f));
    }

    pub fn set_on_text_message(&self, f: impl Fn(String, String) + Send + Sync + 'static) {
        events::store(&self.inner.callbacks.on_text_message, Arc::new(f));
    }

    pub fn set_on_binary_message(&self, f: impl Fn(String, Vec<u8>) + Send + Sync + 'static) {
        events::store(&self.inner.callbacks.on_binary_message, Arc::new(f));
    }

    pub fn set_on_message(&self, f: impl Fn(String, Message) + Send + Sync + 'static) {
        events::store(&self.inner.callbacks.on_message, Arc::new(f));
    }

    pub fn set_on_peer_list(&self, f: impl Fn(Vec<String>) + Send + Sync + 'static) {
        events::store(&self.inner.callbacks.on_peer_list, Arc::new(f));
    }

    pub fn set_on_error(&self, f: impl Fn(Error) + Send + Sync + 'static) {
        events::store(&self.inner.callbacks.on_error, Arc::new(f));
    }

    pub fn set_on_state_change(&self, f: impl Fn(ConnectionState) + Send + Sync + 'static) {
        events::store(&self.inner.callbacks.on_state_change, Arc::new(f));
    }

    pub fn set_on_relay_auth_result(&self, f: impl Fn(bool, String) + Send + Sync + 'static) {
        events::store(&self.inner.callbacks.on_relay_auth_result, Arc::new(f));
    }

    pub fn set_on_relay_connected(&self, f: impl Fn(String) + Send + Sync + 'static) {
        events::store(&self.inner.callbacks.on_relay_connected, Arc::new(f));
    }

    pub fn set_on_relay_disconnected(&self, f: impl Fn(String) + Send + Sync + 'static) {
        events::store(&self.inner.callbacks.on_relay_disconnected, Arc::new(f));
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        *self.conn_state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = self.conn_state.send_if_modified(|current| {
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });
        if changed {
            self.emit_state_change(next);
        }
    }

    /// Queue an envelope for the writer task.
    fn send_signal(&self, envelope: SignalEnvelope) -> Result<()> {
        let guard = self
            .out_tx
            .lock()
            .map_err(|_| Error::internal("signaling queue poisoned"))?;
        match guard.as_ref() {
            Some(tx) => tx
                .send(envelope)
                .map_err(|_| Error::connection_failed("signaling transport closed")),
            None => Err(Error::connection_failed(
                "not connected to signaling server",
            )),
        }
    }

    fn require_relay_auth(&self) -> Result<()> {
        if *self.relay_state.borrow() == RelayState::Authenticated {
            Ok(())
        } else {
            Err(self.report(Error::RelayNotAuthenticated(
                "relay authentication required".into(),
            )))
        }
    }

    /// Report an error through the callback and hand it back to the
    /// caller.
    fn report(&self, err: Error) -> Error {
        self.emit_error(err.clone());
        err
    }

    // ==================== inbound signaling ====================

    pub(crate) async fn handle_signal(self: &Arc<Self>, envelope: SignalEnvelope) {
        match envelope.kind {
            MessageType::Register => {
                info!("registered as {}", envelope.payload);
                self.registered.send_replace(Some(envelope.payload));
                // Refresh the directory right away, like a freshly
                // joined peer would.
                let _ = self.send_signal(SignalEnvelope::new(MessageType::PeerList));
            }
            MessageType::PeerList => match decode_peer_list(&envelope.payload) {
                Ok(peers) => self.emit_peer_list(peers),
                Err(err) => self.emit_error(err),
            },
            MessageType::Offer => {
                if let Err(err) = self.handle_offer(&envelope.from, &envelope.payload).await {
                    self.emit_error(err);
                }
            }
            MessageType::Answer => {
                if let Err(err) = self.handle_answer(&envelope.from, &envelope.payload).await {
                    self.emit_error(err);
                }
            }
            MessageType::Candidate => {
                if let Err(err) = self
                    .handle_candidate(&envelope.from, &envelope.payload)
                    .await
                {
                    self.emit_error(err);
                }
            }
            MessageType::Connect => {
                debug!("connect hint from {}", envelope.from);
            }
            MessageType::Error => {
                let err = if envelope.payload.starts_with("Peer not found") {
                    Error::PeerNotFound(envelope.payload)
                } else {
                    Error::Signaling(envelope.payload)
                };
                self.emit_error(err);
            }
            MessageType::RelayAuthResult => match RelayAuthResultPayload::from_json(&envelope.payload) {
                Ok(result) => {
                    let next = if result.success {
                        RelayState::Authenticated
                    } else {
                        RelayState::AuthFailed
                    };
                    self.relay_state.send_replace(next);
                    self.emit_relay_auth_result(result.success, result.message);
                }
                Err(err) => self.emit_error(err),
            },
            MessageType::RelayConnect => {
                let from = envelope.from;
                {
                    let mut dir = self.peers.lock().await;
                    dir.relay_peers.insert(from.clone());
                }
                info!("relay pair established with {}", from);
                self.emit_relay_connected(from);
            }
            MessageType::RelayData => self.handle_relay_data(envelope),
            MessageType::RelayDisconnect => {
                let from = envelope.from;
                let removed = {
                    let mut dir = self.peers.lock().await;
                    dir.relay_peers.remove(&from)
                };
                if removed {
                    info!("relay pair removed with {}", from);
                    self.emit_relay_disconnected(from);
                }
            }
            MessageType::Chat | MessageType::RelayAuth => {
                debug!("ignoring {} envelope", envelope.kind.as_str());
            }
        }
    }

    /// Responder path: build a session, apply the remote offer, answer.
    async fn handle_offer(self: &Arc<Self>, from: &str, payload: &str) -> Result<()> {
        let sdp = SdpPayload::from_json(payload)?;
        debug!("received offer from {}", from);

        let pc = peer::new_peer_connection(&self.config).await?;
        // Handlers (on_data_channel in particular) must be in place
        // before the remote description is applied.
        self.install_pc_handlers(from, &pc);

        {
            let mut dir = self.peers.lock().await;
            if let Some(previous) = dir
                .sessions
                .insert(from.to_string(), PeerSession::new(PeerRole::Responder, pc.clone()))
            {
                tokio::spawn(async move { previous.close().await });
            }
        }

        let offer = RTCSessionDescription::offer(sdp.sdp).map_err(Error::internal)?;
        pc.set_remote_description(offer)
            .await
            .map_err(Error::internal)?;

        let answer = pc.create_answer(None).await.map_err(Error::internal)?;
        let sdp = answer.sdp.clone();
        pc.set_local_description(answer)
            .await
            .map_err(Error::internal)?;

        let payload = SdpPayload {
            kind: "answer".into(),
            sdp,
        }
        .to_json()?;
        self.send_signal(SignalEnvelope::to_peer(MessageType::Answer, from, payload))
    }

    /// Apply a remote answer; silently ignored without a matching session.
    async fn handle_answer(self: &Arc<Self>, from: &str, payload: &str) -> Result<()> {
        let sdp = SdpPayload::from_json(payload)?;
        let pc = {
            let dir = self.peers.lock().await;
            dir.sessions.get(from).map(|s| s.pc.clone())
        };
        let Some(pc) = pc else {
            debug!("answer from {} without a session, ignoring", from);
            return Ok(());
        };

        let answer = RTCSessionDescription::answer(sdp.sdp).map_err(Error::internal)?;
        pc.set_remote_description(answer)
            .await
            .map_err(Error::internal)
    }

    /// Apply a remote ICE candidate; silently ignored without a matching
    /// session.
    async fn handle_candidate(self: &Arc<Self>, from: &str, payload: &str) -> Result<()> {
        let candidate = CandidatePayload::from_json(payload)?;
        let pc = {
            let dir = self.peers.lock().await;
            dir.sessions.get(from).map(|s| s.pc.clone())
        };
        let Some(pc) = pc else {
            debug!("candidate from {} without a session, ignoring", from);
            return Ok(());
        };

        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: Some(candidate.mid),
            sdp_mline_index: None,
            username_fragment: None,
        };
        pc.add_ice_candidate(init).await.map_err(Error::internal)
    }

    /// Relayed application data dispatches to the same callbacks as
    /// direct data-channel traffic.
    fn handle_relay_data(self: &Arc<Self>, envelope: SignalEnvelope) {
        let payload = match RelayDataPayload::from_json(&envelope.payload) {
            Ok(payload) => payload,
            Err(err) => {
                self.emit_error(err);
                return;
            }
        };

        if payload.is_binary {
            match payload.decode_binary() {
                Ok(data) => self.dispatch_binary(envelope.from, data),
                Err(err) => self.emit_error(err),
            }
        } else {
            self.dispatch_text(envelope.from, payload.data);
        }
    }

    // ==================== webrtc wiring ====================

    fn install_pc_handlers(self: &Arc<Self>, peer_id: &str, pc: &Arc<RTCPeerConnection>) {
        // Weak references only: the peer connection lives in the peer
        // directory, and its handlers must not keep the manager alive.
        let weak = Arc::downgrade(self);
        let id = peer_id.to_string();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let weak = weak.clone();
            let id = id.clone();
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else { return };
                let Some(candidate) = candidate else { return };
                let Ok(init) = candidate.to_json() else { return };

                let payload = CandidatePayload {
                    candidate: init.candidate,
                    mid: init.sdp_mid.unwrap_or_default(),
                };
                if let Ok(payload) = payload.to_json() {
                    let _ = inner.send_signal(SignalEnvelope::to_peer(
                        MessageType::Candidate,
                        id.clone(),
                        payload,
                    ));
                }
            })
        }));

        let weak = Arc::downgrade(self);
        let id = peer_id.to_string();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let weak = weak.clone();
            let id = id.clone();
            Box::pin(async move {
                debug!("peer {} connection state: {}", id, state);
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) {
                    if let Some(inner) = weak.upgrade() {
                        inner.teardown_peer(&id).await;
                    }
                }
            })
        }));

        let weak = Arc::downgrade(self);
        let id = peer_id.to_string();
        pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let weak = weak.clone();
            let id = id.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.adopt_data_channel(&id, channel).await;
                }
            })
        }));
    }

    /// Store the remote-created channel on the responder's session and
    /// wire its handlers.
    async fn adopt_data_channel(self: &Arc<Self>, peer_id: &str, channel: Arc<RTCDataChannel>) {
        debug!("data channel '{}' announced by {}", channel.label(), peer_id);
        {
            let mut dir = self.peers.lock().await;
            let Some(session) = dir.sessions.get_mut(peer_id) else {
                warn!("data channel from unknown peer {}", peer_id);
                return;
            };
            session.channel = Some(channel.clone());
            session.channel_state = ChannelState::Connecting;
        }
        self.install_channel_handlers(peer_id, &channel);
    }

    fn install_channel_handlers(self: &Arc<Self>, peer_id: &str, channel: &Arc<RTCDataChannel>) {
        let weak = Arc::downgrade(self);
        let id = peer_id.to_string();
        channel.on_open(Box::new(move || {
            let weak = weak.clone();
            let id = id.clone();
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else { return };
                info!("data channel open with {}", id);
                {
                    let mut dir = inner.peers.lock().await;
                    if let Some(session) = dir.sessions.get_mut(&id) {
                        session.channel_state = ChannelState::Open;
                    }
                }
                inner.emit_peer_connected(id.clone());
            })
        }));

        let weak = Arc::downgrade(self);
        let id = peer_id.to_string();
        channel.on_close(Box::new(move || {
            let weak = weak.clone();
            let id = id.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    info!("data channel closed with {}", id);
                    inner.teardown_peer(&id).await;
                }
            })
        }));

        let weak = Arc::downgrade(self);
        let id = peer_id.to_string();
        channel.on_error(Box::new(move |err| {
            let weak = weak.clone();
            let id = id.clone();
            Box::pin(async move {
                if let Some(inner) = weak.upgrade() {
                    inner.emit_error(Error::internal(format!(
                        "data channel error with {}: {}",
                        id, err
                    )));
                }
            })
        }));

        let weak = Arc::downgrade(self);
        let id = peer_id.to_string();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let weak = weak.clone();
            let id = id.clone();
            Box::pin(async move {
                let Some(inner) = weak.upgrade() else { return };
                if msg.is_string {
                    let text = String::from_utf8_lossy(&msg.data).into_owned();
                    inner.dispatch_text(id.clone(), text);
                } else {
                    inner.dispatch_binary(id.clone(), msg.data.to_vec());
                }
            })
        }));
    }

    // ==================== teardown ====================

    /// Remove and close one session. The map removal makes the
    /// `on_peer_disconnected` event fire at most once no matter how many
    /// stack callbacks race here.
    pub(crate) async fn teardown_peer(self: &Arc<Self>, peer_id: &str) {
        let removed = {
            let mut dir = self.peers.lock().await;
            dir.sessions.remove(peer_id)
        };
        let Some(session) = removed else { return };

        debug!("closing {:?} session with {}", session.role, peer_id);
        session.close().await;
        self.emit_peer_disconnected(peer_id.to_string());
    }

    /// Close every session without firing per-peer events; used by full
    /// teardown where `on_disconnected` covers the whole client.
    async fn teardown_all_peers(&self) {
        let sessions: Vec<PeerSession> = {
            let mut dir = self.peers.lock().await;
            dir.relay_peers.clear();
            dir.sessions.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.close().await;
        }
    }

    /// Called by the reader task when the signaling stream ends.
    pub(crate) async fn on_transport_closed(self: &Arc<Self>, error: Option<Error>) {
        if self.state() == ConnectionState::Disconnected {
            // Local disconnect already tore everything down.
            return;
        }

        warn!("signaling transport closed");
        if let Some(err) = error.clone() {
            self.set_state(ConnectionState::Failed);
            self.emit_error(err);
        } else {
            self.set_state(ConnectionState::Disconnected);
        }

        self.teardown_all_peers().await;
        self.relay_state.send_replace(RelayState::NotAuthenticated);
        self.registered.send_replace(None);
        if let Ok(mut guard) = self.out_tx.lock() {
            guard.take();
        }
        self.emit_disconnected(error);
    }

    // ==================== lookups for send paths ====================

    /// Clone the open channel handle out of the directory lock.
    async fn open_channel(&self, peer_id: &str) -> Result<Arc<RTCDataChannel>> {
        let dir = self.peers.lock().await;
        let channel = dir.sessions.get(peer_id).and_then(|s| s.open_channel());
        drop(dir);

        channel.ok_or_else(|| {
            self.report(Error::channel_not_open(format!(
                "channel not open to {}",
                peer_id
            )))
        })
    }

    /// Snapshot of all open channels for broadcasts.
    async fn open_channels(&self) -> Vec<(String, Arc<RTCDataChannel>)> {
        let dir = self.peers.lock().await;
        dir.sessions
            .iter()
            .filter_map(|(id, s)| s.open_channel().map(|c| (id.clone(), c)))
            .collect()
    }

    // ==================== event emitters ====================

    fn dispatch_text(&self, from: String, text: String) {
        if let Some(cb) = events::load(&self.callbacks.on_text_message) {
            cb(from.clone(), text.clone());
        }
        if let Some(cb) = events::load(&self.callbacks.on_message) {
            cb(from, Message::Text(text));
        }
    }

    fn dispatch_binary(&self, from: String, data: Vec<u8>) {
        if let Some(cb) = events::load(&self.callbacks.on_binary_message) {
            cb(from.clone(), data.clone());
        }
        if let Some(cb) = events::load(&self.callbacks.on_message) {
            cb(from, Message::Binary(data));
        }
    }

    fn emit_connected(&self) {
        if let Some(cb) = events::load(&self.callbacks.on_connected) {
            cb();
        }
    }

    fn emit_disconnected(&self, reason: Option<Error>) {
        if let Some(cb) = events::load(&self.callbacks.on_disconnected) {
            cb(reason);
        }
    }

    fn emit_peer_connected(&self, id: String) {
        if let Some(cb) = events::load(&self.callbacks.on_peer_connected) {
            cb(id);
        }
    }

    fn emit_peer_disconnected(&self, id: String) {
        if let Some(cb) = events::load(&self.callbacks.on_peer_disconnected) {
            cb(id);
        }
    }

    fn emit_peer_list(&self, peers: Vec<String>) {
        if let Some(cb) = events::load(&self.callbacks.on_peer_list) {
            cb(peers);
        }
    }

    pub(crate) fn emit_error(&self, err: Error) {
        if let Some(cb) = events::load(&self.callbacks.on_error) {
            cb(err);
        }
    }

    fn emit_state_change(&self, state: ConnectionState) {
        if let Some(cb) = events::load(&self.callbacks.on_state_change) {
            cb(state);
        }
    }

    fn emit_relay_auth_result(&self, success: bool, message: String) {
        if let Some(cb) = events::load(&self.callbacks.on_relay_auth_result) {
            cb(success, message);
        }
    }

    fn emit_relay_connected(&self, id: String) {
        if let Some(cb) = events::load(&self.callbacks.on_relay_connected) {
            cb(id);
        }
    }

    fn emit_relay_disconnected(&self, id: String) {
        if let Some(cb) = events::load(&self.callbacks.on_relay_disconnected) {
            cb(id);
        }
    }
}
