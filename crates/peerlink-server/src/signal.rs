//! WebSocket session handling: registration, envelope routing, relay
//! gating, and the disconnect sweep.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use futures_util::{stream::StreamExt, SinkExt};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use peerlink_common::{encode_peer_list, MessageType, RelayAuthResultPayload, SignalEnvelope};

use crate::{auth, SharedState};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(stream: WebSocket, state: SharedState, addr: SocketAddr) {
    info!("client connecting from {}", addr);
    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    // Writer task: drains the session's outbound queue into the socket.
    // Send failures on a closing socket are best-effort and non-fatal.
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut client_id: Option<String> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        let Message::Text(text) = msg else { continue };

        let envelope = match SignalEnvelope::deserialize(&text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("invalid envelope from {}: {}", addr, err);
                continue;
            }
        };

        handle_envelope(&state, &tx, &mut client_id, envelope).await;
    }

    if let Some(id) = client_id {
        cleanup_disconnected(&state, &id).await;
    } else {
        debug!("unregistered client from {} disconnected", addr);
    }
}

async fn handle_envelope(
    state: &SharedState,
    tx: &mpsc::UnboundedSender<Message>,
    client_id: &mut Option<String>,
    envelope: SignalEnvelope,
) {
    match envelope.kind {
        MessageType::Register => handle_register(state, tx, client_id, &envelope.payload).await,
        MessageType::PeerList => {
            let reg = state.registry.lock().await;
            let ids = reg.peer_ids_excluding(client_id.as_deref().unwrap_or(""));
            drop(reg);
            if let Ok(payload) = encode_peer_list(&ids) {
                let mut reply = SignalEnvelope::new(MessageType::PeerList);
                reply.payload = payload;
                send_envelope(tx, &reply);
            }
        }
        MessageType::Offer | MessageType::Answer | MessageType::Candidate => {
            forward(state, tx, client_id.as_deref(), envelope).await;
        }
        MessageType::Connect => {
            // Legacy hint: relayed to the target so it can prepare for an
            // incoming session, but not required by the core flow.
            let mut hint = envelope;
            hint.payload = "connect_request".into();
            forward(state, tx, client_id.as_deref(), hint).await;
        }
        MessageType::RelayAuth => handle_relay_auth(state, tx, client_id.as_deref(), &envelope.payload).await,
        MessageType::RelayConnect => handle_relay_connect(state, tx, client_id.as_deref(), &envelope.to).await,
        MessageType::RelayData => handle_relay_data(state, tx, client_id.as_deref(), envelope).await,
        MessageType::RelayDisconnect => {
            handle_relay_disconnect(state, client_id.as_deref(), &envelope.to).await;
        }
        MessageType::Error | MessageType::RelayAuthResult | MessageType::Chat => {
            debug!("ignoring {} envelope from client", envelope.kind.as_str());
        }
    }
}

async fn handle_register(
    state: &SharedState,
    tx: &mpsc::UnboundedSender<Message>,
    client_id: &mut Option<String>,
    requested: &str,
) {
    let mut reg = state.registry.lock().await;

    // A second register on the same socket replaces the attribution.
    // Relay pairs referencing the old identifier are intentionally left
    // in place; see DESIGN.md.
    if let Some(old) = client_id.take() {
        warn!("socket re-registered, replacing identifier {}", old);
        reg.remove_session(&old);
    }

    let assigned = reg.assign_id(requested, tx.clone());
    drop(reg);

    info!("client registered: {}", assigned);
    *client_id = Some(assigned.clone());

    let mut reply = SignalEnvelope::new(MessageType::Register);
    reply.payload = assigned;
    send_envelope(tx, &reply);

    broadcast_peer_lists(state).await;
}

/// Route an envelope to `envelope.to`, stamping `from` with the sender's
/// attributed identifier so origin cannot be spoofed. Unknown targets
/// yield an error back to the sender and never alter server state.
async fn forward(
    state: &SharedState,
    tx: &mpsc::UnboundedSender<Message>,
    sender_id: Option<&str>,
    mut envelope: SignalEnvelope,
) {
    envelope.from = sender_id.unwrap_or("").to_string();

    let reg = state.registry.lock().await;
    let target_tx = reg.sender_of(&envelope.to);
    drop(reg);

    match target_tx {
        Some(target_tx) => {
            debug!(
                "forwarding {} from {} to {}",
                envelope.kind.as_str(),
                envelope.from,
                envelope.to
            );
            send_envelope(&target_tx, &envelope);
        }
        None => {
            send_error(tx, format!("Peer not found: {}", envelope.to));
        }
    }
}

async fn handle_relay_auth(
    state: &SharedState,
    tx: &mpsc::UnboundedSender<Message>,
    sender_id: Option<&str>,
    secret: &str,
) {
    let (success, message) = match (&state.relay_secret, sender_id) {
        (_, None) => (false, "Not registered".to_string()),
        (None, _) => (false, "Relay password not configured".to_string()),
        (Some(expected), Some(id)) => {
            if auth::constant_time_eq(expected.as_bytes(), secret.as_bytes()) {
                let mut reg = state.registry.lock().await;
                reg.set_relay_authenticated(id);
                drop(reg);
                info!("relay authentication succeeded for {}", id);
                (true, "Authenticated".to_string())
            } else {
                warn!("relay authentication failed for {}", id);
                (false, "Invalid relay password".to_string())
            }
        }
    };

    let payload = RelayAuthResultPayload { success, message };
    if let Ok(payload) = payload.to_json() {
        let mut reply = SignalEnvelope::new(MessageType::RelayAuthResult);
        reply.payload = payload;
        send_envelope(tx, &reply);
    }
}

async fn handle_relay_connect(
    state: &SharedState,
    tx: &mpsc::UnboundedSender<Message>,
    sender_id: Option<&str>,
    target: &str,
) {
    let Some(sender_id) = sender_id else {
        send_error(tx, "Not registered");
        return;
    };

    let mut reg = state.registry.lock().await;
    if !reg.is_relay_authenticated(sender_id) {
        drop(reg);
        send_error(tx, "Relay not authenticated");
        return;
    }
    let Some(target_tx) = reg.sender_of(target) else {
        drop(reg);
        send_error(tx, format!("Peer not found: {}", target));
        return;
    };
    reg.insert_pair(sender_id, target);
    drop(reg);

    info!("relay pair established: {} <-> {}", sender_id, target);

    let mut notify = SignalEnvelope::to_peer(MessageType::RelayConnect, target, "");
    notify.from = sender_id.to_string();
    send_envelope(&target_tx, &notify);
}

/// Relay data is forwarded iff the pair exists. The sender's auth flag is
/// not re-checked here: once an authenticated party establishes the pair,
/// the other end may reply without holding the secret.
async fn handle_relay_data(
    state: &SharedState,
    tx: &mpsc::UnboundedSender<Message>,
    sender_id: Option<&str>,
    mut envelope: SignalEnvelope,
) {
    let Some(sender_id) = sender_id else {
        send_error(tx, "Not registered");
        return;
    };

    let reg = state.registry.lock().await;
    if !reg.has_pair(sender_id, &envelope.to) {
        drop(reg);
        send_error(tx, format!("No relay connection with {}", envelope.to));
        return;
    }
    let target_tx = reg.sender_of(&envelope.to);
    drop(reg);

    match target_tx {
        Some(target_tx) => {
            envelope.from = sender_id.to_string();
            send_envelope(&target_tx, &envelope);
        }
        None => {
            send_error(tx, format!("Peer not found: {}", envelope.to));
        }
    }
}

async fn handle_relay_disconnect(state: &SharedState, sender_id: Option<&str>, target: &str) {
    let Some(sender_id) = sender_id else { return };

    let mut reg = state.registry.lock().await;
    let removed = reg.remove_pair(sender_id, target);
    let target_tx = reg.sender_of(target);
    drop(reg);

    if !removed {
        return;
    }
    info!("relay pair removed: {} <-> {}", sender_id, target);

    if let Some(target_tx) = target_tx {
        let mut notify = SignalEnvelope::to_peer(MessageType::RelayDisconnect, target, "");
        notify.from = sender_id.to_string();
        send_envelope(&target_tx, &notify);
    }
}

/// Janitor for a closed socket: erase the session and every relay pair
/// containing it in one critical section, then tell each counterparty.
async fn cleanup_disconnected(state: &SharedState, id: &str) {
    let notify = {
        let mut reg = state.registry.lock().await;
        reg.sweep_disconnected(id)
    };

    for (other, other_tx) in notify {
        let mut envelope = SignalEnvelope::to_peer(MessageType::RelayDisconnect, other, "");
        envelope.from = id.to_string();
        send_envelope(&other_tx, &envelope);
    }

    info!("client disconnected: {}", id);
    broadcast_peer_lists(state).await;
}

/// Push a fresh caller-excluded directory to every connected client.
async fn broadcast_peer_lists(state: &SharedState) {
    let reg = state.registry.lock().await;
    let sessions = reg.sessions_snapshot();
    let lists: Vec<(mpsc::UnboundedSender<Message>, Vec<String>)> = sessions
        .iter()
        .map(|(id, _, tx)| (tx.clone(), reg.peer_ids_excluding(id)))
        .collect();
    drop(reg);

    for (tx, ids) in lists {
        if let Ok(payload) = encode_peer_list(&ids) {
            let mut envelope = SignalEnvelope::new(MessageType::PeerList);
            envelope.payload = payload;
            send_envelope(&tx, &envelope);
        }
    }
}

fn send_envelope(tx: &mpsc::UnboundedSender<Message>, envelope: &SignalEnvelope) {
    if let Ok(text) = envelope.serialize() {
        let _ = tx.send(Message::Text(text));
    }
}

fn send_error(tx: &mpsc::UnboundedSender<Message>, message: impl Into<String>) {
    let mut envelope = SignalEnvelope::new(MessageType::Error);
    envelope.payload = message.into();
    send_envelope(tx, &envelope);
}
