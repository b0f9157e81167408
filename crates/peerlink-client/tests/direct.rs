//! Direct data-channel roundtrip over loopback: full WebRTC negotiation
//! through an in-process signaling server, host candidates only.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use peerlink_client::{ClientConfig, P2pClient};
use peerlink_server::{router, ServerState};

async fn start_server() -> String {
    let state = Arc::new(ServerState::new(None));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    format!("ws://{}", addr)
}

/// Loopback negotiation needs no STUN; skipping it keeps the test off
/// the network.
fn local_client(url: &str, peer_id: &str) -> P2pClient {
    P2pClient::new(ClientConfig {
        signaling_url: url.to_string(),
        peer_id: peer_id.to_string(),
        stun_servers: Vec::new(),
        ..Default::default()
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn direct_text_roundtrip() {
    let url = start_server().await;

    let a = local_client(&url, "");
    let b = local_client(&url, "bob");

    let (text_tx, mut text_rx) = mpsc::unbounded_channel();
    b.set_on_text_message(move |from, text| {
        let _ = text_tx.send((from, text));
    });
    let (open_tx, mut open_rx) = mpsc::unbounded_channel();
    b.set_on_peer_connected(move |id| {
        let _ = open_tx.send(id);
    });

    a.connect().await.expect("a connects");
    assert_eq!(a.local_id().as_deref(), Some("peer_1"));
    b.connect().await.expect("b connects");

    a.connect_to_peer_and_wait("bob", Duration::from_secs(30))
        .await
        .expect("negotiation completes");
    assert!(a.is_peer_connected("bob").await);

    // The responder sees the session under the initiator's identifier.
    let opened = tokio::time::timeout(Duration::from_secs(30), open_rx.recv())
        .await
        .expect("peer connected event")
        .expect("event channel open");
    assert_eq!(opened, "peer_1");

    a.send_text("bob", "hi").await.expect("send over channel");
    let (from, text) = tokio::time::timeout(Duration::from_secs(10), text_rx.recv())
        .await
        .expect("text event")
        .expect("event channel open");
    assert_eq!(from, "peer_1");
    assert_eq!(text, "hi");

    // Once the direct channel is open, the peer is not in relay mode.
    let info = a.peer_info("bob").await.expect("peer info");
    assert!(info.is_connected());
    assert!(!info.relay_mode);

    a.disconnect().await;
    b.disconnect().await;
}

#[tokio::test]
async fn send_before_negotiation_fails_cleanly() {
    let url = start_server().await;

    let a = local_client(&url, "");
    a.connect().await.expect("connect");

    // No session at all.
    assert!(a.send_text("bob", "hi").await.is_err());
    assert!(a.peer_info("bob").await.is_none());
    assert_eq!(a.broadcast_text("hi").await, 0);

    a.disconnect().await;
}
