//! Client-level relay tests against an in-process signaling server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use peerlink_client::{ClientConfig, Error, P2pClient};
use peerlink_server::{router, ServerState};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server(relay_secret: Option<&str>) -> String {
    let state = Arc::new(ServerState::new(relay_secret.map(String::from)));
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

fn client(url: &str, peer_id: &str) -> P2pClient {
    P2pClient::new(ClientConfig {
        signaling_url: url.to_string(),
        peer_id: peer_id.to_string(),
        ..Default::default()
    })
}

async fn expect<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn relay_text_and_binary_roundtrip() {
    let url = start_server(Some("secret")).await;

    let a = client(&url, "");
    let b = client(&url, "bob");

    let (pair_tx, mut pair_rx) = mpsc::unbounded_channel();
    b.set_on_relay_connected(move |id| {
        let _ = pair_tx.send(id);
    });
    let (text_tx, mut text_rx) = mpsc::unbounded_channel();
    b.set_on_text_message(move |from, text| {
        let _ = text_tx.send((from, text));
    });
    let (binary_tx, mut binary_rx) = mpsc::unbounded_channel();
    b.set_on_binary_message(move |from, data| {
        let _ = binary_tx.send((from, data));
    });

    a.connect().await.expect("a connects");
    assert_eq!(a.local_id().as_deref(), Some("peer_1"));
    b.connect().await.expect("b connects");
    assert_eq!(b.local_id().as_deref(), Some("bob"));

    assert!(a.authenticate_relay("secret").await.expect("auth roundtrip"));
    assert!(a.is_relay_authenticated());

    a.connect_to_peer_via_relay("bob").await.expect("relay connect");
    assert_eq!(expect(&mut pair_rx).await, "peer_1");
    assert!(b.is_peer_relay_connected("peer_1").await);

    // The target never authenticated, yet receives relayed data.
    assert!(!b.is_relay_authenticated());

    a.send_text_via_relay("bob", "h").await.expect("relay text");
    assert_eq!(expect(&mut text_rx).await, ("peer_1".to_string(), "h".to_string()));

    let bytes = vec![0x00u8, 0xFF, 0x10];
    a.send_binary_via_relay("bob", &bytes).await.expect("relay binary");
    assert_eq!(expect(&mut binary_rx).await, ("peer_1".to_string(), bytes));

    // relay_mode is reported while no direct channel exists.
    let info = b.peer_info("peer_1").await.expect("peer info");
    assert!(info.relay_mode);
    assert!(!info.is_connected());

    a.disconnect().await;
    b.disconnect().await;
}

#[tokio::test]
async fn relay_operations_require_authentication() {
    let url = start_server(Some("secret")).await;
    let a = client(&url, "");
    a.connect().await.expect("connect");

    match a.connect_to_peer_via_relay("bob").await {
        Err(Error::RelayNotAuthenticated(_)) => {}
        other => panic!("expected RelayNotAuthenticated, got {:?}", other),
    }

    // A rejected secret leaves relay mode unavailable.
    assert!(!a.authenticate_relay("wrong").await.expect("auth roundtrip"));
    match a.send_text_via_relay("bob", "hi").await {
        Err(Error::RelayNotAuthenticated(_)) => {}
        other => panic!("expected RelayNotAuthenticated, got {:?}", other),
    }

    a.disconnect().await;
}

#[tokio::test]
async fn counterparty_drop_removes_relay_pair() {
    let url = start_server(Some("secret")).await;

    let a = client(&url, "");
    let b = client(&url, "bob");

    let (gone_tx, mut gone_rx) = mpsc::unbounded_channel();
    b.set_on_relay_disconnected(move |id| {
        let _ = gone_tx.send(id);
    });
    let (pair_tx, mut pair_rx) = mpsc::unbounded_channel();
    b.set_on_relay_connected(move |id| {
        let _ = pair_tx.send(id);
    });

    a.connect().await.expect("a connects");
    b.connect().await.expect("b connects");

    assert!(a.authenticate_relay("secret").await.expect("auth"));
    a.connect_to_peer_via_relay("bob").await.expect("relay connect");
    expect(&mut pair_rx).await;

    a.disconnect().await;

    assert_eq!(expect(&mut gone_rx).await, "peer_1");
    assert!(!b.is_peer_relay_connected("peer_1").await);

    b.disconnect().await;
}

#[tokio::test]
async fn duplicate_identifier_is_replaced_by_minted_one() {
    let url = start_server(None).await;

    let first = client(&url, "alice");
    first.connect().await.expect("first connects");
    assert_eq!(first.local_id().as_deref(), Some("alice"));

    let second = client(&url, "alice");
    second.connect().await.expect("second connects");
    let minted = second.local_id().expect("registered");
    assert_ne!(minted, "alice");
    assert!(minted.starts_with("peer_"));

    first.disconnect().await;
    second.disconnect().await;
}
