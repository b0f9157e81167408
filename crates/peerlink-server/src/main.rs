#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use peerlink_server::{auth, console, router, ServerState};

#[derive(Parser, Debug)]
#[command(name = "peerlink-server")]
#[command(about = "Peerlink signaling and relay server")]
struct Args {
    /// WebSocket listen port
    #[arg(default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    peerlink_common::init_tracing();

    let args = Args::parse();

    let relay_secret = auth::load_relay_secret();
    if relay_secret.is_none() {
        warn!(
            "{} not set; relay authentication will reject every client",
            auth::RELAY_PASSWORD_ENV
        );
    }

    let state = Arc::new(ServerState::new(relay_secret));

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(console::run(state.clone(), shutdown_tx));

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr).await?;
    info!("signaling server listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        // Only an explicit quit completes this future; a detached stdin
        // closing the console keeps the server serving.
        loop {
            if shutdown_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
            if *shutdown_rx.borrow() {
                break;
            }
        }
        info!("shutting down");
    })
    .await?;

    Ok(())
}
