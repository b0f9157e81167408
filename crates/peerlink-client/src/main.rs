//! Interactive demo shell for the Peerlink client.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use peerlink_client::{ClientConfig, Message, P2pClient};

#[derive(Parser, Debug)]
#[command(name = "peerlink-client")]
#[command(about = "Peerlink interactive demo client")]
struct Args {
    /// Signaling server WebSocket URL
    #[arg(short, long, default_value = "ws://localhost:8080")]
    server: String,

    /// Requested peer id (empty lets the server assign one)
    #[arg(short, long, default_value = "")]
    id: String,

    /// Authenticate for relay mode right after connecting
    #[arg(long)]
    relay_password: Option<String>,
}

const HELP: &str = "\
commands:
  list                      request the online peer directory
  peers                     show peers with an open data channel
  connect <id>              negotiate a direct session with <id>
  send <id> <text>          send text over the data channel
  relay-auth <password>     authenticate for relay mode
  relay-connect <id>        establish a relay pair with <id>
  relay-send <id> <text>    send text through the relay
  info <id>                 show channel / relay state for <id>
  help                      this text
  quit                      disconnect and exit";

#[tokio::main]
async fn main() -> Result<()> {
    peerlink_common::init_tracing();

    let args = Args::parse();

    let client = P2pClient::new(ClientConfig {
        signaling_url: args.server,
        peer_id: args.id,
        ..Default::default()
    });

    client.set_on_message(|from, message| match message {
        Message::Text(text) => println!("[{}] {}", from, text),
        Message::Binary(data) => println!("[{}] <{} bytes>", from, data.len()),
    });
    client.set_on_peer_connected(|id| println!("* peer connected: {}", id));
    client.set_on_peer_disconnected(|id| println!("* peer disconnected: {}", id));
    client.set_on_peer_list(|peers| println!("* online: {:?}", peers));
    client.set_on_relay_connected(|id| println!("* relay pair with: {}", id));
    client.set_on_relay_disconnected(|id| println!("* relay pair dropped: {}", id));
    client.set_on_error(|err| eprintln!("! {}", err));

    client.connect().await?;
    println!(
        "registered as {} (type 'help' for commands)",
        client.local_id().unwrap_or_default()
    );

    if let Some(password) = &args.relay_password {
        match client.authenticate_relay(password).await {
            Ok(true) => println!("relay authenticated"),
            Ok(false) => eprintln!("relay authentication rejected"),
            Err(err) => eprintln!("relay auth failed: {}", err),
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut parts = line.trim().splitn(3, ' ');
        let command = parts.next().unwrap_or("");

        match command {
            "" => {}
            "list" => {
                let _ = client.request_peer_list();
            }
            "peers" => println!("{:?}", client.connected_peers().await),
            "connect" => match parts.next() {
                Some(id) => {
                    if let Err(err) = client.connect_to_peer(id).await {
                        eprintln!("connect failed: {}", err);
                    }
                }
                None => eprintln!("usage: connect <id>"),
            },
            "send" => match (parts.next(), parts.next()) {
                (Some(id), Some(text)) => {
                    if let Err(err) = client.send_text(id, text).await {
                        eprintln!("send failed: {}", err);
                    }
                }
                _ => eprintln!("usage: send <id> <text>"),
            },
            "relay-auth" => match parts.next() {
                Some(password) => match client.authenticate_relay(password).await {
                    Ok(true) => println!("relay authenticated"),
                    Ok(false) => println!("relay authentication rejected"),
                    Err(err) => eprintln!("relay auth failed: {}", err),
                },
                None => eprintln!("usage: relay-auth <password>"),
            },
            "relay-connect" => match parts.next() {
                Some(id) => {
                    if let Err(err) = client.connect_to_peer_via_relay(id).await {
                        eprintln!("relay connect failed: {}", err);
                    }
                }
                None => eprintln!("usage: relay-connect <id>"),
            },
            "relay-send" => match (parts.next(), parts.next()) {
                (Some(id), Some(text)) => {
                    if let Err(err) = client.send_text_via_relay(id, text).await {
                        eprintln!("relay send failed: {}", err);
                    }
                }
                _ => eprintln!("usage: relay-send <id> <text>"),
            },
            "info" => match parts.next() {
                Some(id) => match client.peer_info(id).await {
                    Some(info) => println!(
                        "{}: channel={:?} relay_mode={}",
                        info.id, info.channel_state, info.relay_mode
                    ),
                    None => println!("no session with {}", id),
                },
                None => eprintln!("usage: info <id>"),
            },
            "help" => println!("{}", HELP),
            "quit" | "exit" => break,
            other => eprintln!("unknown command: {:?} (try 'help')", other),
        }
    }

    client.disconnect().await;
    Ok(())
}
