//! Interactive operator console on stdin.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::debug;

use crate::SharedState;

const HELP: &str = "\
commands:
  list   registered peers (* = relay authenticated)
  relay  active relay pairs
  help   this text
  quit   shut the server down (also: exit)";

/// Read commands from stdin until `quit` or EOF. Sends on `shutdown`
/// to stop the accept loop.
pub async fn run(state: SharedState, shutdown: watch::Sender<bool>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        match line.trim() {
            "" => {}
            "list" => {
                let reg = state.registry.lock().await;
                let mut sessions = reg.sessions_snapshot();
                drop(reg);
                sessions.sort_by(|a, b| a.0.cmp(&b.0));

                println!("{} peer(s) registered", sessions.len());
                for (id, authed, _) in sessions {
                    println!("  {}{}", id, if authed { " *" } else { "" });
                }
            }
            "relay" => {
                let reg = state.registry.lock().await;
                let pairs = reg.pairs_snapshot();
                drop(reg);

                println!("{} relay pair(s)", pairs.len());
                for (a, b) in pairs {
                    println!("  {} <-> {}", a, b);
                }
            }
            "help" => println!("{}", HELP),
            "quit" | "exit" => {
                let _ = shutdown.send(true);
                break;
            }
            other => println!("unknown command: {:?} (try 'help')", other),
        }
    }

    debug!("console closed");
}
