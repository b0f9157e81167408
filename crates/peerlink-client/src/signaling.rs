//! Signaling transport tasks: one writer draining the outbound queue,
//! one reader dispatching inbound envelopes into the manager.

use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use peerlink_common::{Error, SignalEnvelope};

use crate::client::Inner;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Serialize envelopes onto the socket until the queue closes, then send
/// a close frame. Dropping the queue sender is how the manager hangs up.
pub(crate) fn spawn_writer(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut rx: mpsc::UnboundedReceiver<SignalEnvelope>,
) {
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let text = match envelope.serialize() {
                Ok(text) => text,
                Err(err) => {
                    warn!("dropping unserializable envelope: {}", err);
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });
}

/// Dispatch inbound frames until the stream ends, then run transport
/// teardown. Malformed envelopes are reported and skipped, never fatal.
pub(crate) fn spawn_reader(inner: Arc<Inner>, mut stream: SplitStream<WsStream>) {
    tokio::spawn(async move {
        let mut error: Option<Error> = None;

        while let Some(msg) = stream.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => match SignalEnvelope::deserialize(&text) {
                    Ok(envelope) => inner.handle_signal(envelope).await,
                    Err(err) => {
                        warn!("invalid envelope from server: {}", err);
                        inner.emit_error(err);
                    }
                },
                Ok(WsMessage::Close(_)) => {
                    debug!("signaling server closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    error = Some(Error::signaling(err));
                    break;
                }
            }
        }

        inner.on_transport_closed(error).await;
    });
}
