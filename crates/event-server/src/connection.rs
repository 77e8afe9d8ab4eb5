//! Per-listener pump: forwards bus events, pings, and watches for close.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use sureroute_protocol::Event;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::{EventServerError, PING_PERIOD};

/// Serves one listener until it disconnects or `cancel` fires.
///
/// The first frame is always `connected`.
pub(crate) async fn serve<S>(
    ws: S,
    mut events: broadcast::Receiver<Arc<str>>,
    peer_addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<(), EventServerError>
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + Unpin,
{
    let (mut sink, mut stream) = ws.split();

    let hello = serde_json::to_string(&Event::Connected { ok: true })?;
    sink.send(WsMessage::Text(hello.into())).await?;

    let mut ping_interval = tokio::time::interval(PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_interval.reset();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            event = events.recv() => match event {
                Ok(json) => {
                    if let Err(e) = sink.send(WsMessage::Text(json.to_string().into())).await {
                        tracing::debug!(%peer_addr, "listener send error: {e}");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(%peer_addr, skipped, "listener lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::debug!(%peer_addr, "listener ping error: {e}");
                    break;
                }
            }

            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = sink.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                // Listeners have nothing to say; anything else is ignored.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%peer_addr, "listener read error: {e}");
                    break;
                }
            },
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
    Ok(())
}
