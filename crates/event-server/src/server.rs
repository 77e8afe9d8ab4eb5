//! Event WebSocket server.
//!
//! Listens on a TCP port and upgrades every connection to a WebSocket
//! listener fed from the shared [`EventBus`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::{EventServerError, MAX_MESSAGE_SIZE, connection};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: ([0, 0, 0, 0], 0).into(),
        }
    }
}

/// WebSocket server fanning out bus events to every connected listener.
pub struct EventServer {
    addr: SocketAddr,
    bus: EventBus,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    listeners: AtomicUsize,
}

impl EventServer {
    /// Creates a server. `cancel` stops it and every listener.
    pub fn new(config: ServerConfig, bus: EventBus, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            addr: config.addr,
            bus,
            cancel,
            local_addr: Mutex::new(None),
            listeners: AtomicUsize::new(0),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Number of connected listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Binds and accepts listeners until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), EventServerError> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("event server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("event server shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::warn!(%peer_addr, "listener error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), EventServerError> {
        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(MAX_MESSAGE_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;

        // Subscribe before `connected` goes out so nothing published after
        // the greeting is missed.
        let events = self.bus.subscribe();
        let count = self.listeners.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(%peer_addr, listeners = count, "event listener connected");

        let result = connection::serve(ws_stream, events, peer_addr, self.cancel.child_token()).await;

        let count = self.listeners.fetch_sub(1, Ordering::Relaxed) - 1;
        tracing::info!(%peer_addr, listeners = count, "event listener disconnected");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures_util::StreamExt;
    use sureroute_protocol::{Event, Priority, TransferUpdateEvent};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    async fn start(bus: EventBus) -> (Arc<EventServer>, tokio::task::JoinHandle<()>, String) {
        let config = ServerConfig {
            addr: ([127, 0, 0, 1], 0).into(),
        };
        let server = EventServer::new(config, bus, CancellationToken::new());
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        // Wait for the server to bind.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let port = server.port().await;
        assert!(port > 0, "should have bound to a dynamic port");
        (server, handle, format!("ws://127.0.0.1:{port}"))
    }

    async fn next_json<S>(ws: &mut S) -> serde_json::Value
    where
        S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for frame")
                .expect("stream ended")
                .unwrap();
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn greets_new_listener() {
        let (server, handle, url) = start(EventBus::new()).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let hello = next_json(&mut ws).await;
        assert_eq!(hello, serde_json::json!({"type": "connected", "ok": true}));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(server.listener_count(), 1);

        drop(ws);
        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn fans_out_to_all_listeners() {
        let bus = EventBus::new();
        let (server, handle, url) = start(bus.clone()).await;

        let (mut a, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let (mut b, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        next_json(&mut a).await;
        next_json(&mut b).await;

        bus.publish(&Event::TransferUpdate(TransferUpdateEvent {
            transfer_id: "t1".into(),
            progress: 0.5,
            speed: 2048,
            eta_secs: Some(3),
            priority: Priority::Low,
            transport: "wifi".into(),
        }));

        for ws in [&mut a, &mut b] {
            let v = next_json(ws).await;
            assert_eq!(v["type"], "transfer:update");
            assert_eq!(v["transfer_id"], "t1");
            assert_eq!(v["progress"], 0.5);
        }

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn listener_count_drops_on_disconnect() {
        let (server, handle, url) = start(EventBus::new()).await;

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        next_json(&mut ws).await;
        ws.close(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(server.listener_count(), 0);

        server.shutdown();
        handle.await.unwrap();
    }
}
