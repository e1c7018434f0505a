//! WebSocket front end for the bridge.
//!
//! [`WsBridge`] serves one endpoint.  Every connected client:
//!
//! 1. receives every bus event as a JSON text frame;
//! 2. may send requests as `{"id": 7, "request": {"op": ..., "args": ...}}`
//!    and gets back `{"id": 7, "reply": {...}}`.  `id` is optional and
//!    echoed verbatim.
//!
//! A frame that does not parse is answered with a `rejected` reply rather
//! than closing the connection.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use simbridge_types::{BridgeError, BridgeReply, BridgeRequest};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::adapter::CommandSink;
use crate::bus::EventBus;

#[derive(Debug, Deserialize)]
struct Inbound {
    #[serde(default)]
    id: Option<u64>,
    request: BridgeRequest,
}

#[derive(Debug, Serialize)]
struct Outbound<'a> {
    id: Option<u64>,
    reply: &'a BridgeReply,
}

#[derive(Clone)]
pub struct WsBridge {
    bus: Arc<EventBus>,
    sink: Arc<dyn CommandSink>,
}

impl WsBridge {
    pub fn new(bus: Arc<EventBus>, sink: Arc<dyn CommandSink>) -> Self {
        Self { bus, sink }
    }

    /// Bind `addr` and serve until `shutdown` flips to `true`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Channel`] when the listener cannot be bound.
    pub async fn run_ws_server(
        self,
        addr: SocketAddr,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), BridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Channel(format!("ws bind error on {addr}: {e}")))?;
        info!(%addr, "WebSocket bridge listening");
        self.serve(listener, shutdown).await;
        Ok(())
    }

    /// Accept loop on an already bound listener.
    pub async fn serve(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let bridge = self.clone();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = bridge.handle_ws_client(stream, peer, shutdown).await {
                                error!(peer = %peer, error = %e, "ws client error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "ws accept error"),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("WebSocket bridge stopping");
                        return;
                    }
                }
            }
        }
    }

    async fn handle_ws_client(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BridgeError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| BridgeError::Channel(format!("ws handshake from {peer}: {e}")))?;
        debug!(peer = %peer, "ws client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut rx = self.bus.subscribe();

        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            let json = serde_json::to_string(&event)
                                .map_err(|e| BridgeError::Serialization(e.to_string()))?;
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(peer = %peer, lagged_by = n, "ws client lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        Some(Ok(Message::Text(text))) => {
                            let reply = self.handle_incoming_ws_message(text.as_str()).await;
                            if ws_tx.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }

        debug!(peer = %peer, "ws client disconnected");
        Ok(())
    }

    /// Execute one inbound frame and return the serialized reply.
    async fn handle_incoming_ws_message(&self, text: &str) -> String {
        let (id, reply) = match serde_json::from_str::<Inbound>(text) {
            Ok(inbound) => (inbound.id, self.sink.handle(inbound.request).await),
            Err(e) => {
                debug!(error = %e, "unparseable ws request");
                (None, BridgeReply::rejected(format!("malformed request: {e}")))
            }
        };
        serde_json::to_string(&Outbound { id, reply: &reply }).unwrap_or_else(|e| {
            format!(r#"{{"id":null,"reply":{{"status":"rejected","reason":"{e}"}}}}"#)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use simbridge_types::EventPayload;
    use std::sync::Mutex;
    use tokio_tungstenite::connect_async;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<BridgeRequest>>,
    }

    #[async_trait]
    impl CommandSink for RecordingSink {
        async fn handle(&self, request: BridgeRequest) -> BridgeReply {
            self.seen.lock().unwrap().push(request);
            BridgeReply::Accepted
        }
    }

    fn make_bridge() -> (Arc<EventBus>, Arc<RecordingSink>, WsBridge) {
        let bus = Arc::new(EventBus::default());
        let sink = Arc::new(RecordingSink::default());
        let bridge = WsBridge::new(Arc::clone(&bus), sink.clone());
        (bus, sink, bridge)
    }

    #[tokio::test]
    async fn request_is_forwarded_and_id_echoed() -> Result<(), Box<dyn std::error::Error>> {
        let (_bus, sink, bridge) = make_bridge();
        let reply = bridge
            .handle_incoming_ws_message(r#"{"id":7,"request":{"op":"reset"}}"#)
            .await;
        let json: serde_json::Value = serde_json::from_str(&reply)?;
        assert_eq!(json["id"], 7);
        assert_eq!(json["reply"]["status"], "accepted");
        assert_eq!(sink.seen.lock().unwrap().as_slice(), &[BridgeRequest::Reset]);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_frame_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let (_bus, sink, bridge) = make_bridge();
        let reply = bridge.handle_incoming_ws_message(r#"{"op":"fly_away"}"#).await;
        let json: serde_json::Value = serde_json::from_str(&reply)?;
        assert_eq!(json["reply"]["status"], "rejected");
        assert!(json["id"].is_null());
        assert!(sink.seen.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn client_receives_events_and_replies() -> Result<(), Box<dyn std::error::Error>> {
        let (bus, _sink, bridge) = make_bridge();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let server = tokio::spawn(bridge.serve(listener, stop_rx));

        let (mut ws, _) = connect_async(format!("ws://{addr}")).await?;
        ws.send(Message::Text(r#"{"id":1,"request":{"op":"reset"}}"#.into()))
            .await?;

        let mut got_reply = false;
        let mut got_event = false;
        for _ in 0..50 {
            if !got_event {
                // Keep publishing until the client's subscription is live.
                bus.emit("simbridge::test", EventPayload::Clock { nanos: 9 });
            }
            let Ok(Some(frame)) =
                tokio::time::timeout(std::time::Duration::from_millis(100), ws.next()).await
            else {
                continue;
            };
            let Message::Text(text) = frame? else { continue };
            let json: serde_json::Value = serde_json::from_str(text.as_str())?;
            if json.get("reply").is_some() {
                got_reply = true;
            } else if json["source"] == "simbridge::test" {
                got_event = true;
            }
            if got_reply && got_event {
                break;
            }
        }
        assert!(got_reply, "no reply received");
        assert!(got_event, "no bus event received");

        stop_tx.send(true)?;
        server.await?;
        Ok(())
    }
}
