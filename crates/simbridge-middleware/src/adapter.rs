//! The command seam between transports and the bridge.
//!
//! Transports (the WebSocket server, tests, an embedding application) never
//! touch latches or the simulator client.  They hand a [`BridgeRequest`] to
//! a [`CommandSink`] and relay the [`BridgeReply`].

use async_trait::async_trait;
use simbridge_types::{BridgeReply, BridgeRequest};

/// Implemented by whatever executes requests, normally the runtime's
/// fleet services.
///
/// Errors are part of the reply: a sink never fails the transport.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn handle(&self, request: BridgeRequest) -> BridgeReply;
}
