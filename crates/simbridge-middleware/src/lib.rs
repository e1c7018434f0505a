//! `simbridge-middleware` – fan-out and transport.
//!
//! Routes converted state to subscribers and carries requests in, without
//! caring what either means.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe event bus on Tokio broadcast
//!   channels.  This is the bridge's publisher.
//! - [`adapter`] – [`CommandSink`][adapter::CommandSink]: where transports
//!   hand inbound requests.
//! - [`ws_bridge`] – WebSocket server streaming bus events as JSON and
//!   accepting JSON requests.

pub mod adapter;
pub mod bus;
pub mod ws_bridge;

pub use adapter::CommandSink;
pub use bus::{EventBus, Topic};
pub use ws_bridge::WsBridge;
