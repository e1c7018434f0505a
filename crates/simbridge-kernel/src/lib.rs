//! `simbridge-kernel` – command serialization and vehicle freshness.
//!
//! # Modules
//!
//! - [`latch`] – [`CommandLatch`][latch::CommandLatch]: last-write-wins slot
//!   per vehicle and command class, plus one process-wide gimbal slot.
//! - [`control_gate`] – [`ControlGate`][control_gate::ControlGate]: the one
//!   mutex every command path takes.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: flags vehicles whose
//!   state stopped refreshing.

pub mod control_gate;
pub mod latch;
pub mod watchdog;

pub use control_gate::{ControlGate, ControlGuard};
pub use latch::{CommandLatch, PendingCommands};
pub use watchdog::Watchdog;
