//! `simbridge-hal` – the seam between the bridge and the simulator.
//!
//! # Modules
//!
//! - [`client`] – [`RemoteVehicleClient`][client::RemoteVehicleClient]: the
//!   RPC façade every loop and service talks to.
//! - [`task`] – [`TaskHandle`][task::TaskHandle]: an in-flight command with
//!   non-blocking poll, unbounded wait and wait-with-deadline.
//! - [`sim`] – [`SimClient`][sim::SimClient]: an in-process fleet used by the
//!   tests and by the `simbridge` binary when no simulator is attached.

pub mod client;
pub mod sim;
pub mod task;

pub use client::{RemoteVehicleClient, Rgb};
pub use sim::{SimClient, SimOp};
pub use task::TaskHandle;
