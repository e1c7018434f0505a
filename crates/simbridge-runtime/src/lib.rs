//! `simbridge-runtime` – the bridge's moving parts.
//!
//! # Modules
//!
//! - [`registry`] – [`VehicleRegistry`]: the configured fleet, and each
//!   vehicle's last known state and derived messages.
//! - [`state_sync`] – [`StateSyncLoop`]: the periodic driver.  Every tick it
//!   refreshes all vehicles, advances the sim clock, publishes state, and
//!   finishes by dispatching latched commands.
//! - [`dispatcher`] – [`CommandDispatcher`]: issues and clears the latched
//!   velocity, car-control, and gimbal commands under the control gate.
//! - [`maneuver`] – [`CoordinatedManeuver`]: raise, hold, and land a group
//!   of multirotors while holding the gate.
//! - [`sensors`] – [`SensorPoller`]: lidar, GPU lidar, echo, and camera
//!   streams, each on its own period.
//! - [`services`] – [`FleetServices`]: every inbound request; also the
//!   [`CommandSink`][simbridge_middleware::CommandSink] behind the
//!   WebSocket bridge.
//! - [`static_tf`] – mount transforms built once at startup.
//! - [`bridge`] – [`SimBridge`]: startup and task wiring.
//! - [`telemetry`] – [`init_tracing`].
//!
//! # Control gate
//!
//! One [`ControlGate`] is shared by the dispatcher, the services, and the
//! maneuver.  A tick that finds it held defers dispatch; latched commands
//! stay put until the holder lets go.

pub mod bridge;
pub mod dispatcher;
pub mod maneuver;
pub mod registry;
pub mod sensors;
pub mod services;
pub mod state_sync;
pub mod static_tf;
pub mod telemetry;

pub use bridge::{BridgeConfig, SimBridge};
pub use dispatcher::{CommandDispatcher, DispatchReport};
pub use maneuver::CoordinatedManeuver;
pub use registry::{VehicleRecord, VehicleRegistry};
pub use sensors::{PollReport, SensorPoller, SensorStream};
pub use services::{FleetServices, ServiceOutcome};
pub use state_sync::{StateSyncConfig, StateSyncLoop, TickReport};
pub use telemetry::{TracerProviderGuard, init_tracing};

pub use simbridge_kernel::ControlGate;
