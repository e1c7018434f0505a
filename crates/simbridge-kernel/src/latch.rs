//! [`CommandLatch`] – last-write-wins command mailbox.
//!
//! Each vehicle has one slot per [`CommandClass`]; a write replaces whatever
//! was there.  Gimbal commands share a single process-wide slot.  Consumers
//! read and clear in one step with [`CommandLatch::take`].

use std::collections::HashMap;

use simbridge_types::command::{CarControls, CommandClass, GimbalCmd, VehicleCommand, VelCmd};

/// Unconsumed commands for one vehicle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingCommands {
    pub velocity: Option<VelCmd>,
    pub car_controls: Option<CarControls>,
}

impl PendingCommands {
    pub fn is_empty(&self) -> bool {
        self.velocity.is_none() && self.car_controls.is_none()
    }

    fn has(&self, class: CommandClass) -> bool {
        match class {
            CommandClass::Velocity => self.velocity.is_some(),
            CommandClass::CarControls => self.car_controls.is_some(),
        }
    }
}

#[derive(Debug, Default)]
pub struct CommandLatch {
    vehicles: HashMap<String, PendingCommands>,
    gimbal: Option<GimbalCmd>,
}

impl CommandLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latch `command` for `vehicle`, replacing any unconsumed command of the
    /// same class.  Other classes are untouched.
    pub fn set_pending(&mut self, vehicle: &str, command: VehicleCommand) {
        tracing::trace!(vehicle, class = ?command.class(), "command latched");
        let slot = self.vehicles.entry(vehicle.to_string()).or_default();
        match command {
            VehicleCommand::Velocity(cmd) => slot.velocity = Some(cmd),
            VehicleCommand::CarControls(controls) => slot.car_controls = Some(controls),
        }
    }

    pub fn has_pending(&self, vehicle: &str, class: CommandClass) -> bool {
        self.vehicles.get(vehicle).is_some_and(|p| p.has(class))
    }

    /// Read and clear every class for `vehicle`.
    pub fn take(&mut self, vehicle: &str) -> PendingCommands {
        self.vehicles
            .get_mut(vehicle)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    /// Peek without clearing.
    #[cfg(test)]
    fn peek(&self, vehicle: &str) -> Option<&PendingCommands> {
        self.vehicles.get(vehicle).filter(|p| !p.is_empty())
    }

    pub fn set_gimbal(&mut self, cmd: GimbalCmd) {
        self.gimbal = Some(cmd);
    }

    pub fn has_gimbal(&self) -> bool {
        self.gimbal.is_some()
    }

    pub fn take_gimbal(&mut self) -> Option<GimbalCmd> {
        self.gimbal.take()
    }
}
