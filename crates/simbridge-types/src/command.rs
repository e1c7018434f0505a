//! Outbound command values, already in the simulator's convention.

use serde::{Deserialize, Serialize};

use crate::geometry::Quaternion;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YawMode {
    pub is_rate: bool,
    /// Degrees, or degrees per second when `is_rate`.
    pub yaw_or_rate: f64,
}

impl Default for YawMode {
    fn default() -> Self {
        Self {
            is_rate: true,
            yaw_or_rate: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrivetrainType {
    #[default]
    MaxDegreeOfFreedom,
    ForwardOnly,
}

/// Velocity set-point for a multirotor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VelCmd {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub drivetrain: DrivetrainType,
    pub yaw_mode: YawMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CarControls {
    pub throttle: f64,
    pub steering: f64,
    pub brake: f64,
    pub handbrake: bool,
    #[serde(default)]
    pub is_manual_gear: bool,
    #[serde(default)]
    pub manual_gear: i32,
    #[serde(default)]
    pub gear_immediate: bool,
}

/// Camera orientation target.  Process-wide, not tied to a vehicle latch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GimbalCmd {
    pub vehicle_name: String,
    pub camera_name: String,
    pub target_quat: Quaternion,
}

/// Independent latch classes; one pending value per class per vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    Velocity,
    CarControls,
}

/// A per-vehicle command a producer can latch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleCommand {
    Velocity(VelCmd),
    CarControls(CarControls),
}

impl VehicleCommand {
    pub fn class(&self) -> CommandClass {
        match self {
            VehicleCommand::Velocity(_) => CommandClass::Velocity,
            VehicleCommand::CarControls(_) => CommandClass::CarControls,
        }
    }
}
