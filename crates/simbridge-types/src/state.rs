//! Simulator-side state, in the simulator's own axis convention (X forward,
//! Y right, Z down).  Nothing in this module is converted; see
//! `simbridge-perception` for the mapping to the published convention.

use serde::{Deserialize, Serialize};

use crate::geometry::{Pose, Twist, Vec3};
use crate::settings::ImageType;

/// Simulator clock value in nanoseconds.  Monotonic within one simulator
/// session, unrelated to wall time.
pub type SimTimestamp = u64;

/// The three vehicle classes a bridge can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleKind {
    Multirotor,
    Car,
    ComputerVision,
}

impl std::fmt::Display for VehicleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VehicleKind::Multirotor => write!(f, "multirotor"),
            VehicleKind::Car => write!(f, "car"),
            VehicleKind::ComputerVision => write!(f, "computer_vision"),
        }
    }
}

/// Pose and twist as estimated by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct KinematicsState {
    pub pose: Pose,
    pub twist: Twist,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandedState {
    #[default]
    Landed,
    Flying,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MultirotorState {
    pub kinematics: KinematicsState,
    pub gps_location: GeoPoint,
    pub landed_state: LandedState,
    pub timestamp: SimTimestamp,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CarState {
    pub kinematics: KinematicsState,
    pub speed: f64,
    pub gear: i32,
    pub rpm: f64,
    pub maxrpm: f64,
    pub handbrake: bool,
    pub timestamp: SimTimestamp,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComputerVisionState {
    pub kinematics: KinematicsState,
    pub timestamp: SimTimestamp,
}

/// One polled state snapshot, tagged by vehicle class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VehicleState {
    Multirotor(MultirotorState),
    Car(CarState),
    ComputerVision(ComputerVisionState),
}

impl VehicleState {
    pub fn kind(&self) -> VehicleKind {
        match self {
            VehicleState::Multirotor(_) => VehicleKind::Multirotor,
            VehicleState::Car(_) => VehicleKind::Car,
            VehicleState::ComputerVision(_) => VehicleKind::ComputerVision,
        }
    }

    pub fn kinematics(&self) -> &KinematicsState {
        match self {
            VehicleState::Multirotor(s) => &s.kinematics,
            VehicleState::Car(s) => &s.kinematics,
            VehicleState::ComputerVision(s) => &s.kinematics,
        }
    }

    pub fn timestamp(&self) -> SimTimestamp {
        match self {
            VehicleState::Multirotor(s) => s.timestamp,
            VehicleState::Car(s) => s.timestamp,
            VehicleState::ComputerVision(s) => s.timestamp,
        }
    }
}

/// Ground-truth environment around a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvironmentState {
    pub position: Vec3,
    pub geo_point: GeoPoint,
    pub gravity: Vec3,
    pub air_pressure: f64,
    pub temperature: f64,
    pub air_density: f64,
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor readings
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ImuReading {
    pub orientation: crate::geometry::Quaternion,
    pub angular_velocity: Vec3,
    pub linear_acceleration: Vec3,
    pub timestamp: SimTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BarometerReading {
    pub altitude: f64,
    pub pressure: f64,
    pub qnh: f64,
    pub timestamp: SimTimestamp,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MagnetometerReading {
    pub magnetic_field_body: Vec3,
    /// Row-major 3×3 covariance.
    pub magnetic_field_covariance: Vec<f64>,
    pub timestamp: SimTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GpsReading {
    pub geo_point: GeoPoint,
    pub fix_type: i8,
    pub timestamp: SimTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DistanceReading {
    pub distance: f64,
    pub min_distance: f64,
    pub max_distance: f64,
    pub timestamp: SimTimestamp,
}

/// Flat `x, y, z` point cloud plus per-point ground-truth labels.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LidarReading {
    pub point_cloud: Vec<f32>,
    pub groundtruth: Vec<String>,
    pub pose: Pose,
    pub timestamp: SimTimestamp,
}

/// Flat `x, y, z, rgb, intensity` point cloud.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GpuLidarReading {
    pub point_cloud: Vec<f32>,
    pub pose: Pose,
    pub timestamp: SimTimestamp,
}

/// Active returns (`x, y, z, a, d, r`) and passive beacon returns
/// (`x, y, z, a, d, r, xd, yd, zd`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EchoReading {
    pub point_cloud: Vec<f32>,
    pub groundtruth: Vec<String>,
    pub passive_beacons_point_cloud: Vec<f32>,
    pub passive_beacons_groundtruth: Vec<String>,
    pub pose: Pose,
    pub timestamp: SimTimestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub camera_name: String,
    pub image_type: ImageType,
    pub pixels_as_float: bool,
    pub compress: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImageResponse {
    pub camera_name: String,
    pub width: u32,
    pub height: u32,
    pub pixels_as_float: bool,
    pub image_data_uint8: Vec<u8>,
    pub image_data_float: Vec<f32>,
    pub timestamp: SimTimestamp,
}

/// Camera mount pose and field of view as reported by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraInfoReading {
    pub pose: Pose,
    pub fov_degrees: f64,
}
