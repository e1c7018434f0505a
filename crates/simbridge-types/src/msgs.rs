//! Outbound messages in the published convention (X forward, Y left,
//! Z up).  These are what subscribers of the event bus receive.

use serde::{Deserialize, Serialize};

use crate::geometry::{Pose, Quaternion, Twist, Vec3};
use crate::state::{GeoPoint, SimTimestamp};

/// Stamp plus the frame the payload is expressed in.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Header {
    pub stamp: SimTimestamp,
    pub frame_id: String,
}

impl Header {
    pub fn new(stamp: SimTimestamp, frame_id: impl Into<String>) -> Self {
        Self {
            stamp,
            frame_id: frame_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Odometry {
    pub header: Header,
    pub child_frame_id: String,
    pub pose: Pose,
    pub twist: Twist,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransformStamped {
    pub header: Header,
    pub child_frame_id: String,
    pub translation: Vec3,
    pub rotation: Quaternion,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvironmentMsg {
    pub header: Header,
    pub position: Vec3,
    pub geo_point: GeoPoint,
    pub gravity: Vec3,
    pub air_pressure: f64,
    pub temperature: f64,
    pub air_density: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CarStateMsg {
    pub header: Header,
    pub pose: Pose,
    pub twist: Twist,
    pub speed: f64,
    pub gear: i32,
    pub rpm: f64,
    pub maxrpm: f64,
    pub handbrake: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ComputerVisionStateMsg {
    pub header: Header,
    pub pose: Pose,
    pub twist: Twist,
}

/// GNSS service bit used for every fix the simulator reports.
pub const SERVICE_GLONASS: u16 = 2;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NavSatFix {
    pub header: Header,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub status: i8,
    pub service: u16,
}

/// Bare geo point, used for the home / origin location.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GpsYaw {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl From<GeoPoint> for GpsYaw {
    fn from(p: GeoPoint) -> Self {
        Self {
            latitude: p.latitude,
            longitude: p.longitude,
            altitude: p.altitude,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Imu {
    pub header: Header,
    pub orientation: Quaternion,
    pub angular_velocity: Vec3,
    pub linear_acceleration: Vec3,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Altimeter {
    pub header: Header,
    pub altitude: f64,
    pub pressure: f64,
    pub qnh: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MagneticField {
    pub header: Header,
    pub magnetic_field: Vec3,
    pub magnetic_field_covariance: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Range {
    pub header: Header,
    pub range: f64,
    pub min_range: f64,
    pub max_range: f64,
}

/// Point cloud as named float fields, `fields.len()` floats per point.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PointCloud {
    pub header: Header,
    pub fields: Vec<String>,
    pub width: u32,
    pub data: Vec<f32>,
}

impl PointCloud {
    /// An empty cloud carrying only a header.
    pub fn empty(header: Header) -> Self {
        Self {
            header,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StringArray {
    pub header: Header,
    pub data: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Image {
    pub header: Header,
    pub width: u32,
    pub height: u32,
    pub encoding: String,
    pub step: u32,
    pub data: Vec<u8>,
}

/// Pinhole intrinsics, no distortion.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CameraInfo {
    pub header: Header,
    pub width: u32,
    pub height: u32,
    pub k: Vec<f64>,
    pub p: Vec<f64>,
    pub r: Vec<f64>,
    pub d: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstanceSegmentationLabel {
    pub name: String,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstanceSegmentationList {
    pub header: Header,
    pub labels: Vec<InstanceSegmentationLabel>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectTransformsList {
    pub header: Header,
    pub objects: Vec<TransformStamped>,
}
