//! Simulator settings as the bridge consumes them: the simulation mode and
//! the per-vehicle camera and sensor layout.

use serde::{Deserialize, Serialize};

use crate::geometry::Vec3;
use crate::state::VehicleKind;

/// Which family of vehicles the simulator session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimMode {
    #[default]
    Multirotor,
    Car,
    SkidVehicle,
    ComputerVision,
}

impl SimMode {
    /// Skid-steer vehicles are driven through the car API.
    pub fn vehicle_kind(self) -> VehicleKind {
        match self {
            SimMode::Multirotor => VehicleKind::Multirotor,
            SimMode::Car | SimMode::SkidVehicle => VehicleKind::Car,
            SimMode::ComputerVision => VehicleKind::ComputerVision,
        }
    }
}

/// Image capture types, numbered as the simulator numbers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageType {
    Scene,
    DepthPlanar,
    DepthPerspective,
    DepthVis,
    DisparityNormalized,
    Segmentation,
    SurfaceNormals,
    Infrared,
    OpticalFlow,
    OpticalFlowVis,
    Lighting,
    Annotation,
}

impl ImageType {
    /// Depth and disparity images come back as float buffers.
    pub fn is_float(self) -> bool {
        matches!(
            self,
            ImageType::DepthPlanar
                | ImageType::DepthPerspective
                | ImageType::DepthVis
                | ImageType::DisparityNormalized
        )
    }

    /// Topic-friendly name.
    pub fn as_str(self) -> &'static str {
        match self {
            ImageType::Scene => "scene",
            ImageType::DepthPlanar => "depth_planar",
            ImageType::DepthPerspective => "depth_perspective",
            ImageType::DepthVis => "depth_vis",
            ImageType::DisparityNormalized => "disparity_normalized",
            ImageType::Segmentation => "segmentation",
            ImageType::SurfaceNormals => "surface_normals",
            ImageType::Infrared => "infrared",
            ImageType::OpticalFlow => "optical_flow",
            ImageType::OpticalFlowVis => "optical_flow_vis",
            ImageType::Lighting => "lighting",
            ImageType::Annotation => "annotation",
        }
    }
}

impl TryFrom<i32> for ImageType {
    type Error = i32;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        Ok(match v {
            0 => ImageType::Scene,
            1 => ImageType::DepthPlanar,
            2 => ImageType::DepthPerspective,
            3 => ImageType::DepthVis,
            4 => ImageType::DisparityNormalized,
            5 => ImageType::Segmentation,
            6 => ImageType::SurfaceNormals,
            7 => ImageType::Infrared,
            8 => ImageType::OpticalFlow,
            9 => ImageType::OpticalFlowVis,
            10 => ImageType::Lighting,
            11 => ImageType::Annotation,
            other => return Err(other),
        })
    }
}

/// Mount rotation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rotation {
    #[serde(default)]
    pub roll: f64,
    #[serde(default)]
    pub pitch: f64,
    #[serde(default)]
    pub yaw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSetting {
    pub image_type: ImageType,
    pub width: u32,
    pub height: u32,
    pub fov_degrees: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSetting {
    pub name: String,
    /// External cameras are parented to the world frame, not the vehicle.
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub captures: Vec<CaptureSetting>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Barometer,
    Imu,
    Gps,
    Magnetometer,
    Distance,
    Lidar,
    GpuLidar,
    Echo,
}

impl SensorKind {
    /// The state-tick form of this kind, or `None` for the sensors polled
    /// on their own timer.
    pub fn basic(self) -> Option<BasicSensorKind> {
        match self {
            SensorKind::Barometer => Some(BasicSensorKind::Barometer),
            SensorKind::Imu => Some(BasicSensorKind::Imu),
            SensorKind::Gps => Some(BasicSensorKind::Gps),
            SensorKind::Magnetometer => Some(BasicSensorKind::Magnetometer),
            SensorKind::Distance => Some(BasicSensorKind::Distance),
            SensorKind::Lidar | SensorKind::GpuLidar | SensorKind::Echo => None,
        }
    }

    /// Sensors read every state tick rather than on their own timer.
    pub fn is_basic(self) -> bool {
        self.basic().is_some()
    }
}

/// The cheap sensors read on every state tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicSensorKind {
    Barometer,
    Imu,
    Gps,
    Magnetometer,
    Distance,
}

impl From<BasicSensorKind> for SensorKind {
    fn from(kind: BasicSensorKind) -> Self {
        match kind {
            BasicSensorKind::Barometer => SensorKind::Barometer,
            BasicSensorKind::Imu => SensorKind::Imu,
            BasicSensorKind::Gps => SensorKind::Gps,
            BasicSensorKind::Magnetometer => SensorKind::Magnetometer,
            BasicSensorKind::Distance => SensorKind::Distance,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSetting {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SensorKind,
    #[serde(default)]
    pub external: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Echo only: publish active returns.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Echo only: publish passive beacon returns.
    #[serde(default)]
    pub passive: bool,
}

impl SensorSetting {
    pub fn new(name: impl Into<String>, kind: SensorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            external: false,
            enabled: true,
            active: true,
            passive: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSetting {
    pub name: String,
    /// Spawn position in the simulator frame; unset means the origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(default)]
    pub cameras: Vec<CameraSetting>,
    #[serde(default)]
    pub sensors: Vec<SensorSetting>,
}

impl VehicleSetting {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: None,
            rotation: None,
            cameras: Vec::new(),
            sensors: Vec::new(),
        }
    }

    pub fn with_sensor(mut self, sensor: SensorSetting) -> Self {
        self.sensors.push(sensor);
        self
    }

    pub fn with_camera(mut self, camera: CameraSetting) -> Self {
        self.cameras.push(camera);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skid_vehicle_drives_like_a_car() {
        assert_eq!(SimMode::SkidVehicle.vehicle_kind(), VehicleKind::Car);
        assert_eq!(SimMode::Multirotor.vehicle_kind(), VehicleKind::Multirotor);
    }

    #[test]
    fn depth_types_are_float() {
        assert!(ImageType::DepthPlanar.is_float());
        assert!(ImageType::DisparityNormalized.is_float());
        assert!(!ImageType::Scene.is_float());
        assert!(!ImageType::Segmentation.is_float());
    }

    #[test]
    fn image_type_from_simulator_index() {
        assert_eq!(ImageType::try_from(3), Ok(ImageType::DepthVis));
        assert_eq!(ImageType::try_from(11), Ok(ImageType::Annotation));
        assert_eq!(ImageType::try_from(12), Err(12));
    }

    #[test]
    fn sensor_setting_defaults() {
        let s: SensorSetting =
            serde_json::from_str(r#"{"name":"echo1","type":"echo"}"#).unwrap();
        assert_eq!(s.kind, SensorKind::Echo);
        assert!(s.enabled);
        assert!(s.active);
        assert!(!s.passive);
        assert!(!s.external);
    }

    #[test]
    fn lidar_is_not_basic() {
        assert!(SensorKind::Imu.is_basic());
        assert!(!SensorKind::GpuLidar.is_basic());
        assert_eq!(SensorKind::Gps.basic(), Some(BasicSensorKind::Gps));
        assert_eq!(SensorKind::from(BasicSensorKind::Distance), SensorKind::Distance);
        for polled in [SensorKind::Lidar, SensorKind::GpuLidar, SensorKind::Echo] {
            assert_eq!(polled.basic(), None);
        }
    }
}
