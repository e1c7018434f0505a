//! [`RemoteVehicleClient`] – the simulator RPC façade.
//!
//! Queries return data directly.  Motion commands return a [`TaskHandle`]
//! as soon as the simulator accepted them; an `Err` from the issuing call
//! means the command never started.

use std::time::Duration;

use async_trait::async_trait;
use simbridge_types::command::{CarControls, VelCmd, YawMode};
use simbridge_types::geometry::{Pose, Quaternion};
use simbridge_types::state::{
    BarometerReading, CameraInfoReading, CarState, ComputerVisionState, DistanceReading,
    EchoReading, EnvironmentState, GpsReading, GpuLidarReading, ImageRequest, ImageResponse,
    ImuReading, LidarReading, MagnetometerReading, MultirotorState, VehicleKind, VehicleState,
};
use simbridge_types::RpcError;

use crate::task::TaskHandle;

/// Segmentation colour as reported by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[async_trait]
pub trait RemoteVehicleClient: Send + Sync {
    // ── Session ──────────────────────────────────────────────────────────

    async fn confirm_connection(&self) -> Result<(), RpcError>;

    async fn enable_api_control(&self, enable: bool, vehicle: &str) -> Result<(), RpcError>;

    async fn arm_disarm(&self, arm: bool, vehicle: &str) -> Result<bool, RpcError>;

    async fn is_paused(&self) -> Result<bool, RpcError>;

    async fn reset(&self) -> Result<(), RpcError>;

    // ── State ────────────────────────────────────────────────────────────

    async fn get_multirotor_state(&self, vehicle: &str) -> Result<MultirotorState, RpcError>;

    async fn get_car_state(&self, vehicle: &str) -> Result<CarState, RpcError>;

    async fn get_computer_vision_state(
        &self,
        vehicle: &str,
    ) -> Result<ComputerVisionState, RpcError>;

    async fn get_environment(&self, vehicle: &str) -> Result<EnvironmentState, RpcError>;

    /// Kind-dispatched state query.
    async fn get_state(&self, vehicle: &str, kind: VehicleKind) -> Result<VehicleState, RpcError> {
        Ok(match kind {
            VehicleKind::Multirotor => VehicleState::Multirotor(self.get_multirotor_state(vehicle).await?),
            VehicleKind::Car => VehicleState::Car(self.get_car_state(vehicle).await?),
            VehicleKind::ComputerVision => {
                VehicleState::ComputerVision(self.get_computer_vision_state(vehicle).await?)
            }
        })
    }

    // ── Commands ─────────────────────────────────────────────────────────

    async fn move_to_z(
        &self,
        vehicle: &str,
        z: f64,
        velocity: f64,
        timeout: Duration,
        yaw_mode: YawMode,
    ) -> Result<TaskHandle, RpcError>;

    #[allow(clippy::too_many_arguments)]
    async fn move_to_position(
        &self,
        vehicle: &str,
        x: f64,
        y: f64,
        z: f64,
        velocity: f64,
        timeout: Duration,
        yaw_mode: YawMode,
    ) -> Result<TaskHandle, RpcError>;

    async fn move_by_velocity(
        &self,
        vehicle: &str,
        cmd: &VelCmd,
        duration: Duration,
    ) -> Result<TaskHandle, RpcError>;

    async fn takeoff(&self, vehicle: &str, timeout: Duration) -> Result<TaskHandle, RpcError>;

    async fn land(&self, vehicle: &str, timeout: Duration) -> Result<TaskHandle, RpcError>;

    async fn set_car_controls(&self, vehicle: &str, controls: &CarControls) -> Result<(), RpcError>;

    async fn set_camera_pose(&self, vehicle: &str, camera: &str, pose: Pose) -> Result<(), RpcError>;

    // ── Sensors ──────────────────────────────────────────────────────────

    async fn get_imu(&self, vehicle: &str, sensor: &str) -> Result<ImuReading, RpcError>;

    async fn get_barometer(&self, vehicle: &str, sensor: &str) -> Result<BarometerReading, RpcError>;

    async fn get_magnetometer(
        &self,
        vehicle: &str,
        sensor: &str,
    ) -> Result<MagnetometerReading, RpcError>;

    async fn get_gps(&self, vehicle: &str, sensor: &str) -> Result<GpsReading, RpcError>;

    async fn get_distance(&self, vehicle: &str, sensor: &str) -> Result<DistanceReading, RpcError>;

    async fn get_lidar(&self, vehicle: &str, sensor: &str) -> Result<LidarReading, RpcError>;

    async fn get_gpu_lidar(&self, vehicle: &str, sensor: &str) -> Result<GpuLidarReading, RpcError>;

    async fn get_echo(&self, vehicle: &str, sensor: &str) -> Result<EchoReading, RpcError>;

    async fn get_images(
        &self,
        vehicle: &str,
        requests: &[ImageRequest],
    ) -> Result<Vec<ImageResponse>, RpcError>;

    async fn get_camera_info(&self, vehicle: &str, camera: &str) -> Result<CameraInfoReading, RpcError>;

    // ── Scene ────────────────────────────────────────────────────────────

    /// `(object name, tag)` pairs whose name matches `regex`.
    async fn list_scene_object_tags(&self, regex: &str) -> Result<Vec<(String, String)>, RpcError>;

    async fn list_instance_segmentation_objects(&self) -> Result<Vec<String>, RpcError>;

    /// One colour per segmentation index.
    async fn instance_segmentation_color_map(&self) -> Result<Vec<Rgb>, RpcError>;

    /// Poses in the same order as [`list_instance_segmentation_objects`].
    ///
    /// [`list_instance_segmentation_objects`]: RemoteVehicleClient::list_instance_segmentation_objects
    async fn list_instance_segmentation_poses(&self) -> Result<Vec<Pose>, RpcError>;
}

/// Camera pose for a gimbal command: orientation only.
pub fn gimbal_pose(orientation: Quaternion) -> Pose {
    Pose::new(simbridge_types::Vec3::zero(), orientation)
}
