//! In-process simulated fleet for CI and headless runs.
//!
//! [`SimClient`] implements [`RemoteVehicleClient`] against a small
//! kinematic world held in memory.  Commands take effect the moment they
//! are issued; the returned handle resolves immediately, or after a fixed
//! latency when one is configured.  Faults can be scripted per vehicle and
//! per operation, and every command is recorded so tests can assert on what
//! was sent.
//!
//! # Example
//!
//! ```rust
//! use simbridge_hal::sim::{SimClient, SimOp};
//!
//! let sim = SimClient::builder()
//!     .with_multirotor("drone_1")
//!     .with_multirotor("drone_2")
//!     .build();
//!
//! sim.fail_issue("drone_2", SimOp::MoveToZ);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use simbridge_types::command::{CarControls, VelCmd, YawMode};
use simbridge_types::geometry::{Pose, Quaternion, Twist, Vec3};
use simbridge_types::settings::{ImageType, SensorKind, SimMode, VehicleSetting};
use simbridge_types::state::{
    BarometerReading, CameraInfoReading, CarState, ComputerVisionState, DistanceReading,
    EchoReading, EnvironmentState, GeoPoint, GpsReading, GpuLidarReading, ImageRequest,
    ImageResponse, ImuReading, KinematicsState, LandedState, LidarReading, MagnetometerReading,
    MultirotorState, VehicleKind,
};
use simbridge_types::RpcError;
use tracing::debug;

use crate::client::{RemoteVehicleClient, Rgb};
use crate::task::{TaskCompleter, TaskHandle};

/// Simulated time that passes per state query.
const TICK_NS: u64 = 10_000_000;
const GRAVITY: f64 = 9.80665;
const SEA_LEVEL_PRESSURE: f64 = 101_325.0;
const METERS_PER_DEGREE: f64 = 111_111.0;
const TAKEOFF_HEIGHT: f64 = -3.0;

// ────────────────────────────────────────────────────────────────────────────
// Call log
// ────────────────────────────────────────────────────────────────────────────

/// Operations the simulator records and can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    GetState,
    MoveToZ,
    MoveToPosition,
    MoveByVelocity,
    Takeoff,
    Land,
    SetCarControls,
    SetCameraPose,
    EnableApiControl,
    ArmDisarm,
    Reset,
}

impl std::fmt::Display for SimOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SimOp::GetState => "getState",
            SimOp::MoveToZ => "moveToZ",
            SimOp::MoveToPosition => "moveToPosition",
            SimOp::MoveByVelocity => "moveByVelocity",
            SimOp::Takeoff => "takeoff",
            SimOp::Land => "land",
            SimOp::SetCarControls => "setCarControls",
            SimOp::SetCameraPose => "simSetCameraPose",
            SimOp::EnableApiControl => "enableApiControl",
            SimOp::ArmDisarm => "armDisarm",
            SimOp::Reset => "reset",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimCall {
    pub op: SimOp,
    pub vehicle: String,
}

// ────────────────────────────────────────────────────────────────────────────
// World
// ────────────────────────────────────────────────────────────────────────────

struct SimVehicle {
    kind: VehicleKind,
    spawn: Vec3,
    kinematics: KinematicsState,
    landed: LandedState,
    car: CarControls,
    api_control: bool,
    armed: bool,
    sensors: HashMap<String, SensorKind>,
    /// camera name → (image type, width, height)
    captures: HashMap<String, Vec<(ImageType, u32, u32)>>,
    camera_poses: HashMap<String, Pose>,
    /// Scripted lidar returns replacing the synthetic two-point sweep.
    lidar_returns: Option<(Vec<f32>, Vec<String>)>,
}

impl SimVehicle {
    fn new(kind: VehicleKind, setting: &VehicleSetting) -> Self {
        let spawn = setting.position.unwrap_or_default();
        let sensors = setting
            .sensors
            .iter()
            .map(|s| (s.name.clone(), s.kind))
            .collect();
        let captures = setting
            .cameras
            .iter()
            .map(|c| {
                let sizes = c
                    .captures
                    .iter()
                    .map(|cap| (cap.image_type, cap.width, cap.height))
                    .collect();
                (c.name.clone(), sizes)
            })
            .collect();
        Self {
            kind,
            spawn,
            kinematics: KinematicsState {
                pose: Pose::new(spawn, Quaternion::identity()),
                twist: Twist::default(),
            },
            landed: LandedState::Landed,
            car: CarControls::default(),
            api_control: false,
            armed: false,
            sensors,
            captures,
            camera_poses: HashMap::new(),
            lidar_returns: None,
        }
    }

    fn reset(&mut self) {
        self.kinematics = KinematicsState {
            pose: Pose::new(self.spawn, Quaternion::identity()),
            twist: Twist::default(),
        };
        self.landed = LandedState::Landed;
        self.car = CarControls::default();
    }

    fn set_z(&mut self, z: f64) {
        self.kinematics.pose.position.z = z;
        self.landed = if z < 0.0 {
            LandedState::Flying
        } else {
            LandedState::Landed
        };
    }

    fn height(&self) -> f64 {
        -self.kinematics.pose.position.z
    }

    fn require_sensor(&self, vehicle: &str, sensor: &str, kind: SensorKind, call: &str) -> Result<(), RpcError> {
        match self.sensors.get(sensor) {
            Some(k) if *k == kind => Ok(()),
            _ => Err(RpcError::call(call, vehicle, format!("no {kind:?} sensor named {sensor}"))),
        }
    }
}

struct SceneObject {
    name: String,
    tag: String,
    pose: Pose,
    color: Rgb,
}

#[derive(Default)]
struct Faults {
    disconnected: bool,
    state: HashSet<String>,
    sensors: HashSet<String>,
    issue: HashSet<(String, SimOp)>,
    wait: HashSet<(String, SimOp)>,
    unsuccessful: HashSet<(String, SimOp)>,
    stall: HashSet<(String, SimOp)>,
}

struct SimWorld {
    clock: u64,
    paused: bool,
    home: GeoPoint,
    vehicles: HashMap<String, SimVehicle>,
    scene: Vec<SceneObject>,
    faults: Faults,
    calls: Vec<SimCall>,
    stalled: Vec<TaskCompleter>,
}

fn geo_of(home: GeoPoint, position: Vec3) -> GeoPoint {
    let latitude = home.latitude + position.x / METERS_PER_DEGREE;
    let longitude =
        home.longitude + position.y / (METERS_PER_DEGREE * home.latitude.to_radians().cos().max(1e-6));
    GeoPoint {
        latitude,
        longitude,
        altitude: home.altitude - position.z,
    }
}

fn pressure_at(altitude: f64) -> f64 {
    SEA_LEVEL_PRESSURE * (1.0 - 2.25577e-5 * altitude).powf(5.25588)
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct SimClientBuilder {
    vehicles: Vec<(VehicleKind, VehicleSetting)>,
    home: GeoPoint,
    latency: Duration,
    scene: Vec<SceneObject>,
}

impl SimClientBuilder {
    pub fn with_multirotor(self, name: impl Into<String>) -> Self {
        self.with_vehicle(VehicleKind::Multirotor, VehicleSetting::new(name))
    }

    pub fn with_car(self, name: impl Into<String>) -> Self {
        self.with_vehicle(VehicleKind::Car, VehicleSetting::new(name))
    }

    pub fn with_computer_vision(self, name: impl Into<String>) -> Self {
        self.with_vehicle(VehicleKind::ComputerVision, VehicleSetting::new(name))
    }

    /// Register a vehicle with its full camera and sensor layout.
    pub fn with_vehicle(mut self, kind: VehicleKind, setting: VehicleSetting) -> Self {
        self.vehicles.push((kind, setting));
        self
    }

    pub fn with_home(mut self, home: GeoPoint) -> Self {
        self.home = home;
        self
    }

    /// Delay before issued commands report completion.
    pub fn with_task_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_scene_object(
        mut self,
        name: impl Into<String>,
        tag: impl Into<String>,
        pose: Pose,
        color: Rgb,
    ) -> Self {
        self.scene.push(SceneObject {
            name: name.into(),
            tag: tag.into(),
            pose,
            color,
        });
        self
    }

    pub fn build(self) -> SimClient {
        let vehicles = self
            .vehicles
            .iter()
            .map(|(kind, setting)| (setting.name.clone(), SimVehicle::new(*kind, setting)))
            .collect();
        SimClient {
            world: Mutex::new(SimWorld {
                clock: 0,
                paused: false,
                home: self.home,
                vehicles,
                scene: self.scene,
                faults: Faults::default(),
                calls: Vec::new(),
                stalled: Vec::new(),
            }),
            latency: self.latency,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimClient
// ────────────────────────────────────────────────────────────────────────────

pub struct SimClient {
    world: Mutex<SimWorld>,
    latency: Duration,
}

impl SimClient {
    pub fn builder() -> SimClientBuilder {
        SimClientBuilder::default()
    }

    /// A fleet matching the configured vehicles, all of `mode`'s kind.
    pub fn from_settings(mode: SimMode, vehicles: &[VehicleSetting], home: GeoPoint) -> Self {
        let kind = mode.vehicle_kind();
        vehicles
            .iter()
            .fold(Self::builder().with_home(home), |b, v| b.with_vehicle(kind, v.clone()))
            .build()
    }

    fn world(&self) -> Result<MutexGuard<'_, SimWorld>, RpcError> {
        self.world
            .lock()
            .map_err(|_| RpcError::Disconnected("simulator state poisoned".into()))
    }

    fn with_world<T>(&self, f: impl FnOnce(&mut SimWorld) -> T) -> T {
        match self.world.lock() {
            Ok(mut w) => f(&mut w),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    // ── Fault scripting ──────────────────────────────────────────────────

    /// State and environment queries for `vehicle` fail until cleared.
    pub fn fail_state_queries(&self, vehicle: &str) {
        self.with_world(|w| w.faults.state.insert(vehicle.to_string()));
    }

    pub fn fail_sensor_reads(&self, vehicle: &str) {
        self.with_world(|w| w.faults.sensors.insert(vehicle.to_string()));
    }

    /// Issuing `op` on `vehicle` returns an error and has no effect.
    pub fn fail_issue(&self, vehicle: &str, op: SimOp) {
        self.with_world(|w| w.faults.issue.insert((vehicle.to_string(), op)));
    }

    /// `op` is accepted but its handle resolves to an error.
    pub fn fail_wait(&self, vehicle: &str, op: SimOp) {
        self.with_world(|w| w.faults.wait.insert((vehicle.to_string(), op)));
    }

    /// `op` is accepted but its handle resolves to `Ok(false)`.
    pub fn report_unsuccessful(&self, vehicle: &str, op: SimOp) {
        self.with_world(|w| w.faults.unsuccessful.insert((vehicle.to_string(), op)));
    }

    /// `op` is accepted and its handle never resolves.
    pub fn stall(&self, vehicle: &str, op: SimOp) {
        self.with_world(|w| w.faults.stall.insert((vehicle.to_string(), op)));
    }

    /// Every lidar on `vehicle` reports exactly `points` and `labels`.
    pub fn set_lidar_returns(&self, vehicle: &str, points: Vec<f32>, labels: Vec<String>) {
        self.with_world(|w| {
            if let Some(v) = w.vehicles.get_mut(vehicle) {
                v.lidar_returns = Some((points, labels));
            }
        });
    }

    pub fn disconnect(&self) {
        self.with_world(|w| w.faults.disconnected = true);
    }

    pub fn clear_faults(&self) {
        self.with_world(|w| w.faults = Faults::default());
    }

    pub fn set_paused(&self, paused: bool) {
        self.with_world(|w| w.paused = paused);
    }

    // ── Inspection ───────────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<SimCall> {
        self.with_world(|w| w.calls.clone())
    }

    /// Vehicles `op` was issued to, in issue order.
    pub fn calls_for(&self, op: SimOp) -> Vec<String> {
        self.with_world(|w| {
            w.calls
                .iter()
                .filter(|c| c.op == op)
                .map(|c| c.vehicle.clone())
                .collect()
        })
    }

    pub fn clear_calls(&self) {
        self.with_world(|w| w.calls.clear());
    }

    pub fn position(&self, vehicle: &str) -> Option<Vec3> {
        self.with_world(|w| w.vehicles.get(vehicle).map(|v| v.kinematics.pose.position))
    }

    pub fn car_controls(&self, vehicle: &str) -> Option<CarControls> {
        self.with_world(|w| w.vehicles.get(vehicle).map(|v| v.car))
    }

    pub fn camera_pose(&self, vehicle: &str, camera: &str) -> Option<Pose> {
        self.with_world(|w| {
            w.vehicles
                .get(vehicle)
                .and_then(|v| v.camera_poses.get(camera).copied())
        })
    }

    pub fn api_control(&self, vehicle: &str) -> Option<(bool, bool)> {
        self.with_world(|w| w.vehicles.get(vehicle).map(|v| (v.api_control, v.armed)))
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Record and apply a command.  Fault checks run before the effect, so
    /// a failed issue leaves the vehicle untouched.
    fn issue(
        &self,
        op: SimOp,
        vehicle: &str,
        required: Option<VehicleKind>,
        apply: impl FnOnce(&mut SimVehicle),
    ) -> Result<TaskHandle, RpcError> {
        let mut guard = self.world()?;
        let world = &mut *guard;
        world.calls.push(SimCall {
            op,
            vehicle: vehicle.to_string(),
        });
        if world.faults.disconnected {
            return Err(RpcError::Disconnected(format!("{op} on {vehicle}")));
        }
        let key = (vehicle.to_string(), op);
        let v = world
            .vehicles
            .get_mut(vehicle)
            .ok_or_else(|| RpcError::UnknownVehicle(vehicle.to_string()))?;
        if let Some(kind) = required
            && v.kind != kind
        {
            return Err(RpcError::call(op.to_string(), vehicle, format!("vehicle is a {}", v.kind)));
        }
        if world.faults.issue.contains(&key) {
            return Err(RpcError::call(op.to_string(), vehicle, "rejected by simulator"));
        }
        apply(v);
        debug!(vehicle, %op, "sim command applied");

        let outcome = if world.faults.wait.contains(&key) {
            Err(RpcError::call(op.to_string(), vehicle, "lost while waiting"))
        } else {
            Ok(!world.faults.unsuccessful.contains(&key))
        };

        if world.faults.stall.contains(&key) {
            let (completer, handle) = TaskHandle::pending(op.to_string(), vehicle);
            world.stalled.push(completer);
            return Ok(handle);
        }
        if self.latency.is_zero() {
            return Ok(TaskHandle::ready(op.to_string(), vehicle, outcome));
        }
        let (completer, handle) = TaskHandle::pending(op.to_string(), vehicle);
        let latency = self.latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            completer.complete(outcome);
        });
        Ok(handle)
    }

    /// Record a direct (non-task) command and map the handle away.
    fn direct(
        &self,
        op: SimOp,
        vehicle: &str,
        required: Option<VehicleKind>,
        apply: impl FnOnce(&mut SimVehicle),
    ) -> Result<(), RpcError> {
        let mut guard = self.world()?;
        let world = &mut *guard;
        world.calls.push(SimCall {
            op,
            vehicle: vehicle.to_string(),
        });
        if world.faults.disconnected {
            return Err(RpcError::Disconnected(format!("{op} on {vehicle}")));
        }
        let v = world
            .vehicles
            .get_mut(vehicle)
            .ok_or_else(|| RpcError::UnknownVehicle(vehicle.to_string()))?;
        if let Some(kind) = required
            && v.kind != kind
        {
            return Err(RpcError::call(op.to_string(), vehicle, format!("vehicle is a {}", v.kind)));
        }
        if world.faults.issue.contains(&(vehicle.to_string(), op)) {
            return Err(RpcError::call(op.to_string(), vehicle, "rejected by simulator"));
        }
        apply(v);
        Ok(())
    }

    /// Read vehicle state.  State queries advance the simulated clock.
    fn query<T>(
        &self,
        vehicle: &str,
        call: &str,
        advance_clock: bool,
        f: impl FnOnce(&SimVehicle, u64, GeoPoint) -> Result<T, RpcError>,
    ) -> Result<T, RpcError> {
        let mut guard = self.world()?;
        let world = &mut *guard;
        if world.faults.disconnected {
            return Err(RpcError::Disconnected(format!("{call} on {vehicle}")));
        }
        if advance_clock {
            world.calls.push(SimCall {
                op: SimOp::GetState,
                vehicle: vehicle.to_string(),
            });
            if !world.paused {
                world.clock += TICK_NS;
            }
        }
        if world.faults.state.contains(vehicle) {
            return Err(RpcError::call(call, vehicle, "query timed out"));
        }
        let v = world
            .vehicles
            .get(vehicle)
            .ok_or_else(|| RpcError::UnknownVehicle(vehicle.to_string()))?;
        f(v, world.clock, world.home)
    }

    fn read_sensor<T>(
        &self,
        vehicle: &str,
        sensor: &str,
        kind: SensorKind,
        call: &str,
        f: impl FnOnce(&SimVehicle, u64, GeoPoint) -> T,
    ) -> Result<T, RpcError> {
        let guard = self.world()?;
        if guard.faults.disconnected {
            return Err(RpcError::Disconnected(format!("{call} on {vehicle}")));
        }
        if guard.faults.sensors.contains(vehicle) {
            return Err(RpcError::call(call, vehicle, "sensor read failed"));
        }
        let v = guard
            .vehicles
            .get(vehicle)
            .ok_or_else(|| RpcError::UnknownVehicle(vehicle.to_string()))?;
        v.require_sensor(vehicle, sensor, kind, call)?;
        Ok(f(v, guard.clock, guard.home))
    }

    fn wrong_kind(call: &str, vehicle: &str, kind: VehicleKind) -> RpcError {
        RpcError::call(call, vehicle, format!("vehicle is a {kind}"))
    }
}

#[async_trait]
impl RemoteVehicleClient for SimClient {
    async fn confirm_connection(&self) -> Result<(), RpcError> {
        let world = self.world()?;
        if world.faults.disconnected {
            return Err(RpcError::Disconnected("simulator not reachable".into()));
        }
        Ok(())
    }

    async fn enable_api_control(&self, enable: bool, vehicle: &str) -> Result<(), RpcError> {
        self.direct(SimOp::EnableApiControl, vehicle, None, |v| v.api_control = enable)
    }

    async fn arm_disarm(&self, arm: bool, vehicle: &str) -> Result<bool, RpcError> {
        self.direct(SimOp::ArmDisarm, vehicle, None, |v| v.armed = arm)?;
        Ok(true)
    }

    async fn is_paused(&self) -> Result<bool, RpcError> {
        Ok(self.world()?.paused)
    }

    async fn reset(&self) -> Result<(), RpcError> {
        let mut world = self.world()?;
        world.calls.push(SimCall {
            op: SimOp::Reset,
            vehicle: String::new(),
        });
        if world.faults.disconnected {
            return Err(RpcError::Disconnected("reset".into()));
        }
        world.vehicles.values_mut().for_each(SimVehicle::reset);
        Ok(())
    }

    async fn get_multirotor_state(&self, vehicle: &str) -> Result<MultirotorState, RpcError> {
        self.query(vehicle, "getMultirotorState", true, |v, clock, home| {
            if v.kind != VehicleKind::Multirotor {
                return Err(Self::wrong_kind("getMultirotorState", vehicle, v.kind));
            }
            Ok(MultirotorState {
                kinematics: v.kinematics,
                gps_location: geo_of(home, v.kinematics.pose.position),
                landed_state: v.landed,
                timestamp: clock,
            })
        })
    }

    async fn get_car_state(&self, vehicle: &str) -> Result<CarState, RpcError> {
        self.query(vehicle, "getCarState", true, |v, clock, _| {
            if v.kind != VehicleKind::Car {
                return Err(Self::wrong_kind("getCarState", vehicle, v.kind));
            }
            let speed = (v.car.throttle - v.car.brake).max(0.0) * 10.0;
            Ok(CarState {
                kinematics: v.kinematics,
                speed,
                gear: if speed > 0.0 { 1 } else { 0 },
                rpm: speed * 300.0,
                maxrpm: 7500.0,
                handbrake: v.car.handbrake,
                timestamp: clock,
            })
        })
    }

    async fn get_computer_vision_state(
        &self,
        vehicle: &str,
    ) -> Result<ComputerVisionState, RpcError> {
        self.query(vehicle, "simGetComputerVisionState", true, |v, clock, _| {
            if v.kind != VehicleKind::ComputerVision {
                return Err(Self::wrong_kind("simGetComputerVisionState", vehicle, v.kind));
            }
            Ok(ComputerVisionState {
                kinematics: v.kinematics,
                timestamp: clock,
            })
        })
    }

    async fn get_environment(&self, vehicle: &str) -> Result<EnvironmentState, RpcError> {
        self.query(vehicle, "simGetGroundTruthEnvironment", false, |v, _, home| {
            let position = v.kinematics.pose.position;
            let geo_point = geo_of(home, position);
            let temperature = 288.15 - 0.0065 * geo_point.altitude;
            let air_pressure = pressure_at(geo_point.altitude);
            Ok(EnvironmentState {
                position,
                geo_point,
                gravity: Vec3::new(0.0, 0.0, GRAVITY),
                air_pressure,
                temperature,
                air_density: air_pressure / (287.05 * temperature),
            })
        })
    }

    async fn move_to_z(
        &self,
        vehicle: &str,
        z: f64,
        _velocity: f64,
        _timeout: Duration,
        _yaw_mode: YawMode,
    ) -> Result<TaskHandle, RpcError> {
        self.issue(SimOp::MoveToZ, vehicle, Some(VehicleKind::Multirotor), |v| v.set_z(z))
    }

    async fn move_to_position(
        &self,
        vehicle: &str,
        x: f64,
        y: f64,
        z: f64,
        _velocity: f64,
        _timeout: Duration,
        yaw_mode: YawMode,
    ) -> Result<TaskHandle, RpcError> {
        self.issue(SimOp::MoveToPosition, vehicle, Some(VehicleKind::Multirotor), |v| {
            v.kinematics.pose.position.x = x;
            v.kinematics.pose.position.y = y;
            v.set_z(z);
            if !yaw_mode.is_rate {
                v.kinematics.pose.orientation = Quaternion::from_rpy_degrees(0.0, 0.0, yaw_mode.yaw_or_rate);
            }
        })
    }

    async fn move_by_velocity(
        &self,
        vehicle: &str,
        cmd: &VelCmd,
        duration: Duration,
    ) -> Result<TaskHandle, RpcError> {
        let velocity = Vec3::new(cmd.x, cmd.y, cmd.z);
        self.issue(SimOp::MoveByVelocity, vehicle, Some(VehicleKind::Multirotor), |v| {
            let moved = v
                .kinematics
                .pose
                .position
                .add(velocity.scale(duration.as_secs_f64()));
            v.kinematics.pose.position = moved;
            v.kinematics.twist.linear = velocity;
            v.set_z(moved.z);
        })
    }

    async fn takeoff(&self, vehicle: &str, _timeout: Duration) -> Result<TaskHandle, RpcError> {
        self.issue(SimOp::Takeoff, vehicle, Some(VehicleKind::Multirotor), |v| {
            v.set_z(TAKEOFF_HEIGHT)
        })
    }

    async fn land(&self, vehicle: &str, _timeout: Duration) -> Result<TaskHandle, RpcError> {
        self.issue(SimOp::Land, vehicle, Some(VehicleKind::Multirotor), |v| {
            v.set_z(0.0);
            v.kinematics.twist = Twist::default();
        })
    }

    async fn set_car_controls(&self, vehicle: &str, controls: &CarControls) -> Result<(), RpcError> {
        let controls = *controls;
        self.direct(SimOp::SetCarControls, vehicle, Some(VehicleKind::Car), |v| {
            v.car = controls
        })
    }

    async fn set_camera_pose(&self, vehicle: &str, camera: &str, pose: Pose) -> Result<(), RpcError> {
        self.direct(SimOp::SetCameraPose, vehicle, None, |v| {
            v.camera_poses.insert(camera.to_string(), pose);
        })
    }

    async fn get_imu(&self, vehicle: &str, sensor: &str) -> Result<ImuReading, RpcError> {
        self.read_sensor(vehicle, sensor, SensorKind::Imu, "getImuData", |v, clock, _| ImuReading {
            orientation: v.kinematics.pose.orientation,
            angular_velocity: v.kinematics.twist.angular,
            linear_acceleration: Vec3::new(0.0, 0.0, -GRAVITY),
            timestamp: clock,
        })
    }

    async fn get_barometer(&self, vehicle: &str, sensor: &str) -> Result<BarometerReading, RpcError> {
        self.read_sensor(vehicle, sensor, SensorKind::Barometer, "getBarometerData", |v, clock, home| {
            let altitude = home.altitude + v.height();
            BarometerReading {
                altitude,
                pressure: pressure_at(altitude),
                qnh: 1013.25,
                timestamp: clock,
            }
        })
    }

    async fn get_magnetometer(
        &self,
        vehicle: &str,
        sensor: &str,
    ) -> Result<MagnetometerReading, RpcError> {
        self.read_sensor(vehicle, sensor, SensorKind::Magnetometer, "getMagnetometerData", |_, clock, _| {
            MagnetometerReading {
                magnetic_field_body: Vec3::new(0.2, 0.0, 0.43),
                magnetic_field_covariance: vec![0.0; 9],
                timestamp: clock,
            }
        })
    }

    async fn get_gps(&self, vehicle: &str, sensor: &str) -> Result<GpsReading, RpcError> {
        self.read_sensor(vehicle, sensor, SensorKind::Gps, "getGpsData", |v, clock, home| GpsReading {
            geo_point: geo_of(home, v.kinematics.pose.position),
            fix_type: 3,
            timestamp: clock,
        })
    }

    async fn get_distance(&self, vehicle: &str, sensor: &str) -> Result<DistanceReading, RpcError> {
        self.read_sensor(vehicle, sensor, SensorKind::Distance, "getDistanceSensorData", |v, clock, _| {
            DistanceReading {
                distance: v.height().clamp(0.2, 40.0),
                min_distance: 0.2,
                max_distance: 40.0,
                timestamp: clock,
            }
        })
    }

    async fn get_lidar(&self, vehicle: &str, sensor: &str) -> Result<LidarReading, RpcError> {
        self.read_sensor(vehicle, sensor, SensorKind::Lidar, "getLidarData", |v, clock, _| {
            let h = v.height() as f32;
            let (point_cloud, groundtruth) = v.lidar_returns.clone().unwrap_or_else(|| {
                (vec![1.0, 0.5, h, 2.0, -0.5, h], vec!["Ground".into(), "Ground".into()])
            });
            LidarReading {
                point_cloud,
                groundtruth,
                pose: Pose::default(),
                timestamp: clock,
            }
        })
    }

    async fn get_gpu_lidar(&self, vehicle: &str, sensor: &str) -> Result<GpuLidarReading, RpcError> {
        self.read_sensor(vehicle, sensor, SensorKind::GpuLidar, "getGPULidarData", |v, clock, _| {
            let h = v.height() as f32;
            GpuLidarReading {
                point_cloud: vec![1.0, 0.5, h, 255.0, 0.8, 2.0, -0.5, h, 65280.0, 0.4],
                pose: Pose::default(),
                timestamp: clock,
            }
        })
    }

    async fn get_echo(&self, vehicle: &str, sensor: &str) -> Result<EchoReading, RpcError> {
        self.read_sensor(vehicle, sensor, SensorKind::Echo, "getEchoData", |_, clock, _| EchoReading {
            point_cloud: vec![
                3.0, 1.0, 0.5, 0.9, 3.2, 1.0, //
                4.0, -1.0, 0.2, 0.7, 4.1, 2.0,
            ],
            groundtruth: vec!["Wall".into(), "Wall".into()],
            passive_beacons_point_cloud: vec![
                5.0, 2.0, 1.0, 0.5, 5.5, 1.0, 0.1, 0.2, 0.3, //
                6.0, -2.0, 1.5, 0.4, 6.5, 2.0, -0.1, -0.2, -0.3,
            ],
            passive_beacons_groundtruth: vec!["Beacon".into(), "Beacon".into()],
            pose: Pose::default(),
            timestamp: clock,
        })
    }

    async fn get_images(
        &self,
        vehicle: &str,
        requests: &[ImageRequest],
    ) -> Result<Vec<ImageResponse>, RpcError> {
        let guard = self.world()?;
        if guard.faults.sensors.contains(vehicle) {
            return Err(RpcError::call("simGetImages", vehicle, "capture failed"));
        }
        let v = guard
            .vehicles
            .get(vehicle)
            .ok_or_else(|| RpcError::UnknownVehicle(vehicle.to_string()))?;
        requests
            .iter()
            .map(|req| {
                let captures = v.captures.get(&req.camera_name).ok_or_else(|| {
                    RpcError::call("simGetImages", vehicle, format!("no camera named {}", req.camera_name))
                })?;
                let (width, height) = captures
                    .iter()
                    .find(|(t, _, _)| *t == req.image_type)
                    .map(|(_, w, h)| (*w, *h))
                    .unwrap_or((4, 3));
                let pixels = (width * height) as usize;
                Ok(ImageResponse {
                    camera_name: req.camera_name.clone(),
                    width,
                    height,
                    pixels_as_float: req.pixels_as_float,
                    image_data_uint8: if req.pixels_as_float { Vec::new() } else { vec![0; pixels * 3] },
                    image_data_float: if req.pixels_as_float { vec![1.0; pixels] } else { Vec::new() },
                    timestamp: guard.clock,
                })
            })
            .collect()
    }

    async fn get_camera_info(&self, vehicle: &str, camera: &str) -> Result<CameraInfoReading, RpcError> {
        let guard = self.world()?;
        let v = guard
            .vehicles
            .get(vehicle)
            .ok_or_else(|| RpcError::UnknownVehicle(vehicle.to_string()))?;
        if !v.captures.contains_key(camera) {
            return Err(RpcError::call("simGetCameraInfo", vehicle, format!("no camera named {camera}")));
        }
        let pose = v
            .camera_poses
            .get(camera)
            .copied()
            .unwrap_or_else(|| Pose::new(Vec3::new(0.5, 0.0, 0.1), Quaternion::identity()));
        Ok(CameraInfoReading {
            pose,
            fov_degrees: 90.0,
        })
    }

    async fn list_scene_object_tags(&self, regex: &str) -> Result<Vec<(String, String)>, RpcError> {
        let pattern = Regex::new(&format!("^(?:{regex})$"))
            .map_err(|e| RpcError::call("simListSceneObjectsTags", "", e.to_string()))?;
        let world = self.world()?;
        Ok(world
            .scene
            .iter()
            .filter(|o| pattern.is_match(&o.name))
            .map(|o| (o.name.clone(), o.tag.clone()))
            .collect())
    }

    async fn list_instance_segmentation_objects(&self) -> Result<Vec<String>, RpcError> {
        Ok(self.world()?.scene.iter().map(|o| o.name.clone()).collect())
    }

    async fn instance_segmentation_color_map(&self) -> Result<Vec<Rgb>, RpcError> {
        Ok(self.world()?.scene.iter().map(|o| o.color).collect())
    }

    async fn list_instance_segmentation_poses(&self) -> Result<Vec<Pose>, RpcError> {
        Ok(self.world()?.scene.iter().map(|o| o.pose).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbridge_types::settings::{CameraSetting, CaptureSetting, SensorSetting};

    fn fleet() -> SimClient {
        SimClient::builder()
            .with_multirotor("drone_1")
            .with_multirotor("drone_2")
            .with_car("car_1")
            .build()
    }

    #[tokio::test]
    async fn state_query_advances_clock() -> Result<(), Box<dyn std::error::Error>> {
        let sim = fleet();
        let a = sim.get_multirotor_state("drone_1").await?;
        let b = sim.get_multirotor_state("drone_1").await?;
        assert!(b.timestamp > a.timestamp);
        Ok(())
    }

    #[tokio::test]
    async fn paused_clock_does_not_advance() -> Result<(), Box<dyn std::error::Error>> {
        let sim = fleet();
        sim.set_paused(true);
        let a = sim.get_multirotor_state("drone_1").await?;
        let b = sim.get_multirotor_state("drone_1").await?;
        assert_eq!(a.timestamp, b.timestamp);
        assert!(sim.is_paused().await?);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_vehicle_is_reported() {
        let sim = fleet();
        let err = sim.get_multirotor_state("ghost").await.unwrap_err();
        assert_eq!(err, RpcError::UnknownVehicle("ghost".into()));
    }

    #[tokio::test]
    async fn kind_mismatch_is_a_call_error() {
        let sim = fleet();
        let err = sim
            .move_to_z("car_1", -5.0, 2.0, Duration::from_secs(1), YawMode::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Call { .. }));
        assert!(sim.get_car_state("drone_1").await.is_err());
    }

    #[tokio::test]
    async fn move_then_land() -> Result<(), Box<dyn std::error::Error>> {
        let sim = fleet();
        let handle = sim
            .move_to_z("drone_1", -10.0, 2.0, Duration::from_secs(30), YawMode::default())
            .await?;
        assert_eq!(handle.wait().await, Ok(true));
        assert_eq!(sim.position("drone_1").map(|p| p.z), Some(-10.0));
        let state = sim.get_multirotor_state("drone_1").await?;
        assert_eq!(state.landed_state, LandedState::Flying);

        sim.land("drone_1", Duration::from_secs(60)).await?.wait().await?;
        assert_eq!(sim.position("drone_1").map(|p| p.z), Some(0.0));
        assert_eq!(sim.calls_for(SimOp::Land), vec!["drone_1".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn issue_fault_leaves_vehicle_untouched() {
        let sim = fleet();
        sim.fail_issue("drone_2", SimOp::MoveToZ);
        let res = sim
            .move_to_z("drone_2", -10.0, 2.0, Duration::from_secs(30), YawMode::default())
            .await;
        assert!(res.is_err());
        assert_eq!(sim.position("drone_2").map(|p| p.z), Some(0.0));
        assert_eq!(sim.calls_for(SimOp::MoveToZ), vec!["drone_2".to_string()]);
    }

    #[tokio::test]
    async fn wait_and_unsuccessful_faults() -> Result<(), Box<dyn std::error::Error>> {
        let sim = fleet();
        sim.fail_wait("drone_1", SimOp::Land);
        sim.report_unsuccessful("drone_2", SimOp::Land);
        let h1 = sim.land("drone_1", Duration::from_secs(1)).await?;
        let h2 = sim.land("drone_2", Duration::from_secs(1)).await?;
        assert!(h1.wait().await.is_err());
        assert_eq!(h2.wait().await, Ok(false));
        Ok(())
    }

    #[tokio::test]
    async fn stalled_task_times_out() -> Result<(), Box<dyn std::error::Error>> {
        let sim = fleet();
        sim.stall("drone_1", SimOp::Takeoff);
        let handle = sim.takeoff("drone_1", Duration::from_secs(20)).await?;
        let err = handle
            .wait_timeout(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn latency_delays_completion() -> Result<(), Box<dyn std::error::Error>> {
        let sim = SimClient::builder()
            .with_multirotor("drone_1")
            .with_task_latency(Duration::from_millis(30))
            .build();
        let mut handle = sim.takeoff("drone_1", Duration::from_secs(20)).await?;
        assert_eq!(handle.poll(), None);
        assert_eq!(handle.wait().await, Ok(true));
        Ok(())
    }

    #[tokio::test]
    async fn state_fault_fails_only_that_vehicle() {
        let sim = fleet();
        sim.fail_state_queries("drone_1");
        assert!(sim.get_multirotor_state("drone_1").await.is_err());
        assert!(sim.get_environment("drone_1").await.is_err());
        assert!(sim.get_multirotor_state("drone_2").await.is_ok());
        sim.clear_faults();
        assert!(sim.get_multirotor_state("drone_1").await.is_ok());
    }

    #[tokio::test]
    async fn sensors_require_configuration() -> Result<(), Box<dyn std::error::Error>> {
        let setting = VehicleSetting::new("drone_1")
            .with_sensor(SensorSetting::new("imu", SensorKind::Imu))
            .with_sensor(SensorSetting::new("lidar", SensorKind::Lidar))
            .with_camera(CameraSetting {
                name: "front".into(),
                external: false,
                captures: vec![CaptureSetting {
                    image_type: ImageType::Scene,
                    width: 8,
                    height: 6,
                    fov_degrees: 90.0,
                    annotation_name: None,
                }],
            });
        let sim = SimClient::builder()
            .with_vehicle(VehicleKind::Multirotor, setting)
            .build();
        sim.get_imu("drone_1", "imu").await?;
        assert_eq!(sim.get_lidar("drone_1", "lidar").await?.point_cloud.len(), 6);
        assert!(sim.get_imu("drone_1", "lidar").await.is_err());
        assert!(sim.get_barometer("drone_1", "baro").await.is_err());

        let images = sim
            .get_images(
                "drone_1",
                &[ImageRequest {
                    camera_name: "front".into(),
                    image_type: ImageType::Scene,
                    pixels_as_float: false,
                    compress: false,
                    annotation_name: None,
                }],
            )
            .await?;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].image_data_uint8.len(), 8 * 6 * 3);
        Ok(())
    }

    #[tokio::test]
    async fn scene_tags_filter_by_full_match() -> Result<(), Box<dyn std::error::Error>> {
        let sim = SimClient::builder()
            .with_scene_object("Cube_1", "box", Pose::default(), Rgb { r: 1, g: 2, b: 3 })
            .with_scene_object("Cone_1", "cone", Pose::default(), Rgb { r: 4, g: 5, b: 6 })
            .build();
        assert_eq!(sim.list_scene_object_tags(".*").await?.len(), 2);
        let cubes = sim.list_scene_object_tags("Cube.*").await?;
        assert_eq!(cubes, vec![("Cube_1".to_string(), "box".to_string())]);
        assert!(sim.list_scene_object_tags("Cube").await?.is_empty());
        assert!(sim.list_scene_object_tags("(").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn reset_returns_vehicles_to_spawn() -> Result<(), Box<dyn std::error::Error>> {
        let sim = fleet();
        sim.takeoff("drone_1", Duration::from_secs(20)).await?;
        sim.reset().await?;
        assert_eq!(sim.position("drone_1"), Some(Vec3::zero()));
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_fails_connection_check() {
        let sim = fleet();
        assert!(sim.confirm_connection().await.is_ok());
        sim.disconnect();
        assert!(matches!(
            sim.confirm_connection().await,
            Err(RpcError::Disconnected(_))
        ));
    }
}
