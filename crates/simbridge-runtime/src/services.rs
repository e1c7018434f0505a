//! [`FleetServices`] – every inbound request, behind the control gate.
//!
//! Latch producers (velocity, car controls, gimbal) validate the whole
//! target set first and only then write, so a request naming one unknown or
//! wrong-kind vehicle latches nothing.  Services issue simulator commands
//! directly and report a success flag and message.  The coordinated
//! maneuver takes the gate itself for its whole run.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use simbridge_hal::{RemoteVehicleClient, TaskHandle};
use simbridge_kernel::ControlGate;
use simbridge_middleware::{CommandSink, EventBus};
use simbridge_perception::conversion::{
    body_velocity_command, gimbal_from_euler_degrees, gimbal_from_quat, object_transform,
    world_velocity_command,
};
use simbridge_types::command::{CarControls, GimbalCmd, VehicleCommand, YawMode};
use simbridge_types::geometry::Twist;
use simbridge_types::msgs::{
    Header, InstanceSegmentationLabel, InstanceSegmentationList, ObjectTransformsList,
};
use simbridge_types::request::VelFrame;
use simbridge_types::{
    BridgeError, BridgeReply, BridgeRequest, EventPayload, ManeuverRequest, ManeuverResult, RpcError,
    SimTimestamp, VehicleKind, VehicleTarget,
};
use tracing::{error, info, instrument, warn};

use crate::maneuver::CoordinatedManeuver;
use crate::registry::{VehicleRecord, VehicleRegistry};

const SOURCE: &str = "simbridge::services";

const TAKEOFF_TIMEOUT: Duration = Duration::from_secs(20);
const LAND_TIMEOUT: Duration = Duration::from_secs(60);
const MOVE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_ALTITUDE_VELOCITY: f64 = 5.0;
const LOCAL_POSITION_SPEED: f64 = 5.0;

/// Result of a service call that reached the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOutcome {
    pub success: bool,
    pub message: String,
}

impl ServiceOutcome {
    fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
        }
    }

    pub fn into_reply(self) -> BridgeReply {
        BridgeReply::service(self.success, self.message)
    }
}

pub struct FleetServices {
    client: Arc<dyn RemoteVehicleClient>,
    registry: Arc<VehicleRegistry>,
    gate: Arc<ControlGate>,
    bus: EventBus,
    maneuver: CoordinatedManeuver,
    world_frame_id: String,
    task_wait_timeout: Option<Duration>,
}

impl FleetServices {
    pub fn new(
        client: Arc<dyn RemoteVehicleClient>,
        registry: Arc<VehicleRegistry>,
        gate: Arc<ControlGate>,
        bus: EventBus,
        world_frame_id: impl Into<String>,
        task_wait_timeout: Option<Duration>,
    ) -> Self {
        let maneuver = CoordinatedManeuver::new(
            Arc::clone(&client),
            Arc::clone(&registry),
            Arc::clone(&gate),
            task_wait_timeout,
        );
        Self {
            client,
            registry,
            gate,
            bus,
            maneuver,
            world_frame_id: world_frame_id.into(),
            task_wait_timeout,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Latch producers
    // ─────────────────────────────────────────────────────────────────────

    /// Latch a velocity set-point for every multirotor in `target`.  Body
    /// frame commands are rotated by each vehicle's last known yaw.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownVehicle`] or [`BridgeError::WrongVehicleKind`];
    /// nothing is latched in either case.
    pub async fn set_velocity(
        &self,
        target: &VehicleTarget,
        frame: VelFrame,
        twist: &Twist,
    ) -> Result<usize, BridgeError> {
        let records = self.multirotors(target)?;
        let mut latch = self.gate.lock().await;
        for record in &records {
            let cmd = match frame {
                VelFrame::World => world_velocity_command(twist),
                VelFrame::Body => body_velocity_command(twist, record.orientation()),
            };
            latch.set_pending(record.name(), VehicleCommand::Velocity(cmd));
        }
        Ok(records.len())
    }

    /// # Errors
    ///
    /// [`BridgeError::UnknownVehicle`] or [`BridgeError::WrongVehicleKind`].
    pub async fn set_car_controls(&self, vehicle: &str, controls: CarControls) -> Result<(), BridgeError> {
        self.registry.require(vehicle)?.require_kind(VehicleKind::Car)?;
        self.gate
            .lock()
            .await
            .set_pending(vehicle, VehicleCommand::CarControls(controls));
        Ok(())
    }

    /// Replace the process-wide gimbal command.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownVehicle`] when the command names no vehicle
    /// the bridge knows.
    pub async fn set_gimbal(&self, cmd: GimbalCmd) -> Result<(), BridgeError> {
        self.registry.require(&cmd.vehicle_name)?;
        self.gate.lock().await.set_gimbal(cmd);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Motion services
    // ─────────────────────────────────────────────────────────────────────

    /// Take off each vehicle in turn.  With `wait` every takeoff finishes
    /// before the next one is issued.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownVehicle`] or [`BridgeError::WrongVehicleKind`]
    /// before any command is sent.
    #[instrument(skip(self))]
    pub async fn takeoff(&self, target: &VehicleTarget, wait: bool) -> Result<ServiceOutcome, BridgeError> {
        let records = self.multirotors(target)?;
        let _gate = self.gate.lock().await;
        let mut failed = Vec::new();
        for record in &records {
            let issued = self.client.takeoff(record.name(), TAKEOFF_TIMEOUT).await;
            if !self.settle(record.name(), issued, wait).await {
                failed.push(record.name().to_string());
            }
        }
        Ok(summarize("takeoff", records.len(), &failed))
    }

    /// # Errors
    ///
    /// As for [`takeoff`](Self::takeoff).
    #[instrument(skip(self))]
    pub async fn land(&self, target: &VehicleTarget, wait: bool) -> Result<ServiceOutcome, BridgeError> {
        let records = self.multirotors(target)?;
        let _gate = self.gate.lock().await;
        let mut failed = Vec::new();
        for record in &records {
            let issued = self.client.land(record.name(), LAND_TIMEOUT).await;
            if !self.settle(record.name(), issued, wait).await {
                failed.push(record.name().to_string());
            }
        }
        Ok(summarize("land", records.len(), &failed))
    }

    /// Move to simulator-convention altitude `z`.  A non-positive
    /// `velocity` falls back to 5 m/s.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownVehicle`] or [`BridgeError::WrongVehicleKind`].
    #[instrument(skip(self))]
    pub async fn set_altitude(
        &self,
        vehicle: &str,
        z: f64,
        velocity: f64,
        wait: bool,
    ) -> Result<ServiceOutcome, BridgeError> {
        self.registry.require(vehicle)?.require_kind(VehicleKind::Multirotor)?;
        let velocity = if velocity > 0.0 { velocity } else { DEFAULT_ALTITUDE_VELOCITY };
        info!(vehicle, z, velocity, "setting altitude");

        let _gate = self.gate.lock().await;
        let outcome = match self
            .run_task(
                self.client
                    .move_to_z(vehicle, z, velocity, MOVE_TIMEOUT, YawMode::default())
                    .await,
                wait,
            )
            .await
        {
            Ok(true) => ServiceOutcome::new(true, "Altitude change command sent successfully"),
            Ok(false) => ServiceOutcome::new(false, "Failed to execute altitude change"),
            Err(e) => {
                error!(vehicle, error = %e, "set altitude failed");
                ServiceOutcome::new(false, format!("Error setting altitude: {e}"))
            }
        };
        Ok(outcome)
    }

    /// Move to a simulator-convention position at 5 m/s, ending at the
    /// absolute heading `yaw` (degrees).
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownVehicle`] or [`BridgeError::WrongVehicleKind`].
    #[instrument(skip(self))]
    pub async fn set_local_position(
        &self,
        vehicle: &str,
        position: (f64, f64, f64),
        yaw: f64,
        wait: bool,
    ) -> Result<ServiceOutcome, BridgeError> {
        self.registry.require(vehicle)?.require_kind(VehicleKind::Multirotor)?;
        let (x, y, z) = position;
        let yaw_mode = YawMode {
            is_rate: false,
            yaw_or_rate: yaw,
        };

        let _gate = self.gate.lock().await;
        let issued = self
            .client
            .move_to_position(vehicle, x, y, z, LOCAL_POSITION_SPEED, MOVE_TIMEOUT, yaw_mode)
            .await;
        let outcome = match self.run_task(issued, wait).await {
            Ok(true) => ServiceOutcome::new(true, "Local position command sent successfully"),
            Ok(false) => ServiceOutcome::new(false, "Failed to execute local position command"),
            Err(e) => {
                error!(vehicle, error = %e, "set local position failed");
                ServiceOutcome::new(false, format!("Error setting local position: {e}"))
            }
        };
        Ok(outcome)
    }

    pub async fn coordinated_height_and_land(&self, request: &ManeuverRequest) -> ManeuverResult {
        let result = self.maneuver.execute(request).await;
        self.bus
            .emit(SOURCE, EventPayload::ManeuverReport(result.clone()));
        result
    }

    // ─────────────────────────────────────────────────────────────────────
    // Simulator and scene
    // ─────────────────────────────────────────────────────────────────────

    #[instrument(skip(self))]
    pub async fn reset(&self) -> ServiceOutcome {
        let _gate = self.gate.lock().await;
        match self.client.reset().await {
            Ok(()) => ServiceOutcome::new(true, "Simulation reset"),
            Err(e) => {
                error!(error = %e, "reset failed");
                ServiceOutcome::new(false, format!("Error resetting simulation: {e}"))
            }
        }
    }

    /// `(objects, tags)` for every scene object whose name matches `regex`.
    /// An empty or missing pattern matches everything.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Rpc`] when the simulator rejects the query.
    pub async fn list_scene_object_tags(
        &self,
        regex: Option<&str>,
    ) -> Result<(Vec<String>, Vec<String>), BridgeError> {
        let pattern = regex.filter(|r| !r.is_empty()).unwrap_or(".*");
        let _gate = self.gate.lock().await;
        let pairs = self.client.list_scene_object_tags(pattern).await?;
        Ok(pairs.into_iter().unzip())
    }

    /// Build and publish the segmentation label list.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Rpc`] when the object list or colour map is
    /// unavailable.
    pub async fn refresh_instance_segmentation(&self) -> Result<usize, BridgeError> {
        let _gate = self.gate.lock().await;
        info!("starting instance segmentation refresh");
        let names = self.client.list_instance_segmentation_objects().await?;
        let colors = self.client.instance_segmentation_color_map().await?;
        if colors.len() < names.len() {
            warn!(objects = names.len(), colors = colors.len(), "colour map shorter than object list");
        }
        let labels: Vec<InstanceSegmentationLabel> = names
            .into_iter()
            .zip(colors)
            .enumerate()
            .map(|(index, (name, color))| InstanceSegmentationLabel {
                name,
                r: color.r,
                g: color.g,
                b: color.b,
                index: index as u32,
            })
            .collect();
        let count = labels.len();
        let list = InstanceSegmentationList {
            header: Header::new(self.reference_stamp(), self.world_frame_id.as_str()),
            labels,
        };
        self.bus.emit(SOURCE, EventPayload::InstanceSegmentation(list));
        info!(count, "instance segmentation refresh complete");
        Ok(count)
    }

    /// Build and publish world-frame transforms of every placed scene
    /// object.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Rpc`] when objects or poses are unavailable.
    pub async fn refresh_object_transforms(&self) -> Result<usize, BridgeError> {
        let _gate = self.gate.lock().await;
        info!("starting object transforms refresh");
        let names = self.client.list_instance_segmentation_objects().await?;
        let poses = self.client.list_instance_segmentation_poses().await?;
        let header = Header::new(self.reference_stamp(), self.world_frame_id.as_str());
        let objects: Vec<_> = names
            .iter()
            .zip(&poses)
            .filter_map(|(name, pose)| object_transform(name, pose, &header))
            .collect();
        let count = objects.len();
        self.bus.emit(
            SOURCE,
            EventPayload::ObjectTransforms(ObjectTransformsList { header, objects }),
        );
        info!(count, "object transforms refresh complete");
        Ok(count)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────

    /// Resolve `target` and require every record to be a multirotor.
    fn multirotors(&self, target: &VehicleTarget) -> Result<Vec<&VehicleRecord>, BridgeError> {
        let records = self.registry.resolve(target)?;
        for record in &records {
            record.require_kind(VehicleKind::Multirotor)?;
        }
        Ok(records)
    }

    /// Scene messages carry the first vehicle's time.
    fn reference_stamp(&self) -> SimTimestamp {
        self.registry
            .iter()
            .next()
            .and_then(VehicleRecord::timestamp)
            .unwrap_or_default()
    }

    /// `Ok(true)` without waiting once a command was accepted.
    async fn run_task(&self, issued: Result<TaskHandle, RpcError>, wait: bool) -> Result<bool, RpcError> {
        let handle = issued?;
        if !wait {
            return Ok(true);
        }
        match self.task_wait_timeout {
            Some(deadline) => handle.wait_timeout(deadline).await,
            None => handle.wait().await,
        }
    }

    async fn settle(&self, vehicle: &str, issued: Result<TaskHandle, RpcError>, wait: bool) -> bool {
        match self.run_task(issued, wait).await {
            Ok(true) => true,
            Ok(false) => {
                warn!(vehicle, "task reported failure");
                false
            }
            Err(e) => {
                warn!(vehicle, error = %e, "task failed");
                false
            }
        }
    }
}

fn summarize(action: &str, attempted: usize, failed: &[String]) -> ServiceOutcome {
    if failed.is_empty() {
        ServiceOutcome::new(true, format!("{action} sent to {attempted} vehicles"))
    } else {
        ServiceOutcome::new(false, format!("{action} failed on {}", failed.join(", ")))
    }
}

fn accepted<T>(result: Result<T, BridgeError>) -> BridgeReply {
    match result {
        Ok(_) => BridgeReply::Accepted,
        Err(e) => {
            warn!(error = %e, "request rejected");
            BridgeReply::rejected(e)
        }
    }
}

fn service(result: Result<ServiceOutcome, BridgeError>) -> BridgeReply {
    match result {
        Ok(outcome) => outcome.into_reply(),
        Err(e) => {
            warn!(error = %e, "request rejected");
            BridgeReply::rejected(e)
        }
    }
}

#[async_trait]
impl CommandSink for FleetServices {
    async fn handle(&self, request: BridgeRequest) -> BridgeReply {
        match request {
            BridgeRequest::VelCmd { vehicles, frame, twist } => {
                accepted(self.set_velocity(&vehicles, frame, &twist).await)
            }
            BridgeRequest::CarCmd { vehicle, controls } => {
                accepted(self.set_car_controls(&vehicle, controls).await)
            }
            BridgeRequest::GimbalQuat {
                vehicle,
                camera,
                orientation,
            } => accepted(self.set_gimbal(gimbal_from_quat(&vehicle, &camera, orientation)).await),
            BridgeRequest::GimbalEuler {
                vehicle,
                camera,
                roll,
                pitch,
                yaw,
            } => accepted(
                self.set_gimbal(gimbal_from_euler_degrees(&vehicle, &camera, roll, pitch, yaw))
                    .await,
            ),
            BridgeRequest::Takeoff {
                vehicles,
                wait_on_last_task,
            } => service(self.takeoff(&vehicles, wait_on_last_task).await),
            BridgeRequest::Land {
                vehicles,
                wait_on_last_task,
            } => service(self.land(&vehicles, wait_on_last_task).await),
            BridgeRequest::SetAltitude {
                vehicle,
                z,
                velocity,
                wait_on_last_task,
            } => service(self.set_altitude(&vehicle, z, velocity, wait_on_last_task).await),
            BridgeRequest::SetLocalPosition {
                vehicle,
                x,
                y,
                z,
                yaw,
                wait_on_last_task,
            } => service(
                self.set_local_position(&vehicle, (x, y, z), yaw, wait_on_last_task)
                    .await,
            ),
            BridgeRequest::Reset => self.reset().await.into_reply(),
            BridgeRequest::ListSceneObjectTags { regex_name } => {
                match self.list_scene_object_tags(regex_name.as_deref()).await {
                    Ok((objects, tags)) => BridgeReply::SceneObjects { objects, tags },
                    Err(e) => BridgeReply::rejected(e),
                }
            }
            BridgeRequest::RefreshInstanceSegmentation => {
                match self.refresh_instance_segmentation().await {
                    Ok(n) => BridgeReply::service(true, format!("{n} segmentation labels published")),
                    Err(e) => BridgeReply::service(false, e.to_string()),
                }
            }
            BridgeRequest::RefreshObjectTransforms => match self.refresh_object_transforms().await {
                Ok(n) => BridgeReply::service(true, format!("{n} object transforms published")),
                Err(e) => BridgeReply::service(false, e.to_string()),
            },
            BridgeRequest::CoordinatedHeightAndLand(request) => {
                BridgeReply::Maneuver(self.coordinated_height_and_land(&request).await)
            }
        }
    }
}
