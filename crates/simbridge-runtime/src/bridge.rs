//! [`SimBridge`] – connects to the simulator, prepares the fleet, and runs
//! every loop until shutdown.
//!
//! Startup order: confirm the connection, take API control and arm when
//! configured, resolve the origin, build static transforms, publish the
//! scene lists.  [`SimBridge::spawn`] then starts the state loop, one
//! sensor poller per stream with work, and the WebSocket server, all
//! stopped by the same `watch` channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use simbridge_hal::RemoteVehicleClient;
use simbridge_kernel::ControlGate;
use simbridge_middleware::{EventBus, WsBridge};
use simbridge_types::msgs::GpsYaw;
use simbridge_types::settings::{SimMode, VehicleSetting};
use simbridge_types::state::GeoPoint;
use simbridge_types::{BridgeError, VehicleKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::dispatcher::CommandDispatcher;
use crate::registry::VehicleRegistry;
use crate::sensors::{SensorPoller, SensorStream};
use crate::services::FleetServices;
use crate::state_sync::{StateSyncConfig, StateSyncLoop};
use crate::static_tf::{FrameIds, build_static_transforms};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub ws_addr: SocketAddr,
    pub state_period: Duration,
    pub lidar_period: Duration,
    pub gpu_lidar_period: Duration,
    pub echo_period: Duration,
    pub camera_period: Duration,
    pub publish_clock: bool,
    pub world_frame_id: String,
    pub odom_frame_id: String,
    pub enable_api_control: bool,
    pub enable_object_transforms_list: bool,
    pub vel_cmd_duration: Duration,
    /// Bound on `wait_on_last_task` waits; `None` waits for completion.
    pub task_wait_timeout: Option<Duration>,
    pub stale_after: Duration,
    /// Fixed origin.  When absent the first vehicle's environment position
    /// is used.
    pub origin: Option<GeoPoint>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ws_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
            state_period: Duration::from_millis(10),
            lidar_period: Duration::from_millis(10),
            gpu_lidar_period: Duration::from_millis(10),
            echo_period: Duration::from_millis(10),
            camera_period: Duration::from_millis(50),
            publish_clock: false,
            world_frame_id: "world".to_string(),
            odom_frame_id: "odom_local".to_string(),
            enable_api_control: false,
            enable_object_transforms_list: true,
            vel_cmd_duration: Duration::from_millis(50),
            task_wait_timeout: None,
            stale_after: Duration::from_secs(1),
            origin: None,
        }
    }
}

impl BridgeConfig {
    fn period(&self, stream: SensorStream) -> Duration {
        match stream {
            SensorStream::Lidar => self.lidar_period,
            SensorStream::GpuLidar => self.gpu_lidar_period,
            SensorStream::Echo => self.echo_period,
            SensorStream::Images => self.camera_period,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SimBridge
// ─────────────────────────────────────────────────────────────────────────────

pub struct SimBridge {
    client: Arc<dyn RemoteVehicleClient>,
    registry: Arc<VehicleRegistry>,
    gate: Arc<ControlGate>,
    bus: EventBus,
    services: Arc<FleetServices>,
    config: BridgeConfig,
    origin: GpsYaw,
}

impl SimBridge {
    /// Prepare the fleet described by `settings`.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal: an unreachable simulator, a bad vehicle
    /// list, a refused API-control request, or an unreadable sensor mount.
    pub async fn connect(
        client: Arc<dyn RemoteVehicleClient>,
        mode: SimMode,
        settings: &[VehicleSetting],
        config: BridgeConfig,
        bus: EventBus,
    ) -> Result<Self, BridgeError> {
        client.confirm_connection().await?;
        let registry = Arc::new(VehicleRegistry::from_settings(mode, settings)?);
        info!(vehicles = registry.len(), ?mode, "connected to simulator");

        if config.enable_api_control {
            for record in registry.iter() {
                client.enable_api_control(true, record.name()).await?;
                if record.kind() == VehicleKind::Multirotor
                    && !client.arm_disarm(true, record.name()).await?
                {
                    warn!(vehicle = %record.name(), "arming refused");
                }
            }
        }

        let origin = match config.origin {
            Some(point) => GpsYaw::from(point),
            None => match registry.iter().next() {
                Some(first) => GpsYaw::from(client.get_environment(first.name()).await?.geo_point),
                None => GpsYaw::default(),
            },
        };

        let frames = FrameIds {
            world: &config.world_frame_id,
            odom: &config.odom_frame_id,
        };
        for record in registry.iter() {
            let transforms = build_static_transforms(client.as_ref(), record, frames).await?;
            record.set_static_transforms(transforms);
        }

        let gate = Arc::new(ControlGate::new());
        let services = Arc::new(FleetServices::new(
            Arc::clone(&client),
            Arc::clone(&registry),
            Arc::clone(&gate),
            bus.clone(),
            config.world_frame_id.clone(),
            config.task_wait_timeout,
        ));

        if let Err(e) = services.refresh_instance_segmentation().await {
            warn!(error = %e, "instance segmentation list unavailable");
        }
        if config.enable_object_transforms_list
            && let Err(e) = services.refresh_object_transforms().await
        {
            warn!(error = %e, "object transforms list unavailable");
        }

        Ok(Self {
            client,
            registry,
            gate,
            bus,
            services,
            config,
            origin,
        })
    }

    pub fn registry(&self) -> &Arc<VehicleRegistry> {
        &self.registry
    }

    pub fn services(&self) -> Arc<FleetServices> {
        Arc::clone(&self.services)
    }

    pub fn origin(&self) -> GpsYaw {
        self.origin
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The state loop with its dispatcher, built from this bridge's config.
    pub fn state_loop(&self) -> StateSyncLoop {
        let dispatcher = CommandDispatcher::new(
            Arc::clone(&self.client),
            Arc::clone(&self.registry),
            Arc::clone(&self.gate),
            self.config.vel_cmd_duration,
            self.config.enable_api_control,
        );
        StateSyncLoop::new(
            Arc::clone(&self.client),
            Arc::clone(&self.registry),
            self.bus.clone(),
            dispatcher,
            StateSyncConfig {
                odom_frame_id: self.config.odom_frame_id.clone(),
                publish_clock: self.config.publish_clock,
                stale_after: self.config.stale_after,
                origin: self.origin,
            },
        )
    }

    /// Start every loop.  All of them return once `shutdown` flips to
    /// `true`.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![tokio::spawn(
            self.state_loop()
                .run(self.config.state_period, shutdown.clone()),
        )];

        let poller = Arc::new(SensorPoller::new(
            Arc::clone(&self.client),
            Arc::clone(&self.registry),
            self.bus.clone(),
        ));
        for stream in [
            SensorStream::Lidar,
            SensorStream::GpuLidar,
            SensorStream::Echo,
            SensorStream::Images,
        ] {
            if poller.has_work(stream) {
                handles.push(tokio::spawn(Arc::clone(&poller).run(
                    stream,
                    self.config.period(stream),
                    shutdown.clone(),
                )));
            }
        }

        let ws = WsBridge::new(Arc::new(self.bus.clone()), self.services.clone());
        let addr = self.config.ws_addr;
        handles.push(tokio::spawn(async move {
            if let Err(e) = ws.run_ws_server(addr, shutdown).await {
                error!(error = %e, "WebSocket bridge stopped");
            }
        }));

        info!(tasks = handles.len(), "bridge running");
        handles
    }
}
