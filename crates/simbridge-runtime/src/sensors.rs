//! [`SensorPoller`] – the heavy sensors, each on its own timer.
//!
//! Lidar, GPU lidar, echo and camera images are too expensive to read on
//! every state tick.  Each [`SensorStream`] runs as its own task with its
//! own period.  Polling only reads from the simulator, so it never takes
//! the control gate and keeps running during a coordinated maneuver.

use std::sync::Arc;
use std::time::Duration;

use simbridge_hal::RemoteVehicleClient;
use simbridge_middleware::EventBus;
use simbridge_perception::camera::camera_info;
use simbridge_perception::PointCloudLayout;
use simbridge_types::msgs::{CameraInfo, Header, Image, PointCloud, StringArray};
use simbridge_types::settings::{SensorKind, SensorSetting};
use simbridge_types::state::{ImageRequest, ImageResponse};
use simbridge_types::{EventPayload, RpcError};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::registry::{VehicleRecord, VehicleRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorStream {
    Lidar,
    GpuLidar,
    Echo,
    Images,
}

impl std::fmt::Display for SensorStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorStream::Lidar => write!(f, "lidar"),
            SensorStream::GpuLidar => write!(f, "gpulidar"),
            SensorStream::Echo => write!(f, "echo"),
            SensorStream::Images => write!(f, "images"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub published: usize,
    pub failed: usize,
}

/// The batched image request for one vehicle and the intrinsics of each
/// capture, index-aligned with the request.
struct CaptureSet {
    vehicle: String,
    requests: Vec<ImageRequest>,
    infos: Vec<CameraInfo>,
}

impl CaptureSet {
    fn for_record(record: &VehicleRecord) -> Option<Self> {
        let vehicle = record.name();
        let mut requests = Vec::new();
        let mut infos = Vec::new();
        for camera in record.cameras() {
            let optical = format!("{vehicle}/{}_optical", camera.name);
            for capture in &camera.captures {
                requests.push(ImageRequest {
                    camera_name: camera.name.clone(),
                    image_type: capture.image_type,
                    pixels_as_float: capture.image_type.is_float(),
                    compress: false,
                    annotation_name: capture.annotation_name.clone(),
                });
                infos.push(camera_info(capture.width, capture.height, capture.fov_degrees, &optical));
            }
        }
        (!requests.is_empty()).then(|| Self {
            vehicle: vehicle.to_string(),
            requests,
            infos,
        })
    }
}

pub struct SensorPoller {
    client: Arc<dyn RemoteVehicleClient>,
    registry: Arc<VehicleRegistry>,
    bus: EventBus,
    captures: Vec<CaptureSet>,
}

impl SensorPoller {
    pub fn new(client: Arc<dyn RemoteVehicleClient>, registry: Arc<VehicleRegistry>, bus: EventBus) -> Self {
        let captures = registry.iter().filter_map(CaptureSet::for_record).collect();
        Self {
            client,
            registry,
            bus,
            captures,
        }
    }

    /// Whether `stream` has anything configured to read.
    pub fn has_work(&self, stream: SensorStream) -> bool {
        match stream {
            SensorStream::Lidar => self.any_sensor(SensorKind::Lidar),
            SensorStream::GpuLidar => self.any_sensor(SensorKind::GpuLidar),
            SensorStream::Echo => self.any_sensor(SensorKind::Echo),
            SensorStream::Images => !self.captures.is_empty(),
        }
    }

    fn any_sensor(&self, kind: SensorKind) -> bool {
        self.registry.iter().any(|r| r.sensors(kind).next().is_some())
    }

    pub async fn poll(&self, stream: SensorStream) -> PollReport {
        match stream {
            SensorStream::Lidar => self.poll_sensors(SensorKind::Lidar).await,
            SensorStream::GpuLidar => self.poll_sensors(SensorKind::GpuLidar).await,
            SensorStream::Echo => self.poll_sensors(SensorKind::Echo).await,
            SensorStream::Images => self.poll_images().await,
        }
    }

    /// Poll `stream` every `period` until `shutdown` flips to `true`.  A
    /// failed read is logged and retried on the next period.
    pub async fn run(
        self: Arc<Self>,
        stream: SensorStream,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
        info!(%stream, period_ms, "sensor poller started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.poll(stream).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(%stream, "sensor poller stopping");
                        return;
                    }
                }
            }
        }
    }

    // ── Point clouds ─────────────────────────────────────────────────────

    async fn poll_sensors(&self, kind: SensorKind) -> PollReport {
        let mut report = PollReport::default();
        for record in self.registry.iter() {
            for sensor in record.sensors(kind) {
                match self.read_cloud(record.name(), sensor).await {
                    Ok(payloads) => {
                        report.published += payloads.len();
                        for payload in payloads {
                            self.bus.emit(record.name(), payload);
                        }
                    }
                    Err(e) => {
                        warn!(vehicle = %record.name(), sensor = %sensor.name, error = %e, "sensor read failed");
                        report.failed += 1;
                    }
                }
            }
        }
        report
    }

    async fn read_cloud(&self, vehicle: &str, sensor: &SensorSetting) -> Result<Vec<EventPayload>, RpcError> {
        let frame = format!("{vehicle}/{}", sensor.name);
        let mut out = Vec::new();
        match sensor.kind {
            SensorKind::Lidar => {
                let r = self.client.get_lidar(vehicle, &sensor.name).await?;
                let header = Header::new(r.timestamp, frame);
                let labels = labels_for(PointCloudLayout::Lidar, &r.point_cloud, r.groundtruth);
                push_cloud(&mut out, &sensor.name, PointCloudLayout::Lidar, r.point_cloud, &header);
                push_labels(&mut out, &sensor.name, labels, header);
            }
            SensorKind::GpuLidar => {
                let r = self.client.get_gpu_lidar(vehicle, &sensor.name).await?;
                let header = Header::new(r.timestamp, frame);
                push_cloud(&mut out, &sensor.name, PointCloudLayout::GpuLidar, r.point_cloud, &header);
            }
            SensorKind::Echo => {
                let r = self.client.get_echo(vehicle, &sensor.name).await?;
                let header = Header::new(r.timestamp, frame);
                if sensor.active {
                    let labels = labels_for(PointCloudLayout::ActiveEcho, &r.point_cloud, r.groundtruth);
                    push_cloud(&mut out, &sensor.name, PointCloudLayout::ActiveEcho, r.point_cloud, &header);
                    push_labels(&mut out, &sensor.name, labels, header.clone());
                }
                if sensor.passive {
                    let passive = format!("{}/passive", sensor.name);
                    let labels = labels_for(
                        PointCloudLayout::PassiveEcho,
                        &r.passive_beacons_point_cloud,
                        r.passive_beacons_groundtruth,
                    );
                    push_cloud(
                        &mut out,
                        &passive,
                        PointCloudLayout::PassiveEcho,
                        r.passive_beacons_point_cloud,
                        &header,
                    );
                    push_labels(&mut out, &passive, labels, header);
                }
            }
            other => debug!(vehicle, sensor = %sensor.name, kind = ?other, "not a polled sensor"),
        }
        Ok(out)
    }

    // ── Images ───────────────────────────────────────────────────────────

    async fn poll_images(&self) -> PollReport {
        let mut report = PollReport::default();
        for set in &self.captures {
            let responses = match self.client.get_images(&set.vehicle, &set.requests).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(vehicle = %set.vehicle, error = %e, "image request failed");
                    report.failed += 1;
                    continue;
                }
            };
            if responses.len() != set.requests.len() {
                warn!(
                    vehicle = %set.vehicle,
                    expected = set.requests.len(),
                    got = responses.len(),
                    "image response count mismatch, dropping batch"
                );
                report.failed += 1;
                continue;
            }
            for (response, info) in responses.into_iter().zip(&set.infos) {
                let mut info = info.clone();
                info.header.stamp = response.timestamp;
                self.bus.emit(set.vehicle.as_str(), EventPayload::CameraInfo(info));
                let image = image_from_response(&set.vehicle, response);
                self.bus.emit(set.vehicle.as_str(), EventPayload::Image(image));
                report.published += 1;
            }
        }
        report
    }
}

/// Whether `data` is too short to publish.  A buffer holding at most one
/// tuple is a no-return sweep.
fn is_empty_sweep(layout: PointCloudLayout, data: &[f32]) -> bool {
    data.len() <= layout.width()
}

/// Labels follow their cloud: an empty sweep publishes no labels.
fn labels_for(layout: PointCloudLayout, data: &[f32], labels: Vec<String>) -> Vec<String> {
    if is_empty_sweep(layout, data) { Vec::new() } else { labels }
}

/// A buffer holding at most one tuple is published as an empty cloud.
fn point_cloud(layout: PointCloudLayout, mut data: Vec<f32>, header: &Header) -> PointCloud {
    if is_empty_sweep(layout, &data) {
        return PointCloud::empty(header.clone());
    }
    let width = layout.width();
    layout.flip(&mut data);
    PointCloud {
        header: header.clone(),
        fields: layout.fields().iter().map(|f| f.to_string()).collect(),
        width: (data.len() / width) as u32,
        data,
    }
}

fn push_cloud(out: &mut Vec<EventPayload>, sensor: &str, layout: PointCloudLayout, data: Vec<f32>, header: &Header) {
    out.push(EventPayload::PointCloud {
        sensor: sensor.to_string(),
        cloud: point_cloud(layout, data, header),
    });
}

fn push_labels(out: &mut Vec<EventPayload>, sensor: &str, data: Vec<String>, header: Header) {
    out.push(EventPayload::Labels {
        sensor: sensor.to_string(),
        labels: StringArray { header, data },
    });
}

/// Float captures become single-channel 32-bit float images; everything
/// else is three-channel 8-bit BGR.
fn image_from_response(vehicle: &str, response: ImageResponse) -> Image {
    let header = Header::new(
        response.timestamp,
        format!("{vehicle}/{}_optical", response.camera_name),
    );
    if response.pixels_as_float {
        Image {
            header,
            width: response.width,
            height: response.height,
            encoding: "32FC1".to_string(),
            step: response.width * 4,
            data: response
                .image_data_float
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect(),
        }
    } else {
        Image {
            header,
            width: response.width,
            height: response.height,
            encoding: "bgr8".to_string(),
            step: response.width * 3,
            data: response.image_data_uint8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbridge_hal::SimClient;
    use simbridge_types::settings::{CameraSetting, CaptureSetting, ImageType, SimMode, VehicleSetting};
    use simbridge_types::state::GeoPoint;
    use simbridge_types::Event;
    use tokio::sync::broadcast;

    fn setup(settings: Vec<VehicleSetting>) -> (Arc<SimClient>, EventBus, SensorPoller) {
        let sim = Arc::new(SimClient::from_settings(SimMode::Multirotor, &settings, GeoPoint::default()));
        let registry = Arc::new(VehicleRegistry::from_settings(SimMode::Multirotor, &settings).unwrap());
        let bus = EventBus::default();
        let poller = SensorPoller::new(sim.clone(), registry, bus.clone());
        (sim, bus, poller)
    }

    fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn clouds(events: &[Event]) -> Vec<(String, PointCloud)> {
        events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::PointCloud { sensor, cloud } => Some((sensor.clone(), cloud.clone())),
                _ => None,
            })
            .collect()
    }

    fn camera(name: &str, captures: Vec<CaptureSetting>) -> CameraSetting {
        CameraSetting {
            name: name.into(),
            external: false,
            captures,
        }
    }

    fn capture(image_type: ImageType, width: u32, height: u32) -> CaptureSetting {
        CaptureSetting {
            image_type,
            width,
            height,
            fov_degrees: 90.0,
            annotation_name: None,
        }
    }

    #[tokio::test]
    async fn lidar_cloud_is_flipped_and_labelled() -> Result<(), Box<dyn std::error::Error>> {
        let (_sim, bus, poller) = setup(vec![
            VehicleSetting::new("drone_1").with_sensor(SensorSetting::new("lidar", SensorKind::Lidar)),
        ]);
        let mut rx = bus.subscribe();
        let report = poller.poll(SensorStream::Lidar).await;
        assert_eq!(report, PollReport { published: 2, failed: 0 });

        let events = drain(&mut rx);
        let (sensor, cloud) = clouds(&events).pop().ok_or("no cloud")?;
        assert_eq!(sensor, "lidar");
        assert_eq!(cloud.header.frame_id, "drone_1/lidar");
        assert_eq!(cloud.width, 2);
        assert_eq!(cloud.fields, vec!["x", "y", "z"]);
        // Simulator returns (1, 0.5, h) for the first point.
        assert_eq!(cloud.data[0], 1.0);
        assert_eq!(cloud.data[1], -0.5);
        assert!(events.iter().any(|e| matches!(
            &e.payload,
            EventPayload::Labels { labels, .. } if labels.data.len() == 2
        )));
        Ok(())
    }

    #[test]
    fn single_tuple_publishes_empty_cloud() {
        let header = Header::new(1, "drone_1/lidar");
        let cloud = point_cloud(PointCloudLayout::Lidar, vec![1.0, 2.0, 3.0], &header);
        assert_eq!(cloud, PointCloud::empty(header.clone()));
        let cloud = point_cloud(PointCloudLayout::GpuLidar, vec![0.0; 5], &header);
        assert!(cloud.data.is_empty());
    }

    #[tokio::test]
    async fn no_return_lidar_sweep_publishes_empty_labels() -> Result<(), Box<dyn std::error::Error>> {
        let (sim, bus, poller) = setup(vec![
            VehicleSetting::new("drone_1").with_sensor(SensorSetting::new("lidar", SensorKind::Lidar)),
        ]);
        sim.set_lidar_returns("drone_1", vec![0.0, 0.0, 0.0], vec!["Ground".into()]);
        let mut rx = bus.subscribe();
        let report = poller.poll(SensorStream::Lidar).await;
        assert_eq!(report, PollReport { published: 2, failed: 0 });

        let events = drain(&mut rx);
        let (_, cloud) = clouds(&events).pop().ok_or("no cloud")?;
        assert!(cloud.data.is_empty());
        assert_eq!(cloud.width, 0);
        let labels = events
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::Labels { labels, .. } => Some(labels),
                _ => None,
            })
            .ok_or("no labels")?;
        assert!(labels.data.is_empty());
        assert_eq!(labels.header.frame_id, "drone_1/lidar");
        Ok(())
    }

    #[test]
    fn labels_are_kept_only_for_a_publishable_sweep() {
        let labels = vec!["Wall".to_string()];
        assert!(labels_for(PointCloudLayout::ActiveEcho, &[0.0; 6], labels.clone()).is_empty());
        assert!(labels_for(PointCloudLayout::PassiveEcho, &[0.0; 9], labels.clone()).is_empty());
        assert_eq!(labels_for(PointCloudLayout::ActiveEcho, &[0.0; 12], labels), vec!["Wall"]);
    }

    #[tokio::test]
    async fn echo_publishes_active_and_passive_when_enabled() -> Result<(), Box<dyn std::error::Error>> {
        let mut echo = SensorSetting::new("sonar", SensorKind::Echo);
        echo.passive = true;
        let (_sim, bus, poller) = setup(vec![VehicleSetting::new("drone_1").with_sensor(echo)]);
        let mut rx = bus.subscribe();
        poller.poll(SensorStream::Echo).await;

        let clouds = clouds(&drain(&mut rx));
        assert_eq!(clouds.len(), 2);
        assert_eq!(clouds[0].0, "sonar");
        assert_eq!(clouds[0].1.width, 2);
        assert_eq!(clouds[1].0, "sonar/passive");
        let passive = &clouds[1].1;
        assert_eq!(passive.width, 2);
        // Doppler components of the first beacon return are negated too.
        assert_eq!(&passive.data[6..9], &[0.1, -0.2, -0.3]);
        Ok(())
    }

    #[tokio::test]
    async fn failing_vehicle_does_not_stop_the_others() {
        let (sim, bus, poller) = setup(vec![
            VehicleSetting::new("a").with_sensor(SensorSetting::new("l", SensorKind::GpuLidar)),
            VehicleSetting::new("b").with_sensor(SensorSetting::new("l", SensorKind::GpuLidar)),
        ]);
        sim.fail_sensor_reads("a");
        let mut rx = bus.subscribe();
        let report = poller.poll(SensorStream::GpuLidar).await;
        assert_eq!(report, PollReport { published: 1, failed: 1 });
        assert_eq!(drain(&mut rx)[0].source, "b");
    }

    #[tokio::test]
    async fn images_carry_encoding_and_restamped_info() -> Result<(), Box<dyn std::error::Error>> {
        let setting = VehicleSetting::new("drone_1").with_camera(camera(
            "front",
            vec![capture(ImageType::Scene, 8, 6), capture(ImageType::DepthPlanar, 8, 6)],
        ));
        let (_sim, bus, poller) = setup(vec![setting]);
        assert!(poller.has_work(SensorStream::Images));
        assert!(!poller.has_work(SensorStream::Lidar));

        let mut rx = bus.subscribe();
        let report = poller.poll(SensorStream::Images).await;
        assert_eq!(report.published, 2);

        let events = drain(&mut rx);
        let images: Vec<&Image> = events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::Image(i) => Some(i),
                _ => None,
            })
            .collect();
        assert_eq!(images[0].encoding, "bgr8");
        assert_eq!(images[0].step, 24);
        assert_eq!(images[0].data.len(), 8 * 6 * 3);
        assert_eq!(images[1].encoding, "32FC1");
        assert_eq!(images[1].step, 32);
        assert_eq!(images[1].data.len(), 8 * 6 * 4);
        assert_eq!(images[1].header.frame_id, "drone_1/front_optical");

        let info = events
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::CameraInfo(i) => Some(i),
                _ => None,
            })
            .ok_or("no camera info")?;
        assert_eq!(info.header.stamp, images[0].header.stamp);
        assert_eq!(info.width, 8);
        Ok(())
    }

    #[tokio::test]
    async fn failed_capture_is_retried_next_period() {
        let setting = VehicleSetting::new("drone_1")
            .with_camera(camera("front", vec![capture(ImageType::Scene, 4, 3)]));
        let (sim, _bus, poller) = setup(vec![setting]);
        sim.fail_sensor_reads("drone_1");
        assert_eq!(poller.poll(SensorStream::Images).await.failed, 1);
        sim.clear_faults();
        assert_eq!(poller.poll(SensorStream::Images).await.published, 1);
    }
}
