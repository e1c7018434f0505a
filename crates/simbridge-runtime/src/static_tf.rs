//! Static transforms built once at startup.
//!
//! Per vehicle, in this order: the vehicle mount (world → vehicle), one
//! body and one optical frame per camera, then one frame per lidar, GPU
//! lidar and echo sensor.  Mount poses go through the static-frame flip.
//! Internal cameras and sensors hang off `<vehicle>/<odom_frame_id>`;
//! external ones off the world frame.
//!
//! Stamps are left at zero.  The state loop restamps every transform with
//! the vehicle time before publishing.

use simbridge_hal::RemoteVehicleClient;
use simbridge_perception::conversion::{optical_from_body, rotation_from_settings, to_static_frame};
use simbridge_types::geometry::{Pose, Quaternion, Vec3};
use simbridge_types::msgs::{Header, TransformStamped};
use simbridge_types::settings::SensorKind;
use simbridge_types::BridgeError;
use tracing::debug;

use crate::registry::VehicleRecord;

#[derive(Debug, Clone, Copy)]
pub struct FrameIds<'a> {
    pub world: &'a str,
    pub odom: &'a str,
}

fn static_transform(parent: &str, child: String, translation: Vec3, rotation: Quaternion) -> TransformStamped {
    let (translation, rotation) = to_static_frame(translation, rotation);
    TransformStamped {
        header: Header::new(0, parent),
        child_frame_id: child,
        translation,
        rotation,
    }
}

/// Every static transform for `record`.
///
/// # Errors
///
/// [`BridgeError::Rpc`] when a camera or sensor mount cannot be read from
/// the simulator.
pub async fn build_static_transforms(
    client: &dyn RemoteVehicleClient,
    record: &VehicleRecord,
    frames: FrameIds<'_>,
) -> Result<Vec<TransformStamped>, BridgeError> {
    let name = record.name();
    let setting = record.setting();
    let internal_parent = format!("{name}/{}", frames.odom);
    let parent_for = |external: bool| {
        if external {
            frames.world.to_string()
        } else {
            internal_parent.clone()
        }
    };

    let mut transforms = vec![static_transform(
        frames.world,
        name.to_string(),
        setting.position.unwrap_or_default(),
        rotation_from_settings(&setting.rotation.unwrap_or_default()),
    )];

    for camera in record.cameras() {
        let info = client.get_camera_info(name, &camera.name).await?;
        let body = static_transform(
            &parent_for(camera.external),
            format!("{name}/{}_body", camera.name),
            info.pose.position,
            info.pose.orientation,
        );
        let optical = TransformStamped {
            child_frame_id: format!("{name}/{}_optical", camera.name),
            rotation: optical_from_body(body.rotation),
            ..body.clone()
        };
        transforms.push(body);
        transforms.push(optical);
    }

    for kind in [SensorKind::Lidar, SensorKind::GpuLidar, SensorKind::Echo] {
        for sensor in record.sensors(kind) {
            let pose = sensor_pose(client, name, &sensor.name, kind).await?;
            transforms.push(static_transform(
                &parent_for(sensor.external),
                format!("{name}/{}", sensor.name),
                pose.position,
                pose.orientation,
            ));
        }
    }

    debug!(vehicle = %name, count = transforms.len(), "static transforms built");
    Ok(transforms)
}

async fn sensor_pose(
    client: &dyn RemoteVehicleClient,
    vehicle: &str,
    sensor: &str,
    kind: SensorKind,
) -> Result<Pose, BridgeError> {
    Ok(match kind {
        SensorKind::Lidar => client.get_lidar(vehicle, sensor).await?.pose,
        SensorKind::GpuLidar => client.get_gpu_lidar(vehicle, sensor).await?.pose,
        SensorKind::Echo => client.get_echo(vehicle, sensor).await?.pose,
        other => {
            return Err(BridgeError::UnsupportedSensor(format!(
                "{sensor} ({other:?}) has no mount transform"
            )));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbridge_hal::SimClient;
    use simbridge_perception::conversion::BODY_TO_OPTICAL;
    use simbridge_types::settings::{CameraSetting, Rotation, SensorSetting, SimMode, VehicleSetting};
    use simbridge_types::state::GeoPoint;

    const FRAMES: FrameIds<'static> = FrameIds {
        world: "world",
        odom: "odom_local",
    };

    fn setup(setting: VehicleSetting) -> (SimClient, VehicleRecord) {
        let sim = SimClient::from_settings(SimMode::Multirotor, &[setting.clone()], GeoPoint::default());
        let record = VehicleRecord::new(SimMode::Multirotor.vehicle_kind(), setting);
        (sim, record)
    }

    #[tokio::test]
    async fn vehicle_mount_uses_static_flip() -> Result<(), Box<dyn std::error::Error>> {
        let setting = VehicleSetting {
            position: Some(Vec3::new(1.0, 2.0, 3.0)),
            rotation: Some(Rotation {
                yaw: 90.0,
                ..Rotation::default()
            }),
            ..VehicleSetting::new("drone_1")
        };
        let (sim, record) = setup(setting);
        let tfs = build_static_transforms(&sim, &record, FRAMES).await?;

        assert_eq!(tfs.len(), 1);
        assert_eq!(tfs[0].header.frame_id, "world");
        assert_eq!(tfs[0].child_frame_id, "drone_1");
        assert_eq!(tfs[0].translation, Vec3::new(1.0, -2.0, -3.0));
        let q = Quaternion::from_rpy_degrees(0.0, 0.0, 90.0);
        assert!((tfs[0].rotation.z + q.z).abs() < 1e-9);
        assert!((tfs[0].rotation.w - q.w).abs() < 1e-9);
        Ok(())
    }

    #[tokio::test]
    async fn camera_gets_body_and_optical_frames() -> Result<(), Box<dyn std::error::Error>> {
        let camera = CameraSetting {
            name: "front".into(),
            external: false,
            captures: Vec::new(),
        };
        let (sim, record) = setup(VehicleSetting::new("drone_1").with_camera(camera));
        let tfs = build_static_transforms(&sim, &record, FRAMES).await?;

        assert_eq!(tfs.len(), 3);
        let body = &tfs[1];
        let optical = &tfs[2];
        assert_eq!(body.header.frame_id, "drone_1/odom_local");
        assert_eq!(body.child_frame_id, "drone_1/front_body");
        // Default simulator mount (0.5, 0, 0.1) after Z then Y flips.
        assert_eq!(body.translation, Vec3::new(0.5, 0.0, -0.1));
        assert_eq!(optical.child_frame_id, "drone_1/front_optical");
        assert_eq!(optical.translation, body.translation);
        assert_eq!(optical.rotation, body.rotation.mul(BODY_TO_OPTICAL));
        Ok(())
    }

    #[tokio::test]
    async fn external_sensors_parent_to_world() -> Result<(), Box<dyn std::error::Error>> {
        let mut external = SensorSetting::new("tower", SensorKind::Lidar);
        external.external = true;
        let setting = VehicleSetting::new("drone_1")
            .with_sensor(SensorSetting::new("imu", SensorKind::Imu))
            .with_sensor(SensorSetting::new("roof", SensorKind::GpuLidar))
            .with_sensor(external)
            .with_sensor(SensorSetting::new("sonar", SensorKind::Echo));
        let (sim, record) = setup(setting);
        let tfs = build_static_transforms(&sim, &record, FRAMES).await?;

        let parents: Vec<(&str, &str)> = tfs
            .iter()
            .skip(1)
            .map(|t| (t.child_frame_id.as_str(), t.header.frame_id.as_str()))
            .collect();
        assert_eq!(
            parents,
            vec![
                ("drone_1/tower", "world"),
                ("drone_1/roof", "drone_1/odom_local"),
                ("drone_1/sonar", "drone_1/odom_local"),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn unreadable_mount_is_an_error() {
        let (sim, record) = setup(
            VehicleSetting::new("drone_1").with_sensor(SensorSetting::new("lidar", SensorKind::Lidar)),
        );
        sim.fail_sensor_reads("drone_1");
        let err = build_static_transforms(&sim, &record, FRAMES).await.unwrap_err();
        assert!(matches!(err, BridgeError::Rpc(_)));
    }
}
