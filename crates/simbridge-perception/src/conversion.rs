//! Pure conversion functions.
//!
//! Two different flips are in use and must not be merged:
//!
//! - the **kinematic** flip ([`flip_vec`], [`flip_quat`]) negates Y and Z in
//!   one step and is applied to odometry, twists, IMU vectors and body transforms;
//! - the **static-frame** flip ([`to_static_frame`]) negates Z, then Y, as
//!   two single-axis flips, and is applied to mount points and extrinsics.

use simbridge_types::command::{DrivetrainType, GimbalCmd, VelCmd, YawMode};
use simbridge_types::geometry::{Pose, Quaternion, Twist, Vec3};
use simbridge_types::msgs::{EnvironmentMsg, Header, Imu, Odometry, TransformStamped};
use simbridge_types::settings::Rotation;
use simbridge_types::state::{EnvironmentState, ImuReading, KinematicsState};

// ────────────────────────────────────────────────────────────────────────────
// Kinematic flip
// ────────────────────────────────────────────────────────────────────────────

/// Negate Y and Z.  Its own inverse.
pub fn flip_vec(v: Vec3) -> Vec3 {
    Vec3::new(v.x, -v.y, -v.z)
}

/// Negate the Y and Z parts of the vector half; the scalar is untouched.
pub fn flip_quat(q: Quaternion) -> Quaternion {
    Quaternion::new(q.w, q.x, -q.y, -q.z)
}

pub fn flip_pose(p: Pose) -> Pose {
    Pose::new(flip_vec(p.position), flip_quat(p.orientation))
}

pub fn flip_twist(t: Twist) -> Twist {
    Twist {
        linear: flip_vec(t.linear),
        angular: flip_vec(t.angular),
    }
}

/// Odometry for `vehicle`, with the header in the vehicle frame and the
/// child in `<vehicle>/<odom_frame_id>`.
pub fn odometry_from_kinematics(
    kinematics: &KinematicsState,
    vehicle: &str,
    odom_frame_id: &str,
    stamp: u64,
) -> Odometry {
    Odometry {
        header: Header::new(stamp, vehicle),
        child_frame_id: format!("{vehicle}/{odom_frame_id}"),
        pose: flip_pose(kinematics.pose),
        twist: flip_twist(kinematics.twist),
    }
}

/// Transform broadcast alongside odometry.
pub fn odom_transform(odom: &Odometry) -> TransformStamped {
    TransformStamped {
        header: odom.header.clone(),
        child_frame_id: odom.child_frame_id.clone(),
        translation: odom.pose.position,
        rotation: odom.pose.orientation,
    }
}

/// Environment truth, passed through in the simulator's own frame.
pub fn environment_msg(env: &EnvironmentState, frame_id: &str, stamp: u64) -> EnvironmentMsg {
    EnvironmentMsg {
        header: Header::new(stamp, frame_id),
        position: env.position,
        geo_point: env.geo_point,
        gravity: env.gravity,
        air_pressure: env.air_pressure,
        temperature: env.temperature,
        air_density: env.air_density,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Static-frame flip
// ────────────────────────────────────────────────────────────────────────────

fn flip_z(translation: Vec3, rotation: Quaternion) -> (Vec3, Quaternion) {
    (
        Vec3::new(translation.x, translation.y, -translation.z),
        Quaternion::new(rotation.w, rotation.x, rotation.y, -rotation.z),
    )
}

fn flip_y(translation: Vec3, rotation: Quaternion) -> (Vec3, Quaternion) {
    (
        Vec3::new(translation.x, -translation.y, translation.z),
        Quaternion::new(rotation.w, rotation.x, -rotation.y, rotation.z),
    )
}

/// Convert a mount transform: Z flip, then Y flip.
pub fn to_static_frame(translation: Vec3, rotation: Quaternion) -> (Vec3, Quaternion) {
    let (t, r) = flip_z(translation, rotation);
    flip_y(t, r)
}

/// Rotation taking a camera body frame to its optical frame
/// (roll −90°, yaw −90°).
pub const BODY_TO_OPTICAL: Quaternion = Quaternion {
    w: 0.5,
    x: -0.5,
    y: 0.5,
    z: -0.5,
};

/// Apply the optical rotation on top of an already converted body rotation.
pub fn optical_from_body(body: Quaternion) -> Quaternion {
    body.mul(BODY_TO_OPTICAL)
}

/// Mount rotation from settings (degrees) as a quaternion.
pub fn rotation_from_settings(rotation: &Rotation) -> Quaternion {
    Quaternion::from_rpy_degrees(rotation.roll, rotation.pitch, rotation.yaw)
}

// ────────────────────────────────────────────────────────────────────────────
// Sensors and scene objects
// ────────────────────────────────────────────────────────────────────────────

/// IMU orientation is the inverse of the simulator quaternion; rates and
/// accelerations get the kinematic flip.
pub fn imu_from_reading(reading: &ImuReading, frame_id: &str) -> Imu {
    Imu {
        header: Header::new(reading.timestamp, frame_id),
        orientation: reading.orientation.inverse(),
        angular_velocity: flip_vec(reading.angular_velocity),
        linear_acceleration: flip_vec(reading.linear_acceleration),
    }
}

/// Pose of a scene object relative to `header.frame_id`.  Returns `None`
/// for objects the simulator could not place (NaN position).
pub fn object_transform(name: &str, pose: &Pose, header: &Header) -> Option<TransformStamped> {
    if pose.position.x.is_nan() {
        return None;
    }
    Some(TransformStamped {
        header: header.clone(),
        child_frame_id: name.to_string(),
        translation: flip_vec(pose.position),
        rotation: pose.orientation.inverse(),
    })
}

/// Fixed point layouts the simulator produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointCloudLayout {
    Lidar,
    GpuLidar,
    ActiveEcho,
    PassiveEcho,
}

impl PointCloudLayout {
    /// Floats per point.
    pub fn width(self) -> usize {
        match self {
            PointCloudLayout::Lidar => 3,
            PointCloudLayout::GpuLidar => 5,
            PointCloudLayout::ActiveEcho => 6,
            PointCloudLayout::PassiveEcho => 9,
        }
    }

    /// Extra slots to negate, relative to the Y slot of each tuple.
    pub fn extra_flips(self) -> &'static [usize] {
        match self {
            PointCloudLayout::PassiveEcho => &[1, 6, 7],
            _ => &[1],
        }
    }

    pub fn fields(self) -> &'static [&'static str] {
        match self {
            PointCloudLayout::Lidar => &["x", "y", "z"],
            PointCloudLayout::GpuLidar => &["x", "y", "z", "rgb", "intensity"],
            PointCloudLayout::ActiveEcho => &["x", "y", "z", "a", "d", "r"],
            PointCloudLayout::PassiveEcho => &["x", "y", "z", "a", "d", "r", "xd", "yd", "zd"],
        }
    }

    /// Flip `data` in place with this layout.
    pub fn flip(self, data: &mut [f32]) {
        flip_point_cloud(data, self.width(), self.extra_flips());
    }
}

/// Walk `data` tuple by tuple starting at the Y slot (offset 1), negating it
/// and every `extras` offset past it that is still inside the buffer.
pub fn flip_point_cloud(data: &mut [f32], width: usize, extras: &[usize]) {
    if width == 0 {
        return;
    }
    let len = data.len();
    if len % width != 0 {
        tracing::trace!(len, width, "point cloud ends in a partial tuple");
    }
    let mut i = 1;
    while i < len {
        data[i] = -data[i];
        for &e in extras {
            if i + e < len {
                data[i + e] = -data[i + e];
            }
        }
        i += width;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Outbound commands
// ────────────────────────────────────────────────────────────────────────────

/// World-frame velocity: linear passes through, angular Z becomes a yaw
/// rate in degrees per second.
pub fn world_velocity_command(twist: &Twist) -> VelCmd {
    VelCmd {
        x: twist.linear.x,
        y: twist.linear.y,
        z: twist.linear.z,
        drivetrain: DrivetrainType::MaxDegreeOfFreedom,
        yaw_mode: YawMode {
            is_rate: true,
            yaw_or_rate: twist.angular.z.to_degrees(),
        },
    }
}

/// Body-frame velocity rotated into the world by the vehicle's current yaw.
/// Roll and pitch are assumed zero.
pub fn body_velocity_command(twist: &Twist, sim_orientation: Quaternion) -> VelCmd {
    let (sin, cos) = sim_orientation.yaw().sin_cos();
    VelCmd {
        x: twist.linear.x * cos - twist.linear.y * sin,
        y: twist.linear.x * sin + twist.linear.y * cos,
        ..world_velocity_command(twist)
    }
}

pub fn gimbal_from_quat(vehicle: &str, camera: &str, orientation: Quaternion) -> GimbalCmd {
    GimbalCmd {
        vehicle_name: vehicle.to_string(),
        camera_name: camera.to_string(),
        target_quat: orientation.normalize(),
    }
}

pub fn gimbal_from_euler_degrees(
    vehicle: &str,
    camera: &str,
    roll: f64,
    pitch: f64,
    yaw: f64,
) -> GimbalCmd {
    gimbal_from_quat(vehicle, camera, Quaternion::from_rpy_degrees(roll, pitch, yaw))
}
