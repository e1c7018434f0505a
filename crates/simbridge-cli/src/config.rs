//! Bridge configuration – `~/.simbridge/config.toml`, or the path given as
//! the first argument.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use simbridge_runtime::BridgeConfig;
use simbridge_types::settings::{SensorKind, SensorSetting, SimMode, VehicleSetting};
use simbridge_types::state::GeoPoint;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// WebSocket port for bus subscribers and request clients.
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    #[serde(default = "default_state_period")]
    pub update_state_every_n_sec: f64,
    #[serde(default = "default_sensor_period")]
    pub update_lidar_every_n_sec: f64,
    #[serde(default = "default_sensor_period")]
    pub update_gpulidar_every_n_sec: f64,
    #[serde(default = "default_sensor_period")]
    pub update_echo_every_n_sec: f64,
    #[serde(default = "default_camera_period")]
    pub update_camera_every_n_sec: f64,

    #[serde(default)]
    pub publish_clock: bool,
    #[serde(default = "default_world_frame")]
    pub world_frame_id: String,
    #[serde(default = "default_odom_frame")]
    pub odom_frame_id: String,
    #[serde(default)]
    pub enable_api_control: bool,
    #[serde(default = "default_true")]
    pub enable_object_transforms_list: bool,

    /// How long each velocity set-point is held by the simulator.
    #[serde(default = "default_vel_cmd_duration")]
    pub vel_cmd_duration: f64,
    /// Bound on `wait_on_last_task` waits.  Absent means wait indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_wait_timeout_sec: Option<f64>,
    #[serde(default = "default_stale_after")]
    pub stale_state_after_sec: f64,

    /// Fixed origin; defaults to where the first vehicle starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<GeoPoint>,

    #[serde(default)]
    pub sim_mode: SimMode,
    #[serde(default = "default_vehicles")]
    pub vehicles: Vec<VehicleSetting>,
}

fn default_ws_port() -> u16 {
    9090
}
fn default_state_period() -> f64 {
    0.01
}
fn default_sensor_period() -> f64 {
    0.01
}
fn default_camera_period() -> f64 {
    0.05
}
fn default_world_frame() -> String {
    "world".to_string()
}
fn default_odom_frame() -> String {
    "odom_local".to_string()
}
fn default_true() -> bool {
    true
}
fn default_vel_cmd_duration() -> f64 {
    0.05
}
fn default_stale_after() -> f64 {
    1.0
}
fn default_vehicles() -> Vec<VehicleSetting> {
    vec![
        VehicleSetting::new("drone_1")
            .with_sensor(SensorSetting::new("imu", SensorKind::Imu))
            .with_sensor(SensorSetting::new("gps", SensorKind::Gps)),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_port: default_ws_port(),
            update_state_every_n_sec: default_state_period(),
            update_lidar_every_n_sec: default_sensor_period(),
            update_gpulidar_every_n_sec: default_sensor_period(),
            update_echo_every_n_sec: default_sensor_period(),
            update_camera_every_n_sec: default_camera_period(),
            publish_clock: false,
            world_frame_id: default_world_frame(),
            odom_frame_id: default_odom_frame(),
            enable_api_control: false,
            enable_object_transforms_list: true,
            vel_cmd_duration: default_vel_cmd_duration(),
            task_wait_timeout_sec: None,
            stale_state_after_sec: default_stale_after(),
            origin: None,
            sim_mode: SimMode::default(),
            vehicles: default_vehicles(),
        }
    }
}

/// Seconds to a [`Duration`], falling back on negative or non-finite input.
fn secs(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value)
        .or_else(|_| Duration::try_from_secs_f64(fallback))
        .unwrap_or_default()
}

impl Config {
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            ws_addr: SocketAddr::from(([0, 0, 0, 0], self.ws_port)),
            state_period: secs(self.update_state_every_n_sec, default_state_period()),
            lidar_period: secs(self.update_lidar_every_n_sec, default_sensor_period()),
            gpu_lidar_period: secs(self.update_gpulidar_every_n_sec, default_sensor_period()),
            echo_period: secs(self.update_echo_every_n_sec, default_sensor_period()),
            camera_period: secs(self.update_camera_every_n_sec, default_camera_period()),
            publish_clock: self.publish_clock,
            world_frame_id: self.world_frame_id.clone(),
            odom_frame_id: self.odom_frame_id.clone(),
            enable_api_control: self.enable_api_control,
            enable_object_transforms_list: self.enable_object_transforms_list,
            vel_cmd_duration: secs(self.vel_cmd_duration, default_vel_cmd_duration()),
            task_wait_timeout: self
                .task_wait_timeout_sec
                .and_then(|s| Duration::try_from_secs_f64(s).ok()),
            stale_after: secs(self.stale_state_after_sec, default_stale_after()),
            origin: self.origin,
        }
    }
}

/// `~/.simbridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".simbridge").join("config.toml")
}

/// Load from `path`.  `Ok(None)` when the file does not exist.
///
/// A malformed file is an error: unknown sensor or image types must stop
/// startup rather than silently drop a stream.
pub fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `SIMBRIDGE_*` overrides.  Unparseable values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `SIMBRIDGE_WS_PORT` | `ws_port` |
/// | `SIMBRIDGE_PUBLISH_CLOCK` | `publish_clock` |
/// | `SIMBRIDGE_ENABLE_API_CONTROL` | `enable_api_control` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SIMBRIDGE_WS_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.ws_port = port;
    }
    if let Ok(v) = std::env::var("SIMBRIDGE_PUBLISH_CLOCK")
        && let Ok(flag) = v.parse::<bool>()
    {
        cfg.publish_clock = flag;
    }
    if let Ok(v) = std::env::var("SIMBRIDGE_ENABLE_API_CONTROL")
        && let Ok(flag) = v.parse::<bool>()
    {
        cfg.enable_api_control = flag;
    }
}

/// Write `cfg` to `path`, owner-only on Unix.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbridge_types::settings::ImageType;

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.odom_frame_id, "odom_local");
        assert_eq!(loaded.vehicles.len(), 1);
        assert_eq!(loaded.vehicles[0].sensors.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn saved_config_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let mode = std::fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        let parent = path.parent().expect("parent");
        let dir_mode = std::fs::metadata(parent).expect("meta").permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn partial_file_takes_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bridge.toml");
        std::fs::write(
            &path,
            r#"
sim_mode = "car"
update_camera_every_n_sec = 0.2
task_wait_timeout_sec = 15.0

[[vehicles]]
name = "car_1"
rotation = { yaw = 90.0 }

[[vehicles.cameras]]
name = "front_center"

[[vehicles.cameras.captures]]
image_type = "depth_planar"
width = 320
height = 240
fov_degrees = 90.0

[[vehicles.sensors]]
name = "lidar"
type = "lidar"
external = true
"#,
        )
        .expect("write");

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.sim_mode, SimMode::Car);
        assert!(cfg.enable_object_transforms_list);
        let car = &cfg.vehicles[0];
        assert_eq!(car.rotation.expect("rotation").pitch, 0.0);
        assert_eq!(car.cameras[0].captures[0].image_type, ImageType::DepthPlanar);
        assert!(car.sensors[0].external);

        let bridge = cfg.bridge_config();
        assert_eq!(bridge.camera_period, Duration::from_millis(200));
        assert_eq!(bridge.task_wait_timeout, Some(Duration::from_secs(15)));
        assert_eq!(bridge.world_frame_id, "world");
    }

    #[test]
    fn unknown_sensor_type_is_fatal() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("bad.toml");
        std::fs::write(
            &path,
            r#"
[[vehicles]]
name = "drone_1"

[[vehicles.sensors]]
name = "radar"
type = "radar"
"#,
        )
        .expect("write");
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn bad_periods_fall_back() {
        let cfg = Config {
            update_state_every_n_sec: -1.0,
            vel_cmd_duration: f64::NAN,
            ..Config::default()
        };
        let bridge = cfg.bridge_config();
        assert_eq!(bridge.state_period, Duration::from_millis(10));
        assert_eq!(bridge.vel_cmd_duration, Duration::from_millis(50));
    }

    #[test]
    fn env_overrides_port_and_ignores_garbage() {
        // SAFETY: only this test touches SIMBRIDGE_WS_PORT.
        unsafe { std::env::set_var("SIMBRIDGE_WS_PORT", "9191") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.ws_port, 9191);

        unsafe { std::env::set_var("SIMBRIDGE_WS_PORT", "not-a-port") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.ws_port, 9090);
        unsafe { std::env::remove_var("SIMBRIDGE_WS_PORT") };
    }

    #[test]
    fn env_overrides_flags() {
        // SAFETY: only this test touches these variables.
        unsafe {
            std::env::set_var("SIMBRIDGE_PUBLISH_CLOCK", "true");
            std::env::set_var("SIMBRIDGE_ENABLE_API_CONTROL", "yes please");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(cfg.publish_clock);
        assert!(!cfg.enable_api_control);
        unsafe {
            std::env::remove_var("SIMBRIDGE_PUBLISH_CLOCK");
            std::env::remove_var("SIMBRIDGE_ENABLE_API_CONTROL");
        }
    }

    #[test]
    fn config_path_points_to_simbridge_dir() {
        let p = config_path_for_home("/home/pilot");
        assert!(p.to_string_lossy().contains(".simbridge"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }
}
