//! Inbound requests accepted over the bridge, and the replies sent back.
//!
//! Requests are internally tagged on `op` with arguments under `args`:
//!
//! ```json
//! { "op": "takeoff", "args": { "vehicles": "all", "wait_on_last_task": true } }
//! ```

use serde::{Deserialize, Serialize};

use crate::command::CarControls;
use crate::geometry::{Quaternion, Twist};

/// Which vehicles a request addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VehicleTarget {
    /// The literal string `"all"`.
    All(AllVehicles),
    One(String),
    Group(Vec<String>),
}

/// Marker for [`VehicleTarget::All`]; serializes as `"all"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllVehicles {
    All,
}

impl VehicleTarget {
    pub fn all() -> Self {
        VehicleTarget::All(AllVehicles::All)
    }

    pub fn one(name: impl Into<String>) -> Self {
        VehicleTarget::One(name.into())
    }
}

/// Frame a velocity command is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VelFrame {
    #[default]
    Body,
    World,
}

fn default_ascent_speed() -> f64 {
    2.0
}

fn default_hover_time() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

/// Raise-hold-land request for a set of vehicles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManeuverRequest {
    /// Empty means every registered vehicle.
    #[serde(default)]
    pub vehicle_names: Vec<String>,
    /// Simulator-convention Z (negative is up).
    pub target_height: f64,
    #[serde(default = "default_ascent_speed")]
    pub ascent_speed: f64,
    #[serde(default = "default_hover_time")]
    pub hover_time: f64,
    #[serde(default = "default_true")]
    pub wait_on_last_task: bool,
}

impl ManeuverRequest {
    pub fn new(target_height: f64) -> Self {
        Self {
            vehicle_names: Vec::new(),
            target_height,
            ascent_speed: default_ascent_speed(),
            hover_time: default_hover_time(),
            wait_on_last_task: true,
        }
    }
}

/// Aggregate outcome of a coordinated maneuver.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ManeuverResult {
    pub success: bool,
    pub message: String,
    /// Wall-clock seconds for the whole operation.
    pub total_time: f64,
    pub vehicles_attempted: usize,
    pub vehicles_completed: usize,
    pub failed_vehicles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum BridgeRequest {
    VelCmd {
        vehicles: VehicleTarget,
        #[serde(default)]
        frame: VelFrame,
        twist: Twist,
    },
    CarCmd {
        vehicle: String,
        controls: CarControls,
    },
    GimbalQuat {
        vehicle: String,
        camera: String,
        orientation: Quaternion,
    },
    GimbalEuler {
        vehicle: String,
        camera: String,
        roll: f64,
        pitch: f64,
        yaw: f64,
    },
    Takeoff {
        vehicles: VehicleTarget,
        #[serde(default)]
        wait_on_last_task: bool,
    },
    Land {
        vehicles: VehicleTarget,
        #[serde(default)]
        wait_on_last_task: bool,
    },
    SetAltitude {
        vehicle: String,
        z: f64,
        #[serde(default)]
        velocity: f64,
        #[serde(default)]
        wait_on_last_task: bool,
    },
    SetLocalPosition {
        vehicle: String,
        x: f64,
        y: f64,
        z: f64,
        #[serde(default)]
        yaw: f64,
        #[serde(default)]
        wait_on_last_task: bool,
    },
    Reset,
    ListSceneObjectTags {
        #[serde(default)]
        regex_name: Option<String>,
    },
    RefreshInstanceSegmentation,
    RefreshObjectTransforms,
    CoordinatedHeightAndLand(ManeuverRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BridgeReply {
    /// A latch write was accepted.
    Accepted,
    Rejected {
        reason: String,
    },
    Service {
        success: bool,
        message: String,
    },
    SceneObjects {
        objects: Vec<String>,
        tags: Vec<String>,
    },
    Maneuver(ManeuverResult),
}

impl BridgeReply {
    pub fn rejected(reason: impl ToString) -> Self {
        BridgeReply::Rejected {
            reason: reason.to_string(),
        }
    }

    pub fn service(success: bool, message: impl Into<String>) -> Self {
        BridgeReply::Service {
            success,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_parses_all_one_and_group() {
        let all: VehicleTarget = serde_json::from_str(r#""all""#).unwrap();
        assert_eq!(all, VehicleTarget::all());
        let one: VehicleTarget = serde_json::from_str(r#""drone_1""#).unwrap();
        assert_eq!(one, VehicleTarget::one("drone_1"));
        let group: VehicleTarget = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(group, VehicleTarget::Group(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn maneuver_request_defaults() {
        let json = r#"{"op":"coordinated_height_and_land","args":{"target_height":-10.0}}"#;
        let req: BridgeRequest = serde_json::from_str(json).unwrap();
        let BridgeRequest::CoordinatedHeightAndLand(m) = req else {
            panic!("unexpected variant");
        };
        assert!(m.vehicle_names.is_empty());
        assert_eq!(m.ascent_speed, 2.0);
        assert_eq!(m.hover_time, 2.0);
        assert!(m.wait_on_last_task);
    }

    #[test]
    fn unit_request_has_no_args() {
        let req: BridgeRequest = serde_json::from_str(r#"{"op":"reset"}"#).unwrap();
        assert_eq!(req, BridgeRequest::Reset);
    }

    #[test]
    fn reply_is_tagged_by_status() {
        let json = serde_json::to_value(BridgeReply::service(true, "ok")).unwrap();
        assert_eq!(json["status"], "service");
        assert_eq!(json["success"], true);
    }
}
