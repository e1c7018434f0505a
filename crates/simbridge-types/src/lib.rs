//! Shared data model for the simbridge workspace.
//!
//! Two axis conventions meet here.  Types in [`state`] and [`command`] use
//! the simulator's (X forward, Y right, Z down); types in [`msgs`] use the
//! published one (X forward, Y left, Z up).  Conversion lives in
//! `simbridge-perception` and nowhere else.

pub mod command;
pub mod geometry;
pub mod msgs;
pub mod request;
pub mod settings;
pub mod state;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use command::{CarControls, CommandClass, GimbalCmd, VehicleCommand, VelCmd, YawMode};
pub use geometry::{Pose, Quaternion, Twist, Vec3};
pub use request::{BridgeReply, BridgeRequest, ManeuverRequest, ManeuverResult, VehicleTarget};
pub use state::{SimTimestamp, VehicleKind, VehicleState};

/// Unified event wrapper for the bridge's event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Usually the vehicle name, or `simbridge::<component>` for fleet-wide
    /// events.
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Everything the bridge publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Odometry(msgs::Odometry),
    Environment(msgs::EnvironmentMsg),
    CarState(msgs::CarStateMsg),
    ComputerVisionState(msgs::ComputerVisionStateMsg),
    /// Vehicle GPS, from the multirotor estimate or the environment.
    GlobalGps(msgs::NavSatFix),
    Imu {
        sensor: String,
        msg: msgs::Imu,
    },
    Altimeter {
        sensor: String,
        msg: msgs::Altimeter,
    },
    MagneticField {
        sensor: String,
        msg: msgs::MagneticField,
    },
    NavSatFix {
        sensor: String,
        msg: msgs::NavSatFix,
    },
    Range {
        sensor: String,
        msg: msgs::Range,
    },
    PointCloud {
        sensor: String,
        cloud: msgs::PointCloud,
    },
    Labels {
        sensor: String,
        labels: msgs::StringArray,
    },
    Image(msgs::Image),
    CameraInfo(msgs::CameraInfo),
    Transform(msgs::TransformStamped),
    StaticTransforms(Vec<msgs::TransformStamped>),
    Clock {
        nanos: SimTimestamp,
    },
    OriginGeoPoint(msgs::GpsYaw),
    InstanceSegmentation(msgs::InstanceSegmentationList),
    ObjectTransforms(msgs::ObjectTransformsList),
    /// A vehicle stopped producing fresh state.
    VehicleFault {
        vehicle: String,
        message: String,
    },
    ManeuverReport(ManeuverResult),
}

/// Errors raised at the simulator RPC seam.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcError {
    #[error("{call} failed on {vehicle}: {message}")]
    Call {
        call: String,
        vehicle: String,
        message: String,
    },

    #[error("Unknown vehicle: {0}")]
    UnknownVehicle(String),

    #[error("Simulator disconnected: {0}")]
    Disconnected(String),

    #[error("{call} timed out after {after_ms} ms")]
    Timeout { call: String, after_ms: u64 },
}

impl RpcError {
    pub fn call(call: impl Into<String>, vehicle: impl Into<String>, message: impl Into<String>) -> Self {
        RpcError::Call {
            call: call.into(),
            vehicle: vehicle.into(),
            message: message.into(),
        }
    }
}

/// Workspace-wide error type.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BridgeError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Unknown vehicle: {0}")]
    UnknownVehicle(String),

    #[error("Vehicle {vehicle} is not a {expected}")]
    WrongVehicleKind { vehicle: String, expected: VehicleKind },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unsupported sensor: {0}")]
    UnsupportedSensor(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "drone_1",
            EventPayload::Clock { nanos: 1_500_000_000 },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(back.source, "drone_1");
        assert!(matches!(back.payload, EventPayload::Clock { nanos: 1_500_000_000 }));
    }

    #[test]
    fn rpc_error_converts_into_bridge_error() {
        let err: BridgeError = RpcError::UnknownVehicle("ghost".into()).into();
        assert!(matches!(err, BridgeError::Rpc(RpcError::UnknownVehicle(_))));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn call_error_display_names_call_and_vehicle() {
        let err = RpcError::call("moveToZ", "drone_2", "connection reset");
        let msg = err.to_string();
        assert!(msg.contains("moveToZ"));
        assert!(msg.contains("drone_2"));
    }

    #[test]
    fn wrong_kind_display() {
        let err = BridgeError::WrongVehicleKind {
            vehicle: "car_1".into(),
            expected: VehicleKind::Multirotor,
        };
        assert_eq!(err.to_string(), "Vehicle car_1 is not a multirotor");
    }
}
