//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! This is the bridge's publisher.  It uses [`tokio::sync::broadcast`]
//! channels so every subscriber receives every message without a slow
//! subscriber blocking the state loop.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::VehicleState`] | Odometry, environment, GPS, car / vision state |
//! | [`Topic::Sensors`] | IMU, barometer, magnetometer, range, point clouds, images |
//! | [`Topic::Transforms`] | Odom and static transforms, object transforms |
//! | [`Topic::Clock`] | Simulation clock, origin geo point |
//! | [`Topic::System`] | Vehicle faults, maneuver reports, segmentation lists |

use simbridge_types::{Event, EventPayload};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    VehicleState,
    Sensors,
    Transforms,
    Clock,
    System,
}

impl Topic {
    /// The lane a payload is routed to by [`EventBus::emit`].
    pub fn for_payload(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::Odometry(_)
            | EventPayload::Environment(_)
            | EventPayload::CarState(_)
            | EventPayload::ComputerVisionState(_)
            | EventPayload::GlobalGps(_) => Topic::VehicleState,
            EventPayload::Imu { .. }
            | EventPayload::Altimeter { .. }
            | EventPayload::MagneticField { .. }
            | EventPayload::NavSatFix { .. }
            | EventPayload::Range { .. }
            | EventPayload::PointCloud { .. }
            | EventPayload::Labels { .. }
            | EventPayload::Image(_)
            | EventPayload::CameraInfo(_) => Topic::Sensors,
            EventPayload::Transform(_)
            | EventPayload::StaticTransforms(_)
            | EventPayload::ObjectTransforms(_) => Topic::Transforms,
            EventPayload::Clock { .. } | EventPayload::OriginGeoPoint(_) => Topic::Clock,
            EventPayload::InstanceSegmentation(_)
            | EventPayload::VehicleFault { .. }
            | EventPayload::ManeuverReport(_) => Topic::System,
        }
    }
}

/// Shared event bus.  Clones share the same channels.
///
/// Every event goes to its topic lane and to the global channel, so a
/// consumer can take one lane or everything.
#[derive(Clone, Debug)]
pub struct EventBus {
    global: broadcast::Sender<Event>,
    vehicle_state: broadcast::Sender<Event>,
    sensors: broadcast::Sender<Event>,
    transforms: broadcast::Sender<Event>,
    clock: broadcast::Sender<Event>,
    system: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` applies to every channel independently.
    pub fn new(capacity: usize) -> Self {
        let (global, _) = broadcast::channel(capacity);
        let (vehicle_state, _) = broadcast::channel(capacity);
        let (sensors, _) = broadcast::channel(capacity);
        let (transforms, _) = broadcast::channel(capacity);
        let (clock, _) = broadcast::channel(capacity);
        let (system, _) = broadcast::channel(capacity);
        Self {
            global,
            vehicle_state,
            sensors,
            transforms,
            clock,
            system,
        }
    }

    // -----------------------------------------------------------------------
    // Fan-out
    // -----------------------------------------------------------------------

    /// Wrap `payload` in an [`Event`] and publish it on its topic lane and
    /// the global channel.  Returns how many receivers got it; zero is
    /// normal when nobody listens.
    pub fn emit(&self, source: impl Into<String>, payload: EventPayload) -> usize {
        let topic = Topic::for_payload(&payload);
        let event = Event::new(source, payload);
        let on_topic = self.topic_sender(topic).send(event.clone()).unwrap_or(0);
        let global = self.global.send(event).unwrap_or(0);
        on_topic + global
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// One topic lane.  A receiver that falls behind gets `Lagged(n)`.
    pub fn subscribe_to(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.topic_sender(topic).subscribe()
    }

    /// Every event, whatever its topic.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.global.subscribe()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::VehicleState => &self.vehicle_state,
            Topic::Sensors => &self.sensors,
            Topic::Transforms => &self.transforms,
            Topic::Clock => &self.clock,
            Topic::System => &self.system,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
