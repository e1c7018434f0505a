//! `simbridge-perception` – coordinate conversion between the simulator and
//! the published convention.
//!
//! The simulator reports X forward, Y right, Z down.  Subscribers expect
//! X forward, Y left, Z up.  Every function here is pure; callers own the
//! data and decide when to convert.
//!
//! # Modules
//!
//! - [`conversion`] – kinematic flip, static-frame flip, optical rotation,
//!   IMU and object poses, point clouds, and outbound velocity / gimbal
//!   commands.
//! - [`camera`] – pinhole [`CameraInfo`][simbridge_types::msgs::CameraInfo]
//!   from a capture's width, height and field of view.

pub mod camera;
pub mod conversion;

pub use conversion::PointCloudLayout;
