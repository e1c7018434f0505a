//! Camera intrinsics for simulated pinhole cameras.

use simbridge_types::msgs::{CameraInfo, Header};

/// Focal length in pixels for a horizontal field of view.  The simulator
/// uses the same value for both axes.
pub fn focal_length(width: u32, fov_degrees: f64) -> f64 {
    (f64::from(width) / 2.0) / (fov_degrees / 2.0).to_radians().tan()
}

/// Intrinsics for one capture.  `frame_id` is the optical frame; the stamp
/// is filled in when an image is published.
pub fn camera_info(width: u32, height: u32, fov_degrees: f64, frame_id: &str) -> CameraInfo {
    let f = focal_length(width, fov_degrees);
    let cx = f64::from(width) / 2.0;
    let cy = f64::from(height) / 2.0;
    CameraInfo {
        header: Header::new(0, frame_id),
        width,
        height,
        k: vec![f, 0.0, cx, 0.0, f, cy, 0.0, 0.0, 1.0],
        p: vec![f, 0.0, cx, 0.0, 0.0, f, cy, 0.0, 0.0, 0.0, 1.0, 0.0],
        r: vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        d: vec![0.0; 5],
    }
}
