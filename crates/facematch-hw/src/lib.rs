//! facematch-hw — Camera capture for the face match daemon.
//!
//! V4L2 access through the `v4l` crate, pixel format conversion to RGB, and a
//! lazily opened [`CaptureSession`] shared across requests.

pub mod camera;
pub mod frame;
pub mod session;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat, Resolution};
pub use frame::Frame;
pub use session::{CaptureSession, SessionConfig};
