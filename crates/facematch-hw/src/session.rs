//! Lazily opened camera shared across requests.

use crate::camera::{Camera, CameraError};
use image::RgbImage;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub device: String,
    /// Settle time after opening, before the first frame is read.
    pub init_delay: Duration,
    pub mirror: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".into(),
            init_delay: Duration::from_millis(500),
            mirror: true,
        }
    }
}

/// Owns at most one open [`Camera`]. Opening is deferred to the first
/// capture; the device stays open until [`release`](Self::release) or drop.
pub struct CaptureSession {
    config: SessionConfig,
    camera: Option<Camera>,
}

impl CaptureSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            camera: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.camera.is_some()
    }

    /// Open the device if it is not open yet. Blocks for the init delay.
    pub fn open(&mut self) -> Result<&Camera, CameraError> {
        if self.camera.is_none() {
            let camera = Camera::open(&self.config.device)?;
            if !self.config.init_delay.is_zero() {
                std::thread::sleep(self.config.init_delay);
            }
            self.camera = Some(camera);
        }
        self.camera
            .as_ref()
            .ok_or_else(|| CameraError::DeviceNotFound(self.config.device.clone()))
    }

    /// Read one frame, mirrored if configured.
    pub fn capture(&mut self) -> Result<RgbImage, CameraError> {
        let mirror = self.config.mirror;
        let frame = self.open()?.capture_frame()?;
        tracing::debug!(seq = frame.sequence, width = frame.width(), height = frame.height(), "frame captured");

        if mirror {
            Ok(crate::frame::mirror(&frame.image))
        } else {
            Ok(frame.image)
        }
    }

    /// Close the device. Returns whether it was open.
    pub fn release(&mut self) -> bool {
        match self.camera.take() {
            Some(camera) => {
                tracing::info!(device = %camera.device_path, "camera released");
                true
            }
            None => false,
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}
