//! Image → descriptor seam.

use crate::detector::FaceDetector;
use crate::encoder::FaceEncoder;
use crate::types::{BoundingBox, Descriptor};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("no face detected")]
    NoFace,
    #[error("{0} faces detected, expected exactly one")]
    MultipleFaces(usize),
    #[error("face encoding failed: {0}")]
    EncodingFailed(String),
}

/// The single face found in a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDetection {
    pub location: BoundingBox,
    pub descriptor: Descriptor,
}

/// Turns an RGB frame into exactly one face descriptor.
///
/// Frames with zero or several faces are rejected; registration and
/// recognition both require one face per frame.
pub trait DescriptorExtractor {
    fn extract(&mut self, image: &RgbImage) -> Result<FaceDetection, DetectionError>;
}

impl<T: DescriptorExtractor + ?Sized> DescriptorExtractor for Box<T> {
    fn extract(&mut self, image: &RgbImage) -> Result<FaceDetection, DetectionError> {
        (**self).extract(image)
    }
}

/// SCRFD detection followed by a descriptor network, both via ONNX Runtime.
pub struct OnnxExtractor {
    detector: FaceDetector,
    encoder: FaceEncoder,
}

impl OnnxExtractor {
    pub fn new(detector: FaceDetector, encoder: FaceEncoder) -> Self {
        Self { detector, encoder }
    }
}

impl DescriptorExtractor for OnnxExtractor {
    fn extract(&mut self, image: &RgbImage) -> Result<FaceDetection, DetectionError> {
        let faces = self
            .detector
            .detect(image)
            .map_err(|e| DetectionError::EncodingFailed(e.to_string()))?;

        let face = single_face(faces)?;
        tracing::debug!(
            x = face.x,
            y = face.y,
            width = face.width,
            height = face.height,
            confidence = face.confidence,
            "face located"
        );

        let descriptor = self
            .encoder
            .encode(image, &face)
            .map_err(|e| DetectionError::EncodingFailed(e.to_string()))?;

        Ok(FaceDetection {
            location: face,
            descriptor,
        })
    }
}

/// Enforce the one-face-per-frame rule on a detector's output.
pub fn single_face(mut faces: Vec<BoundingBox>) -> Result<BoundingBox, DetectionError> {
    match faces.len() {
        0 => Err(DetectionError::NoFace),
        1 => Ok(faces.remove(0)),
        n => Err(DetectionError::MultipleFaces(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32) -> BoundingBox {
        BoundingBox {
            x,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            confidence: 0.9,
            landmarks: None,
        }
    }

    #[test]
    fn test_single_face_none() {
        assert_eq!(single_face(vec![]), Err(DetectionError::NoFace));
    }

    #[test]
    fn test_single_face_one() {
        assert_eq!(single_face(vec![bbox(5.0)]), Ok(bbox(5.0)));
    }

    #[test]
    fn test_single_face_many() {
        assert_eq!(
            single_face(vec![bbox(0.0), bbox(50.0), bbox(100.0)]),
            Err(DetectionError::MultipleFaces(3))
        );
    }
}
