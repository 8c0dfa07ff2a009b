//! Face descriptor network via ONNX Runtime.
//!
//! Crops the detected face (with a margin) from the RGB frame, resizes it to
//! the network's square input and runs inference. The output length must match
//! the configured descriptor dimension.

use crate::types::{BoundingBox, Descriptor};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5;
/// Extra context around the detector box, as a fraction of its larger side.
const CROP_MARGIN: f32 = 0.2;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("encoder model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("expected {want}-dim descriptor, network produced {got}")]
    DimensionMismatch { got: usize, want: usize },
    #[error("face box lies outside the frame")]
    EmptyCrop,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Shape of the descriptor network.
#[derive(Debug, Clone, Copy)]
pub struct EncoderOptions {
    /// Side of the square input crop in pixels.
    pub input_size: u32,
    /// Descriptor length produced by the network.
    pub dim: usize,
    /// Scale descriptors to unit length.
    pub normalize: bool,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            input_size: 112,
            dim: 128,
            normalize: false,
        }
    }
}

pub struct FaceEncoder {
    session: Session,
    options: EncoderOptions,
}

impl FaceEncoder {
    pub fn load(model_path: &str, options: EncoderOptions) -> Result<Self, EncoderError> {
        if !Path::new(model_path).exists() {
            return Err(EncoderError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            input_size = options.input_size,
            dim = options.dim,
            normalize = options.normalize,
            "loaded descriptor network"
        );

        Ok(Self { session, options })
    }

    /// Compute the descriptor of `face` within `image`.
    pub fn encode(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Descriptor, EncoderError> {
        let crop = crop_face(image, face, self.options.input_size).ok_or(EncoderError::EmptyCrop)?;
        let input = to_tensor(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("descriptor output: {e}")))?;

        if raw.len() != self.options.dim {
            return Err(EncoderError::DimensionMismatch {
                got: raw.len(),
                want: self.options.dim,
            });
        }

        let descriptor = Descriptor::new(raw.to_vec());
        Ok(if self.options.normalize {
            descriptor.normalized()
        } else {
            descriptor
        })
    }
}

/// Square crop around `face`, enlarged by [`CROP_MARGIN`] and clamped to the frame,
/// resized to `size`×`size`. `None` when the box does not intersect the frame.
fn crop_face(image: &RgbImage, face: &BoundingBox, size: u32) -> Option<RgbImage> {
    let (width, height) = image.dimensions();
    let side = face.width.max(face.height) * (1.0 + CROP_MARGIN);
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;

    let x0 = (cx - side / 2.0).max(0.0).floor() as u32;
    let y0 = (cy - side / 2.0).max(0.0).floor() as u32;
    let x1 = ((cx + side / 2.0).ceil().max(0.0) as u32).min(width);
    let y1 = ((cy + side / 2.0).ceil().max(0.0) as u32).min(height);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }

    let region = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    Some(imageops::resize(&region, size, size, FilterType::Triangle))
}

/// NCHW float tensor with symmetric normalization to [-1, 1].
fn to_tensor(crop: &RgbImage) -> Array4<f32> {
    let (w, h) = crop.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in crop.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    tensor
}
