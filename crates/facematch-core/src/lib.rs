//! facematch-core — Face registration and recognition decision core.
//!
//! A [`MatchEngine`] applies distance thresholds to nearest-neighbor results
//! from a [`VectorIndex`]; [`FaceWorkflows`] drives extraction, duplicate
//! checks and inserts. SCRFD detection and the descriptor network run via
//! ONNX Runtime.

pub mod detector;
pub mod encoder;
pub mod extractor;
pub mod index;
pub mod matcher;
pub mod types;
pub mod verdict;
pub mod workflow;

pub use detector::FaceDetector;
pub use encoder::{EncoderOptions, FaceEncoder};
pub use extractor::{DescriptorExtractor, DetectionError, FaceDetection, OnnxExtractor};
pub use index::{IndexError, MemoryIndex, VectorIndex};
pub use matcher::{confidence, ConfigError, MatchEngine, MatchError, Thresholds};
pub use types::{BoundingBox, Descriptor, FaceRecord, MatchResult, MAX_NAME_BYTES};
pub use verdict::{InputErrorReason, Verdict, VerdictResponse};
pub use workflow::{validate_name, FaceWorkflows};

/// Default location for ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/facematch/models")
}
