//! Registration and recognition workflows.
//!
//! Every extractor and index failure is turned into a [`Verdict`] here;
//! nothing below this boundary reaches the caller as an error.

use crate::extractor::{DescriptorExtractor, DetectionError, FaceDetection};
use crate::matcher::{MatchEngine, MatchError};
use crate::index::IndexError;
use crate::types::{FaceRecord, MAX_NAME_BYTES};
use crate::verdict::{InputErrorReason, Verdict};
use image::RgbImage;
use tokio::sync::Mutex;

/// Orchestrates extractor → match engine → index for both request kinds.
pub struct FaceWorkflows {
    engine: MatchEngine,
    /// Serializes check-then-insert so two registrations cannot both pass the
    /// duplicate check before either record is stored.
    register_lock: Mutex<()>,
}

impl FaceWorkflows {
    pub fn new(engine: MatchEngine) -> Self {
        Self {
            engine,
            register_lock: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    /// Register the single face in `image` under `name`.
    pub async fn register<X>(&self, extractor: &mut X, image: &RgbImage, name: &str) -> Verdict
    where
        X: DescriptorExtractor + ?Sized,
    {
        if let Err(reason) = validate_name(name) {
            return Verdict::input_error(reason);
        }
        let detection = extractor.extract(image);
        self.register_detection(name, detection).await
    }

    /// Registration for a caller that already ran extraction.
    pub async fn register_detection(
        &self,
        name: &str,
        detection: Result<FaceDetection, DetectionError>,
    ) -> Verdict {
        let name = match validate_name(name) {
            Ok(name) => name,
            Err(reason) => return Verdict::input_error(reason),
        };
        let detection = match detection {
            Ok(d) => d,
            Err(e) => return detection_verdict(&e),
        };

        let _guard = self.register_lock.lock().await;

        match self.engine.check_duplicate(&detection.descriptor).await {
            Ok(verdict @ Verdict::Duplicate { .. }) => return verdict,
            Ok(_) => {}
            Err(e) => return match_error_verdict("duplicate check", &e),
        }

        let record = FaceRecord {
            name: name.to_string(),
            descriptor: detection.descriptor,
        };

        let index = self.engine.index();
        if let Err(e) = index.insert(&record).await {
            tracing::error!(name, error = %e, "insert failed");
            return Verdict::input_error(InputErrorReason::StorageFailure);
        }
        if let Err(e) = index.flush().await {
            // The insert may still surface later, so a retry can report Duplicate.
            tracing::error!(name, error = %e, "flush after insert failed; record may become visible");
            return Verdict::input_error(InputErrorReason::StorageFailure);
        }

        tracing::info!(name, "face registered");
        Verdict::Registered {
            name: name.to_string(),
        }
    }

    /// Identify the single face in `image`.
    pub async fn recognize<X>(&self, extractor: &mut X, image: &RgbImage) -> Verdict
    where
        X: DescriptorExtractor + ?Sized,
    {
        let detection = extractor.extract(image);
        self.recognize_detection(detection).await
    }

    /// Recognition for a caller that already ran extraction.
    pub async fn recognize_detection(&self, detection: Result<FaceDetection, DetectionError>) -> Verdict {
        let detection = match detection {
            Ok(d) => d,
            Err(e) => return detection_verdict(&e),
        };

        match self.engine.recognize(&detection.descriptor).await {
            Ok(verdict) => verdict,
            Err(e) => match_error_verdict("recognition", &e),
        }
    }

    /// Names of every registered face.
    pub async fn list_faces(&self) -> Result<Vec<String>, IndexError> {
        self.engine.index().list().await
    }
}

/// Trimmed name, checked for emptiness and the stored width limit.
pub fn validate_name(name: &str) -> Result<&str, InputErrorReason> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(InputErrorReason::NameRequired);
    }
    if trimmed.len() > MAX_NAME_BYTES {
        return Err(InputErrorReason::NameTooLong);
    }
    Ok(trimmed)
}

fn detection_verdict(error: &DetectionError) -> Verdict {
    tracing::info!(error = %error, "extraction rejected frame");
    let reason = match error {
        DetectionError::NoFace => InputErrorReason::NoFace,
        DetectionError::MultipleFaces(_) => InputErrorReason::MultipleFaces,
        DetectionError::EncodingFailed(_) => InputErrorReason::EncodingFailed,
    };
    Verdict::input_error(reason)
}

fn match_error_verdict(stage: &str, error: &MatchError) -> Verdict {
    match error {
        MatchError::DimensionMismatch { .. } | MatchError::NonFinite => {
            tracing::error!(stage, error = %error, "descriptor rejected");
            Verdict::input_error(InputErrorReason::EncodingFailed)
        }
        MatchError::Index(_) => {
            tracing::error!(stage, error = %error, "index query failed");
            Verdict::input_error(InputErrorReason::StorageFailure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name_trims() {
        assert_eq!(validate_name("  ann  "), Ok("ann"));
        assert_eq!(validate_name(" \t\n"), Err(InputErrorReason::NameRequired));
        assert_eq!(validate_name(""), Err(InputErrorReason::NameRequired));
    }

    #[test]
    fn test_validate_name_length_in_bytes() {
        let longest = "a".repeat(MAX_NAME_BYTES);
        assert_eq!(validate_name(&longest), Ok(longest.as_str()));
        assert_eq!(
            validate_name(&"a".repeat(MAX_NAME_BYTES + 1)),
            Err(InputErrorReason::NameTooLong)
        );
        // 51 two-byte characters exceed the byte limit.
        assert_eq!(validate_name(&"é".repeat(51)), Err(InputErrorReason::NameTooLong));
        assert_eq!(validate_name(&format!("  {longest}  ")), Ok(longest.as_str()));
    }

    #[test]
    fn test_detection_verdicts() {
        assert_eq!(
            detection_verdict(&DetectionError::NoFace),
            Verdict::input_error(InputErrorReason::NoFace)
        );
        assert_eq!(
            detection_verdict(&DetectionError::MultipleFaces(2)),
            Verdict::input_error(InputErrorReason::MultipleFaces)
        );
        assert_eq!(
            detection_verdict(&DetectionError::EncodingFailed("x".into())),
            Verdict::input_error(InputErrorReason::EncodingFailed)
        );
    }
}
