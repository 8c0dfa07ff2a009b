//! Distance-threshold policy over a nearest-neighbor index.
//!
//! Distances are dissimilarities in the index metric (L2). Two bounds apply:
//! the recognition tolerance decides identity, and the stricter duplicate
//! threshold blocks re-registration of a face that is already stored.

use crate::index::{IndexError, VectorIndex};
use crate::types::{Descriptor, MatchResult};
use crate::verdict::Verdict;
use std::sync::Arc;
use thiserror::Error;

/// Default recognition tolerance for 128-d L2 descriptors.
pub const DEFAULT_RECOGNITION_TOLERANCE: f32 = 0.6;
/// Default duplicate-registration threshold.
pub const DEFAULT_DUPLICATE_THRESHOLD: f32 = 0.4;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("recognition tolerance must be a positive finite number, got {0}")]
    InvalidTolerance(f32),
    #[error("duplicate threshold must be a positive finite number, got {0}")]
    InvalidDuplicateThreshold(f32),
    #[error("duplicate threshold {duplicate} must be below recognition tolerance {tolerance}")]
    ThresholdOrder { duplicate: f32, tolerance: f32 },
    #[error("descriptor dimension must be positive")]
    ZeroDimension,
}

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("descriptor has {got} components, index expects {want}")]
    DimensionMismatch { got: usize, want: usize },
    #[error("descriptor has a NaN or infinite component")]
    NonFinite,
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Validated pair of distance bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    recognition_tolerance: f32,
    duplicate_threshold: f32,
}

impl Thresholds {
    pub fn new(recognition_tolerance: f32, duplicate_threshold: f32) -> Result<Self, ConfigError> {
        if !recognition_tolerance.is_finite() || recognition_tolerance <= 0.0 {
            return Err(ConfigError::InvalidTolerance(recognition_tolerance));
        }
        if !duplicate_threshold.is_finite() || duplicate_threshold <= 0.0 {
            return Err(ConfigError::InvalidDuplicateThreshold(duplicate_threshold));
        }
        if duplicate_threshold >= recognition_tolerance {
            return Err(ConfigError::ThresholdOrder {
                duplicate: duplicate_threshold,
                tolerance: recognition_tolerance,
            });
        }
        Ok(Self {
            recognition_tolerance,
            duplicate_threshold,
        })
    }

    pub fn recognition_tolerance(&self) -> f32 {
        self.recognition_tolerance
    }

    pub fn duplicate_threshold(&self) -> f32 {
        self.duplicate_threshold
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            recognition_tolerance: DEFAULT_RECOGNITION_TOLERANCE,
            duplicate_threshold: DEFAULT_DUPLICATE_THRESHOLD,
        }
    }
}

/// Display confidence for a match: `1 - distance / tolerance`, floored at 0.
///
/// Returns `None` when `distance >= tolerance`; such a distance is never a match.
pub fn confidence(distance: f32, tolerance: f32) -> Option<f32> {
    if distance < tolerance {
        Some((1.0 - distance / tolerance).clamp(0.0, 1.0))
    } else {
        None
    }
}

/// Applies duplicate and recognition policy to single-nearest-neighbor queries.
///
/// Both operations are read-only against the index.
#[derive(Clone)]
pub struct MatchEngine {
    index: Arc<dyn VectorIndex>,
    thresholds: Thresholds,
    dim: usize,
}

impl MatchEngine {
    pub fn new(index: Arc<dyn VectorIndex>, thresholds: Thresholds, dim: usize) -> Result<Self, ConfigError> {
        if dim == 0 {
            return Err(ConfigError::ZeroDimension);
        }
        Ok(Self {
            index,
            thresholds,
            dim,
        })
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub(crate) fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// `Duplicate` if the nearest stored face is closer than the duplicate
    /// threshold. Otherwise `NotFound` for an empty index or `Unrecognized`.
    pub async fn check_duplicate(&self, descriptor: &Descriptor) -> Result<Verdict, MatchError> {
        let Some(best) = self.nearest(descriptor).await? else {
            return Ok(Verdict::NotFound);
        };

        if best.distance < self.thresholds.duplicate_threshold {
            tracing::info!(
                existing = %best.record.name,
                distance = best.distance,
                "duplicate face"
            );
            return Ok(Verdict::Duplicate {
                existing_name: best.record.name,
            });
        }

        tracing::debug!(distance = best.distance, "no duplicate");
        Ok(Verdict::Unrecognized)
    }

    /// `Recognized` with a confidence score if the nearest stored face is
    /// within tolerance, `Unrecognized` if not, `NotFound` for an empty index.
    pub async fn recognize(&self, descriptor: &Descriptor) -> Result<Verdict, MatchError> {
        let Some(best) = self.nearest(descriptor).await? else {
            tracing::debug!("recognize: index empty");
            return Ok(Verdict::NotFound);
        };

        let tolerance = self.thresholds.recognition_tolerance;
        match confidence(best.distance, tolerance) {
            Some(confidence) => {
                tracing::info!(
                    name = %best.record.name,
                    distance = best.distance,
                    confidence,
                    "face recognized"
                );
                Ok(Verdict::Recognized {
                    name: best.record.name,
                    confidence,
                })
            }
            None => {
                tracing::info!(distance = best.distance, tolerance, "face not recognized");
                Ok(Verdict::Unrecognized)
            }
        }
    }

    /// First hit of a k=1 search. Exact ties resolve to whatever the index returns first.
    async fn nearest(&self, descriptor: &Descriptor) -> Result<Option<MatchResult>, MatchError> {
        if descriptor.dim() != self.dim {
            return Err(MatchError::DimensionMismatch {
                got: descriptor.dim(),
                want: self.dim,
            });
        }
        if !descriptor.is_finite() {
            return Err(MatchError::NonFinite);
        }

        let hits = self.index.search(descriptor, 1).await?;
        Ok(hits.into_iter().next().filter(|hit| hit.distance.is_finite()))
    }
}
