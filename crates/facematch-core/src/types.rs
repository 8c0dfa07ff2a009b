use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Fixed-length face descriptor (128-dimensional by default).
///
/// Produced once per detected face and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// False if any component is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Squared Euclidean distance, the value Milvus reports for the `L2` metric.
    pub fn squared_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum()
    }

    /// Plain Euclidean distance.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.squared_distance(other).sqrt()
    }

    /// Return a unit-length copy. A zero vector is returned unchanged.
    pub fn normalized(&self) -> Descriptor {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            Descriptor::new(self.values.iter().map(|x| x / norm).collect())
        } else {
            self.clone()
        }
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Longest accepted name, in UTF-8 bytes. Matches the stored VarChar width.
pub const MAX_NAME_BYTES: usize = 100;

/// A registered identity: the name it was registered under and its descriptor.
///
/// Names are not unique in storage; duplicate faces are blocked by the match engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub name: String,
    pub descriptor: Descriptor,
}

/// One nearest-neighbor hit returned by a vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Dissimilarity to the query: lower is closer.
    pub distance: f32,
    pub record: FaceRecord,
}
