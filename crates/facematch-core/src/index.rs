//! Vector index seam and an in-process implementation.

use crate::types::{Descriptor, FaceRecord, MatchResult};
use async_trait::async_trait;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index unreachable after {attempts} attempts: {last_error}")]
    Unreachable { attempts: u32, last_error: String },
    #[error("descriptor dimension mismatch: got {got}, want {want}")]
    DimensionMismatch { got: usize, want: usize },
    #[error("collection schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("unsupported index configuration: {0}")]
    Unsupported(String),
    #[error("insert failed: {0}")]
    Insert(String),
    #[error("flush failed: {0}")]
    Flush(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("index request failed: {0}")]
    Request(String),
}

impl IndexError {
    /// Configuration problems that must abort startup rather than be retried.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            IndexError::DimensionMismatch { .. }
                | IndexError::SchemaMismatch(_)
                | IndexError::Unsupported(_)
        )
    }
}

/// Nearest-neighbor store of registered faces.
///
/// Inserts are only guaranteed visible to `search` after `flush` returns.
/// Implementations are shared across requests and must be `Send + Sync`.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn insert(&self, record: &FaceRecord) -> Result<(), IndexError>;

    /// Make every prior insert visible to subsequent searches.
    async fn flush(&self) -> Result<(), IndexError>;

    /// Up to `k` nearest records, closest first. Empty when nothing is stored.
    async fn search(&self, query: &Descriptor, k: usize) -> Result<Vec<MatchResult>, IndexError>;

    /// Names of every visible record, in storage order. Names may repeat.
    async fn list(&self) -> Result<Vec<String>, IndexError>;
}

/// Brute-force squared-L2 index held in memory.
///
/// Mirrors the visibility contract of a remote index: inserted records stay
/// pending until `flush`.
pub struct MemoryIndex {
    dim: usize,
    visible: RwLock<Vec<FaceRecord>>,
    pending: RwLock<Vec<FaceRecord>>,
}

impl MemoryIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            visible: RwLock::new(Vec::new()),
            pending: RwLock::new(Vec::new()),
        }
    }

    /// Number of searchable records.
    pub fn len(&self) -> usize {
        self.visible.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_dim(&self, descriptor: &Descriptor) -> Result<(), IndexError> {
        if descriptor.dim() != self.dim {
            return Err(IndexError::DimensionMismatch {
                got: descriptor.dim(),
                want: self.dim,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn insert(&self, record: &FaceRecord) -> Result<(), IndexError> {
        self.check_dim(&record.descriptor)?;
        self.pending
            .write()
            .map_err(|_| IndexError::Insert("pending set poisoned".into()))?
            .push(record.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<(), IndexError> {
        let mut pending = self
            .pending
            .write()
            .map_err(|_| IndexError::Flush("pending set poisoned".into()))?;
        let mut visible = self
            .visible
            .write()
            .map_err(|_| IndexError::Flush("index poisoned".into()))?;
        visible.append(&mut pending);
        Ok(())
    }

    async fn search(&self, query: &Descriptor, k: usize) -> Result<Vec<MatchResult>, IndexError> {
        self.check_dim(query)?;
        let visible = self
            .visible
            .read()
            .map_err(|_| IndexError::Search("index poisoned".into()))?;
        if visible.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let mut results: Vec<MatchResult> = visible
            .iter()
            .map(|record| MatchResult {
                distance: query.squared_distance(&record.descriptor),
                record: record.clone(),
            })
            .collect();

        // Stable sort: equal distances keep insertion order, NaN sorts last.
        results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        results.truncate(k);
        Ok(results)
    }

    async fn list(&self) -> Result<Vec<String>, IndexError> {
        let visible = self
            .visible
            .read()
            .map_err(|_| IndexError::Search("index poisoned".into()))?;
        Ok(visible.iter().map(|record| record.name.clone()).collect())
    }
}
