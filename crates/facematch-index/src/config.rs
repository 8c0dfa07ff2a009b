use facematch_core::IndexError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Only metric whose distances the match engine's thresholds are tuned for.
pub const METRIC_L2: &str = "L2";

/// Vector index layouts Milvus can build over the descriptor field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    Flat,
    IvfFlat,
    IvfSq8,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::Flat => "FLAT",
            IndexType::IvfFlat => "IVF_FLAT",
            IndexType::IvfSq8 => "IVF_SQ8",
        }
    }

    fn is_ivf(&self) -> bool {
        matches!(self, IndexType::IvfFlat | IndexType::IvfSq8)
    }
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexType {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FLAT" => Ok(IndexType::Flat),
            "IVF_FLAT" => Ok(IndexType::IvfFlat),
            "IVF_SQ8" => Ok(IndexType::IvfSq8),
            other => Err(IndexError::Unsupported(format!("index type {other}"))),
        }
    }
}

/// Connection and collection parameters for a Milvus deployment.
#[derive(Debug, Clone)]
pub struct MilvusConfig {
    pub host: String,
    pub port: u16,
    pub collection: String,
    /// Descriptor dimension stored in the collection schema.
    pub dim: usize,
    pub index_type: IndexType,
    pub metric: String,
    /// IVF cluster count used when building the index.
    pub nlist: u32,
    /// IVF clusters probed per search.
    pub nprobe: u32,
    /// Bearer token (`user:password` or API key) when auth is enabled.
    pub token: Option<String>,
    pub request_timeout: Duration,
}

impl Default for MilvusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 19530,
            collection: "faces".into(),
            dim: 128,
            index_type: IndexType::IvfFlat,
            metric: METRIC_L2.into(),
            nlist: 128,
            nprobe: 10,
            token: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl MilvusConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Reject settings the match engine cannot work with.
    pub fn validate(&self) -> Result<(), IndexError> {
        if self.dim == 0 {
            return Err(IndexError::Unsupported("descriptor dimension 0".into()));
        }
        if self.collection.trim().is_empty() {
            return Err(IndexError::Unsupported("empty collection name".into()));
        }
        if !self.metric.eq_ignore_ascii_case(METRIC_L2) {
            return Err(IndexError::Unsupported(format!(
                "metric {} (thresholds are tuned for {METRIC_L2})",
                self.metric
            )));
        }
        if self.index_type.is_ivf() && (self.nlist == 0 || self.nprobe == 0) {
            return Err(IndexError::Unsupported("nlist and nprobe must be positive".into()));
        }
        Ok(())
    }

    pub(crate) fn build_params(&self) -> serde_json::Value {
        if self.index_type.is_ivf() {
            serde_json::json!({ "nlist": self.nlist })
        } else {
            serde_json::json!({})
        }
    }

    pub(crate) fn search_params(&self) -> serde_json::Value {
        if self.index_type.is_ivf() {
            serde_json::json!({ "nprobe": self.nprobe })
        } else {
            serde_json::json!({})
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = MilvusConfig::default();
        assert_eq!(config.base_url(), "http://localhost:19530");
        assert_eq!(config.collection, "faces");
        assert_eq!(config.index_type, IndexType::IvfFlat);
        assert_eq!(config.build_params(), serde_json::json!({ "nlist": 128 }));
        assert_eq!(config.search_params(), serde_json::json!({ "nprobe": 10 }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_index_type() {
        assert_eq!("ivf_flat".parse::<IndexType>().unwrap(), IndexType::IvfFlat);
        assert_eq!("FLAT".parse::<IndexType>().unwrap(), IndexType::Flat);
        assert!("HNSW".parse::<IndexType>().is_err());
    }

    #[test]
    fn test_non_l2_metric_rejected() {
        let config = MilvusConfig {
            metric: "COSINE".into(),
            ..MilvusConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_flat_index_has_no_params() {
        let config = MilvusConfig {
            index_type: IndexType::Flat,
            ..MilvusConfig::default()
        };
        assert_eq!(config.search_params(), serde_json::json!({}));
    }
}
