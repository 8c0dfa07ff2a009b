use anyhow::Context;
use facematch_core::{ConfigError, EncoderOptions, IndexError, Thresholds};
use facematch_hw::SessionConfig;
use facematch_index::{MilvusConfig, RetryPolicy};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Where registered faces live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Milvus,
    /// In-process, lost on restart. For development without a Milvus server.
    Memory,
}

impl FromStr for IndexBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "milvus" => Ok(IndexBackend::Milvus),
            "memory" => Ok(IndexBackend::Memory),
            other => Err(format!("unknown index backend: {other}")),
        }
    }
}

impl fmt::Display for IndexBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexBackend::Milvus => "milvus",
            IndexBackend::Memory => "memory",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(BusKind::Session),
            "system" => Ok(BusKind::System),
            other => Err(format!("unknown bus: {other}")),
        }
    }
}

/// Daemon configuration: defaults, then the TOML file named by
/// `FACEMATCH_CONFIG`, then `FACEMATCH_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Delay after opening the camera before reading frames.
    pub capture_init_delay_ms: u64,
    /// Flip frames horizontally.
    pub mirror: bool,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub detector_model: String,
    pub encoder_model: String,
    pub descriptor_dim: usize,
    pub normalize_descriptors: bool,
    /// Largest L2 distance still accepted as the same person.
    pub recognition_tolerance: f32,
    /// Below this distance a new registration is refused as a duplicate.
    pub duplicate_threshold: f32,
    pub index_backend: IndexBackend,
    pub milvus_host: String,
    pub milvus_port: u16,
    pub milvus_collection: String,
    pub milvus_index_type: String,
    pub milvus_metric: String,
    pub milvus_nlist: u32,
    pub milvus_nprobe: u32,
    pub milvus_token: Option<String>,
    pub connect_attempts: u32,
    pub connect_backoff_secs: u64,
    pub request_timeout_secs: u64,
    pub bus: BusKind,
}

impl Default for Config {
    fn default() -> Self {
        let milvus = MilvusConfig::default();
        let thresholds = Thresholds::default();
        let retry = RetryPolicy::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            capture_init_delay_ms: 500,
            mirror: true,
            model_dir: facematch_core::default_model_dir(),
            detector_model: "det_10g.onnx".to_string(),
            encoder_model: "face_encoder.onnx".to_string(),
            descriptor_dim: milvus.dim,
            normalize_descriptors: false,
            recognition_tolerance: thresholds.recognition_tolerance(),
            duplicate_threshold: thresholds.duplicate_threshold(),
            index_backend: IndexBackend::Milvus,
            milvus_host: milvus.host,
            milvus_port: milvus.port,
            milvus_collection: milvus.collection,
            milvus_index_type: milvus.index_type.to_string(),
            milvus_metric: milvus.metric,
            milvus_nlist: milvus.nlist,
            milvus_nprobe: milvus.nprobe,
            milvus_token: None,
            connect_attempts: retry.attempts,
            connect_backoff_secs: retry.backoff.as_secs(),
            request_timeout_secs: milvus.request_timeout.as_secs(),
            bus: BusKind::Session,
        }
    }
}

impl Config {
    /// Load the layered configuration for this process.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var("FACEMATCH_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML file; keys it omits keep their defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `FACEMATCH_*` overrides. Unparseable values are logged and ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("FACEMATCH_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        self.capture_init_delay_ms =
            env_u64(&var, "FACEMATCH_CAPTURE_INIT_DELAY_MS", self.capture_init_delay_ms);
        if let Some(v) = var("FACEMATCH_MIRROR") {
            self.mirror = v != "0";
        }
        if let Some(v) = var("FACEMATCH_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("FACEMATCH_DETECTOR_MODEL") {
            self.detector_model = v;
        }
        if let Some(v) = var("FACEMATCH_ENCODER_MODEL") {
            self.encoder_model = v;
        }
        self.descriptor_dim = env_usize(&var, "FACEMATCH_DESCRIPTOR_DIM", self.descriptor_dim);
        if let Some(v) = var("FACEMATCH_NORMALIZE_DESCRIPTORS") {
            self.normalize_descriptors = v != "0";
        }
        self.recognition_tolerance =
            env_f32(&var, "FACEMATCH_RECOGNITION_TOLERANCE", self.recognition_tolerance);
        self.duplicate_threshold =
            env_f32(&var, "FACEMATCH_DUPLICATE_THRESHOLD", self.duplicate_threshold);
        self.index_backend = env_parse(&var, "FACEMATCH_INDEX_BACKEND", self.index_backend);
        if let Some(v) = var("FACEMATCH_MILVUS_HOST") {
            self.milvus_host = v;
        }
        self.milvus_port = env_parse(&var, "FACEMATCH_MILVUS_PORT", self.milvus_port);
        if let Some(v) = var("FACEMATCH_MILVUS_COLLECTION") {
            self.milvus_collection = v;
        }
        if let Some(v) = var("FACEMATCH_MILVUS_INDEX_TYPE") {
            self.milvus_index_type = v;
        }
        if let Some(v) = var("FACEMATCH_MILVUS_METRIC") {
            self.milvus_metric = v;
        }
        self.milvus_nlist = env_parse(&var, "FACEMATCH_MILVUS_NLIST", self.milvus_nlist);
        self.milvus_nprobe = env_parse(&var, "FACEMATCH_MILVUS_NPROBE", self.milvus_nprobe);
        if let Some(v) = var("FACEMATCH_MILVUS_TOKEN") {
            self.milvus_token = (!v.is_empty()).then_some(v);
        }
        self.connect_attempts = env_parse(&var, "FACEMATCH_CONNECT_ATTEMPTS", self.connect_attempts);
        self.connect_backoff_secs =
            env_u64(&var, "FACEMATCH_CONNECT_BACKOFF_SECS", self.connect_backoff_secs);
        self.request_timeout_secs =
            env_u64(&var, "FACEMATCH_REQUEST_TIMEOUT_SECS", self.request_timeout_secs);
        self.bus = env_parse(&var, "FACEMATCH_BUS", self.bus);
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(&self.detector_model)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the descriptor network.
    pub fn encoder_model_path(&self) -> String {
        self.model_dir
            .join(&self.encoder_model)
            .to_string_lossy()
            .into_owned()
    }

    pub fn thresholds(&self) -> Result<Thresholds, ConfigError> {
        Thresholds::new(self.recognition_tolerance, self.duplicate_threshold)
    }

    pub fn encoder_options(&self) -> EncoderOptions {
        EncoderOptions {
            dim: self.descriptor_dim,
            normalize: self.normalize_descriptors,
            ..EncoderOptions::default()
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            device: self.camera_device.clone(),
            init_delay: Duration::from_millis(self.capture_init_delay_ms),
            mirror: self.mirror,
        }
    }

    pub fn milvus_config(&self) -> Result<MilvusConfig, IndexError> {
        let config = MilvusConfig {
            host: self.milvus_host.clone(),
            port: self.milvus_port,
            collection: self.milvus_collection.clone(),
            dim: self.descriptor_dim,
            index_type: self.milvus_index_type.parse()?,
            metric: self.milvus_metric.clone(),
            nlist: self.milvus_nlist,
            nprobe: self.milvus_nprobe,
            token: self.milvus_token.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.connect_attempts,
            backoff: Duration::from_secs(self.connect_backoff_secs),
        }
    }
}

fn env_parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
                default
            }
        },
        None => default,
    }
}

fn env_f32(var: &impl Fn(&str) -> Option<String>, key: &str, default: f32) -> f32 {
    env_parse(var, key, default)
}

fn env_u64(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> u64 {
    env_parse(var, key, default)
}

fn env_usize(var: &impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    env_parse(var, key, default)
}
