use anyhow::{Context, Result};
use facematch_core::{FaceDetector, FaceEncoder, FaceWorkflows, MatchEngine, MemoryIndex, OnnxExtractor, VectorIndex};
use facematch_hw::CaptureSession;
use facematch_index::MilvusIndex;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{BusKind, Config, IndexBackend};
use dbus_interface::FaceMatchService;

const BUS_NAME: &str = "org.facematch.Service1";
const OBJECT_PATH: &str = "/org/facematch/Service1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facematchd starting");

    let config = Config::load()?;
    let thresholds = config.thresholds().context("invalid match thresholds")?;

    let index: Arc<dyn VectorIndex> = match config.index_backend {
        IndexBackend::Milvus => {
            let milvus = config.milvus_config().context("invalid Milvus configuration")?;
            let index = MilvusIndex::connect(milvus, config.retry_policy())
                .await
                .context("vector index unavailable")?;
            Arc::new(index)
        }
        IndexBackend::Memory => {
            tracing::warn!("using in-memory index; registrations are lost on exit");
            Arc::new(MemoryIndex::new(config.descriptor_dim))
        }
    };

    let matcher = MatchEngine::new(index, thresholds, config.descriptor_dim)
        .context("invalid match engine configuration")?;
    let workflows = Arc::new(FaceWorkflows::new(matcher));

    let detector_path = config.detector_model_path();
    let detector = FaceDetector::load(&detector_path)
        .with_context(|| format!("failed to load detector {detector_path}"))?;
    tracing::info!(path = %detector_path, "SCRFD detector loaded");

    let encoder_path = config.encoder_model_path();
    let encoder = FaceEncoder::load(&encoder_path, config.encoder_options())
        .with_context(|| format!("failed to load encoder {encoder_path}"))?;
    tracing::info!(path = %encoder_path, dim = config.descriptor_dim, "descriptor encoder loaded");

    let session = CaptureSession::new(config.session_config());
    let engine = engine::spawn_engine(session, OnnxExtractor::new(detector, encoder))?;

    let service = FaceMatchService::new(engine, workflows, config.index_backend);
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("failed to acquire D-Bus name {BUS_NAME}"))?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "facematchd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facematchd shutting down");

    Ok(())
}
