use crate::config::IndexBackend;
use crate::engine::{EngineError, EngineHandle};
use facematch_core::{validate_name, FaceWorkflows, InputErrorReason, Verdict, VerdictResponse};
use std::sync::Arc;
use zbus::interface;

/// D-Bus interface for the face match daemon.
///
/// Bus name: org.facematch.Service1
/// Object path: /org/facematch/Service1
pub struct FaceMatchService {
    engine: EngineHandle,
    workflows: Arc<FaceWorkflows>,
    backend: IndexBackend,
}

impl FaceMatchService {
    pub fn new(engine: EngineHandle, workflows: Arc<FaceWorkflows>, backend: IndexBackend) -> Self {
        Self {
            engine,
            workflows,
            backend,
        }
    }

    pub async fn register_face(&self, name: &str) -> Verdict {
        // Reject before touching the camera.
        if let Err(reason) = validate_name(name) {
            return Verdict::input_error(reason);
        }
        match self.engine.extract().await {
            Ok(detection) => self.workflows.register_detection(name, detection).await,
            Err(e) => capture_failed(&e),
        }
    }

    pub async fn recognize_face(&self) -> Verdict {
        match self.engine.extract().await {
            Ok(detection) => self.workflows.recognize_detection(detection).await,
            Err(e) => capture_failed(&e),
        }
    }

    /// Registered names as a JSON array.
    pub async fn list_json(&self) -> Result<String, facematch_core::IndexError> {
        let names = self.workflows.list_faces().await?;
        Ok(serde_json::Value::from(names).to_string())
    }

    pub async fn status_json(&self) -> serde_json::Value {
        let camera_open = match self.engine.camera_open().await {
            Ok(open) => serde_json::Value::Bool(open),
            Err(_) => serde_json::Value::Null,
        };
        let thresholds = self.workflows.engine().thresholds();
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera_open": camera_open,
            "index_backend": self.backend.to_string(),
            "descriptor_dim": self.workflows.engine().dim(),
            "recognition_tolerance": thresholds.recognition_tolerance(),
            "duplicate_threshold": thresholds.duplicate_threshold(),
        })
    }
}

fn capture_failed(error: &EngineError) -> Verdict {
    tracing::error!(error = %error, "frame capture failed");
    Verdict::input_error(InputErrorReason::CaptureFailed)
}

#[interface(name = "org.facematch.Service1")]
impl FaceMatchService {
    /// Capture a frame and register its single face under `name`.
    async fn register(&self, name: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, "register requested");
        let verdict = self.register_face(name).await;
        Ok(VerdictResponse::from(&verdict).to_json())
    }

    /// Capture a frame and identify its single face.
    async fn recognize(&self) -> zbus::fdo::Result<String> {
        tracing::info!("recognize requested");
        let verdict = self.recognize_face().await;
        Ok(VerdictResponse::from(&verdict).to_json())
    }

    /// Release the capture device. Returns whether it was open.
    async fn stop_camera(&self) -> zbus::fdo::Result<bool> {
        tracing::info!("stop_camera requested");
        self.engine
            .stop_camera()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Names of every registered face, as a JSON array of strings.
    async fn list_faces(&self) -> zbus::fdo::Result<String> {
        self.list_json().await.map_err(|e| {
            tracing::error!(error = %e, "listing faces failed");
            zbus::fdo::Error::Failed(format!("face storage unavailable: {e}"))
        })
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.status_json().await.to_string())
    }
}
