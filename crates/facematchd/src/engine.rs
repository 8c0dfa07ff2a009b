use facematch_core::{DescriptorExtractor, DetectionError, FaceDetection};
use facematch_hw::{CameraError, CaptureSession};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Extract {
        reply: oneshot::Sender<Result<Result<FaceDetection, DetectionError>, EngineError>>,
    },
    StopCamera {
        reply: oneshot::Sender<bool>,
    },
    CameraOpen {
        reply: oneshot::Sender<bool>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Capture one frame and run detection + encoding on it.
    ///
    /// The outer error is a capture problem; the inner one is the
    /// extractor's judgement of the frame.
    pub async fn extract(&self) -> Result<Result<FaceDetection, DetectionError>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Extract { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Release the camera. Returns whether it was open.
    pub async fn stop_camera(&self) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::StopCamera { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn camera_open(&self) -> Result<bool, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::CameraOpen { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the capture session and the extractor; the camera is
/// opened on the first request, not here.
pub fn spawn_engine<X>(mut session: CaptureSession, mut extractor: X) -> Result<EngineHandle, EngineError>
where
    X: DescriptorExtractor + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facematch-engine".into())
        .spawn(move || {
            tracing::info!(device = %session.config().device, "engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Extract { reply } => {
                        let result = run_extract(&mut session, &mut extractor);
                        let _ = reply.send(result);
                    }
                    EngineRequest::StopCamera { reply } => {
                        let _ = reply.send(session.release());
                    }
                    EngineRequest::CameraOpen { reply } => {
                        let _ = reply.send(session.is_open());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

fn run_extract<X: DescriptorExtractor>(
    session: &mut CaptureSession,
    extractor: &mut X,
) -> Result<Result<FaceDetection, DetectionError>, EngineError> {
    let image = session.capture()?;
    let detection = extractor.extract(&image);
    match &detection {
        Ok(face) => tracing::debug!(confidence = face.location.confidence, "face extracted"),
        Err(e) => tracing::debug!(error = %e, "no usable face in frame"),
    }
    Ok(detection)
}
