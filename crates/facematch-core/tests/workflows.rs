use async_trait::async_trait;
use facematch_core::{
    BoundingBox, Descriptor, DescriptorExtractor, DetectionError, FaceDetection, FaceRecord,
    FaceWorkflows, IndexError, InputErrorReason, MatchEngine, MatchResult, MemoryIndex,
    Thresholds, VectorIndex, Verdict, VerdictResponse, MAX_NAME_BYTES,
};
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DIM: usize = 4;

/// Derives a descriptor from the frame's top-left pixel.
///
/// Red 0 means "no face", red 255 means "two faces"; anything else encodes
/// the descriptor `[r, g, b, 0] / 100`.
struct PixelExtractor;

impl DescriptorExtractor for PixelExtractor {
    fn extract(&mut self, image: &RgbImage) -> Result<FaceDetection, DetectionError> {
        let Rgb([r, g, b]) = *image.get_pixel(0, 0);
        match r {
            0 => Err(DetectionError::NoFace),
            255 => Err(DetectionError::MultipleFaces(2)),
            _ => Ok(FaceDetection {
                location: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 8.0,
                    height: 8.0,
                    confidence: 0.99,
                    landmarks: None,
                },
                descriptor: Descriptor::new(vec![
                    r as f32 / 100.0,
                    g as f32 / 100.0,
                    b as f32 / 100.0,
                    0.0,
                ]),
            }),
        }
    }
}

fn frame(r: u8, g: u8, b: u8) -> RgbImage {
    RgbImage::from_pixel(8, 8, Rgb([r, g, b]))
}

fn detection(values: [f32; DIM]) -> Result<FaceDetection, DetectionError> {
    Ok(FaceDetection {
        location: BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
            confidence: 1.0,
            landmarks: None,
        },
        descriptor: Descriptor::new(values.to_vec()),
    })
}

fn workflows_over(index: Arc<dyn VectorIndex>) -> FaceWorkflows {
    let engine = MatchEngine::new(index, Thresholds::default(), DIM).unwrap();
    FaceWorkflows::new(engine)
}

fn memory_workflows() -> (Arc<MemoryIndex>, FaceWorkflows) {
    let index = Arc::new(MemoryIndex::new(DIM));
    let workflows = workflows_over(index.clone());
    (index, workflows)
}

/// Index whose every operation fails.
struct UnavailableIndex;

#[async_trait]
impl VectorIndex for UnavailableIndex {
    async fn insert(&self, _record: &FaceRecord) -> Result<(), IndexError> {
        Err(IndexError::Insert("connection reset".into()))
    }

    async fn flush(&self) -> Result<(), IndexError> {
        Err(IndexError::Flush("connection reset".into()))
    }

    async fn search(&self, _query: &Descriptor, _k: usize) -> Result<Vec<MatchResult>, IndexError> {
        Err(IndexError::Search("connection reset".into()))
    }

    async fn list(&self) -> Result<Vec<String>, IndexError> {
        Err(IndexError::Search("connection reset".into()))
    }
}

/// Searches succeed on an empty store; inserts fail.
struct ReadOnlyIndex {
    inserts: AtomicUsize,
}

#[async_trait]
impl VectorIndex for ReadOnlyIndex {
    async fn insert(&self, _record: &FaceRecord) -> Result<(), IndexError> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Err(IndexError::Insert("disk full".into()))
    }

    async fn flush(&self) -> Result<(), IndexError> {
        Ok(())
    }

    async fn search(&self, _query: &Descriptor, _k: usize) -> Result<Vec<MatchResult>, IndexError> {
        Ok(vec![])
    }

    async fn list(&self) -> Result<Vec<String>, IndexError> {
        Ok(vec![])
    }
}

/// Accepts inserts into a [`MemoryIndex`] but every flush fails.
struct FlushFailsIndex {
    inner: MemoryIndex,
}

#[async_trait]
impl VectorIndex for FlushFailsIndex {
    async fn insert(&self, record: &FaceRecord) -> Result<(), IndexError> {
        self.inner.insert(record).await
    }

    async fn flush(&self) -> Result<(), IndexError> {
        Err(IndexError::Flush("timed out".into()))
    }

    async fn search(&self, query: &Descriptor, k: usize) -> Result<Vec<MatchResult>, IndexError> {
        self.inner.search(query, k).await
    }

    async fn list(&self) -> Result<Vec<String>, IndexError> {
        self.inner.list().await
    }
}

/// Delays every search so concurrent registrations overlap in the
/// check-then-insert window.
struct SlowSearchIndex {
    inner: Arc<MemoryIndex>,
}

#[async_trait]
impl VectorIndex for SlowSearchIndex {
    async fn insert(&self, record: &FaceRecord) -> Result<(), IndexError> {
        self.inner.insert(record).await
    }

    async fn flush(&self) -> Result<(), IndexError> {
        self.inner.flush().await
    }

    async fn search(&self, query: &Descriptor, k: usize) -> Result<Vec<MatchResult>, IndexError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.inner.search(query, k).await
    }

    async fn list(&self) -> Result<Vec<String>, IndexError> {
        self.inner.list().await
    }
}

#[tokio::test]
async fn recognize_on_empty_index_is_not_found() {
    let (_, workflows) = memory_workflows();
    let verdict = workflows.recognize(&mut PixelExtractor, &frame(40, 50, 60)).await;
    assert_eq!(verdict, Verdict::NotFound);
}

#[tokio::test]
async fn register_then_recognize_same_image() {
    let (index, workflows) = memory_workflows();
    let image = frame(40, 50, 60);

    let verdict = workflows.register(&mut PixelExtractor, &image, "ann").await;
    assert_eq!(verdict, Verdict::Registered { name: "ann".into() });
    assert_eq!(index.len(), 1, "registration must flush before returning");

    match workflows.recognize(&mut PixelExtractor, &image).await {
        Verdict::Recognized { name, confidence } => {
            assert_eq!(name, "ann");
            assert!(confidence >= 0.99, "confidence {confidence}");
        }
        other => panic!("expected Recognized, got {other:?}"),
    }
}

#[tokio::test]
async fn same_face_under_second_name_is_duplicate() {
    let (index, workflows) = memory_workflows();
    let image = frame(40, 50, 60);

    workflows.register(&mut PixelExtractor, &image, "ann").await;
    let verdict = workflows.register(&mut PixelExtractor, &image, "bob").await;

    assert_eq!(verdict, Verdict::Duplicate { existing_name: "ann".into() });
    assert_eq!(index.len(), 1, "duplicate must not be inserted");
}

#[tokio::test]
async fn face_between_duplicate_threshold_and_tolerance_registers() {
    let (index, workflows) = memory_workflows();
    workflows.register_detection("ann", detection([0.0; DIM])).await;

    // squared L2 distance 0.5: 0.4 <= 0.5 < 0.6
    let query = [0.5f32.sqrt(), 0.0, 0.0, 0.0];
    let verdict = workflows.register_detection("bob", detection(query)).await;

    assert_eq!(verdict, Verdict::Registered { name: "bob".into() });
    assert_eq!(index.len(), 2);
}

#[tokio::test]
async fn distance_at_tolerance_is_unrecognized() {
    let (_, workflows) = memory_workflows();
    workflows.register_detection("ann", detection([0.0; DIM])).await;

    let query = [0.0, 0.8, 0.0, 0.0]; // squared distance 0.64
    let verdict = workflows.recognize_detection(detection(query)).await;
    assert_eq!(verdict, Verdict::Unrecognized);
}

#[tokio::test]
async fn no_face_rejected_by_both_workflows() {
    let (index, workflows) = memory_workflows();
    let image = frame(0, 0, 0);
    let expected = Verdict::input_error(InputErrorReason::NoFace);

    assert_eq!(workflows.register(&mut PixelExtractor, &image, "ann").await, expected);
    assert_eq!(workflows.recognize(&mut PixelExtractor, &image).await, expected);
    assert!(index.is_empty());
}

#[tokio::test]
async fn multiple_faces_rejected_by_both_workflows() {
    let (_, workflows) = memory_workflows();
    let image = frame(255, 0, 0);
    let expected = Verdict::input_error(InputErrorReason::MultipleFaces);

    assert_eq!(workflows.register(&mut PixelExtractor, &image, "ann").await, expected);
    assert_eq!(workflows.recognize(&mut PixelExtractor, &image).await, expected);
}

#[tokio::test]
async fn blank_name_rejected_before_extraction() {
    struct MustNotRun;
    impl DescriptorExtractor for MustNotRun {
        fn extract(&mut self, _image: &RgbImage) -> Result<FaceDetection, DetectionError> {
            panic!("extractor invoked for a blank name");
        }
    }

    let (_, workflows) = memory_workflows();
    let verdict = workflows.register(&mut MustNotRun, &frame(1, 2, 3), "   ").await;
    assert_eq!(verdict, Verdict::input_error(InputErrorReason::NameRequired));
}

#[tokio::test]
async fn registered_name_is_trimmed() {
    let (_, workflows) = memory_workflows();
    let verdict = workflows.register_detection("  ann \n", detection([0.1; DIM])).await;
    assert_eq!(verdict, Verdict::Registered { name: "ann".into() });
}

#[tokio::test]
async fn storage_failure_surfaces_as_verdict() {
    let workflows = workflows_over(Arc::new(UnavailableIndex));
    let expected = Verdict::input_error(InputErrorReason::StorageFailure);

    assert_eq!(workflows.recognize_detection(detection([0.1; DIM])).await, expected);
    assert_eq!(workflows.register_detection("ann", detection([0.1; DIM])).await, expected);

    let response = VerdictResponse::from(&expected);
    assert!(!response.success);
}

#[tokio::test]
async fn insert_failure_is_never_silent() {
    let index = Arc::new(ReadOnlyIndex {
        inserts: AtomicUsize::new(0),
    });
    let workflows = workflows_over(index.clone());

    let verdict = workflows.register_detection("ann", detection([0.1; DIM])).await;
    assert_eq!(verdict, Verdict::input_error(InputErrorReason::StorageFailure));
    assert_eq!(index.inserts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn wrong_dimension_descriptor_rejected() {
    let (index, workflows) = memory_workflows();
    let short = Ok(FaceDetection {
        location: BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
            confidence: 1.0,
            landmarks: None,
        },
        descriptor: Descriptor::new(vec![0.1, 0.2]),
    });
    let verdict = workflows.register_detection("ann", short).await;
    assert_eq!(verdict, Verdict::input_error(InputErrorReason::EncodingFailed));
    assert!(index.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_of_one_face_store_one_record() {
    let index = Arc::new(MemoryIndex::new(DIM));
    let workflows = Arc::new(workflows_over(Arc::new(SlowSearchIndex {
        inner: index.clone(),
    })));

    let mut handles = Vec::new();
    for name in ["ann", "bob", "cyd", "dee", "eve", "fay"] {
        let workflows = workflows.clone();
        handles.push(tokio::spawn(async move {
            workflows.register_detection(name, detection([0.2; DIM])).await
        }));
    }

    let mut registered = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Verdict::Registered { .. } => registered += 1,
            Verdict::Duplicate { .. } => duplicates += 1,
            other => panic!("unexpected verdict {other:?}"),
        }
    }
    assert_eq!(registered, 1);
    assert_eq!(duplicates, 5);
    assert_eq!(index.len(), 1);
}

#[tokio::test]
async fn non_finite_descriptor_rejected_and_index_stays_usable() {
    let (index, workflows) = memory_workflows();
    let expected = Verdict::input_error(InputErrorReason::EncodingFailed);

    let verdict = workflows.register_detection("nan", detection([f32::NAN; DIM])).await;
    assert_eq!(verdict, expected);
    assert!(index.is_empty());
    assert_eq!(
        workflows.recognize_detection(detection([0.1, f32::INFINITY, 0.1, 0.1])).await,
        expected
    );

    let verdict = workflows.register_detection("ann", detection([0.1; DIM])).await;
    assert_eq!(verdict, Verdict::Registered { name: "ann".into() });
    match workflows.recognize_detection(detection([0.1; DIM])).await {
        Verdict::Recognized { name, .. } => assert_eq!(name, "ann"),
        other => panic!("expected Recognized, got {other:?}"),
    }
}

#[tokio::test]
async fn flush_failure_after_insert_reports_storage_failure() {
    let workflows = workflows_over(Arc::new(FlushFailsIndex {
        inner: MemoryIndex::new(DIM),
    }));
    let verdict = workflows.register_detection("ann", detection([0.1; DIM])).await;
    assert_eq!(verdict, Verdict::input_error(InputErrorReason::StorageFailure));
}

#[tokio::test]
async fn overlong_name_rejected_before_storage() {
    let (index, workflows) = memory_workflows();
    let name = "x".repeat(MAX_NAME_BYTES + 1);

    let verdict = workflows.register(&mut PixelExtractor, &frame(40, 50, 60), &name).await;
    assert_eq!(verdict, Verdict::input_error(InputErrorReason::NameTooLong));
    let verdict = workflows.register_detection(&name, detection([0.1; DIM])).await;
    assert_eq!(verdict, Verdict::input_error(InputErrorReason::NameTooLong));
    assert!(index.is_empty());

    let response = VerdictResponse::from(&verdict);
    assert!(response.message.unwrap().contains(&MAX_NAME_BYTES.to_string()));
}

#[tokio::test]
async fn list_faces_reports_registered_names() {
    let (_, workflows) = memory_workflows();
    assert!(workflows.list_faces().await.unwrap().is_empty());

    workflows.register_detection("ann", detection([0.0; DIM])).await;
    workflows.register_detection("bob", detection([0.9; DIM])).await;
    assert_eq!(workflows.list_faces().await.unwrap(), vec!["ann", "bob"]);

    let unavailable = workflows_over(Arc::new(UnavailableIndex));
    assert!(unavailable.list_faces().await.is_err());
}
