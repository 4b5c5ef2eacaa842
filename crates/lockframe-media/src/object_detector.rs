//! YOLOv8 person detector on ONNX Runtime.
//!
//! Execution provider is picked at session creation:
//! - CUDA on Linux with an NVIDIA GPU (when the `cuda` feature is enabled)
//! - CoreML on macOS
//! - CPU everywhere else

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::imageops::FilterType;
use image::RgbImage;
use lockframe_models::{iou, BoundingBox, Detection};
use ndarray::ArrayView2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use crate::detector::SubjectDetector;
use crate::error::{MediaError, MediaResult};

/// Box coordinates plus one score per COCO class.
const NUM_CLASSES: usize = 80;
const NUM_FEATURES: usize = 4 + NUM_CLASSES;

/// Configuration for [`ObjectDetector`].
#[derive(Debug, Clone)]
pub struct ObjectDetectorConfig {
    /// Path to the ONNX model file
    pub model_path: PathBuf,
    /// Candidates scoring below this are dropped before NMS
    pub confidence_threshold: f32,
    /// IoU above which a weaker same-class box is suppressed
    pub nms_threshold: f32,
    /// Square model input side
    pub input_size: u32,
}

impl Default for ObjectDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/yolov8n.onnx"),
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            input_size: 640,
        }
    }
}

/// YOLOv8 detector usable anywhere a [`SubjectDetector`] is expected.
///
/// The session sits behind a mutex, so one detector can be shared between
/// threads; inference calls are serialized.
pub struct ObjectDetector {
    session: Mutex<Session>,
    config: ObjectDetectorConfig,
}

impl ObjectDetector {
    /// Load the model named by `config`.
    pub fn new(config: ObjectDetectorConfig) -> MediaResult<Self> {
        if !config.model_path.exists() {
            return Err(MediaError::model_not_found(config.model_path.display().to_string()));
        }

        let session = Mutex::new(create_session(&config.model_path)?);
        info!(
            model_path = %config.model_path.display(),
            input_size = config.input_size,
            "Object detector initialized"
        );

        Ok(Self { session, config })
    }

    pub fn config(&self) -> &ObjectDetectorConfig {
        &self.config
    }

    /// Resize to the model input, scale to [0, 1], lay out as NCHW.
    fn preprocess(&self, frame: &RgbImage) -> MediaResult<Value> {
        let side = self.config.input_size;
        let resized = image::imageops::resize(frame, side, side, FilterType::Triangle);
        let plane = (side * side) as usize;

        let mut chw = vec![0.0f32; 3 * plane];
        for (i, pixel) in resized.pixels().enumerate() {
            chw[i] = pixel[0] as f32 / 255.0;
            chw[plane + i] = pixel[1] as f32 / 255.0;
            chw[2 * plane + i] = pixel[2] as f32 / 255.0;
        }

        let shape = vec![1usize, 3, side as usize, side as usize];
        Tensor::from_array((shape, chw.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::detection_failed(format!("Failed to create tensor: {}", e)))
    }

    fn run_inference(&self, input: Value) -> MediaResult<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| MediaError::detection_failed(format!("ONNX inference failed: {}", e)))?;

        // [1, 84, N]
        let output = outputs
            .get("output0")
            .ok_or_else(|| MediaError::detection_failed("Missing output0 tensor"))?;

        let (_, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::detection_failed(format!("Failed to extract tensor: {}", e)))?;

        Ok(data.to_vec())
    }
}

impl SubjectDetector for ObjectDetector {
    fn detect(&self, frame: &RgbImage, class_id: usize) -> MediaResult<Vec<Detection>> {
        let input = self.preprocess(frame)?;
        let outputs = self.run_inference(input)?;

        let scale = (
            frame.width() as f64 / self.config.input_size as f64,
            frame.height() as f64 / self.config.input_size as f64,
        );
        let candidates = decode_predictions(
            &outputs,
            class_id,
            self.config.confidence_threshold,
            scale,
            (frame.width() as f64, frame.height() as f64),
        )?;
        let detections = non_maximum_suppression(candidates, self.config.nms_threshold as f64);

        debug!(count = detections.len(), class_id, "Object detection completed");
        Ok(detections)
    }
}

/// Turn raw `[84, N]` YOLOv8 output into pixel-space detections of one class.
///
/// A candidate is kept when `class_id` is its best-scoring class and that
/// score reaches `threshold`. Boxes are scaled by `scale` and clipped to
/// `frame_size`.
pub fn decode_predictions(
    outputs: &[f32],
    class_id: usize,
    threshold: f32,
    scale: (f64, f64),
    frame_size: (f64, f64),
) -> MediaResult<Vec<Detection>> {
    if class_id >= NUM_CLASSES {
        return Err(MediaError::invalid_config(format!(
            "Class id {} is outside the model's {} classes",
            class_id, NUM_CLASSES
        )));
    }
    if outputs.is_empty() || outputs.len() % NUM_FEATURES != 0 {
        return Err(MediaError::detection_failed(format!(
            "Unexpected output size {} (not a multiple of {})",
            outputs.len(),
            NUM_FEATURES
        )));
    }

    let num_boxes = outputs.len() / NUM_FEATURES;
    let features = ArrayView2::from_shape((NUM_FEATURES, num_boxes), outputs)
        .map_err(|e| MediaError::detection_failed(format!("Failed to reshape output: {}", e)))?;
    let rows = features.t();

    let (scale_x, scale_y) = scale;
    let (frame_w, frame_h) = frame_size;
    let mut candidates = Vec::new();

    for row in rows.outer_iter() {
        let mut best_class = 0;
        let mut best_score = f32::MIN;
        for c in 0..NUM_CLASSES {
            let score = row[4 + c];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_class != class_id || best_score < threshold {
            continue;
        }

        let (cx, cy, w, h) = (row[0] as f64, row[1] as f64, row[2] as f64, row[3] as f64);
        let bbox = BoundingBox::new(
            ((cx - w / 2.0) * scale_x).clamp(0.0, frame_w),
            ((cy - h / 2.0) * scale_y).clamp(0.0, frame_h),
            ((cx + w / 2.0) * scale_x).clamp(0.0, frame_w),
            ((cy + h / 2.0) * scale_y).clamp(0.0, frame_h),
        );
        if bbox.is_degenerate() {
            continue;
        }
        candidates.push(Detection::new(bbox, best_score as f64));
    }

    Ok(candidates)
}

/// Greedy NMS: keep the strongest box, drop anything overlapping it by more
/// than `threshold`, repeat.
pub fn non_maximum_suppression(mut detections: Vec<Detection>, threshold: f64) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if keep.iter().all(|kept| iou(&kept.bbox, &candidate.bbox) <= threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Create an ONNX Runtime session, preferring hardware execution providers.
fn create_session(model_path: &Path) -> MediaResult<Session> {
    let model_bytes = std::fs::read(model_path)?;

    let builder = Session::builder()
        .map_err(|e| MediaError::internal(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| MediaError::internal(format!("Failed to set optimization level: {}", e)))?;

    #[cfg(all(target_os = "linux", feature = "cuda"))]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        if let Ok(cuda_builder) = builder
            .clone()
            .with_execution_providers([CUDAExecutionProvider::default().build()])
        {
            if let Ok(session) = cuda_builder.commit_from_memory(&model_bytes) {
                info!("Using CUDA execution provider for object detection");
                return Ok(session);
            }
        }
        debug!("CUDA execution provider not available, trying alternatives");
    }

    #[cfg(target_os = "macos")]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        if let Ok(coreml_builder) = builder
            .clone()
            .with_execution_providers([CoreMLExecutionProvider::default().build()])
        {
            if let Ok(session) = coreml_builder.commit_from_memory(&model_bytes) {
                info!("Using CoreML execution provider for object detection");
                return Ok(session);
            }
        }
        debug!("CoreML execution provider not available, using CPU");
    }

    info!("Using CPU execution provider for object detection");
    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| MediaError::model_not_found(format!("{}: {}", model_path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a `[84, N]` output from `(cx, cy, w, h, class, score)` rows.
    fn raw_output(rows: &[(f32, f32, f32, f32, usize, f32)]) -> Vec<f32> {
        let n = rows.len();
        let mut out = vec![0.0f32; NUM_FEATURES * n];
        for (i, &(cx, cy, w, h, class, score)) in rows.iter().enumerate() {
            out[i] = cx;
            out[n + i] = cy;
            out[2 * n + i] = w;
            out[3 * n + i] = h;
            out[(4 + class) * n + i] = score;
        }
        out
    }

    #[test]
    fn test_config_default() {
        let config = ObjectDetectorConfig::default();
        assert_eq!(config.input_size, 640);
        assert_eq!(config.model_path, PathBuf::from("models/yolov8n.onnx"));
        assert!((config.confidence_threshold - 0.25).abs() < 1e-6);
        assert!((config.nms_threshold - 0.45).abs() < 1e-6);
    }

    #[test]
    fn test_missing_model_is_reported() {
        let config = ObjectDetectorConfig {
            model_path: PathBuf::from("/nonexistent/model.onnx"),
            ..ObjectDetectorConfig::default()
        };
        assert!(matches!(ObjectDetector::new(config), Err(MediaError::ModelNotFound(_))));
    }

    #[test]
    fn test_decode_scales_to_frame_pixels() {
        let out = raw_output(&[(320.0, 320.0, 64.0, 128.0, 0, 0.9)]);
        let dets = decode_predictions(&out, 0, 0.25, (3.0, 1.6875), (1920.0, 1080.0)).unwrap();

        assert_eq!(dets.len(), 1);
        let b = dets[0].bbox;
        assert!((b.x1 - 864.0).abs() < 1e-6);
        assert!((b.x2 - 1056.0).abs() < 1e-6);
        assert!((b.y1 - 432.0).abs() < 1e-6);
        assert!((b.y2 - 648.0).abs() < 1e-6);
        assert!((dets[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_filters_class_and_confidence() {
        let out = raw_output(&[
            (100.0, 100.0, 20.0, 20.0, 0, 0.8),
            (200.0, 100.0, 20.0, 20.0, 2, 0.95),
            (300.0, 100.0, 20.0, 20.0, 0, 0.1),
        ]);
        let dets = decode_predictions(&out, 0, 0.25, (1.0, 1.0), (640.0, 640.0)).unwrap();
        assert_eq!(dets.len(), 1);
        assert!((dets[0].bbox.center_x() - 100.0).abs() < 1e-6);

        let cars = decode_predictions(&out, 2, 0.25, (1.0, 1.0), (640.0, 640.0)).unwrap();
        assert_eq!(cars.len(), 1);
    }

    #[test]
    fn test_decode_clips_to_frame() {
        let out = raw_output(&[(5.0, 5.0, 40.0, 40.0, 0, 0.9)]);
        let dets = decode_predictions(&out, 0, 0.25, (1.0, 1.0), (640.0, 640.0)).unwrap();
        assert_eq!(dets[0].bbox.x1, 0.0);
        assert_eq!(dets[0].bbox.y1, 0.0);
        assert_eq!(dets[0].bbox.x2, 25.0);
    }

    #[test]
    fn test_decode_rejects_bad_shapes() {
        assert!(decode_predictions(&[0.0; 85], 0, 0.25, (1.0, 1.0), (1.0, 1.0)).is_err());
        assert!(decode_predictions(&[], 0, 0.25, (1.0, 1.0), (1.0, 1.0)).is_err());
        assert!(decode_predictions(&[0.0; 84], 80, 0.25, (1.0, 1.0), (1.0, 1.0)).is_err());
    }

    #[test]
    fn test_nms_keeps_strongest_of_overlapping() {
        let dets = vec![
            Detection::new(BoundingBox::new(0.0, 0.0, 100.0, 100.0), 0.6),
            Detection::new(BoundingBox::new(5.0, 0.0, 105.0, 100.0), 0.9),
            Detection::new(BoundingBox::new(300.0, 0.0, 400.0, 100.0), 0.5),
        ];
        let kept = non_maximum_suppression(dets, 0.45);

        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.9).abs() < 1e-9);
        assert!((kept[1].confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_nms_empty() {
        assert!(non_maximum_suppression(Vec::new(), 0.45).is_empty());
    }
}
