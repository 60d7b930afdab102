//! Object detection using YOLOv8-format ONNX models.
//!
//! Execution provider selection:
//! - CUDA on Linux with NVIDIA GPU (when the `cuda` feature is enabled)
//! - CoreML on macOS
//! - CPU fallback on all platforms

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::{imageops, imageops::FilterType, DynamicImage, Rgb, RgbImage};
use ndarray::ArrayView2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;

/// Detected object in source-frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDetection {
    /// Top-left corner
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Index into the model's class list
    pub class_id: usize,
    /// Detection confidence [0, 1]
    pub confidence: f32,
}

impl ObjectDetection {
    /// Area in square pixels.
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Intersection over union with another detection.
    pub fn iou(&self, other: &ObjectDetection) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Configuration for object detection.
#[derive(Debug, Clone)]
pub struct ObjectDetectorConfig {
    /// Path to ONNX model file
    pub model_path: PathBuf,
    /// Confidence threshold for detections
    pub confidence_threshold: f32,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
    /// Input image size (model expects square input)
    pub input_size: u32,
    /// Class names by id; unnamed classes render as `class_<id>`
    pub class_names: Vec<String>,
}

impl Default for ObjectDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/best.onnx"),
            confidence_threshold: 0.5,
            nms_threshold: 0.45,
            input_size: 320,
            class_names: Vec::new(),
        }
    }
}

impl ObjectDetectorConfig {
    /// Load detector settings from environment variables.
    ///
    /// A configured labels file that cannot be read is an error.
    pub fn from_env() -> MediaResult<Self> {
        let defaults = Self::default();
        let mut config = Self {
            model_path: std::env::var("DETECTOR_MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_path),
            confidence_threshold: parse_env("DETECTOR_CONFIDENCE", defaults.confidence_threshold)?,
            nms_threshold: parse_env("DETECTOR_NMS", defaults.nms_threshold)?,
            input_size: parse_env("DETECTOR_INPUT_SIZE", defaults.input_size)?,
            class_names: Vec::new(),
        };

        if let Ok(labels_path) = std::env::var("DETECTOR_LABELS_PATH") {
            config.class_names = load_class_names(&labels_path)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> MediaResult<()> {
        if self.input_size == 0 || self.input_size % 32 != 0 {
            return Err(MediaError::invalid_config(format!(
                "detector input size must be a positive multiple of 32, got {}",
                self.input_size
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(MediaError::invalid_config(format!(
                "confidence threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            return Err(MediaError::invalid_config(format!(
                "NMS threshold must be within [0, 1], got {}",
                self.nms_threshold
            )));
        }
        Ok(())
    }

    /// Display name for a class id.
    pub fn class_name(&self, class_id: usize) -> String {
        class_label(&self.class_names, class_id)
    }
}

/// Name for `class_id`, or `class_<id>` when the list has no entry for it.
pub fn class_label(class_names: &[String], class_id: usize) -> String {
    class_names
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| format!("class_{}", class_id))
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> MediaResult<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| MediaError::invalid_config(format!("{} has invalid value '{}'", key, raw))),
        Err(_) => Ok(default),
    }
}

/// Read class names, one per line. Blank lines and `#` comments are skipped.
pub fn load_class_names(path: impl AsRef<Path>) -> MediaResult<Vec<String>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        MediaError::invalid_config(format!("cannot read labels file {}: {}", path.display(), e))
    })?;
    Ok(parse_class_names(&text))
}

fn parse_class_names(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Grey used to pad letterboxed inputs.
const LETTERBOX_FILL: u8 = 114;

/// Placement of a source frame inside the square model input.
///
/// The frame is scaled to fit, keeping its aspect ratio, and centred on a
/// grey canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    width: u32,
    height: u32,
    pad_x: u32,
    pad_y: u32,
}

impl Letterbox {
    fn new(src_width: u32, src_height: u32, input_size: u32) -> Self {
        let size = input_size as f32;
        let scale = (size / src_width.max(1) as f32).min(size / src_height.max(1) as f32);
        let width = ((src_width as f32 * scale).round() as u32).clamp(1, input_size);
        let height = ((src_height as f32 * scale).round() as u32).clamp(1, input_size);
        Self {
            scale,
            width,
            height,
            pad_x: (input_size - width) / 2,
            pad_y: (input_size - height) / 2,
        }
    }

    /// Map a model-input coordinate pair back to source pixels.
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }
}

/// Letterbox `img` to `size`, normalize to [0, 1], lay out as CHW.
fn letterbox_chw(img: &DynamicImage, size: u32) -> (Vec<f32>, Letterbox) {
    let letterbox = Letterbox::new(img.width(), img.height(), size);
    let resized = img
        .resize_exact(letterbox.width, letterbox.height, FilterType::Triangle)
        .to_rgb8();
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    imageops::overlay(
        &mut canvas,
        &resized,
        letterbox.pad_x as i64,
        letterbox.pad_y as i64,
    );

    let plane = (size * size) as usize;
    let mut chw = vec![0f32; 3 * plane];
    for (i, pixel) in canvas.pixels().enumerate() {
        chw[i] = pixel[0] as f32 / 255.0;
        chw[plane + i] = pixel[1] as f32 / 255.0;
        chw[2 * plane + i] = pixel[2] as f32 / 255.0;
    }
    (chw, letterbox)
}

/// Object detector using a YOLOv8 ONNX model.
pub struct ObjectDetector {
    session: Mutex<Session>,
    config: ObjectDetectorConfig,
}

impl ObjectDetector {
    /// Create a new object detector from config.
    ///
    /// Returns error if model file doesn't exist or cannot be loaded.
    pub fn new(config: ObjectDetectorConfig) -> MediaResult<Self> {
        config.validate()?;
        if !config.model_path.is_file() {
            return Err(MediaError::model_not_found(
                config.model_path.display().to_string(),
            ));
        }

        let session = Mutex::new(create_session(&config.model_path)?);
        info!(
            model_path = %config.model_path.display(),
            input_size = config.input_size,
            classes = config.class_names.len(),
            "Object detector initialized"
        );

        Ok(Self { session, config })
    }

    /// Detect objects in a frame.
    pub fn detect(&self, frame: &Frame) -> MediaResult<Vec<ObjectDetection>> {
        let img = DynamicImage::ImageRgb8(frame.to_image()?);
        let (input, letterbox) = self.preprocess(&img)?;
        let (shape, output) = self.run_inference(input)?;
        let detections = postprocess(
            &shape,
            &output,
            frame.width,
            frame.height,
            &letterbox,
            &self.config,
        )?;

        debug!(
            frame = frame.index,
            count = detections.len(),
            "Object detection completed"
        );
        Ok(detections)
    }

    /// Letterbox to the model input as an NCHW tensor.
    fn preprocess(&self, img: &DynamicImage) -> MediaResult<(Value, Letterbox)> {
        let size = self.config.input_size;
        let (chw, letterbox) = letterbox_chw(img, size);

        let shape = vec![1usize, 3, size as usize, size as usize];
        let tensor = Tensor::from_array((shape, chw.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::detection_failed(format!("failed to create tensor: {}", e)))?;
        Ok((tensor, letterbox))
    }

    fn run_inference(&self, input: Value) -> MediaResult<(Vec<i64>, Vec<f32>)> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| MediaError::detection_failed(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get("output0")
            .ok_or_else(|| MediaError::detection_failed("model has no output0 tensor"))?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::detection_failed(format!("failed to extract tensor: {}", e)))?;

        Ok((shape.iter().copied().collect(), data.to_vec()))
    }

    /// Get the configuration.
    pub fn config(&self) -> &ObjectDetectorConfig {
        &self.config
    }
}

/// Parse a YOLOv8 `[1, 4 + C, A]` output into detections.
///
/// Each of the `A` candidates holds `cx, cy, w, h` in model-input pixels
/// followed by `C` class scores. Boxes are un-padded and rescaled through
/// `letterbox` into source pixels.
fn postprocess(
    shape: &[i64],
    output: &[f32],
    orig_width: u32,
    orig_height: u32,
    letterbox: &Letterbox,
    config: &ObjectDetectorConfig,
) -> MediaResult<Vec<ObjectDetection>> {
    let (features, anchors) = match shape {
        [1, f, a] if *f > 4 && *a > 0 => (*f as usize, *a as usize),
        _ => {
            return Err(MediaError::detection_failed(format!(
                "unexpected output shape {:?}, expected [1, 4 + classes, anchors]",
                shape
            )))
        }
    };

    let rows = ArrayView2::from_shape((features, anchors), output).map_err(|e| {
        MediaError::detection_failed(format!("failed to reshape output: {}", e))
    })?;

    let max_x = orig_width as f32;
    let max_y = orig_height as f32;

    let mut candidates = Vec::new();
    for i in 0..anchors {
        let (class_id, confidence) = (4..features)
            .map(|f| (f - 4, rows[[f, i]]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if confidence < config.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (rows[[0, i]], rows[[1, i]], rows[[2, i]], rows[[3, i]]);
        let (x1, y1) = letterbox.to_source(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_source(cx + w / 2.0, cy + h / 2.0);
        let (x1, x2) = (x1.clamp(0.0, max_x), x2.clamp(0.0, max_x));
        let (y1, y2) = (y1.clamp(0.0, max_y), y2.clamp(0.0, max_y));

        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        candidates.push(ObjectDetection {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            class_id,
            confidence,
        });
    }

    Ok(non_maximum_suppression(candidates, config.nms_threshold))
}

/// Class-wise non-maximum suppression, highest confidence first.
fn non_maximum_suppression(
    mut detections: Vec<ObjectDetection>,
    iou_threshold: f32,
) -> Vec<ObjectDetection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<ObjectDetection> = Vec::new();
    for det in detections {
        let overlaps = keep
            .iter()
            .any(|k| k.class_id == det.class_id && k.iou(&det) > iou_threshold);
        if !overlaps {
            keep.push(det);
        }
    }
    keep
}

/// Create ONNX Runtime session with automatic execution provider selection.
fn create_session(model_path: &Path) -> MediaResult<Session> {
    let model_bytes = std::fs::read(model_path)
        .map_err(|e| MediaError::internal(format!("Failed to read model file: {}", e)))?;

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
        .map_err(|e| MediaError::internal(format!("Failed to load ONNX model: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, class_id: usize, confidence: f32) -> ObjectDetection {
        ObjectDetection {
            x,
            y,
            width: w,
            height: h,
            class_id,
            confidence,
        }
    }

    /// Build a `[1, 4 + classes, anchors]` buffer from per-anchor rows.
    fn yolo_output(classes: usize, candidates: &[[f32; 4]], scores: &[Vec<f32>]) -> (Vec<i64>, Vec<f32>) {
        let anchors = candidates.len();
        let features = 4 + classes;
        let mut data = vec![0f32; features * anchors];
        for (i, bbox) in candidates.iter().enumerate() {
            for (f, v) in bbox.iter().enumerate() {
                data[f * anchors + i] = *v;
            }
            for (c, s) in scores[i].iter().enumerate() {
                data[(4 + c) * anchors + i] = *s;
            }
        }
        (vec![1, features as i64, anchors as i64], data)
    }

    #[test]
    fn test_iou() {
        let a = det(0.0, 0.0, 10.0, 10.0, 0, 0.9);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);

        let b = det(5.0, 0.0, 10.0, 10.0, 0, 0.9);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);

        let far = det(100.0, 100.0, 1.0, 1.0, 0, 0.9);
        assert_eq!(a.iou(&far), 0.0);
    }

    #[test]
    fn test_nms_is_class_wise() {
        let kept = non_maximum_suppression(
            vec![
                det(0.0, 0.0, 10.0, 10.0, 0, 0.6),
                det(1.0, 1.0, 10.0, 10.0, 0, 0.9),
                det(1.0, 1.0, 10.0, 10.0, 1, 0.7),
            ],
            0.45,
        );

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_id, 1);
    }

    #[test]
    fn test_letterbox_keeps_aspect_ratio() {
        let lb = Letterbox::new(1920, 1080, 320);
        assert_eq!((lb.width, lb.height), (320, 180));
        assert_eq!((lb.pad_x, lb.pad_y), (0, 70));

        let portrait = Letterbox::new(1080, 1920, 320);
        assert_eq!((portrait.width, portrait.height), (180, 320));
        assert_eq!((portrait.pad_x, portrait.pad_y), (70, 0));

        let square = Letterbox::new(640, 640, 320);
        assert_eq!((square.pad_x, square.pad_y), (0, 0));
        assert!((square.scale - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_letterbox_input_is_padded_grey() {
        let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 32, Rgb([255, 255, 255])));
        let (chw, lb) = letterbox_chw(&white, 32);
        assert_eq!((lb.width, lb.height, lb.pad_y), (32, 16, 8));
        assert_eq!(chw.len(), 3 * 32 * 32);

        let fill = LETTERBOX_FILL as f32 / 255.0;
        // Top padding band, then the image in the middle rows
        assert!((chw[0] - fill).abs() < 1e-6);
        assert!((chw[16 * 32 + 16] - 1.0).abs() < 1e-2);
        assert!((chw[31 * 32 + 31] - fill).abs() < 1e-6);
    }

    #[test]
    fn test_postprocess_unpads_letterboxed_boxes() {
        let config = ObjectDetectorConfig::default();
        // 640x160 source sits in rows 120..200 of the 320x320 input at half scale
        let letterbox = Letterbox::new(640, 160, 320);
        let (shape, data) = yolo_output(2, &[[160.0, 160.0, 32.0, 32.0]], &[vec![0.1, 0.8]]);

        let dets = postprocess(&shape, &data, 640, 160, &letterbox, &config).unwrap();
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!(d.class_id, 1);
        assert!((d.x - 288.0).abs() < 1e-3);
        assert!((d.y - 48.0).abs() < 1e-3);
        assert!((d.width - 64.0).abs() < 1e-3);
        assert!((d.height - 64.0).abs() < 1e-3);
    }

    #[test]
    fn test_postprocess_thresholds_and_clamps() {
        let config = ObjectDetectorConfig::default();
        let (shape, data) = yolo_output(
            1,
            &[[0.0, 0.0, 40.0, 40.0], [100.0, 100.0, 10.0, 10.0]],
            &[vec![0.95], vec![0.3]],
        );

        let dets =
            postprocess(&shape, &data, 320, 320, &Letterbox::new(320, 320, 320), &config).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].x, 0.0);
        assert_eq!(dets[0].y, 0.0);
        assert!((dets[0].width - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_postprocess_rejects_bad_shape() {
        let config = ObjectDetectorConfig::default();
        let letterbox = Letterbox::new(10, 10, 320);
        let err = postprocess(&[1, 4, 10], &[0.0; 40], 10, 10, &letterbox, &config).unwrap_err();
        assert!(matches!(err, MediaError::DetectionFailed(_)));
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config = ObjectDetectorConfig::default();
        assert_eq!(config.input_size, 320);
        assert!((config.confidence_threshold - 0.5).abs() < 1e-6);
        assert!(config.validate().is_ok());

        let bad = ObjectDetectorConfig {
            input_size: 300,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_class_names() {
        let names = parse_class_names("# fish labels\nguppy\n\n  tetra \n");
        assert_eq!(names, vec!["guppy", "tetra"]);

        let config = ObjectDetectorConfig {
            class_names: names,
            ..Default::default()
        };
        assert_eq!(config.class_name(1), "tetra");
        assert_eq!(config.class_name(7), "class_7");
    }

    #[test]
    fn test_missing_model_is_reported() {
        let config = ObjectDetectorConfig {
            model_path: PathBuf::from("/nonexistent/best.onnx"),
            ..Default::default()
        };
        assert!(matches!(
            ObjectDetector::new(config),
            Err(MediaError::ModelNotFound(_))
        ));
    }
}
