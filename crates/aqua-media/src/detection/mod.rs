//! Object detection and overlays.
//!
//! | Piece | Role |
//! |-------|------|
//! | `ObjectDetector` | YOLOv8-format ONNX inference |
//! | `draw_detections` | Burns boxes and class/confidence labels into a frame |
//! | `Annotator` | Raw frame in, annotated frame out |
//! | `YoloAnnotator` | Detector + overlay behind the `Annotator` seam |

pub mod annotator;
pub mod object_detector;
pub mod overlay;

pub use annotator::{AnnotationFailure, AnnotationResult, Annotator, YoloAnnotator};
pub use object_detector::{load_class_names, ObjectDetection, ObjectDetector, ObjectDetectorConfig};
pub use overlay::{class_color, draw_detections, label_text, OverlayStyle};
