//! Shared data models for subject-locked vertical reframing.
//!
//! This crate provides Serde-serializable types for:
//! - Bounding boxes and the IoU overlap measure
//! - Per-frame detections
//! - Crop windows and target aspect ratios
//! - Source video properties

pub mod bbox;
pub mod crop;
pub mod detection;
pub mod error;
pub mod video;

// Re-export common types
pub use bbox::{iou, BoundingBox};
pub use crop::{AspectRatio, CropWindow};
pub use detection::{Detection, PERSON_CLASS_ID};
pub use error::{ModelError, ModelResult};
pub use video::VideoProps;
