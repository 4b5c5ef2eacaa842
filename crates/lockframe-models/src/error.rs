//! Error types for model validation.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised when constructing or parsing model values.
#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("Degenerate bounding box ({x1}, {y1}, {x2}, {y2}): requires x1 < x2 and y1 < y2")]
    DegenerateBox { x1: f64, y1: f64, x2: f64, y2: f64 },

    #[error("Invalid bounding box '{0}': expected four comma-separated numbers x1,y1,x2,y2")]
    InvalidBoxFormat(String),

    #[error("Invalid aspect ratio '{0}': expected W:H with non-zero parts")]
    InvalidAspectRatio(String),
}
