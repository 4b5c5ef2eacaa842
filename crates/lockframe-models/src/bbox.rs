//! Axis-aligned bounding boxes in pixel coordinates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Bounding box in pixel coordinates, stored as opposite corners.
///
/// A well-formed box has `x1 < x2` and `y1 < y2`. Boxes that violate this are
/// never rejected by [`BoundingBox::new`]; they simply report zero area, which
/// makes every overlap against them zero. Use [`BoundingBox::try_new`] where
/// user input must be validated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge x-coordinate
    pub x1: f64,
    /// Top edge y-coordinate
    pub y1: f64,
    /// Right edge x-coordinate
    pub x2: f64,
    /// Bottom edge y-coordinate
    pub y2: f64,
}

impl BoundingBox {
    /// Create a box from corner coordinates without validation.
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Create a box, rejecting degenerate or non-finite corners.
    pub fn try_new(x1: f64, y1: f64, x2: f64, y2: f64) -> ModelResult<Self> {
        let finite = [x1, y1, x2, y2].iter().all(|v| v.is_finite());
        if !finite || x1 >= x2 || y1 >= y2 {
            return Err(ModelError::DegenerateBox { x1, y1, x2, y2 });
        }
        Ok(Self::new(x1, y1, x2, y2))
    }

    /// Box width, zero for degenerate boxes.
    #[inline]
    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    /// Box height, zero for degenerate boxes.
    #[inline]
    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Box area in pixels.
    #[inline]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Horizontal center.
    #[inline]
    pub fn center_x(&self) -> f64 {
        (self.x1 + self.x2) / 2.0
    }

    /// Whether the box has no positive area.
    pub fn is_degenerate(&self) -> bool {
        self.area() <= 0.0
    }

    /// Box with every coordinate truncated toward zero.
    pub fn truncated(&self) -> Self {
        Self::new(
            self.x1.trunc(),
            self.y1.trunc(),
            self.x2.trunc(),
            self.y2.trunc(),
        )
    }

    /// Compute Intersection over Union with another box.
    ///
    /// Always in `[0, 1]`. Returns `0.0` for disjoint boxes and when the union
    /// is empty (both boxes degenerate).
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let inter_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let inter_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = inter_w * inter_h;
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            (intersection / union).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Intersection over Union of two boxes. See [`BoundingBox::iou`].
#[inline]
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    a.iou(b)
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x1, self.y1, self.x2, self.y2)
    }
}

impl FromStr for BoundingBox {
    type Err = ModelError;

    /// Parse `"x1,y1,x2,y2"`; the result must be non-degenerate.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let values: Vec<f64> = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| ModelError::InvalidBoxFormat(s.to_string()))?;

        match values.as_slice() {
            [x1, y1, x2, y2] => Self::try_new(*x1, *y1, *x2, *y2),
            _ => Err(ModelError::InvalidBoxFormat(s.to_string())),
        }
    }
}
