//! Exponential smoothing for scalar signals.
//!
//! An optional stage: the reframe job runs the tracked center through it when
//! `center_smoothing` is configured, and callers may use it for any other
//! derived series (crop offset, zoom).

/// Default smoothing factor.
pub const DEFAULT_ALPHA: f64 = 0.1;

/// First-order low-pass filter: `value = alpha * input + (1 - alpha) * value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialSmoother {
    alpha: f64,
    value: f64,
}

impl ExponentialSmoother {
    /// Create a smoother seeded with `initial_value`.
    ///
    /// `alpha` is clamped into `(0, 1]`; 1.0 disables smoothing.
    pub fn new(initial_value: f64, alpha: f64) -> Self {
        let alpha = if alpha.is_nan() {
            DEFAULT_ALPHA
        } else {
            alpha.clamp(f64::MIN_POSITIVE, 1.0)
        };
        Self {
            alpha,
            value: initial_value,
        }
    }

    /// Feed one sample and return the smoothed value.
    pub fn update(&mut self, new_value: f64) -> f64 {
        self.value = self.alpha * new_value + (1.0 - self.alpha) * self.value;
        self.value
    }

    /// Current smoothed value.
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}
