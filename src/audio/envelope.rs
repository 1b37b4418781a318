//! Amplitude envelopes for crossfading output sinks.

use std::f64::consts::PI;

/// Fades run slightly longer than requested so that accumulated floating
/// point steps cannot stall exactly at the bound before the caller removes
/// or retargets the sink.
const FADE_OVERSHOOT: f64 = 1.01;

/// Exponent shaping the crossfade curve.
const FADE_SHAPE: f64 = 1.772;

/// The fade shape, mapping `x ∈ [0, 1]` to a gain in `[0, 1]`.
///
/// `fade_curve(0.0) == 0.0` and `fade_curve(1.0) == 1.0`; the curve is
/// monotonically increasing in between.
pub fn fade_curve(x: f64) -> f64 {
    let x = x.clamp(0.0, 1.0);
    let base = -0.5 * ((x + 1.0) * PI).cos() + 0.5;
    (-base.max(0.0).powf(FADE_SHAPE) + 1.0).clamp(0.0, 1.0)
}

/// Direction in which an envelope moves along the fade curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeDirection {
    /// From silence to full level.
    In,
    /// From full level to silence.
    Out,
}

/// A fade in progress on one output sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    position: f64,
    direction: FadeDirection,
    /// Curve distance covered per block.
    step: f64,
}

impl Envelope {
    /// Starts a fade over `duration` seconds, advanced once per block of
    /// `block_seconds`.
    pub fn new(direction: FadeDirection, duration: f64, block_seconds: f64) -> Self {
        let span = (duration * FADE_OVERSHOOT).max(f64::MIN_POSITIVE);
        let position = match direction {
            FadeDirection::In => 0.0,
            FadeDirection::Out => 1.0,
        };
        Self {
            position,
            direction,
            step: block_seconds / span,
        }
    }

    pub fn fade_in(duration: f64, block_seconds: f64) -> Self {
        Self::new(FadeDirection::In, duration, block_seconds)
    }

    pub fn fade_out(duration: f64, block_seconds: f64) -> Self {
        Self::new(FadeDirection::Out, duration, block_seconds)
    }

    pub fn direction(&self) -> FadeDirection {
        self.direction
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Gain at the current position.
    pub fn gain(&self) -> f32 {
        fade_curve(self.position) as f32
    }

    /// Returns the gain for the next block and advances by one block.
    pub fn next_gain(&mut self) -> f32 {
        let gain = self.gain();
        match self.direction {
            FadeDirection::In => self.position += self.step,
            FadeDirection::Out => self.position -= self.step,
        }
        gain
    }

    /// True once the envelope has moved past its bound.
    pub fn is_finished(&self) -> bool {
        match self.direction {
            FadeDirection::In => self.position > 1.0,
            FadeDirection::Out => self.position < 0.0,
        }
    }
}
