//! Built-in oscillator generators.

use super::patch::PatchSpec;
use super::{ParamSpec, SoundGenerator};
use crate::error::PatchError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Supported waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Saw,
    Square,
    Noise,
}

/// Decay rate of the retriggered amplitude envelope, per second.
const LOOP_DECAY: f64 = 6.0;

/// A single oscillator with gain, pan and an optional retrigger loop.
///
/// With `loop` above zero, the amplitude restarts a decaying envelope every
/// `loop` seconds. Changing `loop` restarts the cycle and requests a splice
/// point so that the renderer can cut at the new boundary.
#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: Waveform,
    sample_rate: f64,
    params: Vec<ParamSpec>,
    values: Vec<f64>,
    phase: f64,
    loop_pos: f64,
    noise_state: u32,
    splice_requested: bool,
}

impl Oscillator {
    pub fn new(spec: &PatchSpec, sample_rate: u32) -> Self {
        let params = spec.effective_params();
        let values = params.iter().map(|p| p.clamp(p.default)).collect();
        Self {
            waveform: spec.waveform,
            sample_rate: sample_rate as f64,
            params,
            values,
            phase: 0.0,
            loop_pos: 0.0,
            noise_state: 0x9E37_79B9,
            splice_requested: false,
        }
    }

    /// Current value of a parameter.
    pub fn value(&self, name: &str) -> Option<f64> {
        let index = self.params.iter().position(|p| p.name == name)?;
        Some(self.values[index])
    }

    fn value_or(&self, name: &str, fallback: f64) -> f64 {
        self.value(name).unwrap_or(fallback)
    }

    fn next_noise(&mut self) -> f64 {
        // xorshift32
        let mut x = self.noise_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.noise_state = x;
        (x as f64 / u32::MAX as f64) * 2.0 - 1.0
    }

    fn next_sample(&mut self, inc: f64) -> f64 {
        let sample = match self.waveform {
            Waveform::Sine => (2.0 * PI * self.phase).sin(),
            Waveform::Saw => 2.0 * self.phase - 1.0 - poly_blep(self.phase, inc),
            Waveform::Square => {
                let mut value = if self.phase < 0.5 { 1.0 } else { -1.0 };
                value += poly_blep(self.phase, inc);
                value -= poly_blep((self.phase + 0.5) % 1.0, inc);
                value
            }
            Waveform::Noise => self.next_noise(),
        };
        self.phase += inc;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }
        sample
    }

    fn loop_gain(&mut self) -> f64 {
        let period = self.value_or("loop", 0.0);
        if period <= 0.0 {
            return 1.0;
        }
        let gain = (-LOOP_DECAY * self.loop_pos).exp();
        self.loop_pos += 1.0 / self.sample_rate;
        if self.loop_pos >= period {
            self.loop_pos -= period;
        }
        gain
    }
}

impl SoundGenerator for Oscillator {
    fn set_param(&mut self, name: &str, value: f64) -> Result<(), PatchError> {
        let index = self
            .params
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| PatchError::UnknownParam(name.to_string()))?;
        let value = self.params[index].clamp(value);
        if name == "loop" && value != self.values[index] {
            self.loop_pos = 0.0;
            self.splice_requested = true;
        }
        self.values[index] = value;
        Ok(())
    }

    fn params(&self) -> Vec<ParamSpec> {
        self.params.clone()
    }

    fn process(&mut self) -> (f32, f32) {
        let inc = self.value_or("freq", 440.0) / self.sample_rate;
        let gain = self.value_or("gain", 0.5) * self.loop_gain();
        let pan = self.value_or("pan", 0.0).clamp(-1.0, 1.0);
        let sample = self.next_sample(inc) * gain;
        let left = sample * (1.0 - pan).min(1.0);
        let right = sample * (1.0 + pan).min(1.0);
        (left as f32, right as f32)
    }

    fn take_splice_point(&mut self) -> bool {
        std::mem::take(&mut self.splice_requested)
    }
}

/// PolyBLEP correction for the discontinuity at phase wrap.
fn poly_blep(t: f64, dt: f64) -> f64 {
    if dt <= 0.0 {
        0.0
    } else if t < dt {
        let t = t / dt;
        2.0 * t - t * t - 1.0
    } else if t > 1.0 - dt {
        let t = (t - 1.0) / dt;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}
